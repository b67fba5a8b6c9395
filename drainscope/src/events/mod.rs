//! Failure reporting for observability.
//!
//! Components that handle an error locally (a worker whose item failed, a
//! fetcher that lost the race, a periodic action) describe it with a
//! [`FailureReport`] and hand it to an [`ErrorSink`]. Where the report ends
//! up is the sink's business.

mod sink;

pub use sink::{CollectingErrorSink, ErrorSink, LoggingErrorSink, NoOpErrorSink};

#[cfg(test)]
pub use sink::MockErrorSink;

use crate::errors::{CoreError, ErrorKind};
use crate::pool::WorkItem;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

/// Which component raised a failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureSource {
    /// A fan-out fetch.
    Aggregator,
    /// A pool worker processing an item.
    Worker,
    /// A periodic action.
    Periodic,
    /// The shutdown sequence.
    Shutdown,
}

impl fmt::Display for FailureSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Aggregator => write!(f, "aggregator"),
            Self::Worker => write!(f, "worker"),
            Self::Periodic => write!(f, "periodic"),
            Self::Shutdown => write!(f, "shutdown"),
        }
    }
}

/// Structured description of one handled failure.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FailureReport {
    /// Component that raised the failure.
    pub source: FailureSource,
    /// Operation name (fetch field, action name, "process", "drain").
    pub operation: String,
    /// Classification.
    pub kind: ErrorKind,
    /// Human-readable message.
    pub message: String,
    /// Work item involved, if any.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub item_id: Option<Uuid>,
    /// Descriptor of the work item involved, if any.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub descriptor: Option<String>,
    /// Worker that handled the item, if any.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub worker_id: Option<usize>,
    /// When the failure was observed.
    pub timestamp: DateTime<Utc>,
}

impl FailureReport {
    /// Creates a report.
    #[must_use]
    pub fn new(
        source: FailureSource,
        operation: impl Into<String>,
        kind: ErrorKind,
        message: impl Into<String>,
    ) -> Self {
        Self {
            source,
            operation: operation.into(),
            kind,
            message: message.into(),
            item_id: None,
            descriptor: None,
            worker_id: None,
            timestamp: Utc::now(),
        }
    }

    /// Creates a report describing `err`.
    #[must_use]
    pub fn from_error(source: FailureSource, operation: impl Into<String>, err: &CoreError) -> Self {
        Self::new(source, operation, err.kind(), err.to_string())
    }

    /// Attaches the work item.
    #[must_use]
    pub fn with_item(mut self, item: &WorkItem) -> Self {
        self.item_id = Some(item.id());
        self.descriptor = Some(item.descriptor().to_string());
        self
    }

    /// Attaches the worker id.
    #[must_use]
    pub const fn with_worker(mut self, worker_id: usize) -> Self {
        self.worker_id = Some(worker_id);
        self
    }

    /// Converts the report to JSON.
    #[must_use]
    pub fn to_json(&self) -> serde_json::Value {
        serde_json::to_value(self).unwrap_or(serde_json::Value::Null)
    }
}
