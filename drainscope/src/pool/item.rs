//! Work items and admission tickets.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// An opaque unit of work.
///
/// Created at admission, owned by the queue until dequeued, then owned by
/// exactly one worker until processing ends.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkItem {
    id: Uuid,
    descriptor: String,
    payload: serde_json::Value,
    admitted_at: DateTime<Utc>,
}

impl WorkItem {
    /// Creates a work item with a fresh id.
    #[must_use]
    pub fn new(descriptor: impl Into<String>, payload: serde_json::Value) -> Self {
        Self {
            id: Uuid::new_v4(),
            descriptor: descriptor.into(),
            payload,
            admitted_at: Utc::now(),
        }
    }

    /// Creates a work item with no payload.
    #[must_use]
    pub fn named(descriptor: impl Into<String>) -> Self {
        Self::new(descriptor, serde_json::Value::Null)
    }

    /// Returns the unique id.
    #[must_use]
    pub const fn id(&self) -> Uuid {
        self.id
    }

    /// Returns the identifying descriptor.
    #[must_use]
    pub fn descriptor(&self) -> &str {
        &self.descriptor
    }

    /// Returns the payload.
    #[must_use]
    pub const fn payload(&self) -> &serde_json::Value {
        &self.payload
    }

    /// Returns when the item was created.
    #[must_use]
    pub const fn admitted_at(&self) -> DateTime<Utc> {
        self.admitted_at
    }
}

/// Acknowledgement returned by the admission entry point.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct AdmissionTicket {
    /// Id of the admitted item.
    pub item_id: Uuid,
    /// Queue depth right after admission.
    pub queue_depth: usize,
}
