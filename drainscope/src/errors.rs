//! Error types for drainscope.
//!
//! Every fallible operation in the crate returns [`CoreError`]. Scope-derived
//! conditions ([`ScopeError`]) convert into it so callers can tell a deadline
//! from an upstream failure without string matching.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Duration;
use thiserror::Error;

/// Boxed error type returned by injected capabilities.
pub type BoxError = Box<dyn std::error::Error + Send + Sync + 'static>;

/// Why a scope ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Error, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ScopeError {
    /// The scope, or one of its ancestors, was cancelled explicitly.
    #[error("scope cancelled")]
    Cancelled,

    /// The scope's bounded duration elapsed.
    #[error("deadline exceeded")]
    DeadlineExceeded,
}

/// The main error type for drainscope operations.
#[derive(Debug, Error)]
pub enum CoreError {
    /// A scope's bounded duration elapsed before the work completed.
    #[error("deadline exceeded")]
    DeadlineExceeded,

    /// An ancestor scope was cancelled.
    #[error("operation cancelled")]
    Cancelled,

    /// An injected capability failed for domain reasons.
    #[error("upstream failure in {operation}: {source}")]
    Upstream {
        /// Name of the failing operation (fetcher field, worker, action).
        operation: String,
        /// The capability's own error.
        #[source]
        source: BoxError,
    },

    /// Admission rejected because the queue is at capacity.
    #[error("queue full (capacity {capacity})")]
    QueueFull {
        /// Configured queue capacity.
        capacity: usize,
    },

    /// Admission rejected because the admission gate is closed.
    #[error("shutting down: no new work accepted")]
    ShuttingDown,

    /// The drain did not finish within the shutdown deadline.
    #[error("shutdown deadline of {deadline:?} elapsed with {unstarted} item(s) never started")]
    ShutdownTimeout {
        /// The deadline that elapsed.
        deadline: Duration,
        /// Number of queued items that were never started.
        unstarted: usize,
    },

    /// A fan-out aggregation failed; `source` is the root cause.
    #[error("aggregation failed for id {id}: {source}")]
    Aggregation {
        /// The id passed to `aggregate`.
        id: String,
        /// The first error observed.
        #[source]
        source: Box<CoreError>,
    },

    /// A spawned task panicked.
    #[error("task {task} panicked")]
    Panicked {
        /// Name of the task.
        task: String,
    },

    /// Configuration rejected at construction.
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),
}

impl CoreError {
    /// Wraps a capability error as an upstream failure.
    pub fn upstream(operation: impl Into<String>, source: impl Into<BoxError>) -> Self {
        Self::Upstream {
            operation: operation.into(),
            source: source.into(),
        }
    }

    /// Returns the innermost error, unwrapping aggregation layers.
    #[must_use]
    pub fn root_cause(&self) -> &Self {
        match self {
            Self::Aggregation { source, .. } => source.root_cause(),
            other => other,
        }
    }

    /// Returns true if the root cause is an elapsed deadline.
    #[must_use]
    pub fn is_deadline_exceeded(&self) -> bool {
        matches!(self.root_cause(), Self::DeadlineExceeded)
    }

    /// Returns true if the root cause is an ancestor cancellation.
    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        matches!(self.root_cause(), Self::Cancelled)
    }

    /// Returns the error's classification tag.
    #[must_use]
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::DeadlineExceeded => ErrorKind::DeadlineExceeded,
            Self::Cancelled => ErrorKind::Cancelled,
            Self::Upstream { .. } => ErrorKind::UpstreamFailure,
            Self::QueueFull { .. } => ErrorKind::QueueFull,
            Self::ShuttingDown => ErrorKind::ShuttingDown,
            Self::ShutdownTimeout { .. } => ErrorKind::ShutdownTimeout,
            Self::Aggregation { source, .. } => source.kind(),
            Self::Panicked { .. } => ErrorKind::Panicked,
            Self::InvalidConfig(_) => ErrorKind::InvalidConfig,
        }
    }
}

impl From<ScopeError> for CoreError {
    fn from(err: ScopeError) -> Self {
        match err {
            ScopeError::Cancelled => Self::Cancelled,
            ScopeError::DeadlineExceeded => Self::DeadlineExceeded,
        }
    }
}

/// Serialisable classification of a [`CoreError`], used in failure reports.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    /// See [`CoreError::DeadlineExceeded`].
    DeadlineExceeded,
    /// See [`CoreError::Cancelled`].
    Cancelled,
    /// See [`CoreError::Upstream`].
    UpstreamFailure,
    /// See [`CoreError::QueueFull`].
    QueueFull,
    /// See [`CoreError::ShuttingDown`].
    ShuttingDown,
    /// See [`CoreError::ShutdownTimeout`].
    ShutdownTimeout,
    /// See [`CoreError::Panicked`].
    Panicked,
    /// See [`CoreError::InvalidConfig`].
    InvalidConfig,
    /// A queued item dropped at shutdown without being started.
    Abandoned,
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::DeadlineExceeded => "deadline_exceeded",
            Self::Cancelled => "cancelled",
            Self::UpstreamFailure => "upstream_failure",
            Self::QueueFull => "queue_full",
            Self::ShuttingDown => "shutting_down",
            Self::ShutdownTimeout => "shutdown_timeout",
            Self::Panicked => "panicked",
            Self::InvalidConfig => "invalid_config",
            Self::Abandoned => "abandoned",
        };
        f.write_str(s)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_scope_error_converts() {
        assert!(matches!(CoreError::from(ScopeError::Cancelled), CoreError::Cancelled));
        assert!(matches!(
            CoreError::from(ScopeError::DeadlineExceeded),
            CoreError::DeadlineExceeded
        ));
    }

    #[test]
    fn test_root_cause_unwraps_aggregation() {
        let err = CoreError::Aggregation {
            id: "1".to_string(),
            source: Box::new(CoreError::DeadlineExceeded),
        };

        assert!(err.is_deadline_exceeded());
        assert!(!err.is_cancelled());
        assert_eq!(err.kind(), ErrorKind::DeadlineExceeded);
        assert_eq!(
            err.to_string(),
            "aggregation failed for id 1: deadline exceeded"
        );
    }

    #[test]
    fn test_upstream_keeps_source() {
        let err = CoreError::upstream("profile", "connection refused");
        assert_eq!(err.kind(), ErrorKind::UpstreamFailure);
        assert_eq!(
            err.to_string(),
            "upstream failure in profile: connection refused"
        );

        let source = std::error::Error::source(&err).map(ToString::to_string);
        assert_eq!(source.as_deref(), Some("connection refused"));
    }

    #[test]
    fn test_error_kind_serializes_snake_case() {
        let json = serde_json::to_value(ErrorKind::ShutdownTimeout).unwrap();
        assert_eq!(json, serde_json::json!("shutdown_timeout"));
        assert_eq!(ErrorKind::QueueFull.to_string(), "queue_full");
    }
}
