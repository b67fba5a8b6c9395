//! Configuration record for the aggregator, pool and shutdown sequence.
//!
//! [`CoreConfig`] is populated once and then shared read-only. The `with_*`
//! methods consume `self`, so a config can only change before it is handed
//! to a component.

use crate::errors::CoreError;
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// What `enqueue` does when the queue is at capacity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AdmissionPolicy {
    /// Wait for space. The caller stalls while the queue is full.
    #[default]
    Block,
    /// Fail immediately with `QueueFull`.
    Reject,
}

/// What happens to items still queued when the shutdown deadline elapses.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UnstartedItemPolicy {
    /// Drop each item and report it to the error sink as abandoned.
    #[default]
    DropAndReport,
    /// Keep the items for the caller to collect with `take_unstarted`.
    ReturnToCaller,
}

/// Immutable configuration for all components.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CoreConfig {
    /// Timeout applied to one fan-out aggregation, in seconds.
    #[serde(default = "default_fetch_timeout")]
    pub fetch_timeout_seconds: f64,
    /// Timeout applied to processing one work item, in seconds.
    #[serde(default = "default_process_timeout")]
    pub process_timeout_seconds: f64,
    /// Number of concurrent workers.
    #[serde(default = "default_worker_count")]
    pub worker_count: usize,
    /// Interval between periodic task fires, in seconds.
    #[serde(default = "default_periodic_interval")]
    pub periodic_interval_seconds: f64,
    /// Maximum number of queued items.
    #[serde(default = "default_queue_capacity")]
    pub queue_capacity: usize,
    /// Upper bound on the drain wait during shutdown, in seconds.
    #[serde(default = "default_shutdown_deadline")]
    pub shutdown_deadline_seconds: f64,
    /// How long cancelled tasks get to return before being aborted, in seconds.
    #[serde(default = "default_cancel_grace")]
    pub cancel_grace_seconds: f64,
    /// Behaviour of admission when the queue is full.
    #[serde(default)]
    pub admission_policy: AdmissionPolicy,
    /// Disposition of unstarted items on shutdown timeout.
    #[serde(default)]
    pub unstarted_policy: UnstartedItemPolicy,
}

fn default_fetch_timeout() -> f64 {
    3.0
}

fn default_process_timeout() -> f64 {
    30.0
}

fn default_worker_count() -> usize {
    5
}

fn default_periodic_interval() -> f64 {
    10.0
}

fn default_queue_capacity() -> usize {
    100
}

fn default_shutdown_deadline() -> f64 {
    60.0
}

fn default_cancel_grace() -> f64 {
    1.0
}

impl Default for CoreConfig {
    fn default() -> Self {
        Self {
            fetch_timeout_seconds: default_fetch_timeout(),
            process_timeout_seconds: default_process_timeout(),
            worker_count: default_worker_count(),
            periodic_interval_seconds: default_periodic_interval(),
            queue_capacity: default_queue_capacity(),
            shutdown_deadline_seconds: default_shutdown_deadline(),
            cancel_grace_seconds: default_cancel_grace(),
            admission_policy: AdmissionPolicy::default(),
            unstarted_policy: UnstartedItemPolicy::default(),
        }
    }
}

impl CoreConfig {
    /// Creates a configuration with defaults.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the fan-out timeout.
    #[must_use]
    pub fn with_fetch_timeout(mut self, timeout: Duration) -> Self {
        self.fetch_timeout_seconds = timeout.as_secs_f64();
        self
    }

    /// Sets the per-item processing timeout.
    #[must_use]
    pub fn with_process_timeout(mut self, timeout: Duration) -> Self {
        self.process_timeout_seconds = timeout.as_secs_f64();
        self
    }

    /// Sets the worker count.
    #[must_use]
    pub const fn with_worker_count(mut self, count: usize) -> Self {
        self.worker_count = count;
        self
    }

    /// Sets the periodic interval.
    #[must_use]
    pub fn with_periodic_interval(mut self, interval: Duration) -> Self {
        self.periodic_interval_seconds = interval.as_secs_f64();
        self
    }

    /// Sets the queue capacity.
    #[must_use]
    pub const fn with_queue_capacity(mut self, capacity: usize) -> Self {
        self.queue_capacity = capacity;
        self
    }

    /// Sets the shutdown deadline.
    #[must_use]
    pub fn with_shutdown_deadline(mut self, deadline: Duration) -> Self {
        self.shutdown_deadline_seconds = deadline.as_secs_f64();
        self
    }

    /// Sets the cancellation grace period.
    #[must_use]
    pub fn with_cancel_grace(mut self, grace: Duration) -> Self {
        self.cancel_grace_seconds = grace.as_secs_f64();
        self
    }

    /// Sets the admission policy.
    #[must_use]
    pub const fn with_admission_policy(mut self, policy: AdmissionPolicy) -> Self {
        self.admission_policy = policy;
        self
    }

    /// Sets the unstarted item policy.
    #[must_use]
    pub const fn with_unstarted_policy(mut self, policy: UnstartedItemPolicy) -> Self {
        self.unstarted_policy = policy;
        self
    }

    /// Gets the fan-out timeout as a Duration.
    #[must_use]
    pub fn fetch_timeout(&self) -> Duration {
        seconds(self.fetch_timeout_seconds)
    }

    /// Gets the processing timeout as a Duration.
    #[must_use]
    pub fn process_timeout(&self) -> Duration {
        seconds(self.process_timeout_seconds)
    }

    /// Gets the periodic interval as a Duration.
    #[must_use]
    pub fn periodic_interval(&self) -> Duration {
        seconds(self.periodic_interval_seconds)
    }

    /// Gets the shutdown deadline as a Duration.
    #[must_use]
    pub fn shutdown_deadline(&self) -> Duration {
        seconds(self.shutdown_deadline_seconds)
    }

    /// Gets the cancellation grace period as a Duration.
    #[must_use]
    pub fn cancel_grace(&self) -> Duration {
        seconds(self.cancel_grace_seconds)
    }

    /// Validates the configuration.
    ///
    /// # Errors
    ///
    /// Returns `InvalidConfig` naming the first offending field.
    pub fn validate(&self) -> Result<(), CoreError> {
        let positive = [
            ("fetch_timeout_seconds", self.fetch_timeout_seconds),
            ("process_timeout_seconds", self.process_timeout_seconds),
            ("periodic_interval_seconds", self.periodic_interval_seconds),
            ("shutdown_deadline_seconds", self.shutdown_deadline_seconds),
        ];
        for (name, value) in positive {
            if !(value.is_finite() && value > 0.0) {
                return Err(CoreError::InvalidConfig(format!(
                    "{name} must be a positive number of seconds, got {value}"
                )));
            }
        }

        if !(self.cancel_grace_seconds.is_finite() && self.cancel_grace_seconds >= 0.0) {
            return Err(CoreError::InvalidConfig(format!(
                "cancel_grace_seconds must not be negative, got {}",
                self.cancel_grace_seconds
            )));
        }
        if self.worker_count == 0 {
            return Err(CoreError::InvalidConfig(
                "worker_count must be at least 1".to_string(),
            ));
        }
        if self.queue_capacity == 0 {
            return Err(CoreError::InvalidConfig(
                "queue_capacity must be at least 1".to_string(),
            ));
        }
        Ok(())
    }
}

// Callers validate first; this only guards against panics in from_secs_f64.
fn seconds(value: f64) -> Duration {
    if value.is_finite() && value > 0.0 {
        Duration::from_secs_f64(value)
    } else {
        Duration::ZERO
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_defaults() {
        let config = CoreConfig::default();
        assert_eq!(config.fetch_timeout(), Duration::from_secs(3));
        assert_eq!(config.worker_count, 5);
        assert_eq!(config.queue_capacity, 100);
        assert_eq!(config.periodic_interval(), Duration::from_secs(10));
        assert_eq!(config.admission_policy, AdmissionPolicy::Block);
        assert_eq!(config.unstarted_policy, UnstartedItemPolicy::DropAndReport);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_builder_methods() {
        let config = CoreConfig::new()
            .with_fetch_timeout(Duration::from_millis(500))
            .with_worker_count(2)
            .with_queue_capacity(8)
            .with_admission_policy(AdmissionPolicy::Reject);

        assert_eq!(config.fetch_timeout(), Duration::from_millis(500));
        assert_eq!(config.worker_count, 2);
        assert_eq!(config.queue_capacity, 8);
        assert_eq!(config.admission_policy, AdmissionPolicy::Reject);
    }

    #[test]
    fn test_validate_rejects_zero_workers() {
        let err = CoreConfig::new().with_worker_count(0).validate();
        assert!(matches!(err, Err(CoreError::InvalidConfig(msg)) if msg.contains("worker_count")));
    }

    #[test]
    fn test_validate_rejects_zero_interval() {
        let err = CoreConfig::new()
            .with_periodic_interval(Duration::ZERO)
            .validate();
        assert!(
            matches!(err, Err(CoreError::InvalidConfig(msg)) if msg.contains("periodic_interval"))
        );
    }

    #[test]
    fn test_deserialize_with_defaults() {
        let config: CoreConfig = serde_json::from_value(serde_json::json!({
            "worker_count": 3,
            "admission_policy": "reject"
        }))
        .unwrap();

        assert_eq!(config.worker_count, 3);
        assert_eq!(config.admission_policy, AdmissionPolicy::Reject);
        assert_eq!(config.queue_capacity, 100);
        assert_eq!(config.shutdown_deadline(), Duration::from_secs(60));
    }
}
