//! Counters for the worker pool and its admission gate.

use parking_lot::RwLock;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Instant;

/// Pool counters, safe to update from any worker.
#[derive(Debug, Default)]
pub struct PoolMetrics {
    /// Items accepted by the admission gate.
    admitted: AtomicU64,
    /// Admission attempts rejected (full or shutting down).
    rejected: AtomicU64,
    /// Items processed successfully.
    processed: AtomicU64,
    /// Items whose processing failed, timed out or panicked.
    failed: AtomicU64,
    /// Items dropped at shutdown without being started.
    abandoned: AtomicU64,
    /// When an item last finished processing.
    last_completion: RwLock<Option<Instant>>,
}

impl PoolMetrics {
    /// Records an admitted item.
    pub fn record_admitted(&self) {
        self.admitted.fetch_add(1, Ordering::Relaxed);
    }

    /// Records a rejected admission.
    pub fn record_rejected(&self) {
        self.rejected.fetch_add(1, Ordering::Relaxed);
    }

    /// Records a successfully processed item.
    pub fn record_processed(&self) {
        self.processed.fetch_add(1, Ordering::Relaxed);
        *self.last_completion.write() = Some(Instant::now());
    }

    /// Records a failed item.
    pub fn record_failed(&self) {
        self.failed.fetch_add(1, Ordering::Relaxed);
        *self.last_completion.write() = Some(Instant::now());
    }

    /// Records `count` abandoned items.
    pub fn record_abandoned(&self, count: u64) {
        self.abandoned.fetch_add(count, Ordering::Relaxed);
    }

    /// Returns the number of admitted items.
    #[must_use]
    pub fn admitted(&self) -> u64 {
        self.admitted.load(Ordering::Relaxed)
    }

    /// Returns the number of rejected admissions.
    #[must_use]
    pub fn rejected(&self) -> u64 {
        self.rejected.load(Ordering::Relaxed)
    }

    /// Returns the number of processed items.
    #[must_use]
    pub fn processed(&self) -> u64 {
        self.processed.load(Ordering::Relaxed)
    }

    /// Returns the number of failed items.
    #[must_use]
    pub fn failed(&self) -> u64 {
        self.failed.load(Ordering::Relaxed)
    }

    /// Returns the number of abandoned items.
    #[must_use]
    pub fn abandoned(&self) -> u64 {
        self.abandoned.load(Ordering::Relaxed)
    }

    /// Returns how long ago the last item finished, if any has.
    #[must_use]
    pub fn since_last_completion(&self) -> Option<std::time::Duration> {
        self.last_completion.read().map(|at| at.elapsed())
    }

    /// Returns the failure rate as a percentage of finished items.
    #[must_use]
    #[allow(clippy::cast_precision_loss)]
    pub fn failure_rate(&self) -> f64 {
        let processed = self.processed();
        let failed = self.failed();
        let total = processed + failed;
        if total == 0 {
            0.0
        } else {
            (failed as f64 / total as f64) * 100.0
        }
    }

    /// Converts metrics to a dictionary.
    #[must_use]
    pub fn to_dict(&self) -> serde_json::Value {
        serde_json::json!({
            "admitted": self.admitted(),
            "rejected": self.rejected(),
            "processed": self.processed(),
            "failed": self.failed(),
            "abandoned": self.abandoned(),
            "failure_rate_percent": (self.failure_rate() * 100.0).round() / 100.0
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_metrics_default() {
        let metrics = PoolMetrics::default();
        assert_eq!(metrics.processed(), 0);
        assert_eq!(metrics.failed(), 0);
        assert_eq!(metrics.failure_rate(), 0.0);
        assert!(metrics.since_last_completion().is_none());
    }

    #[test]
    fn test_metrics_recording() {
        let metrics = PoolMetrics::default();

        metrics.record_processed();
        metrics.record_processed();
        metrics.record_failed();
        metrics.record_abandoned(4);

        assert_eq!(metrics.processed(), 2);
        assert_eq!(metrics.failed(), 1);
        assert_eq!(metrics.abandoned(), 4);
        assert!((metrics.failure_rate() - 33.333).abs() < 1.0);
        assert!(metrics.since_last_completion().is_some());
    }

    #[test]
    fn test_metrics_to_dict() {
        let metrics = PoolMetrics::default();
        metrics.record_admitted();
        metrics.record_rejected();

        let dict = metrics.to_dict();
        assert_eq!(dict["admitted"], 1);
        assert_eq!(dict["rejected"], 1);
        assert_eq!(dict["processed"], 0);
    }
}
