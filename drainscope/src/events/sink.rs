//! Error sink trait and implementations.

use super::FailureReport;
use tracing::{error, warn, Level};

/// Receives structured failure information.
///
/// Workers, the aggregator and the periodic task call `report` for failures
/// they handle locally. Implementations must not block: the caller is on a
/// worker's hot path.
#[cfg_attr(test, mockall::automock)]
pub trait ErrorSink: Send + Sync {
    /// Records one failure. Must never panic.
    fn report(&self, report: FailureReport);
}

/// A sink that discards every report.
///
/// Used as the default when no sink is configured.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoOpErrorSink;

impl ErrorSink for NoOpErrorSink {
    fn report(&self, _report: FailureReport) {
        // Intentionally empty - discards all reports
    }
}

/// A sink that logs reports using the tracing framework.
#[derive(Debug, Clone)]
pub struct LoggingErrorSink {
    /// The log level to use.
    level: Level,
}

impl Default for LoggingErrorSink {
    fn default() -> Self {
        Self { level: Level::ERROR }
    }
}

impl LoggingErrorSink {
    /// Creates a logging sink with the specified level.
    #[must_use]
    pub const fn new(level: Level) -> Self {
        Self { level }
    }

    /// Creates a warn-level logging sink.
    #[must_use]
    pub const fn warn() -> Self {
        Self::new(Level::WARN)
    }
}

impl ErrorSink for LoggingErrorSink {
    fn report(&self, report: FailureReport) {
        if self.level == Level::WARN {
            warn!(
                source = %report.source,
                operation = %report.operation,
                kind = %report.kind,
                item_id = ?report.item_id,
                worker_id = ?report.worker_id,
                "{}", report.message
            );
        } else {
            error!(
                source = %report.source,
                operation = %report.operation,
                kind = %report.kind,
                item_id = ?report.item_id,
                worker_id = ?report.worker_id,
                "{}", report.message
            );
        }
    }
}

/// A collecting sink for tests and diagnostics.
#[derive(Debug, Default)]
pub struct CollectingErrorSink {
    reports: parking_lot::RwLock<Vec<FailureReport>>,
}

impl CollectingErrorSink {
    /// Creates a new collecting sink.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns all collected reports.
    #[must_use]
    pub fn reports(&self) -> Vec<FailureReport> {
        self.reports.read().clone()
    }

    /// Returns the number of collected reports.
    #[must_use]
    pub fn len(&self) -> usize {
        self.reports.read().len()
    }

    /// Returns true if nothing has been reported.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.reports.read().is_empty()
    }

    /// Returns reports raised by one kind of component.
    #[must_use]
    pub fn of_source(&self, source: super::FailureSource) -> Vec<FailureReport> {
        self.reports
            .read()
            .iter()
            .filter(|r| r.source == source)
            .cloned()
            .collect()
    }
}

impl ErrorSink for CollectingErrorSink {
    fn report(&self, report: FailureReport) {
        self.reports.write().push(report);
    }
}
