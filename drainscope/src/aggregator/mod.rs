//! Fan-out/fan-in aggregation under one deadline.
//!
//! A [`FanOutAggregator`] runs every registered [`Fetcher`] concurrently under
//! a single scope derived from the caller's, with the configured fetch
//! timeout. Values travel back to the caller's task through the task group,
//! so no map is shared between fetches. The first failure cancels the scope
//! for everyone, and the caller gets either every field or an error.

mod fetcher;
mod result;

pub use fetcher::{Fetcher, FnFetcher};
pub use result::AggregationResult;

use crate::cancellation::{DeadlineScope, TaskGroup};
use crate::config::CoreConfig;
use crate::errors::CoreError;
use crate::events::{ErrorSink, FailureReport, FailureSource, NoOpErrorSink};
use std::collections::HashSet;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, error, info, warn};

/// Runs a fixed set of fetchers concurrently and merges their values.
pub struct FanOutAggregator {
    fetchers: Vec<Arc<dyn Fetcher>>,
    timeout: Duration,
    grace: Duration,
    sink: Arc<dyn ErrorSink>,
}

impl FanOutAggregator {
    /// Creates an aggregator over `fetchers`, in the order results are
    /// reported.
    ///
    /// # Errors
    ///
    /// Returns `InvalidConfig` if `config` is invalid, `fetchers` is empty,
    /// or two fetchers fill the same field.
    pub fn new(config: &CoreConfig, fetchers: Vec<Arc<dyn Fetcher>>) -> Result<Self, CoreError> {
        config.validate()?;

        if fetchers.is_empty() {
            return Err(CoreError::InvalidConfig(
                "aggregator needs at least one fetcher".to_string(),
            ));
        }

        let mut seen = HashSet::new();
        for fetcher in &fetchers {
            if !seen.insert(fetcher.field()) {
                return Err(CoreError::InvalidConfig(format!(
                    "duplicate fetcher field: {}",
                    fetcher.field()
                )));
            }
        }

        Ok(Self {
            fetchers,
            timeout: config.fetch_timeout(),
            grace: config.cancel_grace(),
            sink: Arc::new(NoOpErrorSink),
        })
    }

    /// Routes fetch failures to `sink`.
    #[must_use]
    pub fn with_sink(mut self, sink: Arc<dyn ErrorSink>) -> Self {
        self.sink = sink;
        self
    }

    /// Returns the field names in registration order.
    pub fn fields(&self) -> impl Iterator<Item = &str> {
        self.fetchers.iter().map(|f| f.field())
    }

    /// Returns the per-call fetch timeout.
    #[must_use]
    pub const fn timeout(&self) -> Duration {
        self.timeout
    }

    /// Fetches every field for `id`.
    ///
    /// No fetch outlives this call: on failure the remaining fetches are
    /// cancelled, given the configured grace period, then aborted.
    ///
    /// # Errors
    ///
    /// Returns `Aggregation` wrapping the first failure observed: a fetch
    /// error, a panicking fetcher, `DeadlineExceeded` if the timeout (or an
    /// ancestor's deadline) elapsed, or `Cancelled` if `parent` was cancelled.
    pub async fn aggregate(
        &self,
        parent: &DeadlineScope,
        id: &str,
    ) -> Result<AggregationResult, CoreError> {
        let started = Instant::now();
        let mut group = TaskGroup::with_timeout(parent, self.timeout, self.grace);

        for (index, fetcher) in self.fetchers.iter().enumerate() {
            let fetcher = fetcher.clone();
            let sink = self.sink.clone();
            let id = id.to_string();

            group.spawn(fetcher.field().to_string(), move |scope| async move {
                let field = fetcher.field();
                match fetcher.fetch(&scope, &id).await {
                    Ok(value) => {
                        debug!(field, id = %id, "Fetch succeeded");
                        Ok((index, value))
                    }
                    Err(e) if e.is_cancelled() && scope.is_done() => {
                        debug!(field, id = %id, "Fetch cancelled");
                        Err(e)
                    }
                    Err(e) => {
                        warn!(field, id = %id, error = %e, "Fetch failed");
                        sink.report(FailureReport::from_error(FailureSource::Aggregator, field, &e));
                        Err(e)
                    }
                }
            });
        }

        match group.wait().await {
            Ok(mut values) => {
                values.sort_by_key(|(_, (index, _))| *index);
                let result = AggregationResult::new(
                    values
                        .into_iter()
                        .map(|(field, (_, value))| (field, value))
                        .collect(),
                );
                info!(
                    id,
                    elapsed_ms = started.elapsed().as_millis(),
                    result = %result,
                    "Aggregation complete"
                );
                Ok(result)
            }
            Err(source) => {
                error!(
                    id,
                    elapsed_ms = started.elapsed().as_millis(),
                    error = %source,
                    "Aggregation failed"
                );
                Err(CoreError::Aggregation {
                    id: id.to_string(),
                    source: Box::new(source),
                })
            }
        }
    }
}

impl std::fmt::Debug for FanOutAggregator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FanOutAggregator")
            .field("fetchers", &self.fetchers)
            .field("timeout", &self.timeout)
            .field("grace", &self.grace)
            .finish_non_exhaustive()
    }
}
