//! Background action fired on a fixed interval.
//!
//! The first fire happens one interval after [`PeriodicTask::start`]; later
//! fires follow every interval, and a fire that overruns delays the next one
//! rather than bursting to catch up. Stopping only prevents new fires: a fire
//! already in progress runs to completion under the scope it was given. A
//! fire timeout bounds each fire, so a hung action cannot stall a join.

use crate::cancellation::{CancelHandle, DeadlineScope};
use crate::errors::{BoxError, CoreError};
use crate::events::{ErrorSink, FailureReport, FailureSource, NoOpErrorSink};
use async_trait::async_trait;
use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};
use tracing::{debug, info, warn};

/// An action fired by a [`PeriodicTask`].
#[async_trait]
pub trait PeriodicAction: Send + Sync {
    /// Returns the action name used in logs and failure reports.
    fn name(&self) -> &str;

    /// Runs one fire of the action.
    async fn run(&self, scope: &DeadlineScope) -> Result<(), BoxError>;
}

/// A closure-backed periodic action.
pub struct FnAction<F, Fut>
where
    F: Fn(DeadlineScope) -> Fut + Send + Sync,
    Fut: Future<Output = Result<(), BoxError>> + Send,
{
    name: String,
    func: F,
    _phantom: std::marker::PhantomData<fn() -> Fut>,
}

impl<F, Fut> FnAction<F, Fut>
where
    F: Fn(DeadlineScope) -> Fut + Send + Sync,
    Fut: Future<Output = Result<(), BoxError>> + Send,
{
    /// Creates a named action from an async closure.
    pub fn new(name: impl Into<String>, func: F) -> Self {
        Self {
            name: name.into(),
            func,
            _phantom: std::marker::PhantomData,
        }
    }
}

impl<F, Fut> std::fmt::Debug for FnAction<F, Fut>
where
    F: Fn(DeadlineScope) -> Fut + Send + Sync,
    Fut: Future<Output = Result<(), BoxError>> + Send,
{
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FnAction").field("name", &self.name).finish()
    }
}

#[async_trait]
impl<F, Fut> PeriodicAction for FnAction<F, Fut>
where
    F: Fn(DeadlineScope) -> Fut + Send + Sync,
    Fut: Future<Output = Result<(), BoxError>> + Send,
{
    fn name(&self) -> &str {
        &self.name
    }

    async fn run(&self, scope: &DeadlineScope) -> Result<(), BoxError> {
        (self.func)(scope.clone()).await
    }
}

/// A configured, not yet started, periodic task.
pub struct PeriodicTask {
    interval: Duration,
    action: Arc<dyn PeriodicAction>,
    sink: Arc<dyn ErrorSink>,
    fire_timeout: Option<Duration>,
}

impl PeriodicTask {
    /// Creates a periodic task.
    ///
    /// # Errors
    ///
    /// Returns `InvalidConfig` for a zero interval.
    pub fn new(interval: Duration, action: Arc<dyn PeriodicAction>) -> Result<Self, CoreError> {
        if interval.is_zero() {
            return Err(CoreError::InvalidConfig(
                "periodic interval must be positive".to_string(),
            ));
        }
        Ok(Self {
            interval,
            action,
            sink: Arc::new(NoOpErrorSink),
            fire_timeout: None,
        })
    }

    /// Bounds every fire to `timeout`; an overrun is reported as
    /// `DeadlineExceeded` and the fire is abandoned.
    #[must_use]
    pub fn with_fire_timeout(mut self, timeout: Duration) -> Self {
        self.fire_timeout = Some(timeout);
        self
    }

    /// Routes action failures to `sink`.
    #[must_use]
    pub fn with_sink(mut self, sink: Arc<dyn ErrorSink>) -> Self {
        self.sink = sink;
        self
    }

    /// Returns the interval.
    #[must_use]
    pub const fn interval(&self) -> Duration {
        self.interval
    }

    /// Spawns the timer loop.
    ///
    /// New fires stop once `parent` is done or the handle is stopped. Each
    /// fire runs under a child of `parent` bounded by the fire timeout, so
    /// stopping the handle never interrupts one but ending `parent` does.
    ///
    /// # Errors
    ///
    /// Returns `InvalidConfig` if the first fire time overflows the clock.
    pub fn start(self, parent: &DeadlineScope) -> Result<PeriodicHandle, CoreError> {
        let first = Instant::now().checked_add(self.interval).ok_or_else(|| {
            CoreError::InvalidConfig("periodic interval overflows the clock".to_string())
        })?;

        let (stop_scope, stop) = parent.with_cancel();
        let fires = Arc::new(AtomicU64::new(0));
        let name = self.action.name().to_string();

        let task = tokio::spawn({
            let parent = parent.clone();
            let fires = fires.clone();
            async move {
                let mut ticker = tokio::time::interval_at(first, self.interval);
                ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

                loop {
                    tokio::select! {
                        biased;
                        () = stop_scope.done() => break,
                        _ = ticker.tick() => {}
                    }

                    let count = fires.fetch_add(1, Ordering::Relaxed) + 1;
                    debug!(action = self.action.name(), fire = count, "Periodic action firing");

                    if let Err(err) = self.fire(&parent).await {
                        if err.is_cancelled() {
                            debug!(action = self.action.name(), "Periodic fire cancelled");
                            continue;
                        }
                        warn!(action = self.action.name(), error = %err, "Periodic action failed");
                        self.sink.report(FailureReport::from_error(
                            FailureSource::Periodic,
                            self.action.name(),
                            &err,
                        ));
                    }
                }

                info!(action = self.action.name(), "Periodic task stopping");
            }
        });

        Ok(PeriodicHandle {
            name,
            stop,
            fires,
            task: Some(task),
        })
    }

    async fn fire(&self, parent: &DeadlineScope) -> Result<(), CoreError> {
        let (scope, _release) = match self.fire_timeout {
            Some(timeout) => parent.with_timeout(timeout),
            None => parent.with_cancel(),
        };
        match scope.run(self.action.run(&scope)).await {
            Ok(Ok(())) => Ok(()),
            Ok(Err(e)) => Err(CoreError::upstream(self.action.name(), e)),
            Err(cause) => Err(CoreError::from(cause)),
        }
    }
}

impl std::fmt::Debug for PeriodicTask {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PeriodicTask")
            .field("interval", &self.interval)
            .field("action", &self.action.name())
            .field("fire_timeout", &self.fire_timeout)
            .finish_non_exhaustive()
    }
}

/// Handle to a running periodic task.
///
/// Dropping the handle stops new fires without waiting.
#[derive(Debug)]
pub struct PeriodicHandle {
    name: String,
    stop: CancelHandle,
    fires: Arc<AtomicU64>,
    task: Option<JoinHandle<()>>,
}

impl PeriodicHandle {
    /// Returns the action name.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Returns how many times the action has fired.
    #[must_use]
    pub fn fires(&self) -> u64 {
        self.fires.load(Ordering::Relaxed)
    }

    /// Prevents further fires. Idempotent.
    pub fn stop(&self) {
        self.stop.cancel();
    }

    /// Returns true once no further fires will start.
    #[must_use]
    pub fn is_stopped(&self) -> bool {
        self.stop.scope().is_done()
    }

    /// Waits for the timer loop to exit, including any fire in progress.
    ///
    /// Does not stop the task; call [`stop`](Self::stop) first.
    pub async fn join(&mut self) {
        if let Some(task) = self.task.take() {
            if let Err(e) = task.await {
                warn!(action = %self.name, error = %e, "Periodic task ended abnormally");
            }
        }
    }
}
