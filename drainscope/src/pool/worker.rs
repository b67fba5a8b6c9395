//! Fixed-size pool of workers draining a [`TaskQueue`].
//!
//! Each worker is a tokio task that loops: dequeue one item, process it,
//! repeat. The loop ends when the pool's stop scope is done or the queue is
//! closed and empty. Stopping never interrupts an item: the processing scope
//! is derived from the pool's root scope, not from the stop scope, so only a
//! root cancellation (or the per-item timeout) reaches a running item.

use super::{PoolMetrics, TaskQueue, WorkItem};
use crate::cancellation::{CancelHandle, DeadlineScope};
use crate::config::CoreConfig;
use crate::errors::{BoxError, CoreError};
use crate::events::{ErrorSink, FailureReport, FailureSource};
use async_trait::async_trait;
use futures::FutureExt;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::task::JoinHandle;
use tracing::{debug, trace, warn};
use uuid::Uuid;

/// Capability applied by a worker to each dequeued item.
#[async_trait]
pub trait Processor: Send + Sync {
    /// Processes one item.
    ///
    /// `scope` ends when the item's timeout elapses or the pool's root scope
    /// is cancelled; long-running implementations should watch it.
    async fn process(&self, scope: &DeadlineScope, item: &WorkItem) -> Result<(), BoxError>;
}

/// A closure-backed processor.
pub struct FnProcessor<F, Fut>
where
    F: Fn(DeadlineScope, WorkItem) -> Fut + Send + Sync,
    Fut: Future<Output = Result<(), BoxError>> + Send,
{
    func: F,
    _phantom: std::marker::PhantomData<fn() -> Fut>,
}

impl<F, Fut> FnProcessor<F, Fut>
where
    F: Fn(DeadlineScope, WorkItem) -> Fut + Send + Sync,
    Fut: Future<Output = Result<(), BoxError>> + Send,
{
    /// Creates a processor from an async closure.
    pub const fn new(func: F) -> Self {
        Self {
            func,
            _phantom: std::marker::PhantomData,
        }
    }
}

#[async_trait]
impl<F, Fut> Processor for FnProcessor<F, Fut>
where
    F: Fn(DeadlineScope, WorkItem) -> Fut + Send + Sync,
    Fut: Future<Output = Result<(), BoxError>> + Send,
{
    async fn process(&self, scope: &DeadlineScope, item: &WorkItem) -> Result<(), BoxError> {
        (self.func)(scope.clone(), item.clone()).await
    }
}

impl<F, Fut> std::fmt::Debug for FnProcessor<F, Fut>
where
    F: Fn(DeadlineScope, WorkItem) -> Fut + Send + Sync,
    Fut: Future<Output = Result<(), BoxError>> + Send,
{
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FnProcessor").finish_non_exhaustive()
    }
}

/// What a worker is doing right now.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "status", content = "item_id")]
pub enum WorkerStatus {
    /// Waiting for an item.
    #[default]
    Idle,
    /// Processing the item with this id.
    Processing(Uuid),
}

/// Everything one worker task needs.
struct Worker {
    id: usize,
    root: DeadlineScope,
    stop: DeadlineScope,
    queue: Arc<TaskQueue>,
    processor: Arc<dyn Processor>,
    sink: Arc<dyn ErrorSink>,
    metrics: Arc<PoolMetrics>,
    status: Arc<Mutex<WorkerStatus>>,
    process_timeout: Duration,
}

impl Worker {
    async fn run(self) {
        trace!(worker_id = self.id, "Worker started");

        while let Some(item) = self.queue.dequeue(&self.stop).await {
            *self.status.lock() = WorkerStatus::Processing(item.id());
            self.handle(&item).await;
            *self.status.lock() = WorkerStatus::Idle;
            self.queue.complete();
        }

        debug!(worker_id = self.id, "Worker shutting down");
    }

    async fn handle(&self, item: &WorkItem) {
        let (scope, _release) = self.root.with_timeout(self.process_timeout);
        let started = Instant::now();

        let outcome = AssertUnwindSafe(scope.run(self.processor.process(&scope, item)))
            .catch_unwind()
            .await;

        let err = match outcome {
            Ok(Ok(Ok(()))) => {
                self.metrics.record_processed();
                debug!(
                    worker_id = self.id,
                    item_id = %item.id(),
                    descriptor = item.descriptor(),
                    elapsed_ms = started.elapsed().as_millis(),
                    "Item processed"
                );
                return;
            }
            Ok(Ok(Err(source))) => CoreError::upstream("process", source),
            Ok(Err(cause)) => CoreError::from(cause),
            Err(_) => CoreError::Panicked {
                task: format!("worker-{}", self.id),
            },
        };

        self.metrics.record_failed();
        warn!(
            worker_id = self.id,
            item_id = %item.id(),
            descriptor = item.descriptor(),
            error = %err,
            "Item failed"
        );
        self.sink.report(
            FailureReport::from_error(FailureSource::Worker, "process", &err)
                .with_item(item)
                .with_worker(self.id),
        );
    }
}

/// A fixed set of concurrent workers draining one queue.
pub struct WorkerPool {
    /// Ends the worker loops; held here so stopping is explicit.
    stop: CancelHandle,
    handles: Mutex<Vec<JoinHandle<()>>>,
    statuses: Vec<Arc<Mutex<WorkerStatus>>>,
    metrics: Arc<PoolMetrics>,
}

impl WorkerPool {
    /// Spawns `config.worker_count` workers on the current tokio runtime.
    ///
    /// Workers stop when the pool is stopped or `root` is cancelled. Items
    /// are processed under a scope derived from `root` bounded by
    /// `config.process_timeout()`.
    ///
    /// # Errors
    ///
    /// Returns `InvalidConfig` if the worker count is zero.
    pub fn start(
        root: &DeadlineScope,
        queue: Arc<TaskQueue>,
        processor: Arc<dyn Processor>,
        sink: Arc<dyn ErrorSink>,
        config: &CoreConfig,
    ) -> Result<Self, CoreError> {
        if config.worker_count == 0 {
            return Err(CoreError::InvalidConfig(
                "worker_count must be at least 1".to_string(),
            ));
        }

        let (stop_scope, stop) = root.with_cancel();
        let metrics = Arc::new(PoolMetrics::default());
        let mut handles = Vec::with_capacity(config.worker_count);
        let mut statuses = Vec::with_capacity(config.worker_count);

        for id in 0..config.worker_count {
            let status = Arc::new(Mutex::new(WorkerStatus::Idle));
            let worker = Worker {
                id,
                root: root.clone(),
                stop: stop_scope.clone(),
                queue: queue.clone(),
                processor: processor.clone(),
                sink: sink.clone(),
                metrics: metrics.clone(),
                status: status.clone(),
                process_timeout: config.process_timeout(),
            };
            handles.push(tokio::spawn(worker.run()));
            statuses.push(status);
        }

        debug!(workers = config.worker_count, "Worker pool started");

        Ok(Self {
            stop,
            handles: Mutex::new(handles),
            statuses,
            metrics,
        })
    }

    /// Tells every worker to exit after its current item. Idempotent.
    pub fn stop(&self) {
        self.stop.cancel();
    }

    /// Returns true once the pool has been told to stop.
    #[must_use]
    pub fn is_stopping(&self) -> bool {
        self.stop.scope().is_done()
    }

    /// Waits for every worker to exit.
    pub async fn join(&self) {
        let handles = std::mem::take(&mut *self.handles.lock());
        for handle in handles {
            if let Err(e) = handle.await {
                warn!(error = %e, "Worker task ended abnormally");
            }
        }
    }

    /// Returns the number of workers.
    #[must_use]
    pub fn worker_count(&self) -> usize {
        self.statuses.len()
    }

    /// Returns a snapshot of every worker's status, indexed by worker id.
    #[must_use]
    pub fn worker_statuses(&self) -> Vec<WorkerStatus> {
        self.statuses.iter().map(|s| *s.lock()).collect()
    }

    /// Returns the pool counters.
    #[must_use]
    pub fn metrics(&self) -> &Arc<PoolMetrics> {
        &self.metrics
    }
}

impl std::fmt::Debug for WorkerPool {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WorkerPool")
            .field("worker_count", &self.worker_count())
            .field("stopping", &self.is_stopping())
            .finish_non_exhaustive()
    }
}
