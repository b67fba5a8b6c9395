//! Ordered graceful shutdown of the queue, worker pool and periodic task.

use super::state::{AtomicPoolState, PoolState};
use crate::cancellation::DeadlineScope;
use crate::config::{CoreConfig, UnstartedItemPolicy};
use crate::errors::{CoreError, ErrorKind};
use crate::events::{ErrorSink, FailureReport, FailureSource};
use crate::periodic::{PeriodicAction, PeriodicHandle, PeriodicTask};
use crate::pool::{
    AdmissionTicket, PoolMetrics, Processor, TaskQueue, WorkItem, WorkerPool, WorkerStatus,
};
use parking_lot::Mutex;
use serde::Serialize;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, info, trace, warn};

/// Outcome of a shutdown call that did not time out.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ShutdownReport {
    /// False when another call had already started the shutdown.
    pub initiated: bool,
    /// State observed when the call returned.
    pub state: PoolState,
    /// Items processed successfully over the pool's lifetime.
    pub processed: u64,
    /// Items that failed over the pool's lifetime.
    pub failed: u64,
    /// Time spent in this call.
    pub elapsed: Duration,
}

/// Composes a [`TaskQueue`], a [`WorkerPool`] and a [`PeriodicTask`] behind
/// one admission gate with an ordered stop sequence.
///
/// # Shutdown order
///
/// 1. `Accepting -> Draining`; the admission gate closes.
/// 2. The periodic task stops firing.
/// 3. Wait, bounded by the deadline, until the queue is empty and no item is
///    in flight.
/// 4. Stop the workers, dispose of unstarted items if the deadline won, and
///    join every worker (each finishes its current item first).
/// 5. `Draining -> Stopped`.
pub struct ShutdownCoordinator {
    config: CoreConfig,
    root: DeadlineScope,
    state: AtomicPoolState,
    queue: Arc<TaskQueue>,
    pool: WorkerPool,
    periodic: Mutex<Option<PeriodicHandle>>,
    sink: Arc<dyn ErrorSink>,
    unstarted: Mutex<Vec<WorkItem>>,
}

impl ShutdownCoordinator {
    /// Validates `config` and starts the queue, workers and periodic task.
    ///
    /// Workers and the periodic task live under `root`; cancelling it stops
    /// them and interrupts in-flight items.
    ///
    /// # Errors
    ///
    /// Returns `InvalidConfig` if `config` fails validation.
    pub fn start(
        root: &DeadlineScope,
        config: CoreConfig,
        processor: Arc<dyn Processor>,
        action: Arc<dyn PeriodicAction>,
        sink: Arc<dyn ErrorSink>,
    ) -> Result<Self, CoreError> {
        config.validate()?;

        let queue = Arc::new(TaskQueue::new(config.queue_capacity, config.admission_policy)?);
        let pool = WorkerPool::start(root, queue.clone(), processor, sink.clone(), &config)?;
        let periodic = PeriodicTask::new(config.periodic_interval(), action)?
            .with_sink(sink.clone())
            .with_fire_timeout(config.process_timeout())
            .start(root)?;

        info!(
            workers = config.worker_count,
            queue_capacity = config.queue_capacity,
            periodic = periodic.name(),
            "Coordinator started"
        );

        Ok(Self {
            config,
            root: root.clone(),
            state: AtomicPoolState::new(PoolState::Accepting),
            queue,
            pool,
            periodic: Mutex::new(Some(periodic)),
            sink,
            unstarted: Mutex::new(Vec::new()),
        })
    }

    /// Admits a new item built from `descriptor` and `payload`.
    ///
    /// # Errors
    ///
    /// See [`submit_item`](Self::submit_item).
    pub async fn submit(
        &self,
        descriptor: impl Into<String>,
        payload: serde_json::Value,
    ) -> Result<AdmissionTicket, CoreError> {
        self.submit_item(WorkItem::new(descriptor, payload)).await
    }

    /// Admits `item`, waiting for space under the blocking policy.
    ///
    /// The ticket only acknowledges admission; processing happens later.
    ///
    /// # Errors
    ///
    /// Returns `ShuttingDown` once shutdown has begun (including while
    /// waiting for space), `QueueFull` under the rejecting policy, and
    /// `Cancelled`/`DeadlineExceeded` once the root scope has ended
    /// (including while waiting for space).
    pub async fn submit_item(&self, item: WorkItem) -> Result<AdmissionTicket, CoreError> {
        self.check_admission()?;

        let item_id = item.id();
        let result = match self.root.run(self.queue.enqueue(item)).await {
            Ok(result) => result,
            Err(cause) => Err(CoreError::from(cause)),
        };
        self.admitted(item_id, result)
    }

    /// Admits `item` without waiting.
    ///
    /// # Errors
    ///
    /// Returns `QueueFull` when there is no space regardless of policy,
    /// `ShuttingDown` once shutdown has begun, and `Cancelled` or
    /// `DeadlineExceeded` once the root scope has ended.
    pub fn try_submit_item(&self, item: WorkItem) -> Result<AdmissionTicket, CoreError> {
        self.check_admission()?;

        let item_id = item.id();
        let result = self.queue.try_enqueue(item);
        self.admitted(item_id, result)
    }

    /// Rejects up front once shutdown has begun or the root scope has ended.
    /// Workers under an ended root never dequeue, so nothing may be admitted.
    fn check_admission(&self) -> Result<(), CoreError> {
        let err = if !self.state.load().is_accepting() {
            CoreError::ShuttingDown
        } else if let Some(cause) = self.root.err() {
            CoreError::from(cause)
        } else {
            return Ok(());
        };
        self.pool.metrics().record_rejected();
        debug!(error = %err, "Admission refused");
        Err(err)
    }

    fn admitted(
        &self,
        item_id: uuid::Uuid,
        result: Result<usize, CoreError>,
    ) -> Result<AdmissionTicket, CoreError> {
        match result {
            Ok(queue_depth) => {
                self.pool.metrics().record_admitted();
                trace!(%item_id, queue_depth, "Item admitted");
                Ok(AdmissionTicket {
                    item_id,
                    queue_depth,
                })
            }
            Err(e) => {
                self.pool.metrics().record_rejected();
                debug!(%item_id, error = %e, "Item rejected");
                Err(e)
            }
        }
    }

    /// Runs the shutdown sequence bounded by the configured deadline.
    ///
    /// # Errors
    ///
    /// See [`shutdown_with_deadline`](Self::shutdown_with_deadline).
    pub async fn shutdown(&self) -> Result<ShutdownReport, CoreError> {
        self.shutdown_with_deadline(self.config.shutdown_deadline())
            .await
    }

    /// Runs the shutdown sequence, waiting at most `deadline` for the drain.
    ///
    /// Only the first call performs the sequence; later or concurrent calls
    /// return at once with `initiated: false` and the state they observed.
    /// Workers are always joined, so this can return after `deadline` by up
    /// to the longest in-flight item.
    ///
    /// # Errors
    ///
    /// Returns `ShutdownTimeout` if work was still queued or in flight at the
    /// deadline, or `Cancelled`/`DeadlineExceeded` if the root scope ended
    /// during the drain.
    pub async fn shutdown_with_deadline(
        &self,
        deadline: Duration,
    ) -> Result<ShutdownReport, CoreError> {
        let started = Instant::now();

        if let Err(current) = self.state.transition(PoolState::Accepting, PoolState::Draining) {
            debug!(state = %current, "Shutdown already in progress");
            return Ok(self.report(false, current, started));
        }

        info!(
            deadline_ms = deadline.as_millis(),
            queued = self.queue.len(),
            in_flight = self.queue.in_flight(),
            "Shutting down"
        );

        // === Phase 1: close the admission gate ===
        self.queue.close();

        // === Phase 2: stop the periodic task ===
        let periodic = self.periodic.lock().take();
        if let Some(handle) = &periodic {
            handle.stop();
        }

        // === Phase 3: drain ===
        let drain = tokio::time::timeout(deadline, self.root.run(self.queue.wait_drained())).await;
        let failure = match drain {
            Ok(Ok(())) => None,
            Ok(Err(cause)) => Some(CoreError::from(cause)),
            Err(_) => Some(CoreError::ShutdownTimeout {
                deadline,
                unstarted: 0,
            }),
        };

        // === Phase 4: stop and join workers ===
        self.pool.stop();
        let unstarted = if failure.is_some() {
            self.dispose_unstarted()
        } else {
            0
        };

        debug!("Waiting for workers to exit");
        self.pool.join().await;
        if let Some(mut handle) = periodic {
            handle.join().await;
        }

        // === Phase 5: stopped ===
        if let Err(current) = self.state.transition(PoolState::Draining, PoolState::Stopped) {
            warn!(state = %current, "Unexpected state at end of shutdown");
        }

        match failure {
            None => {
                let report = self.report(true, PoolState::Stopped, started);
                info!(
                    processed = report.processed,
                    failed = report.failed,
                    elapsed_ms = report.elapsed.as_millis(),
                    "Graceful shutdown complete"
                );
                Ok(report)
            }
            Some(err) => {
                let err = match err {
                    CoreError::ShutdownTimeout { deadline, .. } => {
                        CoreError::ShutdownTimeout { deadline, unstarted }
                    }
                    other => other,
                };
                warn!(error = %err, unstarted, "Shutdown did not drain cleanly");
                self.sink.report(FailureReport::from_error(
                    FailureSource::Shutdown,
                    "drain",
                    &err,
                ));
                Err(err)
            }
        }
    }

    /// Removes every queued item and disposes of it per the configured policy.
    fn dispose_unstarted(&self) -> usize {
        let items = self.queue.drain_remaining();
        let count = items.len();
        if count == 0 {
            return 0;
        }

        match self.config.unstarted_policy {
            UnstartedItemPolicy::DropAndReport => {
                for item in &items {
                    self.sink.report(
                        FailureReport::new(
                            FailureSource::Shutdown,
                            "drain",
                            ErrorKind::Abandoned,
                            "queued item abandoned at shutdown",
                        )
                        .with_item(item),
                    );
                }
                self.pool.metrics().record_abandoned(count as u64);
                warn!(count, "Abandoned unstarted items");
            }
            UnstartedItemPolicy::ReturnToCaller => {
                self.unstarted.lock().extend(items);
                info!(count, "Unstarted items held for the caller");
            }
        }

        count
    }

    fn report(&self, initiated: bool, state: PoolState, started: Instant) -> ShutdownReport {
        let metrics = self.pool.metrics();
        ShutdownReport {
            initiated,
            state,
            processed: metrics.processed(),
            failed: metrics.failed(),
            elapsed: started.elapsed(),
        }
    }

    /// Takes the items left unstarted by a timed-out shutdown.
    ///
    /// Always empty under [`UnstartedItemPolicy::DropAndReport`].
    pub fn take_unstarted(&self) -> Vec<WorkItem> {
        std::mem::take(&mut *self.unstarted.lock())
    }

    /// Returns the current lifecycle state.
    #[must_use]
    pub fn state(&self) -> PoolState {
        self.state.load()
    }

    /// Returns the number of queued, not yet started, items.
    #[must_use]
    pub fn queue_depth(&self) -> usize {
        self.queue.len()
    }

    /// Returns the number of items being processed.
    #[must_use]
    pub fn in_flight(&self) -> usize {
        self.queue.in_flight()
    }

    /// Returns a snapshot of every worker's status.
    #[must_use]
    pub fn worker_statuses(&self) -> Vec<WorkerStatus> {
        self.pool.worker_statuses()
    }

    /// Returns the pool counters.
    #[must_use]
    pub fn metrics(&self) -> &Arc<PoolMetrics> {
        self.pool.metrics()
    }

    /// Returns the configuration.
    #[must_use]
    pub const fn config(&self) -> &CoreConfig {
        &self.config
    }
}

impl std::fmt::Debug for ShutdownCoordinator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ShutdownCoordinator")
            .field("state", &self.state())
            .field("queue", &self.queue)
            .field("pool", &self.pool)
            .finish_non_exhaustive()
    }
}
