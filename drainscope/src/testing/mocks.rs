//! Test doubles for the injected capabilities.

use async_trait::async_trait;
use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::time::Duration;
use uuid::Uuid;

use crate::aggregator::Fetcher;
use crate::cancellation::DeadlineScope;
use crate::errors::{BoxError, CoreError};
use crate::periodic::PeriodicAction;
use crate::pool::{Processor, WorkItem};

/// A fetcher that answers after a fixed delay unless its scope ends first.
#[derive(Debug)]
pub struct DelayedFetcher {
    field: String,
    value: String,
    delay: Duration,
    error: Option<String>,
    calls: AtomicUsize,
    cancelled: AtomicBool,
}

impl DelayedFetcher {
    /// Creates a fetcher returning `value` for `field` after `delay`.
    #[must_use]
    pub fn new(field: impl Into<String>, value: impl Into<String>, delay: Duration) -> Self {
        Self {
            field: field.into(),
            value: value.into(),
            delay,
            error: None,
            calls: AtomicUsize::new(0),
            cancelled: AtomicBool::new(false),
        }
    }

    /// Makes the fetcher fail with `message` once the delay elapses.
    #[must_use]
    pub fn failing(mut self, message: impl Into<String>) -> Self {
        self.error = Some(message.into());
        self
    }

    /// Returns true if a call returned early because its scope ended.
    #[must_use]
    pub fn was_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::SeqCst)
    }

    /// Returns the number of calls.
    #[must_use]
    pub fn call_count(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Fetcher for DelayedFetcher {
    fn field(&self) -> &str {
        &self.field
    }

    async fn fetch(&self, scope: &DeadlineScope, _id: &str) -> Result<String, CoreError> {
        self.calls.fetch_add(1, Ordering::SeqCst);

        tokio::select! {
            () = tokio::time::sleep(self.delay) => match &self.error {
                Some(message) => Err(CoreError::upstream(self.field.clone(), message.clone())),
                None => Ok(self.value.clone()),
            },
            () = scope.done() => {
                self.cancelled.store(true, Ordering::SeqCst);
                Err(scope.err().map_or(CoreError::Cancelled, CoreError::from))
            }
        }
    }
}

/// A processor that records every item it finishes.
#[derive(Debug, Default)]
pub struct RecordingProcessor {
    delay: Duration,
    processed: Mutex<Vec<WorkItem>>,
    started: AtomicUsize,
}

impl RecordingProcessor {
    /// Creates a processor that finishes items immediately.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a processor that takes `delay` per item, ignoring cancellation.
    #[must_use]
    pub fn with_delay(delay: Duration) -> Self {
        Self {
            delay,
            ..Self::default()
        }
    }

    /// Returns the items finished so far, in completion order.
    #[must_use]
    pub fn processed(&self) -> Vec<WorkItem> {
        self.processed.lock().clone()
    }

    /// Returns the ids of finished items.
    #[must_use]
    pub fn processed_ids(&self) -> Vec<Uuid> {
        self.processed.lock().iter().map(WorkItem::id).collect()
    }

    /// Returns the number of items started.
    #[must_use]
    pub fn started(&self) -> usize {
        self.started.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Processor for RecordingProcessor {
    async fn process(&self, _scope: &DeadlineScope, item: &WorkItem) -> Result<(), BoxError> {
        self.started.fetch_add(1, Ordering::SeqCst);
        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }
        self.processed.lock().push(item.clone());
        Ok(())
    }
}

/// A processor that fails every item.
#[derive(Debug)]
pub struct FailingProcessor {
    message: String,
}

impl FailingProcessor {
    /// Creates a processor failing with `message`.
    #[must_use]
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }
}

#[async_trait]
impl Processor for FailingProcessor {
    async fn process(&self, _scope: &DeadlineScope, _item: &WorkItem) -> Result<(), BoxError> {
        Err(self.message.clone().into())
    }
}

/// A periodic action that counts its fires.
#[derive(Debug)]
pub struct CountingAction {
    name: String,
    fires: AtomicUsize,
}

impl CountingAction {
    /// Creates a counting action.
    #[must_use]
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            fires: AtomicUsize::new(0),
        }
    }

    /// Returns the number of fires.
    #[must_use]
    pub fn fires(&self) -> usize {
        self.fires.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl PeriodicAction for CountingAction {
    fn name(&self) -> &str {
        &self.name
    }

    async fn run(&self, _scope: &DeadlineScope) -> Result<(), BoxError> {
        self.fires.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}
