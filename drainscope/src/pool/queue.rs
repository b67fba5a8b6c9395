//! Bounded FIFO queue with an explicit admission policy.
//!
//! The queue is internally synchronized: callers never lock it. State lives
//! behind a `parking_lot::Mutex` that is only held for push/pop bookkeeping;
//! every wait happens on a `tokio::sync::Notify` after the lock is released.

use super::WorkItem;
use crate::cancellation::DeadlineScope;
use crate::config::AdmissionPolicy;
use crate::errors::CoreError;
use parking_lot::Mutex;
use std::collections::VecDeque;
use std::pin::pin;
use std::sync::atomic::{AtomicU64, Ordering};
use tokio::sync::Notify;

#[derive(Debug, Default)]
struct QueueState {
    items: VecDeque<WorkItem>,
    /// Items handed to a worker and not yet completed.
    in_flight: usize,
    /// Admission gate; once closed, never reopened.
    closed: bool,
}

impl QueueState {
    fn is_drained(&self) -> bool {
        self.items.is_empty() && self.in_flight == 0
    }
}

enum Push {
    Accepted(usize),
    Full(WorkItem),
    Closed,
}

enum Pop {
    Item(WorkItem),
    Empty,
    Closed,
}

/// Bounded FIFO of pending work items.
///
/// Each item is handed to at most one consumer, in enqueue order. Consumers
/// call [`complete`](Self::complete) once they finish an item so that
/// [`wait_drained`](Self::wait_drained) can tell queued-and-running work from
/// an idle queue.
pub struct TaskQueue {
    state: Mutex<QueueState>,
    capacity: usize,
    policy: AdmissionPolicy,
    item_ready: Notify,
    space_ready: Notify,
    drained: Notify,
    enqueued: AtomicU64,
    dequeued: AtomicU64,
}

impl TaskQueue {
    /// Creates a queue.
    ///
    /// # Errors
    ///
    /// Returns `InvalidConfig` if `capacity` is zero.
    pub fn new(capacity: usize, policy: AdmissionPolicy) -> Result<Self, CoreError> {
        if capacity == 0 {
            return Err(CoreError::InvalidConfig(
                "queue capacity must be at least 1".to_string(),
            ));
        }
        Ok(Self {
            state: Mutex::new(QueueState::default()),
            capacity,
            policy,
            item_ready: Notify::new(),
            space_ready: Notify::new(),
            drained: Notify::new(),
            enqueued: AtomicU64::new(0),
            dequeued: AtomicU64::new(0),
        })
    }

    /// Adds an item, applying the admission policy when the queue is full.
    ///
    /// Returns the queue depth after the push.
    ///
    /// # Errors
    ///
    /// - `ShuttingDown` if the queue is closed, including while blocked.
    /// - `QueueFull` if the queue is full and the policy is `Reject`.
    pub async fn enqueue(&self, item: WorkItem) -> Result<usize, CoreError> {
        let mut item = item;
        loop {
            let mut space = pin!(self.space_ready.notified());
            space.as_mut().enable();

            match self.push(item) {
                Push::Accepted(depth) => return Ok(depth),
                Push::Closed => return Err(CoreError::ShuttingDown),
                Push::Full(_) if self.policy == AdmissionPolicy::Reject => {
                    return Err(CoreError::QueueFull {
                        capacity: self.capacity,
                    });
                }
                Push::Full(back) => item = back,
            }

            space.await;
        }
    }

    /// Adds an item without waiting, whatever the policy.
    ///
    /// # Errors
    ///
    /// `ShuttingDown` if closed, `QueueFull` if at capacity.
    pub fn try_enqueue(&self, item: WorkItem) -> Result<usize, CoreError> {
        match self.push(item) {
            Push::Accepted(depth) => Ok(depth),
            Push::Full(_) => Err(CoreError::QueueFull {
                capacity: self.capacity,
            }),
            Push::Closed => Err(CoreError::ShuttingDown),
        }
    }

    fn push(&self, item: WorkItem) -> Push {
        let depth = {
            let mut state = self.state.lock();
            if state.closed {
                return Push::Closed;
            }
            if state.items.len() >= self.capacity {
                return Push::Full(item);
            }
            state.items.push_back(item);
            state.items.len()
        };
        self.enqueued.fetch_add(1, Ordering::Relaxed);
        self.item_ready.notify_one();
        Push::Accepted(depth)
    }

    /// Takes the next item.
    ///
    /// Waits until an item is available. Returns `None` once `scope` is done
    /// or the queue is closed with nothing left in it. A returned item counts
    /// as in flight until [`complete`](Self::complete) is called.
    pub async fn dequeue(&self, scope: &DeadlineScope) -> Option<WorkItem> {
        loop {
            let mut ready = pin!(self.item_ready.notified());
            ready.as_mut().enable();

            if scope.is_done() {
                return None;
            }
            match self.pop() {
                Pop::Item(item) => return Some(item),
                Pop::Closed => return None,
                Pop::Empty => {}
            }

            tokio::select! {
                biased;
                () = scope.done() => return None,
                () = &mut ready => {}
            }
        }
    }

    fn pop(&self) -> Pop {
        let (item, more) = {
            let mut state = self.state.lock();
            match state.items.pop_front() {
                Some(item) => {
                    state.in_flight += 1;
                    (item, !state.items.is_empty())
                }
                None if state.closed => return Pop::Closed,
                None => return Pop::Empty,
            }
        };
        self.dequeued.fetch_add(1, Ordering::Relaxed);
        self.space_ready.notify_one();
        if more {
            self.item_ready.notify_one();
        }
        Pop::Item(item)
    }

    /// Marks one dequeued item as finished.
    pub fn complete(&self) {
        let drained = {
            let mut state = self.state.lock();
            state.in_flight = state.in_flight.saturating_sub(1);
            state.is_drained()
        };
        if drained {
            self.drained.notify_waiters();
        }
    }

    /// Resolves once no item is queued or in flight.
    pub async fn wait_drained(&self) {
        loop {
            let mut drained = pin!(self.drained.notified());
            drained.as_mut().enable();

            if self.state.lock().is_drained() {
                return;
            }
            drained.await;
        }
    }

    /// Closes the admission gate.
    ///
    /// Blocked and future producers get `ShuttingDown`. Queued items are
    /// still handed out. Returns false if the gate was already closed.
    pub fn close(&self) -> bool {
        let newly_closed = {
            let mut state = self.state.lock();
            !std::mem::replace(&mut state.closed, true)
        };
        if newly_closed {
            self.space_ready.notify_waiters();
            self.item_ready.notify_waiters();
        }
        newly_closed
    }

    /// Removes and returns every queued item, oldest first.
    pub fn drain_remaining(&self) -> Vec<WorkItem> {
        let (items, drained) = {
            let mut state = self.state.lock();
            let items: Vec<WorkItem> = state.items.drain(..).collect();
            (items, state.is_drained())
        };
        self.space_ready.notify_waiters();
        if drained {
            self.drained.notify_waiters();
        }
        items
    }

    /// Returns the number of queued items.
    #[must_use]
    pub fn len(&self) -> usize {
        self.state.lock().items.len()
    }

    /// Returns true if no item is queued.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.state.lock().items.is_empty()
    }

    /// Returns the number of items handed out and not yet completed.
    #[must_use]
    pub fn in_flight(&self) -> usize {
        self.state.lock().in_flight
    }

    /// Returns true once the admission gate is closed.
    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.state.lock().closed
    }

    /// Returns the capacity.
    #[must_use]
    pub const fn capacity(&self) -> usize {
        self.capacity
    }

    /// Returns the admission policy.
    #[must_use]
    pub const fn policy(&self) -> AdmissionPolicy {
        self.policy
    }

    /// Returns the total number of items ever enqueued.
    #[must_use]
    pub fn enqueued_total(&self) -> u64 {
        self.enqueued.load(Ordering::Relaxed)
    }

    /// Returns the total number of items ever dequeued.
    #[must_use]
    pub fn dequeued_total(&self) -> u64 {
        self.dequeued.load(Ordering::Relaxed)
    }
}

impl std::fmt::Debug for TaskQueue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = self.state.lock();
        f.debug_struct("TaskQueue")
            .field("len", &state.items.len())
            .field("in_flight", &state.in_flight)
            .field("closed", &state.closed)
            .field("capacity", &self.capacity)
            .field("policy", &self.policy)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use std::sync::Arc;
    use std::time::Duration;

    fn queue(capacity: usize, policy: AdmissionPolicy) -> Arc<TaskQueue> {
        Arc::new(TaskQueue::new(capacity, policy).unwrap())
    }

    #[test]
    fn test_zero_capacity_rejected() {
        let result = TaskQueue::new(0, AdmissionPolicy::Block);
        assert!(matches!(result, Err(CoreError::InvalidConfig(_))));
    }

    #[tokio::test]
    async fn test_fifo_order() {
        let q = queue(10, AdmissionPolicy::Block);
        let scope = DeadlineScope::background();

        for n in 0..5 {
            q.enqueue(WorkItem::named(format!("item-{n}"))).await.unwrap();
        }

        let mut seen = Vec::new();
        for _ in 0..5 {
            let item = q.dequeue(&scope).await.unwrap();
            seen.push(item.descriptor().to_string());
            q.complete();
        }

        assert_eq!(seen, vec!["item-0", "item-1", "item-2", "item-3", "item-4"]);
        assert_eq!(q.enqueued_total(), 5);
        assert_eq!(q.dequeued_total(), 5);
    }

    #[tokio::test]
    async fn test_reject_policy_when_full() {
        let q = queue(1, AdmissionPolicy::Reject);
        q.enqueue(WorkItem::named("a")).await.unwrap();

        let result = q.enqueue(WorkItem::named("b")).await;
        assert!(matches!(result, Err(CoreError::QueueFull { capacity: 1 })));
        assert_eq!(q.len(), 1);
    }

    #[tokio::test]
    async fn test_try_enqueue_never_blocks() {
        let q = queue(1, AdmissionPolicy::Block);
        tokio_test::assert_ok!(q.try_enqueue(WorkItem::named("a")));
        tokio_test::assert_err!(q.try_enqueue(WorkItem::named("b")));
    }

    #[test]
    fn test_dequeue_pending_until_item_arrives() {
        let q = TaskQueue::new(4, AdmissionPolicy::Block).unwrap();
        let scope = DeadlineScope::background();

        let mut consumer = tokio_test::task::spawn(q.dequeue(&scope));
        tokio_test::assert_pending!(consumer.poll());

        q.try_enqueue(WorkItem::named("a")).unwrap();
        assert!(consumer.is_woken());

        let item = tokio_test::assert_ready!(consumer.poll());
        assert_eq!(item.unwrap().descriptor(), "a");
        assert_eq!(q.in_flight(), 1);
    }

    #[tokio::test]
    async fn test_block_policy_waits_for_space() {
        let q = queue(1, AdmissionPolicy::Block);
        let scope = DeadlineScope::background();
        q.enqueue(WorkItem::named("a")).await.unwrap();

        let producer = tokio::spawn({
            let q = q.clone();
            async move { q.enqueue(WorkItem::named("b")).await }
        });

        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(!producer.is_finished());

        let first = q.dequeue(&scope).await.unwrap();
        assert_eq!(first.descriptor(), "a");

        let depth = tokio::time::timeout(Duration::from_millis(200), producer)
            .await
            .unwrap()
            .unwrap()
            .unwrap();
        assert_eq!(depth, 1);
    }

    #[tokio::test]
    async fn test_close_wakes_blocked_producer() {
        let q = queue(1, AdmissionPolicy::Block);
        q.enqueue(WorkItem::named("a")).await.unwrap();

        let producer = tokio::spawn({
            let q = q.clone();
            async move { q.enqueue(WorkItem::named("b")).await }
        });
        tokio::time::sleep(Duration::from_millis(20)).await;

        assert!(q.close());
        assert!(!q.close());

        let result = tokio::time::timeout(Duration::from_millis(200), producer)
            .await
            .unwrap()
            .unwrap();
        assert!(matches!(result, Err(CoreError::ShuttingDown)));
        assert_eq!(q.len(), 1);
    }

    #[tokio::test]
    async fn test_closed_queue_still_hands_out_items() {
        let q = queue(4, AdmissionPolicy::Block);
        let scope = DeadlineScope::background();
        q.enqueue(WorkItem::named("a")).await.unwrap();
        q.close();

        assert!(matches!(
            q.enqueue(WorkItem::named("b")).await,
            Err(CoreError::ShuttingDown)
        ));
        assert_eq!(q.dequeue(&scope).await.map(|i| i.descriptor().to_string()).as_deref(), Some("a"));
        assert!(q.dequeue(&scope).await.is_none());
    }

    #[tokio::test]
    async fn test_dequeue_observes_scope() {
        let q = queue(4, AdmissionPolicy::Block);
        let (scope, cancel) = DeadlineScope::root();

        let consumer = tokio::spawn({
            let q = q.clone();
            let scope = scope.clone();
            async move { q.dequeue(&scope).await }
        });
        tokio::time::sleep(Duration::from_millis(20)).await;
        cancel.cancel();

        let result = tokio::time::timeout(Duration::from_millis(200), consumer)
            .await
            .unwrap()
            .unwrap();
        assert!(result.is_none());
    }

    #[tokio::test]
    async fn test_wait_drained_tracks_in_flight() {
        let q = queue(4, AdmissionPolicy::Block);
        let scope = DeadlineScope::background();
        q.enqueue(WorkItem::named("a")).await.unwrap();

        let _item = q.dequeue(&scope).await.unwrap();
        assert!(q.is_empty());
        assert_eq!(q.in_flight(), 1);

        let waiter = tokio::spawn({
            let q = q.clone();
            async move { q.wait_drained().await }
        });
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(!waiter.is_finished());

        q.complete();
        tokio::time::timeout(Duration::from_millis(200), waiter)
            .await
            .unwrap()
            .unwrap();
    }

    #[tokio::test]
    async fn test_drain_remaining_takes_everything() {
        let q = queue(4, AdmissionPolicy::Block);
        for n in 0..3 {
            q.enqueue(WorkItem::named(format!("item-{n}"))).await.unwrap();
        }

        let rest = q.drain_remaining();
        let names: Vec<_> = rest.iter().map(WorkItem::descriptor).collect();
        assert_eq!(names, vec!["item-0", "item-1", "item-2"]);
        assert!(q.is_empty());
        tokio::time::timeout(Duration::from_millis(100), q.wait_drained())
            .await
            .unwrap();
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_consumers_no_duplicates() {
        let q = queue(16, AdmissionPolicy::Block);
        let scope = DeadlineScope::background();

        let mut consumers = Vec::new();
        for _ in 0..4 {
            let q = q.clone();
            let scope = scope.clone();
            consumers.push(tokio::spawn(async move {
                let mut got = Vec::new();
                while let Some(item) = q.dequeue(&scope).await {
                    got.push(item.id());
                    q.complete();
                }
                got
            }));
        }

        let mut sent = Vec::new();
        for n in 0..200 {
            let item = WorkItem::named(format!("item-{n}"));
            sent.push(item.id());
            q.enqueue(item).await.unwrap();
        }
        q.close();

        let mut received = Vec::new();
        for consumer in consumers {
            received.extend(consumer.await.unwrap());
        }

        sent.sort();
        received.sort();
        assert_eq!(received, sent);
    }
}
