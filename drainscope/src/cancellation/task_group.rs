//! Structured task group bound to a deadline scope.

use super::{CancelHandle, DeadlineScope};
use crate::errors::CoreError;
use futures::FutureExt;
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::time::Duration;
use tokio::task::JoinSet;
use tracing::{debug, warn};

/// A group of related tasks sharing one cancellation scope.
///
/// The first failure cancels the group's scope so siblings can abort early.
/// [`wait`](Self::wait) never returns while a task is still running:
/// stragglers get a grace period to observe cancellation and are aborted
/// after it.
pub struct TaskGroup<T> {
    /// The scope every task receives.
    scope: DeadlineScope,
    /// Cancels `scope`; also released on drop.
    cancel: CancelHandle,
    /// Spawned tasks, each tagged with its name.
    tasks: JoinSet<(String, Result<T, CoreError>)>,
    /// How long cancelled tasks may take to return.
    grace: Duration,
}

impl<T: Send + 'static> TaskGroup<T> {
    /// Creates a group whose scope is a child of `parent`.
    #[must_use]
    pub fn new(parent: &DeadlineScope, grace: Duration) -> Self {
        let (scope, cancel) = parent.with_cancel();
        Self::from_scope(scope, cancel, grace)
    }

    /// Creates a group whose scope is bounded by `timeout`.
    #[must_use]
    pub fn with_timeout(parent: &DeadlineScope, timeout: Duration, grace: Duration) -> Self {
        let (scope, cancel) = parent.with_timeout(timeout);
        Self::from_scope(scope, cancel, grace)
    }

    fn from_scope(scope: DeadlineScope, cancel: CancelHandle, grace: Duration) -> Self {
        Self {
            scope,
            cancel,
            tasks: JoinSet::new(),
            grace,
        }
    }

    /// Returns the group's scope.
    #[must_use]
    pub fn scope(&self) -> &DeadlineScope {
        &self.scope
    }

    /// Spawns a task in the group.
    pub fn spawn<F, Fut>(&mut self, name: impl Into<String>, task: F)
    where
        F: FnOnce(DeadlineScope) -> Fut,
        Fut: Future<Output = Result<T, CoreError>> + Send + 'static,
    {
        let name = name.into();
        let fut = task(self.scope.clone());
        self.tasks.spawn(async move {
            let result = AssertUnwindSafe(fut)
                .catch_unwind()
                .await
                .unwrap_or_else(|_| {
                    Err(CoreError::Panicked {
                        task: name.clone(),
                    })
                });
            (name, result)
        });
    }

    /// Cancels all tasks in the group.
    pub fn cancel_all(&self) {
        self.cancel.cancel();
    }

    /// Returns the number of tasks not yet joined.
    #[must_use]
    pub fn task_count(&self) -> usize {
        self.tasks.len()
    }

    /// Waits for all tasks to complete.
    ///
    /// Results are returned in completion order, each with its task name.
    ///
    /// # Errors
    ///
    /// Returns the first error observed: a task failure, a task panic, or the
    /// scope ending (deadline or ancestor cancellation) before all tasks
    /// finished. Remaining tasks are cancelled and joined before returning.
    pub async fn wait(mut self) -> Result<Vec<(String, T)>, CoreError> {
        let mut results = Vec::with_capacity(self.tasks.len());
        let mut first_error: Option<CoreError> = None;

        while first_error.is_none() {
            let joined = tokio::select! {
                biased;
                joined = self.tasks.join_next() => joined,
                () = self.scope.done() => {
                    let cause = self.scope.err().map_or(CoreError::Cancelled, CoreError::from);
                    debug!(error = %cause, pending = self.tasks.len(), "Task group scope ended");
                    first_error = Some(cause);
                    break;
                }
            };

            match joined {
                None => break,
                Some(Ok((name, Ok(value)))) => results.push((name, value)),
                Some(Ok((name, Err(err)))) => {
                    debug!(task = %name, error = %err, "Task failed, cancelling group");
                    first_error = Some(err);
                }
                Some(Err(join_err)) => {
                    warn!(error = %join_err, "Task join error");
                    first_error = Some(CoreError::Cancelled);
                }
            }
        }

        if let Some(err) = first_error {
            self.cancel.cancel();
            self.drain().await;
            return Err(err);
        }

        Ok(results)
    }

    async fn drain(&mut self) {
        let grace = self.grace;
        let drained = tokio::time::timeout(grace, async {
            while self.tasks.join_next().await.is_some() {}
        })
        .await;

        if drained.is_err() {
            warn!(
                pending = self.tasks.len(),
                grace_ms = grace.as_millis(),
                "Tasks ignored cancellation, aborting"
            );
            self.tasks.abort_all();
            while self.tasks.join_next().await.is_some() {}
        }
    }
}

impl<T> std::fmt::Debug for TaskGroup<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TaskGroup")
            .field("task_count", &self.tasks.len())
            .field("scope", &self.scope)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    fn grace() -> Duration {
        Duration::from_millis(200)
    }

    #[tokio::test]
    async fn test_task_group_success() {
        let root = DeadlineScope::background();
        let mut group = TaskGroup::new(&root, grace());

        group.spawn("task1", |_scope| async { Ok(1) });
        group.spawn("task2", |_scope| async { Ok(2) });
        assert_eq!(group.task_count(), 2);

        let mut results = group.wait().await.unwrap();
        results.sort();
        assert_eq!(results, vec![("task1".to_string(), 1), ("task2".to_string(), 2)]);
    }

    #[tokio::test]
    async fn test_task_group_with_error() {
        let root = DeadlineScope::background();
        let mut group = TaskGroup::<()>::new(&root, grace());
        let scope = group.scope().clone();

        group.spawn("success", |_scope| async { Ok(()) });
        group.spawn("failure", |_scope| async {
            Err(CoreError::upstream("failure", "boom"))
        });

        let result = group.wait().await;
        assert!(matches!(result, Err(CoreError::Upstream { .. })));
        assert!(scope.is_done());
        assert!(!root.is_done());
    }

    #[tokio::test]
    async fn test_error_cancels_siblings() {
        let root = DeadlineScope::background();
        let mut group = TaskGroup::<()>::new(&root, grace());
        let observed = Arc::new(AtomicUsize::new(0));

        let observed_clone = observed.clone();
        group.spawn("long_task", move |scope| async move {
            match scope.run(tokio::time::sleep(Duration::from_secs(10))).await {
                Ok(()) => Ok(()),
                Err(cause) => {
                    observed_clone.fetch_add(1, Ordering::SeqCst);
                    Err(cause.into())
                }
            }
        });
        group.spawn("failure", |_scope| async {
            tokio::time::sleep(Duration::from_millis(20)).await;
            Err(CoreError::upstream("failure", "boom"))
        });

        let started = std::time::Instant::now();
        let result = group.wait().await;

        assert!(matches!(result, Err(CoreError::Upstream { .. })));
        assert_eq!(observed.load(Ordering::SeqCst), 1);
        assert!(started.elapsed() < Duration::from_secs(1));
    }

    #[tokio::test]
    async fn test_deadline_ends_group() {
        let root = DeadlineScope::background();
        let mut group = TaskGroup::<()>::with_timeout(&root, Duration::from_millis(30), grace());

        group.spawn("slow", |scope| async move {
            scope
                .run(tokio::time::sleep(Duration::from_secs(10)))
                .await
                .map_err(CoreError::from)
        });

        let result = group.wait().await;
        assert!(matches!(result, Err(CoreError::DeadlineExceeded)));
    }

    #[tokio::test]
    async fn test_stubborn_task_is_aborted() {
        let root = DeadlineScope::background();
        let mut group = TaskGroup::<()>::new(&root, Duration::from_millis(20));

        group.spawn("stubborn", |_scope| async {
            tokio::time::sleep(Duration::from_secs(10)).await;
            Ok(())
        });
        group.spawn("failure", |_scope| async {
            Err(CoreError::upstream("failure", "boom"))
        });

        let started = std::time::Instant::now();
        let result = group.wait().await;

        assert!(result.is_err());
        assert!(started.elapsed() < Duration::from_secs(1));
    }

    #[tokio::test]
    async fn test_panic_is_reported() {
        let root = DeadlineScope::background();
        let mut group = TaskGroup::<()>::new(&root, grace());

        group.spawn("panics", |_scope| async { panic!("Intentional panic") });

        let result = group.wait().await;
        assert!(matches!(result, Err(CoreError::Panicked { task }) if task == "panics"));
    }
}
