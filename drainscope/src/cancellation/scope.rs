//! Deadline-bounded cancellation scopes.

use crate::errors::ScopeError;
use parking_lot::RwLock;
use std::future::Future;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::trace;

/// A node in a tree of cancellation scopes.
///
/// A scope is done at the earliest of: an ancestor being cancelled, its
/// effective deadline elapsing (its own or any ancestor's, whichever is
/// sooner), or its [`CancelHandle`] being triggered. Once done it stays done,
/// and [`err`](Self::err) keeps reporting the first observed cause.
///
/// Scopes are cheap to clone; clones observe the same state.
#[derive(Clone)]
pub struct DeadlineScope {
    inner: Arc<ScopeInner>,
}

struct ScopeInner {
    /// Cancellation flag, linked to the parent's token.
    token: CancellationToken,
    /// Effective deadline, already capped by every ancestor's.
    deadline: Option<Instant>,
    /// The first observed cause (first one wins).
    cause: RwLock<Option<ScopeError>>,
    /// Back-link used to inherit the ancestor's cause.
    parent: Option<DeadlineScope>,
}

impl DeadlineScope {
    /// Returns a root scope that is never cancelled and has no deadline.
    #[must_use]
    pub fn background() -> Self {
        Self::from_parts(CancellationToken::new(), None, None)
    }

    /// Returns a cancellable root scope.
    ///
    /// Dropping the handle cancels the scope, so keep it bound for as long as
    /// the scope should live.
    #[must_use]
    pub fn root() -> (Self, CancelHandle) {
        let scope = Self::background();
        let handle = CancelHandle::new(scope.clone());
        (scope, handle)
    }

    /// Derives a child that is cancelled with this scope or through its handle.
    #[must_use]
    pub fn with_cancel(&self) -> (Self, CancelHandle) {
        self.derive(self.inner.deadline)
    }

    /// Derives a child that is additionally bounded by `timeout` from now.
    #[must_use]
    pub fn with_timeout(&self, timeout: Duration) -> (Self, CancelHandle) {
        match Instant::now().checked_add(timeout) {
            Some(deadline) => self.with_deadline(deadline),
            None => self.with_cancel(),
        }
    }

    /// Derives a child that is additionally bounded by `deadline`.
    #[must_use]
    pub fn with_deadline(&self, deadline: Instant) -> (Self, CancelHandle) {
        let effective = match self.inner.deadline {
            Some(parent) => parent.min(deadline),
            None => deadline,
        };
        self.derive(Some(effective))
    }

    fn derive(&self, deadline: Option<Instant>) -> (Self, CancelHandle) {
        let child = Self::from_parts(self.inner.token.child_token(), deadline, Some(self.clone()));
        let handle = CancelHandle::new(child.clone());
        (child, handle)
    }

    fn from_parts(
        token: CancellationToken,
        deadline: Option<Instant>,
        parent: Option<DeadlineScope>,
    ) -> Self {
        Self {
            inner: Arc::new(ScopeInner {
                token,
                deadline,
                cause: RwLock::new(None),
                parent,
            }),
        }
    }

    /// Returns the effective deadline, if any.
    #[must_use]
    pub fn deadline(&self) -> Option<Instant> {
        self.inner.deadline
    }

    /// Returns the time left until the effective deadline.
    #[must_use]
    pub fn remaining(&self) -> Option<Duration> {
        self.inner
            .deadline
            .map(|deadline| deadline.saturating_duration_since(Instant::now()))
    }

    /// Returns true once the scope is done.
    #[must_use]
    pub fn is_done(&self) -> bool {
        self.err().is_some()
    }

    /// Returns why the scope ended, or `None` while it is still live.
    #[must_use]
    pub fn err(&self) -> Option<ScopeError> {
        if let Some(cause) = *self.inner.cause.read() {
            return Some(cause);
        }

        let observed = if self.inner.token.is_cancelled() {
            self.inner
                .parent
                .as_ref()
                .and_then(Self::err)
                .unwrap_or(ScopeError::Cancelled)
        } else if self.deadline_elapsed() {
            ScopeError::DeadlineExceeded
        } else {
            return None;
        };

        Some(self.record(observed))
    }

    /// Resolves when the scope is done.
    pub async fn done(&self) {
        match self.inner.deadline {
            Some(deadline) => {
                tokio::select! {
                    () = self.inner.token.cancelled() => {}
                    () = tokio::time::sleep_until(deadline) => {}
                }
            }
            None => self.inner.token.cancelled().await,
        }
    }

    /// Runs `future` until it completes or the scope ends.
    ///
    /// # Errors
    ///
    /// Returns the scope's cause if it ends first. A scope that is already
    /// done never polls the future.
    pub async fn run<F>(&self, future: F) -> Result<F::Output, ScopeError>
    where
        F: Future,
    {
        tokio::select! {
            biased;
            () = self.done() => Err(self.err().unwrap_or(ScopeError::Cancelled)),
            output = future => Ok(output),
        }
    }

    fn deadline_elapsed(&self) -> bool {
        self.inner
            .deadline
            .is_some_and(|deadline| Instant::now() >= deadline)
    }

    fn record(&self, cause: ScopeError) -> ScopeError {
        *self.inner.cause.write().get_or_insert(cause)
    }

    fn cancel(&self) {
        let cause = if self.deadline_elapsed() {
            ScopeError::DeadlineExceeded
        } else {
            self.inner
                .parent
                .as_ref()
                .and_then(Self::err)
                .unwrap_or(ScopeError::Cancelled)
        };
        self.record(cause);
        self.inner.token.cancel();
    }
}

impl std::fmt::Debug for DeadlineScope {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DeadlineScope")
            .field("err", &self.err())
            .field("remaining", &self.remaining())
            .finish()
    }
}

/// Cancels one [`DeadlineScope`] and, through it, every descendant.
///
/// Cancelling is idempotent: only the first call has any effect. Dropping the
/// handle cancels the scope if that has not happened yet.
pub struct CancelHandle {
    scope: DeadlineScope,
    released: AtomicBool,
}

impl CancelHandle {
    fn new(scope: DeadlineScope) -> Self {
        Self {
            scope,
            released: AtomicBool::new(false),
        }
    }

    /// Cancels the scope.
    pub fn cancel(&self) {
        if self.released.swap(true, Ordering::SeqCst) {
            return;
        }
        self.scope.cancel();
        trace!(cause = ?self.scope.err(), "Scope released");
    }

    /// Returns true once [`cancel`](Self::cancel) has run.
    #[must_use]
    pub fn is_released(&self) -> bool {
        self.released.load(Ordering::SeqCst)
    }

    /// Returns the scope this handle controls.
    #[must_use]
    pub fn scope(&self) -> &DeadlineScope {
        &self.scope
    }
}

impl Drop for CancelHandle {
    fn drop(&mut self) {
        self.cancel();
    }
}

impl std::fmt::Debug for CancelHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CancelHandle")
            .field("released", &self.is_released())
            .field("scope", &self.scope)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_background_never_done() {
        let scope = DeadlineScope::background();
        assert!(!scope.is_done());
        assert!(scope.err().is_none());
        assert!(scope.deadline().is_none());
    }

    #[tokio::test]
    async fn test_cancel_marks_done() {
        let (scope, cancel) = DeadlineScope::root();
        assert!(!scope.is_done());

        cancel.cancel();

        assert!(cancel.is_released());
        assert_eq!(scope.err(), Some(ScopeError::Cancelled));
        tokio::time::timeout(Duration::from_millis(100), scope.done())
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn test_cancel_idempotent() {
        let (scope, cancel) = DeadlineScope::root();
        cancel.cancel();
        cancel.cancel();
        drop(cancel);

        assert_eq!(scope.err(), Some(ScopeError::Cancelled));
    }

    #[tokio::test]
    async fn test_timeout_elapses() {
        let root = DeadlineScope::background();
        let (scope, _cancel) = root.with_timeout(Duration::from_millis(20));

        assert!(!scope.is_done());
        scope.done().await;

        assert_eq!(scope.err(), Some(ScopeError::DeadlineExceeded));
        assert_eq!(scope.remaining(), Some(Duration::ZERO));
        assert!(!root.is_done());
    }

    #[tokio::test]
    async fn test_parent_cancel_cascades() {
        let (root, cancel_root) = DeadlineScope::root();
        let (child, _cancel_child) = root.with_cancel();
        let (grandchild, _cancel_grandchild) = child.with_timeout(Duration::from_secs(60));

        cancel_root.cancel();

        assert_eq!(child.err(), Some(ScopeError::Cancelled));
        assert_eq!(grandchild.err(), Some(ScopeError::Cancelled));
        tokio::time::timeout(Duration::from_millis(100), grandchild.done())
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn test_child_cancel_does_not_reach_parent() {
        let (root, _cancel_root) = DeadlineScope::root();
        let (child, cancel_child) = root.with_cancel();

        cancel_child.cancel();

        assert!(child.is_done());
        assert!(!root.is_done());
    }

    #[tokio::test]
    async fn test_child_deadline_capped_by_parent() {
        let root = DeadlineScope::background();
        let (parent, _p) = root.with_timeout(Duration::from_millis(20));
        let (child, _c) = parent.with_timeout(Duration::from_secs(60));

        assert_eq!(child.deadline(), parent.deadline());

        child.done().await;
        assert_eq!(child.err(), Some(ScopeError::DeadlineExceeded));
    }

    #[tokio::test]
    async fn test_drop_handle_cancels() {
        let root = DeadlineScope::background();
        let (child, cancel) = root.with_cancel();
        drop(cancel);

        assert_eq!(child.err(), Some(ScopeError::Cancelled));
    }

    #[tokio::test]
    async fn test_first_cause_wins() {
        let root = DeadlineScope::background();
        let (scope, cancel) = root.with_timeout(Duration::from_millis(10));

        scope.done().await;
        assert_eq!(scope.err(), Some(ScopeError::DeadlineExceeded));

        cancel.cancel();
        assert_eq!(scope.err(), Some(ScopeError::DeadlineExceeded));
    }

    #[tokio::test]
    async fn test_run_aborts_on_cancel() {
        let (scope, cancel) = DeadlineScope::root();

        let task = tokio::spawn({
            let scope = scope.clone();
            async move {
                scope
                    .run(tokio::time::sleep(Duration::from_secs(10)))
                    .await
            }
        });

        tokio::time::sleep(Duration::from_millis(20)).await;
        cancel.cancel();

        let result = tokio::time::timeout(Duration::from_millis(200), task)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(result, Err(ScopeError::Cancelled));
    }

    #[tokio::test]
    async fn test_run_completes_before_deadline() {
        let root = DeadlineScope::background();
        let (scope, _cancel) = root.with_timeout(Duration::from_secs(5));

        let value = scope.run(async { 42 }).await;
        assert_eq!(value, Ok(42));
    }
}
