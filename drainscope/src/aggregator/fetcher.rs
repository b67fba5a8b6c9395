//! Injected fetch capabilities.

use crate::cancellation::DeadlineScope;
use crate::errors::CoreError;
use async_trait::async_trait;
use std::fmt::Debug;
use std::future::Future;

/// Fetches one logical field of an aggregate.
///
/// Implementations must watch `scope` and return promptly once it is done
/// rather than running to natural completion.
#[async_trait]
pub trait Fetcher: Send + Sync + Debug {
    /// Returns the name of the field this fetcher fills.
    fn field(&self) -> &str;

    /// Fetches the value for `id`.
    async fn fetch(&self, scope: &DeadlineScope, id: &str) -> Result<String, CoreError>;
}

/// A closure-backed fetcher.
pub struct FnFetcher<F, Fut>
where
    F: Fn(DeadlineScope, String) -> Fut + Send + Sync,
    Fut: Future<Output = Result<String, CoreError>> + Send,
{
    field: String,
    func: F,
    _phantom: std::marker::PhantomData<fn() -> Fut>,
}

impl<F, Fut> FnFetcher<F, Fut>
where
    F: Fn(DeadlineScope, String) -> Fut + Send + Sync,
    Fut: Future<Output = Result<String, CoreError>> + Send,
{
    /// Creates a fetcher for `field` from an async closure.
    pub fn new(field: impl Into<String>, func: F) -> Self {
        Self {
            field: field.into(),
            func,
            _phantom: std::marker::PhantomData,
        }
    }
}

impl<F, Fut> Debug for FnFetcher<F, Fut>
where
    F: Fn(DeadlineScope, String) -> Fut + Send + Sync,
    Fut: Future<Output = Result<String, CoreError>> + Send,
{
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FnFetcher")
            .field("field", &self.field)
            .finish()
    }
}

#[async_trait]
impl<F, Fut> Fetcher for FnFetcher<F, Fut>
where
    F: Fn(DeadlineScope, String) -> Fut + Send + Sync,
    Fut: Future<Output = Result<String, CoreError>> + Send,
{
    fn field(&self) -> &str {
        &self.field
    }

    async fn fetch(&self, scope: &DeadlineScope, id: &str) -> Result<String, CoreError> {
        (self.func)(scope.clone(), id.to_string()).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_fn_fetcher() {
        let fetcher = FnFetcher::new("profile", |_scope, id: String| async move {
            Ok(format!("user {id}"))
        });

        assert_eq!(fetcher.field(), "profile");
        let value = fetcher.fetch(&DeadlineScope::background(), "7").await.unwrap();
        assert_eq!(value, "user 7");
    }
}
