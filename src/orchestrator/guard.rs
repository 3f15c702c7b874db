use super::FeatureOrchestrator;
use std::fmt;
use std::future::Future;
use std::time::Duration;
use tokio::task::JoinHandle;
use tracing::debug;

impl FeatureOrchestrator {
    /// Call into a feature safely.
    ///
    /// Returns `fallback()` without calling `action` if the feature is not
    /// RUNNING or its breaker refuses the call. Otherwise the call runs
    /// under the breaker and any failure also yields `fallback()`.
    pub async fn execute_with_guard<T, E, F, Fut, FB>(&self, id: &str, action: F, fallback: FB) -> T
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, E>>,
        E: fmt::Display,
        FB: FnOnce() -> T,
    {
        if !self.is_feature_available(id) {
            debug!(feature = %id, "Feature unavailable, returning fallback");
            return fallback();
        }
        self.execution.execute(id, action, fallback).await
    }

    /// [`execute_with_guard`](Self::execute_with_guard) on the worker pool
    pub fn execute_with_guard_async<T, E, F, Fut, FB>(
        &self,
        id: impl Into<String>,
        action: F,
        fallback: FB,
    ) -> JoinHandle<T>
    where
        F: FnOnce() -> Fut + Send + 'static,
        Fut: Future<Output = Result<T, E>> + Send + 'static,
        E: fmt::Display + Send + 'static,
        T: Send + 'static,
        FB: FnOnce() -> T + Send + 'static,
    {
        let id = id.into();
        if !self.is_feature_available(&id) {
            debug!(feature = %id, "Feature unavailable, returning fallback");
            return self.execution.spawn_pooled(async move { fallback() });
        }
        self.execution.execute_async(id, action, fallback)
    }

    /// [`execute_with_guard`](Self::execute_with_guard) bounded by `deadline`.
    ///
    /// An overrun cancels the action, is recorded as a timeout against the
    /// feature and yields `fallback()`.
    pub async fn execute_with_guard_timeout<T, E, F, Fut, FB>(
        &self,
        id: &str,
        deadline: Duration,
        action: F,
        fallback: FB,
    ) -> T
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, E>>,
        E: fmt::Display,
        FB: FnOnce() -> T,
    {
        if !self.is_feature_available(id) {
            debug!(feature = %id, "Feature unavailable, returning fallback");
            return fallback();
        }
        self.execution
            .execute_with_timeout(id, deadline, action, fallback)
            .await
    }
}
