use crate::circuit_breaker::BreakerRegistry;
use crate::config::ExecutionConfig;
use crate::error::FeatureError;
use futures::FutureExt;
use std::any::Any;
use std::fmt;
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::sync::{Arc, Weak};
use std::time::Duration;
use tokio::sync::Semaphore;
use tokio::task::JoinHandle;
use tokio::time::timeout;
use tracing::{debug, warn};

/// Receives deadline overruns detected by an [`ExecutionContext`]
pub trait TimeoutObserver: Send + Sync {
    fn record_timeout(&self, feature_id: &str, deadline: Duration);
}

/// Await a fallible future, turning errors and panics into a failure reason
pub(crate) async fn catch_failure<T, E, Fut>(future: Fut) -> Result<T, String>
where
    Fut: Future<Output = Result<T, E>>,
    E: fmt::Display,
{
    match AssertUnwindSafe(future).catch_unwind().await {
        Ok(Ok(value)) => Ok(value),
        Ok(Err(error)) => Err(error.to_string()),
        Err(payload) => Err(panic_message(payload.as_ref())),
    }
}

/// Await a lifecycle callback, converting a panic into a runtime failure
pub(crate) async fn catch_feature_panic<T, Fut>(future: Fut) -> Result<T, FeatureError>
where
    Fut: Future<Output = Result<T, FeatureError>>,
{
    AssertUnwindSafe(future)
        .catch_unwind()
        .await
        .unwrap_or_else(|payload| Err(FeatureError::runtime(panic_message(payload.as_ref()))))
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(message) = payload.downcast_ref::<&str>() {
        format!("panicked: {}", message)
    } else if let Some(message) = payload.downcast_ref::<String>() {
        format!("panicked: {}", message)
    } else {
        "panicked".to_string()
    }
}

/// Reusable wrapper that runs feature calls under their circuit breaker.
///
/// Every variant resolves to either the action's value or the caller's
/// fallback; failures are recorded, never returned.
#[derive(Clone)]
pub struct ExecutionContext {
    breakers: BreakerRegistry,
    pool: Arc<Semaphore>,
    default_timeout: Duration,
    observer: Option<Weak<dyn TimeoutObserver>>,
}

impl fmt::Debug for ExecutionContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ExecutionContext")
            .field("breakers", &self.breakers.len())
            .field("available_workers", &self.pool.available_permits())
            .field("default_timeout", &self.default_timeout)
            .finish()
    }
}

impl ExecutionContext {
    pub fn new(breakers: BreakerRegistry, config: &ExecutionConfig) -> Self {
        Self {
            breakers,
            pool: Arc::new(Semaphore::new(config.worker_pool_size.max(1))),
            default_timeout: config.default_timeout(),
            observer: None,
        }
    }

    /// Route timeouts to `observer` instead of straight to the breaker
    pub fn with_timeout_observer(mut self, observer: Weak<dyn TimeoutObserver>) -> Self {
        self.observer = Some(observer);
        self
    }

    pub fn breakers(&self) -> &BreakerRegistry {
        &self.breakers
    }

    pub fn default_timeout(&self) -> Duration {
        self.default_timeout
    }

    /// Run `action` inline on the caller's task
    pub async fn execute<T, E, F, Fut, FB>(&self, feature_id: &str, action: F, fallback: FB) -> T
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, E>>,
        E: fmt::Display,
        FB: FnOnce() -> T,
    {
        match self.breakers.get(feature_id) {
            Some(breaker) => breaker.execute(action, fallback).await,
            None => {
                debug!(feature = %feature_id, "No circuit breaker registered, running unguarded");
                match catch_failure(async move { action().await }).await {
                    Ok(value) => value,
                    Err(reason) => {
                        debug!(feature = %feature_id, %reason, "Unguarded call failed, returning fallback");
                        fallback()
                    }
                }
            }
        }
    }

    /// Run `action` on the bounded worker pool and return a handle to its result
    pub fn execute_async<T, E, F, Fut, FB>(
        &self,
        feature_id: impl Into<String>,
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
        let context = self.clone();
        let feature_id = feature_id.into();
        self.spawn_pooled(async move { context.execute(&feature_id, action, fallback).await })
    }

    /// Like [`execute`](Self::execute) but gives up after `deadline`.
    ///
    /// On expiry the in-flight action is cancelled, the fallback is returned
    /// and the timeout is reported as a failure for `feature_id`.
    pub async fn execute_with_timeout<T, E, F, Fut, FB>(
        &self,
        feature_id: &str,
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
        let attempt = self.execute(
            feature_id,
            move || async move { action().await.map(Some) },
            || None,
        );

        match timeout(deadline, attempt).await {
            Ok(Some(value)) => value,
            Ok(None) => fallback(),
            Err(_) => {
                self.report_timeout(feature_id, deadline);
                fallback()
            }
        }
    }

    /// [`execute_with_timeout`](Self::execute_with_timeout) using the configured deadline
    pub async fn execute_with_default_timeout<T, E, F, Fut, FB>(
        &self,
        feature_id: &str,
        action: F,
        fallback: FB,
    ) -> T
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, E>>,
        E: fmt::Display,
        FB: FnOnce() -> T,
    {
        self.execute_with_timeout(feature_id, self.default_timeout, action, fallback)
            .await
    }

    /// Spawn `future` once a worker slot is free
    pub fn spawn_pooled<Fut>(&self, future: Fut) -> JoinHandle<Fut::Output>
    where
        Fut: Future + Send + 'static,
        Fut::Output: Send + 'static,
    {
        let pool = Arc::clone(&self.pool);
        tokio::spawn(async move {
            // The semaphore is never closed, so a permit always arrives
            let _permit = pool.acquire_owned().await.ok();
            future.await
        })
    }

    fn report_timeout(&self, feature_id: &str, deadline: Duration) {
        warn!(
            feature = %feature_id,
            deadline_ms = deadline.as_millis() as u64,
            "Guarded call timed out"
        );

        match self.observer.as_ref().and_then(Weak::upgrade) {
            Some(observer) => observer.record_timeout(feature_id, deadline),
            None => {
                if let Some(breaker) = self.breakers.get(feature_id) {
                    breaker.record_timeout(deadline);
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::circuit_breaker::{CircuitBreaker, CircuitState};
    use crate::config::CircuitBreakerConfig;
    use parking_lot::Mutex;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use tokio::time::sleep;

    fn context_with_breaker(id: &str, failure_threshold: u32) -> ExecutionContext {
        let breakers = BreakerRegistry::new();
        breakers.insert(
            id,
            Arc::new(CircuitBreaker::new(
                id,
                CircuitBreakerConfig {
                    failure_threshold,
                    ..CircuitBreakerConfig::default()
                },
            )),
        );
        ExecutionContext::new(breakers, &ExecutionConfig::default())
    }

    #[derive(Default)]
    struct RecordingObserver {
        timeouts: Mutex<Vec<(String, Duration)>>,
    }

    impl TimeoutObserver for RecordingObserver {
        fn record_timeout(&self, feature_id: &str, deadline: Duration) {
            self.timeouts.lock().push((feature_id.to_string(), deadline));
        }
    }

    #[tokio::test]
    async fn test_unregistered_feature_runs_without_breaker() {
        let context = ExecutionContext::new(BreakerRegistry::new(), &ExecutionConfig::default());

        let ok = context
            .execute("ghost", || async { Ok::<_, String>(7) }, || 0)
            .await;
        assert_eq!(ok, 7);

        let failed = context
            .execute("ghost", || async { Err::<i32, _>("broken") }, || -1)
            .await;
        assert_eq!(failed, -1);
    }

    #[tokio::test]
    async fn test_failures_are_recorded_on_breaker() {
        let context = context_with_breaker("chat", 2);

        for _ in 0..2 {
            let value = context
                .execute("chat", || async { Err::<&str, _>("down") }, || "fallback")
                .await;
            assert_eq!(value, "fallback");
        }

        let breaker = context.breakers().get("chat").unwrap();
        assert_eq!(breaker.state(), CircuitState::Open);
    }

    #[tokio::test]
    async fn test_execute_async_returns_handle() {
        let context = context_with_breaker("economy", 5);

        let handle = context.execute_async(
            "economy",
            || async { Ok::<_, String>(String::from("balance: 10")) },
            || String::from("unavailable"),
        );

        assert_eq!(handle.await.unwrap(), "balance: 10");
    }

    #[tokio::test]
    async fn test_worker_pool_bounds_concurrency() {
        let config = ExecutionConfig {
            worker_pool_size: 2,
            ..ExecutionConfig::default()
        };
        let context = ExecutionContext::new(BreakerRegistry::new(), &config);
        let active = Arc::new(AtomicUsize::new(0));
        let peak = Arc::new(AtomicUsize::new(0));

        let handles: Vec<_> = (0..6)
            .map(|_| {
                let active = Arc::clone(&active);
                let peak = Arc::clone(&peak);
                context.execute_async(
                    "pool",
                    move || async move {
                        let now = active.fetch_add(1, Ordering::SeqCst) + 1;
                        peak.fetch_max(now, Ordering::SeqCst);
                        sleep(Duration::from_millis(20)).await;
                        active.fetch_sub(1, Ordering::SeqCst);
                        Ok::<_, String>(())
                    },
                    || (),
                )
            })
            .collect();

        for handle in handles {
            handle.await.unwrap();
        }

        assert!(peak.load(Ordering::SeqCst) <= 2);
    }

    #[tokio::test]
    async fn test_timeout_reports_to_observer() {
        let observer = Arc::new(RecordingObserver::default());
        let weak: Weak<dyn TimeoutObserver> = Arc::downgrade(&observer) as Weak<dyn TimeoutObserver>;
        let context = context_with_breaker("ui", 5).with_timeout_observer(weak);

        let value = context
            .execute_with_timeout(
                "ui",
                Duration::from_millis(20),
                || async {
                    sleep(Duration::from_secs(5)).await;
                    Ok::<_, String>("rendered")
                },
                || "placeholder",
            )
            .await;

        assert_eq!(value, "placeholder");
        let timeouts = observer.timeouts.lock();
        assert_eq!(timeouts.len(), 1);
        assert_eq!(timeouts[0].0, "ui");
        // The observer owns the accounting
        assert_eq!(context.breakers().get("ui").unwrap().timeout_count(), 0);
    }

    #[tokio::test]
    async fn test_timeout_without_observer_records_on_breaker() {
        let context = context_with_breaker("map", 5);

        let value = context
            .execute_with_timeout(
                "map",
                Duration::from_millis(20),
                || async {
                    sleep(Duration::from_secs(5)).await;
                    Ok::<_, String>(1)
                },
                || 0,
            )
            .await;

        assert_eq!(value, 0);
        let breaker = context.breakers().get("map").unwrap();
        assert_eq!(breaker.timeout_count(), 1);
        assert_eq!(breaker.failure_count(), 1);
    }

    #[tokio::test]
    async fn test_fast_call_within_deadline() {
        let context = context_with_breaker("map", 5);

        let value = context
            .execute_with_timeout(
                "map",
                Duration::from_secs(1),
                || async { Ok::<_, String>(42) },
                || 0,
            )
            .await;

        assert_eq!(value, 42);
        assert_eq!(context.breakers().get("map").unwrap().timeout_count(), 0);
    }

    #[tokio::test]
    async fn test_catch_failure_reports_panic_message() {
        let result: Result<(), String> = catch_failure(async {
            if true {
                panic!("exploded");
            }
            Ok::<_, String>(())
        })
        .await;

        assert_eq!(result.unwrap_err(), "panicked: exploded");
    }

    #[tokio::test]
    async fn test_catch_feature_panic_keeps_error_kind() {
        let failed: Result<(), FeatureError> =
            catch_feature_panic(async { Err(FeatureError::initialization("no map data")) }).await;
        assert_eq!(failed, Err(FeatureError::initialization("no map data")));

        let panicked: Result<(), FeatureError> = catch_feature_panic(async {
            if true {
                std::panic::panic_any(String::from("index out of range"));
            }
            Ok(())
        })
        .await;
        assert_eq!(
            panicked,
            Err(FeatureError::runtime("panicked: index out of range"))
        );
    }
}
