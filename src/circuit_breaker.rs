//! # Per-feature circuit breaker
//!
//! Three-state gate consulted before any call into feature code:
//!
//! ```text
//! Closed   --[failure_count reaches failure_threshold]--> Open
//! Open     --[reset_timeout elapsed, first caller wins the CAS]--> HalfOpen
//! HalfOpen --[success_threshold successful trials]--> Closed
//! HalfOpen --[any failed or timed-out trial]--> Open
//! ```
//!
//! The breaker state is independent of the feature lifecycle: a RUNNING
//! feature may have an OPEN breaker, meaning calls are refused for now but
//! the feature has not been disabled.

use crate::config::CircuitBreakerConfig;
use crate::execution::catch_failure;
use chrono::{DateTime, Utc};
use parking_lot::{Mutex, RwLock};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::future::Future;
use std::sync::atomic::{AtomicU32, AtomicU64, AtomicU8, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::time::timeout;
use tracing::{debug, info, warn};

/// Circuit breaker states representing the current operational mode
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum CircuitState {
    /// Normal operation - all calls are allowed through
    Closed = 0,
    /// Failure mode - all calls are answered with the fallback
    Open = 1,
    /// Testing recovery - serialized trial calls are allowed
    HalfOpen = 2,
}

impl From<u8> for CircuitState {
    fn from(value: u8) -> Self {
        match value {
            0 => CircuitState::Closed,
            2 => CircuitState::HalfOpen,
            _ => CircuitState::Open,
        }
    }
}

impl fmt::Display for CircuitState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            CircuitState::Closed => "CLOSED",
            CircuitState::Open => "OPEN",
            CircuitState::HalfOpen => "HALF_OPEN",
        };
        f.write_str(label)
    }
}

#[derive(Debug, Clone)]
struct FailureRecord {
    at: DateTime<Utc>,
    reason: String,
}

/// Point-in-time copy of a breaker's counters for diagnostics
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CircuitBreakerSnapshot {
    pub name: String,
    pub state: CircuitState,
    pub failure_count: u32,
    pub success_count: u32,
    pub timeout_count: u64,
    pub half_open_transitions: u64,
    pub last_failure_at: Option<DateTime<Utc>>,
    pub last_failure_reason: Option<String>,
    pub millis_in_state: u64,
}

pub struct CircuitBreaker {
    name: String,
    config: CircuitBreakerConfig,
    state: AtomicU8,
    failure_count: AtomicU32,
    success_count: AtomicU32,
    timeout_count: AtomicU64,
    half_open_transitions: AtomicU64,
    state_changed_at: Mutex<Instant>,
    last_failure: Mutex<Option<FailureRecord>>,
    /// Serializes HALF_OPEN trials
    trial_lock: tokio::sync::Mutex<()>,
}

impl fmt::Debug for CircuitBreaker {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CircuitBreaker")
            .field("name", &self.name)
            .field("state", &self.state())
            .field("failure_count", &self.failure_count())
            .field("success_count", &self.success_count())
            .finish_non_exhaustive()
    }
}

impl CircuitBreaker {
    pub fn new<S: Into<String>>(name: S, config: CircuitBreakerConfig) -> Self {
        let name = name.into();
        debug!(
            breaker = %name,
            failure_threshold = config.failure_threshold,
            reset_timeout_ms = config.reset_timeout_ms,
            half_open_trial_timeout_ms = config.half_open_trial_timeout_ms,
            "Circuit breaker initialized"
        );

        Self {
            name,
            config,
            state: AtomicU8::new(CircuitState::Closed as u8),
            failure_count: AtomicU32::new(0),
            success_count: AtomicU32::new(0),
            timeout_count: AtomicU64::new(0),
            half_open_transitions: AtomicU64::new(0),
            state_changed_at: Mutex::new(Instant::now()),
            last_failure: Mutex::new(None),
            trial_lock: tokio::sync::Mutex::new(()),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn config(&self) -> &CircuitBreakerConfig {
        &self.config
    }

    pub fn state(&self) -> CircuitState {
        CircuitState::from(self.state.load(Ordering::Acquire))
    }

    pub fn failure_count(&self) -> u32 {
        self.failure_count.load(Ordering::Acquire)
    }

    pub fn success_count(&self) -> u32 {
        self.success_count.load(Ordering::Acquire)
    }

    pub fn timeout_count(&self) -> u64 {
        self.timeout_count.load(Ordering::Acquire)
    }

    /// Number of OPEN -> HALF_OPEN transitions performed so far
    pub fn half_open_transitions(&self) -> u64 {
        self.half_open_transitions.load(Ordering::Acquire)
    }

    pub fn time_in_state(&self) -> Duration {
        self.state_changed_at.lock().elapsed()
    }

    /// Whether a call may proceed right now.
    ///
    /// An OPEN breaker whose reset timeout has elapsed moves to HALF_OPEN.
    /// The move is a compare-and-set, so exactly one of many concurrent
    /// callers performs it; the others observe HALF_OPEN and are allowed.
    pub fn allow_request(&self) -> bool {
        match self.state() {
            CircuitState::Closed | CircuitState::HalfOpen => true,
            CircuitState::Open => {
                if self.time_in_state() < self.config.reset_timeout() {
                    return self.state() != CircuitState::Open;
                }

                if self.transition(CircuitState::Open, CircuitState::HalfOpen) {
                    self.half_open_transitions.fetch_add(1, Ordering::AcqRel);
                }

                self.state() != CircuitState::Open
            }
        }
    }

    /// Run `action` under the breaker's protection.
    ///
    /// Returns the action's value on success and `fallback()` whenever the
    /// call is refused, fails, panics or (for a HALF_OPEN trial) exceeds the
    /// trial timeout. Failures never propagate to the caller.
    pub async fn execute<T, E, F, Fut, FB>(&self, action: F, fallback: FB) -> T
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, E>>,
        E: fmt::Display,
        FB: FnOnce() -> T,
    {
        if !self.allow_request() {
            debug!(breaker = %self.name, "Circuit open, returning fallback");
            return fallback();
        }

        match self.state() {
            CircuitState::Closed => self.execute_closed(action, fallback).await,
            CircuitState::HalfOpen => self.execute_trial(action, fallback).await,
            CircuitState::Open => fallback(),
        }
    }

    async fn execute_closed<T, E, F, Fut, FB>(&self, action: F, fallback: FB) -> T
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, E>>,
        E: fmt::Display,
        FB: FnOnce() -> T,
    {
        match catch_failure(async move { action().await }).await {
            Ok(value) => {
                self.record_success();
                value
            }
            Err(reason) => {
                self.record_failure(&reason);
                fallback()
            }
        }
    }

    async fn execute_trial<T, E, F, Fut, FB>(&self, action: F, fallback: FB) -> T
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, E>>,
        E: fmt::Display,
        FB: FnOnce() -> T,
    {
        let trial_guard = self.trial_lock.lock().await;

        // Another trial may have settled the state while we waited
        match self.state() {
            CircuitState::HalfOpen => {}
            CircuitState::Closed => {
                drop(trial_guard);
                return self.execute_closed(action, fallback).await;
            }
            CircuitState::Open => return fallback(),
        }

        let limit = self.config.half_open_trial_timeout();
        debug!(breaker = %self.name, timeout_ms = limit.as_millis() as u64, "Running half-open trial");

        // On timeout the trial future is dropped, cancelling the action
        match timeout(limit, catch_failure(async move { action().await })).await {
            Ok(Ok(value)) => {
                self.record_success();
                value
            }
            Ok(Err(reason)) => {
                self.record_failure(&reason);
                fallback()
            }
            Err(_) => {
                self.record_timeout(limit);
                fallback()
            }
        }
    }

    pub fn record_success(&self) {
        self.failure_count.store(0, Ordering::Release);

        if self.state() == CircuitState::HalfOpen {
            let successes = self.success_count.fetch_add(1, Ordering::AcqRel) + 1;
            debug!(
                breaker = %self.name,
                successes,
                required = self.config.success_threshold,
                "Half-open trial succeeded"
            );

            if successes >= self.config.success_threshold {
                self.transition(CircuitState::HalfOpen, CircuitState::Closed);
            }
        }
    }

    pub fn record_failure(&self, reason: &str) {
        *self.last_failure.lock() = Some(FailureRecord {
            at: Utc::now(),
            reason: reason.to_string(),
        });

        let failures = self.failure_count.fetch_add(1, Ordering::AcqRel) + 1;
        debug!(breaker = %self.name, failures, reason, "Failure recorded");

        match self.state() {
            CircuitState::HalfOpen => {
                self.transition(CircuitState::HalfOpen, CircuitState::Open);
            }
            CircuitState::Closed => {
                if failures >= self.config.failure_threshold {
                    self.transition(CircuitState::Closed, CircuitState::Open);
                }
            }
            CircuitState::Open => {}
        }
    }

    /// A deadline overrun counts as a failure and is also tallied separately
    pub fn record_timeout(&self, limit: Duration) {
        self.timeout_count.fetch_add(1, Ordering::AcqRel);
        self.record_failure(&format!("timed out after {:?}", limit));
    }

    /// Close the circuit and clear all counters
    pub fn reset(&self) {
        self.state
            .store(CircuitState::Closed as u8, Ordering::Release);
        self.failure_count.store(0, Ordering::Release);
        self.success_count.store(0, Ordering::Release);
        *self.state_changed_at.lock() = Instant::now();
        debug!(breaker = %self.name, "Circuit breaker reset");
    }

    /// Open the circuit regardless of counters
    pub fn force_open(&self) {
        self.state.store(CircuitState::Open as u8, Ordering::Release);
        self.success_count.store(0, Ordering::Release);
        *self.state_changed_at.lock() = Instant::now();
        warn!(breaker = %self.name, "Circuit breaker forced open");
    }

    pub fn snapshot(&self) -> CircuitBreakerSnapshot {
        let last_failure = self.last_failure.lock().clone();
        CircuitBreakerSnapshot {
            name: self.name.clone(),
            state: self.state(),
            failure_count: self.failure_count(),
            success_count: self.success_count(),
            timeout_count: self.timeout_count(),
            half_open_transitions: self.half_open_transitions(),
            last_failure_at: last_failure.as_ref().map(|record| record.at),
            last_failure_reason: last_failure.map(|record| record.reason),
            millis_in_state: self.time_in_state().as_millis() as u64,
        }
    }

    /// Compare-and-set state transition; false if another caller got there first
    fn transition(&self, from: CircuitState, to: CircuitState) -> bool {
        if self
            .state
            .compare_exchange(from as u8, to as u8, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            return false;
        }

        *self.state_changed_at.lock() = Instant::now();
        self.success_count.store(0, Ordering::Release);

        match to {
            CircuitState::Open => warn!(
                breaker = %self.name,
                from = %from,
                failures = self.failure_count(),
                reset_timeout_ms = self.config.reset_timeout_ms,
                "Circuit breaker opened"
            ),
            CircuitState::HalfOpen => info!(
                breaker = %self.name,
                "Circuit breaker half-open (testing recovery)"
            ),
            CircuitState::Closed => {
                self.failure_count.store(0, Ordering::Release);
                info!(breaker = %self.name, "Circuit breaker closed (recovered)");
            }
        }

        true
    }
}

/// Breakers keyed by feature id, shared between the orchestrator and
/// execution contexts
#[derive(Debug, Clone, Default)]
pub struct BreakerRegistry {
    breakers: Arc<RwLock<HashMap<String, Arc<CircuitBreaker>>>>,
}

impl BreakerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, id: &str) -> Option<Arc<CircuitBreaker>> {
        self.breakers.read().get(id).cloned()
    }

    pub fn insert(&self, id: &str, breaker: Arc<CircuitBreaker>) {
        self.breakers.write().insert(id.to_string(), breaker);
    }

    pub fn contains(&self, id: &str) -> bool {
        self.breakers.read().contains_key(id)
    }

    pub fn len(&self) -> usize {
        self.breakers.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.breakers.read().is_empty()
    }

    pub fn snapshots(&self) -> HashMap<String, CircuitBreakerSnapshot> {
        self.breakers
            .read()
            .iter()
            .map(|(id, breaker)| (id.clone(), breaker.snapshot()))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;
    use std::sync::Barrier;
    use std::thread;
    use tokio::time::sleep;

    fn test_config(failure_threshold: u32, reset_timeout_ms: u64) -> CircuitBreakerConfig {
        CircuitBreakerConfig {
            failure_threshold,
            success_threshold: 3,
            reset_timeout_ms,
            half_open_trial_timeout_ms: 200,
        }
    }

    async fn fail(breaker: &CircuitBreaker, calls: &AtomicUsize) -> &'static str {
        breaker
            .execute(
                move || async move {
                    calls.fetch_add(1, Ordering::SeqCst);
                    Err::<&'static str, _>("boom")
                },
                || "fallback",
            )
            .await
    }

    async fn succeed(breaker: &CircuitBreaker, calls: &AtomicUsize) -> &'static str {
        breaker
            .execute(
                move || async move {
                    calls.fetch_add(1, Ordering::SeqCst);
                    Ok::<_, String>("value")
                },
                || "fallback",
            )
            .await
    }

    /// Opens the breaker and waits out its reset timeout
    async fn open_and_wait(breaker: &CircuitBreaker) {
        breaker.force_open();
        sleep(breaker.config().reset_timeout() + Duration::from_millis(20)).await;
    }

    #[test]
    fn test_initial_state() {
        let breaker = CircuitBreaker::new("map", CircuitBreakerConfig::default());
        assert_eq!(breaker.state(), CircuitState::Closed);
        assert_eq!(breaker.failure_count(), 0);
        assert_eq!(breaker.success_count(), 0);
        assert!(breaker.allow_request());
    }

    #[tokio::test]
    async fn test_opens_after_threshold_and_short_circuits() {
        let breaker = CircuitBreaker::new("chat", test_config(2, 60_000));
        let calls = AtomicUsize::new(0);

        assert_eq!(fail(&breaker, &calls).await, "fallback");
        assert_eq!(breaker.state(), CircuitState::Closed);
        assert_eq!(fail(&breaker, &calls).await, "fallback");
        assert_eq!(breaker.state(), CircuitState::Open);

        // Within the reset timeout the action must not run
        assert_eq!(succeed(&breaker, &calls).await, "fallback");
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_success_resets_failure_count_in_closed() {
        let breaker = CircuitBreaker::new("ui", test_config(3, 60_000));
        let calls = AtomicUsize::new(0);

        fail(&breaker, &calls).await;
        fail(&breaker, &calls).await;
        assert_eq!(breaker.failure_count(), 2);

        assert_eq!(succeed(&breaker, &calls).await, "value");
        assert_eq!(breaker.failure_count(), 0);
        assert_eq!(breaker.success_count(), 0);

        fail(&breaker, &calls).await;
        fail(&breaker, &calls).await;
        assert_eq!(breaker.state(), CircuitState::Closed);
    }

    #[tokio::test]
    async fn test_half_open_requires_three_successes() {
        let breaker = CircuitBreaker::new("economy", test_config(1, 30));
        let calls = AtomicUsize::new(0);
        open_and_wait(&breaker).await;

        assert_eq!(succeed(&breaker, &calls).await, "value");
        assert_eq!(breaker.state(), CircuitState::HalfOpen);
        assert_eq!(breaker.success_count(), 1);

        succeed(&breaker, &calls).await;
        assert_eq!(breaker.state(), CircuitState::HalfOpen);
        assert_eq!(breaker.success_count(), 2);

        succeed(&breaker, &calls).await;
        assert_eq!(breaker.state(), CircuitState::Closed);
        assert_eq!(breaker.success_count(), 0);
        assert_eq!(breaker.failure_count(), 0);
    }

    #[tokio::test]
    async fn test_half_open_failure_reopens_and_discards_successes() {
        let breaker = CircuitBreaker::new("teleport", test_config(1, 30));
        let calls = AtomicUsize::new(0);
        open_and_wait(&breaker).await;

        succeed(&breaker, &calls).await;
        succeed(&breaker, &calls).await;
        assert_eq!(breaker.success_count(), 2);

        assert_eq!(fail(&breaker, &calls).await, "fallback");
        assert_eq!(breaker.state(), CircuitState::Open);
        assert_eq!(breaker.success_count(), 0);

        // Freshly opened: the next call is refused
        let before = calls.load(Ordering::SeqCst);
        assert_eq!(succeed(&breaker, &calls).await, "fallback");
        assert_eq!(calls.load(Ordering::SeqCst), before);
    }

    #[test]
    fn test_half_open_transition_happens_once_under_contention() {
        let breaker = Arc::new(CircuitBreaker::new("permissions", test_config(1, 20)));
        breaker.force_open();
        thread::sleep(Duration::from_millis(40));

        let callers = 16;
        let barrier = Arc::new(Barrier::new(callers));
        let handles: Vec<_> = (0..callers)
            .map(|_| {
                let breaker = Arc::clone(&breaker);
                let barrier = Arc::clone(&barrier);
                thread::spawn(move || {
                    barrier.wait();
                    breaker.allow_request()
                })
            })
            .collect();

        let allowed: Vec<bool> = handles.into_iter().map(|h| h.join().unwrap()).collect();

        assert!(allowed.iter().all(|a| *a));
        assert_eq!(breaker.half_open_transitions(), 1);
        assert_eq!(breaker.state(), CircuitState::HalfOpen);
    }

    #[tokio::test]
    async fn test_trial_timeout_counts_as_failure() {
        let config = CircuitBreakerConfig {
            failure_threshold: 1,
            success_threshold: 3,
            reset_timeout_ms: 20,
            half_open_trial_timeout_ms: 30,
        };
        let breaker = CircuitBreaker::new("slow", config);
        open_and_wait(&breaker).await;

        let value = breaker
            .execute(
                || async {
                    sleep(Duration::from_secs(5)).await;
                    Ok::<_, String>("late")
                },
                || "fallback",
            )
            .await;

        assert_eq!(value, "fallback");
        assert_eq!(breaker.state(), CircuitState::Open);
        assert_eq!(breaker.timeout_count(), 1);
        assert!(breaker
            .snapshot()
            .last_failure_reason
            .unwrap()
            .contains("timed out"));
    }

    #[tokio::test]
    async fn test_closed_calls_are_not_time_bounded() {
        let config = CircuitBreakerConfig {
            half_open_trial_timeout_ms: 10,
            ..test_config(1, 60_000)
        };
        let breaker = CircuitBreaker::new("patient", config);

        let value = breaker
            .execute(
                || async {
                    sleep(Duration::from_millis(50)).await;
                    Ok::<_, String>("done")
                },
                || "fallback",
            )
            .await;

        assert_eq!(value, "done");
        assert_eq!(breaker.state(), CircuitState::Closed);
    }

    #[tokio::test]
    async fn test_half_open_trials_are_serialized() {
        let config = CircuitBreakerConfig {
            failure_threshold: 1,
            success_threshold: 10,
            reset_timeout_ms: 20,
            half_open_trial_timeout_ms: 1_000,
        };
        let breaker = Arc::new(CircuitBreaker::new("serial", config));
        open_and_wait(&breaker).await;

        let active = Arc::new(AtomicUsize::new(0));
        let peak = Arc::new(AtomicUsize::new(0));

        let mut handles = Vec::new();
        for _ in 0..4 {
            let breaker = Arc::clone(&breaker);
            let active = Arc::clone(&active);
            let peak = Arc::clone(&peak);
            handles.push(tokio::spawn(async move {
                breaker
                    .execute(
                        move || async move {
                            let now = active.fetch_add(1, Ordering::SeqCst) + 1;
                            peak.fetch_max(now, Ordering::SeqCst);
                            sleep(Duration::from_millis(20)).await;
                            active.fetch_sub(1, Ordering::SeqCst);
                            Ok::<_, String>(())
                        },
                        || (),
                    )
                    .await
            }));
        }
        for handle in handles {
            handle.await.unwrap();
        }

        assert_eq!(peak.load(Ordering::SeqCst), 1);
        assert_eq!(breaker.success_count(), 4);
        assert_eq!(breaker.state(), CircuitState::HalfOpen);
    }

    #[tokio::test]
    async fn test_panicking_action_is_a_failure() {
        let breaker = CircuitBreaker::new("panicky", test_config(1, 60_000));

        let value = breaker
            .execute(
                || async {
                    if true {
                        panic!("feature bug");
                    }
                    Ok::<_, String>(1)
                },
                || 0,
            )
            .await;

        assert_eq!(value, 0);
        assert_eq!(breaker.state(), CircuitState::Open);
        assert!(breaker
            .snapshot()
            .last_failure_reason
            .unwrap()
            .contains("feature bug"));
    }

    #[test]
    fn test_force_open_and_reset() {
        let breaker = CircuitBreaker::new("admin", CircuitBreakerConfig::default());

        breaker.force_open();
        assert_eq!(breaker.state(), CircuitState::Open);
        assert!(!breaker.allow_request());

        breaker.record_failure("still broken");
        assert_eq!(breaker.failure_count(), 1);

        breaker.reset();
        assert_eq!(breaker.state(), CircuitState::Closed);
        assert_eq!(breaker.failure_count(), 0);
        assert!(breaker.allow_request());
    }

    #[test]
    fn test_registry() {
        let registry = BreakerRegistry::new();
        assert!(registry.is_empty());

        registry.insert(
            "map",
            Arc::new(CircuitBreaker::new("map", CircuitBreakerConfig::default())),
        );

        assert!(registry.contains("map"));
        assert!(registry.get("chat").is_none());
        assert_eq!(registry.len(), 1);
        assert_eq!(
            registry.snapshots().get("map").map(|s| s.state),
            Some(CircuitState::Closed)
        );
    }
}
