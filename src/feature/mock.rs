use super::{Feature, DEFAULT_PRIORITY};
use crate::error::FeatureError;
use crate::health::FeatureHealth;
use async_trait::async_trait;
use parking_lot::Mutex;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tracing::debug;

/// Scriptable feature for tests and demos without a real host
pub struct MockFeature {
    id: String,
    name: String,
    priority: i32,
    dependencies: Vec<String>,
    optional: bool,
    initialize_error: Mutex<Option<FeatureError>>,
    start_error: Mutex<Option<FeatureError>>,
    stop_error: Mutex<Option<FeatureError>>,
    shutdown_error: Mutex<Option<FeatureError>>,
    health: Mutex<Result<FeatureHealth, FeatureError>>,
    health_delay: Mutex<Option<Duration>>,
    call_log: Option<Arc<Mutex<Vec<String>>>>,
    initialize_calls: AtomicU32,
    start_calls: AtomicU32,
    stop_calls: AtomicU32,
    shutdown_calls: AtomicU32,
    health_check_calls: AtomicU32,
}

impl MockFeature {
    /// Create an optional mock feature that reports healthy
    pub fn new<S: Into<String>>(id: S) -> Self {
        let id = id.into();
        Self {
            name: format!("Mock {}", id),
            id,
            priority: DEFAULT_PRIORITY,
            dependencies: Vec::new(),
            optional: true,
            initialize_error: Mutex::new(None),
            start_error: Mutex::new(None),
            stop_error: Mutex::new(None),
            shutdown_error: Mutex::new(None),
            health: Mutex::new(Ok(FeatureHealth::healthy("Mock feature healthy"))),
            health_delay: Mutex::new(None),
            call_log: None,
            initialize_calls: AtomicU32::new(0),
            start_calls: AtomicU32::new(0),
            stop_calls: AtomicU32::new(0),
            shutdown_calls: AtomicU32::new(0),
            health_check_calls: AtomicU32::new(0),
        }
    }

    pub fn with_priority(mut self, priority: i32) -> Self {
        self.priority = priority;
        self
    }

    pub fn with_dependencies<I, S>(mut self, dependencies: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.dependencies = dependencies.into_iter().map(Into::into).collect();
        self
    }

    pub fn critical(mut self) -> Self {
        self.optional = false;
        self
    }

    /// Record "<id>:<operation>" entries into a log shared between mocks
    pub fn with_call_log(mut self, log: Arc<Mutex<Vec<String>>>) -> Self {
        self.call_log = Some(log);
        self
    }

    pub fn failing_initialize<S: Into<String>>(self, message: S) -> Self {
        *self.initialize_error.lock() = Some(FeatureError::initialization(message));
        self
    }

    pub fn failing_start<S: Into<String>>(self, message: S) -> Self {
        *self.start_error.lock() = Some(FeatureError::initialization(message));
        self
    }

    pub fn failing_stop<S: Into<String>>(self, message: S) -> Self {
        *self.stop_error.lock() = Some(FeatureError::runtime(message));
        self
    }

    pub fn failing_shutdown<S: Into<String>>(self, message: S) -> Self {
        *self.shutdown_error.lock() = Some(FeatureError::runtime(message));
        self
    }

    /// Replace the result returned by subsequent health checks
    pub fn set_health(&self, health: FeatureHealth) {
        *self.health.lock() = Ok(health);
    }

    /// Make subsequent health checks return an error
    pub fn set_health_error<S: Into<String>>(&self, message: S) {
        *self.health.lock() = Err(FeatureError::runtime(message));
    }

    /// Make subsequent health checks sleep before answering
    pub fn set_health_delay(&self, delay: Option<Duration>) {
        *self.health_delay.lock() = delay;
    }

    pub fn clear_initialize_failure(&self) {
        *self.initialize_error.lock() = None;
    }

    pub fn initialize_calls(&self) -> u32 {
        self.initialize_calls.load(Ordering::SeqCst)
    }

    pub fn start_calls(&self) -> u32 {
        self.start_calls.load(Ordering::SeqCst)
    }

    pub fn stop_calls(&self) -> u32 {
        self.stop_calls.load(Ordering::SeqCst)
    }

    pub fn shutdown_calls(&self) -> u32 {
        self.shutdown_calls.load(Ordering::SeqCst)
    }

    pub fn health_check_calls(&self) -> u32 {
        self.health_check_calls.load(Ordering::SeqCst)
    }

    fn record(&self, operation: &str) {
        debug!(feature = %self.id, "Mock {}", operation);
        if let Some(log) = &self.call_log {
            log.lock().push(format!("{}:{}", self.id, operation));
        }
    }

    fn scripted(slot: &Mutex<Option<FeatureError>>) -> Result<(), FeatureError> {
        match slot.lock().clone() {
            Some(error) => Err(error),
            None => Ok(()),
        }
    }
}

#[async_trait]
impl Feature for MockFeature {
    fn id(&self) -> &str {
        &self.id
    }

    fn name(&self) -> &str {
        &self.name
    }

    fn priority(&self) -> i32 {
        self.priority
    }

    fn dependencies(&self) -> Vec<String> {
        self.dependencies.clone()
    }

    fn is_optional(&self) -> bool {
        self.optional
    }

    async fn initialize(&self) -> Result<(), FeatureError> {
        self.initialize_calls.fetch_add(1, Ordering::SeqCst);
        self.record("initialize");
        Self::scripted(&self.initialize_error)
    }

    async fn start(&self) -> Result<(), FeatureError> {
        self.start_calls.fetch_add(1, Ordering::SeqCst);
        self.record("start");
        Self::scripted(&self.start_error)
    }

    async fn stop(&self) -> Result<(), FeatureError> {
        self.stop_calls.fetch_add(1, Ordering::SeqCst);
        self.record("stop");
        Self::scripted(&self.stop_error)
    }

    async fn shutdown(&self) -> Result<(), FeatureError> {
        self.shutdown_calls.fetch_add(1, Ordering::SeqCst);
        self.record("shutdown");
        Self::scripted(&self.shutdown_error)
    }

    async fn health_check(&self) -> Result<FeatureHealth, FeatureError> {
        self.health_check_calls.fetch_add(1, Ordering::SeqCst);
        let delay = *self.health_delay.lock();
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        self.health.lock().clone()
    }
}
