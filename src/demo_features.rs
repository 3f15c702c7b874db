//! Small in-process features the `warden` binary runs to exercise the
//! orchestrator end to end.

use async_trait::async_trait;
use feature_warden::{Feature, FeatureError, FeatureHealth};
use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::interval;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

/// Critical feature counting seconds since it started
#[derive(Default)]
pub struct ClockFeature {
    ticks: Arc<AtomicU64>,
    token: Mutex<Option<CancellationToken>>,
}

impl ClockFeature {
    pub fn new() -> Self {
        Self::default()
    }

    fn halt(&self) {
        if let Some(token) = self.token.lock().take() {
            token.cancel();
        }
    }
}

#[async_trait]
impl Feature for ClockFeature {
    fn id(&self) -> &str {
        "clock"
    }

    fn name(&self) -> &str {
        "Clock"
    }

    fn priority(&self) -> i32 {
        10
    }

    fn is_optional(&self) -> bool {
        false
    }

    async fn initialize(&self) -> Result<(), FeatureError> {
        self.ticks.store(0, Ordering::Relaxed);
        Ok(())
    }

    async fn start(&self) -> Result<(), FeatureError> {
        let token = CancellationToken::new();
        let ticks = Arc::clone(&self.ticks);
        let cancelled = token.clone();

        tokio::spawn(async move {
            let mut ticker = interval(Duration::from_secs(1));
            loop {
                tokio::select! {
                    _ = cancelled.cancelled() => break,
                    _ = ticker.tick() => {
                        ticks.fetch_add(1, Ordering::Relaxed);
                    }
                }
            }
            debug!("Clock ticker stopped");
        });

        if let Some(previous) = self.token.lock().replace(token) {
            previous.cancel();
        }
        Ok(())
    }

    async fn stop(&self) -> Result<(), FeatureError> {
        self.halt();
        Ok(())
    }

    async fn shutdown(&self) -> Result<(), FeatureError> {
        self.halt();
        info!(ticks = self.ticks.load(Ordering::Relaxed), "Clock shut down");
        Ok(())
    }

    async fn health_check(&self) -> Result<FeatureHealth, FeatureError> {
        if self.token.lock().is_none() {
            return Ok(FeatureHealth::unhealthy("Clock is not ticking"));
        }
        Ok(FeatureHealth::healthy("Ticking")
            .with_metric("ticks", self.ticks.load(Ordering::Relaxed)))
    }
}

/// Optional feature that needs the clock and answers greetings
#[derive(Default)]
pub struct GreeterFeature {
    running: AtomicBool,
    greetings: AtomicU64,
}

impl GreeterFeature {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn greet(&self, name: &str) -> Result<String, FeatureError> {
        if !self.running.load(Ordering::Acquire) {
            return Err(FeatureError::runtime("greeter is not running"));
        }
        let count = self.greetings.fetch_add(1, Ordering::Relaxed) + 1;
        Ok(format!("Hello, {}! (greeting #{})", name, count))
    }
}

#[async_trait]
impl Feature for GreeterFeature {
    fn id(&self) -> &str {
        "greeter"
    }

    fn name(&self) -> &str {
        "Greeter"
    }

    fn dependencies(&self) -> Vec<String> {
        vec!["clock".to_string()]
    }

    async fn initialize(&self) -> Result<(), FeatureError> {
        Ok(())
    }

    async fn start(&self) -> Result<(), FeatureError> {
        self.running.store(true, Ordering::Release);
        Ok(())
    }

    async fn stop(&self) -> Result<(), FeatureError> {
        self.running.store(false, Ordering::Release);
        Ok(())
    }

    async fn shutdown(&self) -> Result<(), FeatureError> {
        self.running.store(false, Ordering::Release);
        Ok(())
    }

    async fn health_check(&self) -> Result<FeatureHealth, FeatureError> {
        Ok(FeatureHealth::healthy("Ready to greet")
            .with_metric("greetings", self.greetings.load(Ordering::Relaxed)))
    }
}

/// Optional feature whose health cycles through healthy, degraded and unhealthy
pub struct FlakyFeature {
    checks: AtomicU64,
    period: u64,
}

impl FlakyFeature {
    pub fn new(period: u64) -> Self {
        Self {
            checks: AtomicU64::new(0),
            period: period.max(3),
        }
    }
}

#[async_trait]
impl Feature for FlakyFeature {
    fn id(&self) -> &str {
        "flaky"
    }

    fn name(&self) -> &str {
        "Flaky"
    }

    fn priority(&self) -> i32 {
        200
    }

    async fn initialize(&self) -> Result<(), FeatureError> {
        self.checks.store(0, Ordering::Relaxed);
        Ok(())
    }

    async fn start(&self) -> Result<(), FeatureError> {
        Ok(())
    }

    async fn stop(&self) -> Result<(), FeatureError> {
        Ok(())
    }

    async fn shutdown(&self) -> Result<(), FeatureError> {
        Ok(())
    }

    async fn health_check(&self) -> Result<FeatureHealth, FeatureError> {
        let check = self.checks.fetch_add(1, Ordering::Relaxed) + 1;
        let health = match check % self.period {
            0 => FeatureHealth::unhealthy("Upstream unreachable"),
            1 => FeatureHealth::degraded("Upstream slow"),
            _ => FeatureHealth::healthy("Upstream reachable"),
        };
        Ok(health.with_metric("checks", check))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use feature_warden::HealthStatus;

    #[tokio::test]
    async fn test_default_greeter_refuses_until_started() {
        let greeter = GreeterFeature::default();
        assert!(greeter.greet("visitor").is_err());

        greeter.start().await.unwrap();
        assert_eq!(greeter.greet("visitor").unwrap(), "Hello, visitor! (greeting #1)");

        greeter.stop().await.unwrap();
        assert!(greeter.greet("visitor").is_err());
    }

    #[tokio::test]
    async fn test_default_clock_is_unhealthy_until_started() {
        let clock = ClockFeature::default();
        let health = clock.health_check().await.unwrap();
        assert_eq!(health.status, HealthStatus::Unhealthy);

        clock.start().await.unwrap();
        assert_eq!(clock.health_check().await.unwrap().status, HealthStatus::Healthy);

        clock.shutdown().await.unwrap();
        assert_eq!(clock.health_check().await.unwrap().status, HealthStatus::Unhealthy);
    }
}
