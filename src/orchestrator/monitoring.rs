use super::registry::RegisteredFeature;
use super::state::failure_health;
use super::{FeatureOrchestrator, FeatureState};
use crate::circuit_breaker::CircuitState;
use crate::error::{FeatureError, Result};
use crate::events::FeatureEventType;
use crate::execution::catch_feature_panic;
use crate::health::{FeatureHealth, HealthStatus};
use std::time::Duration;
use tokio::time::{interval_at, sleep, timeout, Instant, MissedTickBehavior};
use tracing::{debug, error, info, warn};

impl FeatureOrchestrator {
    /// Start the periodic health loop unless it is already running
    pub(super) fn schedule_health_checks(&self) {
        let mut slot = self.health_task.lock();
        if slot.as_ref().is_some_and(|handle| !handle.is_finished()) {
            debug!("Health check loop already running");
            return;
        }

        let token = self.cancellation_token.lock().clone();
        let orchestrator = self.self_ref.clone();
        // interval_at panics on a zero period
        let period = self.config.health.check_interval().max(Duration::from_millis(1));
        info!(interval_ms = period.as_millis() as u64, "Scheduling feature health checks");

        *slot = Some(tokio::spawn(async move {
            let mut ticker = interval_at(Instant::now() + period, period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

            loop {
                tokio::select! {
                    _ = token.cancelled() => break,
                    _ = ticker.tick() => {
                        let Some(orchestrator) = orchestrator.upgrade() else {
                            break;
                        };
                        orchestrator.run_health_checks().await;
                    }
                }
            }

            debug!("Health check loop stopped");
        }));
    }

    /// Check every RUNNING feature once and apply the failure policy
    pub async fn run_health_checks(&self) {
        let running: Vec<(String, RegisteredFeature)> = {
            let features = self.features.read();
            let states = self.states.read();
            self.registration_order
                .read()
                .iter()
                .filter(|id| states.get(*id) == Some(&FeatureState::Running))
                .filter_map(|id| features.get(id).map(|entry| (id.clone(), entry.clone())))
                .collect()
        };

        debug!(features = running.len(), "Running health checks");

        for (id, entry) in running {
            let report = self.probe_health(&id, &entry).await;

            // Publish under the lifecycle lock so a concurrent stop or
            // disable is never overwritten by a stale report
            let previous = {
                let _transition = entry.lifecycle.lock().await;
                if self.get_state(&id) != Some(FeatureState::Running) {
                    continue;
                }
                let previous = self.get_health(&id).map(|health| health.status);
                self.set_health(&id, report.clone());
                previous
            };

            match report.status {
                HealthStatus::Healthy | HealthStatus::Degraded => {
                    self.handle_operational(&id, &report, previous)
                }
                HealthStatus::Unhealthy => self.handle_unhealthy(&id, &entry, &report).await,
                other => debug!(feature = %id, status = %other, "Health check returned no verdict"),
            }
        }
    }

    /// Call `health_check()` bounded by the configured timeout.
    ///
    /// An error, panic or timeout yields an UNHEALTHY report.
    async fn probe_health(&self, id: &str, entry: &RegisteredFeature) -> FeatureHealth {
        let limit = self.config.health.check_timeout();
        match timeout(limit, catch_feature_panic(entry.feature.health_check())).await {
            Ok(Ok(health)) => health,
            Ok(Err(error)) => {
                debug!(feature = %id, error = %error, "Health check failed");
                failure_health(&error)
            }
            Err(_) => {
                warn!(feature = %id, timeout_ms = limit.as_millis() as u64, "Health check timed out");
                failure_health(&FeatureError::Timeout { timeout: limit })
            }
        }
    }

    fn handle_operational(&self, id: &str, report: &FeatureHealth, previous: Option<HealthStatus>) {
        if report.status == HealthStatus::Degraded && previous != Some(HealthStatus::Degraded) {
            self.emit(id, FeatureEventType::Degraded, report.message.clone());
        }

        let Some(breaker) = self.breakers.get(id) else {
            return;
        };

        match breaker.state() {
            CircuitState::Closed if report.status == HealthStatus::Healthy => breaker.record_success(),
            CircuitState::Open => {
                self.schedule_recovery_attempt(id, self.config.health.recovery_delay());
            }
            _ => {}
        }
    }

    async fn handle_unhealthy(&self, id: &str, entry: &RegisteredFeature, report: &FeatureHealth) {
        if !entry.feature.is_optional() {
            error!(feature = %id, message = %report.message, "Critical feature unhealthy");
            self.emit(id, FeatureEventType::CriticalFailure, report.message.clone());
            return;
        }

        let Some(breaker) = self.breakers.get(id) else {
            return;
        };

        breaker.record_failure(&report.message);
        let failures = breaker.failure_count();
        let ceiling = self.config.health.disable_after_failures;
        warn!(
            feature = %id,
            failures,
            ceiling,
            message = %report.message,
            "Optional feature unhealthy"
        );

        if failures >= ceiling {
            let reason = format!("Disabled after {} consecutive failed health checks", failures);
            if let Err(e) = self.disable_feature(id, &reason).await {
                error!(feature = %id, "Failed to disable feature: {}", e);
            }
        }
    }

    /// Try to bring a feature back into service.
    ///
    /// A RUNNING feature whose breaker is OPEN is health checked and,
    /// if operational, has its breaker reset. A DISABLED feature goes
    /// through the full start path again. Fires RECOVERED on success.
    pub async fn try_recover_feature(&self, id: &str) -> Result<bool> {
        let entry = self.entry(id)?;
        let _transition = entry.lifecycle.lock().await;

        match self.get_state(id) {
            Some(FeatureState::Running) => {
                let Some(breaker) = self.breakers.get(id) else {
                    return Ok(false);
                };
                if breaker.state() != CircuitState::Open {
                    debug!(feature = %id, state = %breaker.state(), "Breaker not open, nothing to recover");
                    return Ok(false);
                }

                let report = self.probe_health(id, &entry).await;
                if !report.is_operational() {
                    debug!(feature = %id, status = %report.status, "Feature still not operational");
                    self.set_health(id, report);
                    return Ok(false);
                }

                breaker.reset();
                self.set_state(id, FeatureState::Running);
                self.set_health(id, report);
                self.emit(id, FeatureEventType::Recovered, "Circuit reset after successful health check");
                Ok(true)
            }
            Some(FeatureState::Disabled) => {
                if !self.start_locked(id, &entry).await? {
                    return Ok(false);
                }
                self.emit(id, FeatureEventType::Recovered, "Restarted after being disabled");
                Ok(true)
            }
            state => {
                debug!(feature = %id, state = ?state, "Feature not eligible for recovery");
                Ok(false)
            }
        }
    }

    /// Run [`try_recover_feature`](Self::try_recover_feature) after `delay`.
    ///
    /// Returns false if an attempt for this feature is already pending.
    /// Pending attempts are dropped by `stop_all`.
    pub fn schedule_recovery_attempt(&self, id: &str, delay: Duration) -> bool {
        if !self.pending_recoveries.lock().insert(id.to_string()) {
            debug!(feature = %id, "Recovery attempt already pending");
            return false;
        }

        let token = self.cancellation_token.lock().clone();
        let orchestrator = self.self_ref.clone();
        let id = id.to_string();
        debug!(feature = %id, delay_ms = delay.as_millis() as u64, "Scheduling recovery attempt");

        tokio::spawn(async move {
            tokio::select! {
                _ = token.cancelled() => return,
                _ = sleep(delay) => {}
            }

            let Some(orchestrator) = orchestrator.upgrade() else {
                return;
            };
            orchestrator.pending_recoveries.lock().remove(&id);

            match orchestrator.try_recover_feature(&id).await {
                Ok(true) => info!(feature = %id, "Feature recovered"),
                Ok(false) => debug!(feature = %id, "Recovery attempt did not recover feature"),
                Err(e) => error!(feature = %id, "Recovery attempt failed: {}", e),
            }
        });

        true
    }
}
