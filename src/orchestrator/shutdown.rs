use super::registry::RegisteredFeature;
use super::state::failure_health;
use super::{FeatureOrchestrator, FeatureState, ShutdownSummary};
use crate::error::Result;
use crate::events::FeatureEventType;
use crate::execution::catch_feature_panic;
use crate::health::FeatureHealth;
use tracing::{error, info, warn};

impl FeatureOrchestrator {
    /// Stop a RUNNING feature.
    ///
    /// Returns true if `stop()` ran and succeeded. A failing `stop()` is
    /// logged and leaves the feature FAILED; it is never returned.
    pub async fn stop_feature(&self, id: &str) -> Result<bool> {
        let entry = self.entry(id)?;
        let _transition = entry.lifecycle.lock().await;
        Ok(self.stop_locked(id, &entry).await)
    }

    pub(super) async fn stop_locked(&self, id: &str, entry: &RegisteredFeature) -> bool {
        let state = self.get_state(id);
        if state != Some(FeatureState::Running) {
            info!(feature = %id, state = ?state, "Feature not running, nothing to stop");
            return false;
        }

        info!(feature = %id, "Stopping feature");
        self.set_state(id, FeatureState::Stopping);

        match catch_feature_panic(entry.feature.stop()).await {
            Ok(()) => {
                self.set_state(id, FeatureState::Stopped);
                self.set_health(id, FeatureHealth::disabled("Stopped"));
                self.emit(id, FeatureEventType::Stopped, format!("{} stopped", entry.feature.name()));
                true
            }
            Err(error) => {
                warn!(feature = %id, error = %error, "Error stopping feature");
                self.set_state(id, FeatureState::Failed);
                self.set_health(id, failure_health(&error));
                self.emit(id, FeatureEventType::Failed, format!("Stop failed: {}", error));
                false
            }
        }
    }

    /// Stop the feature and keep it out of service.
    ///
    /// Force-opens its breaker so no guarded call reaches it. Disabling an
    /// already DISABLED feature does nothing.
    pub async fn disable_feature(&self, id: &str, reason: &str) -> Result<()> {
        let entry = self.entry(id)?;
        let _transition = entry.lifecycle.lock().await;

        if self.get_state(id) == Some(FeatureState::Disabled) {
            return Ok(());
        }

        self.stop_locked(id, &entry).await;

        self.set_state(id, FeatureState::Disabled);
        if let Some(breaker) = self.breakers.get(id) {
            breaker.force_open();
        }
        self.set_health(id, FeatureHealth::disabled(reason));
        warn!(feature = %id, reason, "Feature disabled");
        self.emit(id, FeatureEventType::Disabled, reason);
        Ok(())
    }

    /// Stop then start; a successful start resets the breaker
    pub async fn restart_feature(&self, id: &str) -> Result<bool> {
        info!(feature = %id, "Restarting feature");
        self.stop_feature(id).await?;
        self.start_feature(id).await
    }

    /// Shut every feature down, last registered first.
    ///
    /// Background health and recovery tasks are cancelled before any
    /// feature is touched. Every feature's `shutdown()` is called whatever
    /// its state, and one failure does not prevent the rest.
    pub async fn stop_all(&self) -> ShutdownSummary {
        info!("Beginning feature shutdown");

        self.cancellation_token.lock().cancel();
        let health_task = self.health_task.lock().take();
        if let Some(handle) = health_task {
            handle.abort();
        }
        self.pending_recoveries.lock().clear();

        let mut order = self.feature_ids();
        order.reverse();

        let mut summary = ShutdownSummary::default();
        for id in order {
            let Ok(entry) = self.entry(&id) else {
                continue;
            };
            let _transition = entry.lifecycle.lock().await;

            match catch_feature_panic(entry.feature.shutdown()).await {
                Ok(()) => {
                    self.set_state(&id, FeatureState::Stopped);
                    self.set_health(&id, FeatureHealth::disabled("Shut down"));
                    self.emit(&id, FeatureEventType::Stopped, format!("{} shut down", entry.feature.name()));
                    summary.stopped.push(id);
                }
                Err(shutdown_error) => {
                    error!(feature = %id, error = %shutdown_error, "Error shutting down feature");
                    self.set_state(&id, FeatureState::Failed);
                    self.set_health(&id, failure_health(&shutdown_error));
                    self.emit(&id, FeatureEventType::Failed, format!("Shutdown failed: {}", shutdown_error));
                    summary.failed.push(id);
                }
            }
        }

        info!(
            stopped = summary.stopped.len(),
            failed = summary.failed.len(),
            "Feature shutdown complete"
        );
        summary
    }
}
