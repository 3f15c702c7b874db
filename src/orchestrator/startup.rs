use super::registry::RegisteredFeature;
use super::state::failure_health;
use super::{FeatureOrchestrator, FeatureState, StartupSummary};
use crate::error::{FeatureError, Result, WardenError};
use crate::events::FeatureEventType;
use crate::execution::catch_feature_panic;
use crate::feature::SharedFeature;
use crate::health::FeatureHealth;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

impl FeatureOrchestrator {
    /// Start every registered feature, dependencies first.
    ///
    /// Optional failures and unmet dependencies are listed in the summary. A
    /// critical failure aborts the pass and is returned; a dependency cycle is
    /// returned before any feature code runs. On success the periodic
    /// health loop is scheduled.
    pub async fn start_all(&self) -> Result<StartupSummary> {
        let order = self.startup_order()?;
        info!(
            features = order.len(),
            ordering = self.config.orchestrator.startup_ordering.as_str(),
            "Starting all features"
        );

        {
            let mut token = self.cancellation_token.lock();
            if token.is_cancelled() {
                *token = CancellationToken::new();
            }
        }

        let mut summary = StartupSummary::default();
        for id in order {
            if self.start_feature(&id).await? {
                summary.started.push(id);
            } else {
                summary.failed.push(id);
            }
        }

        self.schedule_health_checks();

        info!(
            started = summary.started.len(),
            failed = summary.failed.len(),
            "Feature startup complete"
        );
        Ok(summary)
    }

    /// Drive one feature to RUNNING.
    ///
    /// Returns `Ok(false)` when a dependency is not RUNNING or an optional
    /// feature fails to start, and an error when a critical one fails.
    pub async fn start_feature(&self, id: &str) -> Result<bool> {
        let entry = self.entry(id)?;
        let _transition = entry.lifecycle.lock().await;
        self.start_locked(id, &entry).await
    }

    /// Body of `start_feature`; the caller holds the lifecycle lock
    pub(super) async fn start_locked(&self, id: &str, entry: &RegisteredFeature) -> Result<bool> {
        let feature = &entry.feature;

        if self.get_state(id) == Some(FeatureState::Running) {
            return Ok(true);
        }

        if let Some(dependency) = self.unsatisfied_dependency(feature) {
            let error = FeatureError::DependencyUnsatisfied { dependency };
            self.set_state(id, FeatureState::DependencyFailed);
            self.set_health(id, failure_health(&error));
            self.emit(id, FeatureEventType::Failed, error.to_string());
            warn!(feature = %id, error = %error, "Feature not started, dependency unavailable");
            return Ok(false);
        }

        info!(feature = %id, name = %feature.name(), "Starting feature");

        self.set_state(id, FeatureState::Initializing);
        if let Err(error) = catch_feature_panic(feature.initialize()).await {
            return self.fail_start(id, feature, error);
        }

        self.set_state(id, FeatureState::Starting);
        if let Err(error) = catch_feature_panic(feature.start()).await {
            return self.fail_start(id, feature, error);
        }

        self.set_state(id, FeatureState::Running);
        if let Some(breaker) = self.breakers.get(id) {
            breaker.reset();
        }
        self.set_health(id, FeatureHealth::healthy("Running"));
        self.emit(id, FeatureEventType::Started, format!("{} started", feature.name()));
        Ok(true)
    }

    /// First declared dependency that is not RUNNING
    fn unsatisfied_dependency(&self, feature: &SharedFeature) -> Option<String> {
        let states = self.states.read();
        feature
            .dependencies()
            .into_iter()
            .find(|dependency| states.get(dependency) != Some(&FeatureState::Running))
    }

    fn fail_start(&self, id: &str, feature: &SharedFeature, error: FeatureError) -> Result<bool> {
        self.set_state(id, FeatureState::Failed);
        self.set_health(id, failure_health(&error));
        self.emit(id, FeatureEventType::Failed, error.to_string());
        self.absorb_or_escalate(id, feature, error)
    }

    fn absorb_or_escalate(&self, id: &str, feature: &SharedFeature, error: FeatureError) -> Result<bool> {
        if feature.is_optional() {
            warn!(feature = %id, error = %error, "Optional feature failed to start, continuing without it");
            return Ok(false);
        }

        error!(feature = %id, error = %error, "Critical feature failed to start");
        Err(WardenError::CriticalFeatureFailed {
            feature: id.to_string(),
            source: error,
        })
    }
}
