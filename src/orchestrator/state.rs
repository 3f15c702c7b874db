use super::{FeatureOrchestrator, FeatureState};
use crate::circuit_breaker::CircuitBreakerSnapshot;
use crate::error::FeatureError;
use crate::health::{FeatureHealth, HealthIssue, IssueSeverity};
use std::collections::HashMap;
use tracing::debug;

impl FeatureOrchestrator {
    pub fn get_state(&self, id: &str) -> Option<FeatureState> {
        self.states.read().get(id).copied()
    }

    pub fn get_health(&self, id: &str) -> Option<FeatureHealth> {
        self.health.read().get(id).cloned()
    }

    /// True when the feature is RUNNING and its breaker accepts calls
    pub fn is_feature_available(&self, id: &str) -> bool {
        if self.get_state(id) != Some(FeatureState::Running) {
            return false;
        }
        self.breakers
            .get(id)
            .map(|breaker| breaker.allow_request())
            .unwrap_or(false)
    }

    pub fn get_all_health(&self) -> HashMap<String, FeatureHealth> {
        self.health.read().clone()
    }

    pub fn get_all_states(&self) -> HashMap<String, FeatureState> {
        self.states.read().clone()
    }

    pub fn breaker_snapshot(&self, id: &str) -> Option<CircuitBreakerSnapshot> {
        self.breakers.get(id).map(|breaker| breaker.snapshot())
    }

    /// Registered feature ids in registration order
    pub fn feature_ids(&self) -> Vec<String> {
        self.registration_order.read().clone()
    }

    pub fn feature_count(&self) -> usize {
        self.registration_order.read().len()
    }

    pub(super) fn set_state(&self, id: &str, state: FeatureState) {
        let previous = self.states.write().insert(id.to_string(), state);
        debug!(feature = %id, from = ?previous, to = %state, "Feature state changed");
    }

    /// Replace the published health value
    pub(super) fn set_health(&self, id: &str, health: FeatureHealth) {
        self.health.write().insert(id.to_string(), health);
    }
}

/// UNHEALTHY snapshot carrying `error` as an issue
pub(super) fn failure_health(error: &FeatureError) -> FeatureHealth {
    FeatureHealth::unhealthy(error.to_string()).with_issue(HealthIssue::new(
        IssueSeverity::Error,
        error.code(),
        error.to_string(),
    ))
}
