use super::types::FeatureState;
use crate::circuit_breaker::{BreakerRegistry, CircuitBreaker};
use crate::config::WardenConfig;
use crate::error::{FeatureError, Result, WardenError};
use crate::events::{EventFilter, FeatureEvent, FeatureEventBus, FeatureEventType, ListenerId};
use crate::execution::{ExecutionContext, TimeoutObserver};
use crate::feature::SharedFeature;
use crate::health::{FeatureHealth, HealthIssue, IssueSeverity};
use parking_lot::{Mutex, RwLock};
use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Weak};
use std::time::Duration;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// A registered feature and the lock that totally orders its transitions
#[derive(Clone)]
pub(super) struct RegisteredFeature {
    pub(super) feature: SharedFeature,
    pub(super) lifecycle: Arc<tokio::sync::Mutex<()>>,
}

/// Owns every registered feature and drives its lifecycle
pub struct FeatureOrchestrator {
    pub(super) config: WardenConfig,
    pub(super) features: RwLock<HashMap<String, RegisteredFeature>>,
    pub(super) registration_order: RwLock<Vec<String>>,
    pub(super) states: RwLock<HashMap<String, FeatureState>>,
    pub(super) health: RwLock<HashMap<String, FeatureHealth>>,
    pub(super) breakers: BreakerRegistry,
    pub(super) execution: ExecutionContext,
    pub(super) events: FeatureEventBus,

    // Background work
    pub(super) cancellation_token: Mutex<CancellationToken>,
    pub(super) health_task: Mutex<Option<JoinHandle<()>>>,
    pub(super) pending_recoveries: Mutex<HashSet<String>>,
    pub(super) self_ref: Weak<Self>,
}

impl FeatureOrchestrator {
    /// Create an orchestrator with the given configuration
    pub fn new(config: WardenConfig) -> Arc<Self> {
        Arc::new_cyclic(|weak: &Weak<Self>| {
            let breakers = BreakerRegistry::new();
            let observer: Weak<dyn TimeoutObserver> = weak.clone();
            let execution = ExecutionContext::new(breakers.clone(), &config.execution)
                .with_timeout_observer(observer);
            let events = FeatureEventBus::new(config.orchestrator.event_channel_capacity);

            Self {
                config,
                features: RwLock::new(HashMap::new()),
                registration_order: RwLock::new(Vec::new()),
                states: RwLock::new(HashMap::new()),
                health: RwLock::new(HashMap::new()),
                breakers,
                execution,
                events,
                cancellation_token: Mutex::new(CancellationToken::new()),
                health_task: Mutex::new(None),
                pending_recoveries: Mutex::new(HashSet::new()),
                self_ref: weak.clone(),
            }
        })
    }

    pub fn with_defaults() -> Arc<Self> {
        Self::new(WardenConfig::default())
    }

    pub fn config(&self) -> &WardenConfig {
        &self.config
    }

    /// Add a feature to the registry.
    ///
    /// Allocates its circuit breaker, sets it REGISTERED with a DISABLED
    /// health and fires REGISTERED. Ids must be unique.
    pub fn register_feature(&self, feature: SharedFeature) -> Result<()> {
        let id = feature.id().to_string();

        {
            let mut features = self.features.write();
            if features.contains_key(&id) {
                warn!(feature = %id, "Rejecting duplicate feature registration");
                return Err(WardenError::DuplicateFeature { id });
            }
            features.insert(
                id.clone(),
                RegisteredFeature {
                    feature: Arc::clone(&feature),
                    lifecycle: Arc::new(tokio::sync::Mutex::new(())),
                },
            );
            self.registration_order.write().push(id.clone());
        }

        self.breakers.insert(
            &id,
            Arc::new(CircuitBreaker::new(id.clone(), self.config.circuit_breaker.clone())),
        );
        self.states.write().insert(id.clone(), FeatureState::Registered);
        self.health
            .write()
            .insert(id.clone(), FeatureHealth::disabled("Not initialized"));

        info!(
            feature = %id,
            name = %feature.name(),
            priority = feature.priority(),
            dependencies = ?feature.dependencies(),
            optional = feature.is_optional(),
            "Feature registered"
        );
        self.emit(&id, FeatureEventType::Registered, format!("{} registered", feature.name()));
        Ok(())
    }

    /// Register a listener called synchronously for every feature event
    pub fn add_event_listener<F>(&self, listener: F) -> ListenerId
    where
        F: Fn(&FeatureEvent) + Send + Sync + 'static,
    {
        self.events.add_listener(listener)
    }

    pub fn add_filtered_event_listener<F>(&self, filter: EventFilter, listener: F) -> ListenerId
    where
        F: Fn(&FeatureEvent) + Send + Sync + 'static,
    {
        self.events.add_filtered_listener(filter, listener)
    }

    pub fn remove_event_listener(&self, id: ListenerId) -> bool {
        self.events.remove_listener(id)
    }

    /// Receive feature events on an async channel
    pub fn subscribe(&self) -> broadcast::Receiver<FeatureEvent> {
        self.events.subscribe()
    }

    /// The execution context used for guarded calls
    pub fn execution_context(&self) -> &ExecutionContext {
        &self.execution
    }

    pub(super) fn entry(&self, id: &str) -> Result<RegisteredFeature> {
        self.features
            .read()
            .get(id)
            .cloned()
            .ok_or_else(|| WardenError::unknown(id))
    }

    pub(super) fn emit<M: Into<String>>(&self, id: &str, event_type: FeatureEventType, message: M) {
        self.events.publish(FeatureEvent::new(id, event_type, message));
    }
}

impl TimeoutObserver for FeatureOrchestrator {
    fn record_timeout(&self, feature_id: &str, deadline: Duration) {
        if let Some(breaker) = self.breakers.get(feature_id) {
            breaker.record_timeout(deadline);
        }

        let error = FeatureError::Timeout { timeout: deadline };
        let mut health = self.health.write();
        if let Some(current) = health.get(feature_id) {
            let next = current.with_issue(HealthIssue::new(
                IssueSeverity::Warning,
                error.code(),
                format!("Guarded call: {}", error),
            ));
            health.insert(feature_id.to_string(), next);
        }
        debug!(feature = %feature_id, "Timeout recorded against feature");
    }
}

impl Drop for FeatureOrchestrator {
    fn drop(&mut self) {
        self.cancellation_token.get_mut().cancel();
    }
}
