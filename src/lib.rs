pub mod circuit_breaker;
pub mod config;
pub mod error;
pub mod events;
pub mod execution;
pub mod feature;
pub mod health;
pub mod orchestrator;

pub use circuit_breaker::{BreakerRegistry, CircuitBreaker, CircuitBreakerSnapshot, CircuitState};
pub use config::{
    CircuitBreakerConfig, ExecutionConfig, HealthConfig, OrchestratorConfig, StartupOrdering,
    WardenConfig,
};
pub use error::{FeatureError, Result, WardenError};
pub use events::{EventFilter, EventListener, FeatureEvent, FeatureEventBus, FeatureEventType, ListenerId};
pub use execution::{ExecutionContext, TimeoutObserver};
pub use feature::{Feature, MockFeature, SharedFeature, DEFAULT_PRIORITY};
pub use health::{FeatureHealth, HealthIssue, HealthStatus, IssueSeverity};
pub use orchestrator::{FeatureOrchestrator, FeatureState, ShutdownSummary, StartupSummary};
