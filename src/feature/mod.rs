//! The contract every pluggable feature implements.
//!
//! The orchestrator never constructs features. Hosts build them, wrap them in
//! an `Arc` and hand them to
//! [`FeatureOrchestrator::register_feature`](crate::FeatureOrchestrator::register_feature).

mod mock;

pub use mock::MockFeature;

use crate::error::FeatureError;
use crate::health::FeatureHealth;
use async_trait::async_trait;
use std::sync::Arc;

/// Default start priority; lower values start earlier
pub const DEFAULT_PRIORITY: i32 = 100;

/// An independently startable and stoppable capability
#[async_trait]
pub trait Feature: Send + Sync {
    /// Stable identifier, unique within one orchestrator
    fn id(&self) -> &str;

    /// Display name used in logs
    fn name(&self) -> &str;

    fn priority(&self) -> i32 {
        DEFAULT_PRIORITY
    }

    /// Ids of features that must be RUNNING before this one starts
    fn dependencies(&self) -> Vec<String> {
        Vec::new()
    }

    /// Optional features may be disabled without bringing the host down
    fn is_optional(&self) -> bool {
        true
    }

    async fn initialize(&self) -> Result<(), FeatureError>;

    async fn start(&self) -> Result<(), FeatureError>;

    async fn stop(&self) -> Result<(), FeatureError>;

    /// Final teardown, called once when the host shuts down
    async fn shutdown(&self) -> Result<(), FeatureError>;

    /// An `Err` is treated the same as an UNHEALTHY result
    async fn health_check(&self) -> Result<FeatureHealth, FeatureError>;
}

pub type SharedFeature = Arc<dyn Feature>;
