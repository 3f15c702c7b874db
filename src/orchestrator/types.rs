use serde::{Deserialize, Serialize};
use std::fmt;

/// Feature lifecycle states
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum FeatureState {
    Registered,
    Initializing,
    Starting,
    Running,
    Stopping,
    Stopped,
    Disabled,
    Failed,
    DependencyFailed,
}

impl FeatureState {
    pub fn as_str(&self) -> &'static str {
        match self {
            FeatureState::Registered => "REGISTERED",
            FeatureState::Initializing => "INITIALIZING",
            FeatureState::Starting => "STARTING",
            FeatureState::Running => "RUNNING",
            FeatureState::Stopping => "STOPPING",
            FeatureState::Stopped => "STOPPED",
            FeatureState::Disabled => "DISABLED",
            FeatureState::Failed => "FAILED",
            FeatureState::DependencyFailed => "DEPENDENCY_FAILED",
        }
    }
}

impl fmt::Display for FeatureState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Outcome of [`start_all`](super::FeatureOrchestrator::start_all)
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct StartupSummary {
    /// Features RUNNING after the pass, in start order
    pub started: Vec<String>,
    /// Optional features that failed or had an unsatisfied dependency
    pub failed: Vec<String>,
}

impl StartupSummary {
    pub fn is_complete(&self) -> bool {
        self.failed.is_empty()
    }
}

/// Outcome of [`stop_all`](super::FeatureOrchestrator::stop_all)
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ShutdownSummary {
    /// Features whose `shutdown()` succeeded, in shutdown order
    pub stopped: Vec<String>,
    /// Features whose `shutdown()` failed or panicked
    pub failed: Vec<String>,
}

impl ShutdownSummary {
    pub fn is_clean(&self) -> bool {
        self.failed.is_empty()
    }
}
