use std::time::Duration;
use thiserror::Error;

/// Failures raised by feature code or detected while driving it
#[derive(Error, Debug, Clone, PartialEq)]
pub enum FeatureError {
    #[error("Initialization failed: {message}")]
    Initialization { message: String },

    #[error("Runtime failure: {message}")]
    Runtime { message: String },

    #[error("Timed out after {timeout:?}")]
    Timeout { timeout: Duration },

    #[error("Dependency '{dependency}' is not running")]
    DependencyUnsatisfied { dependency: String },
}

impl FeatureError {
    pub fn initialization<S: Into<String>>(message: S) -> Self {
        Self::Initialization {
            message: message.into(),
        }
    }

    pub fn runtime<S: Into<String>>(message: S) -> Self {
        Self::Runtime {
            message: message.into(),
        }
    }

    /// Short machine-readable code used for health issues
    pub fn code(&self) -> &'static str {
        match self {
            FeatureError::Initialization { .. } => "INIT_FAILED",
            FeatureError::Runtime { .. } => "RUNTIME_FAILURE",
            FeatureError::Timeout { .. } => "TIMEOUT",
            FeatureError::DependencyUnsatisfied { .. } => "DEPENDENCY_UNSATISFIED",
        }
    }
}

#[derive(Error, Debug)]
pub enum WardenError {
    #[error("Configuration error: {0}")]
    Config(#[from] config::ConfigError),

    #[error("Feature '{id}' is already registered")]
    DuplicateFeature { id: String },

    #[error("Feature '{id}' is not registered")]
    UnknownFeature { id: String },

    #[error("Dependency cycle detected between features: {}", features.join(", "))]
    DependencyCycle { features: Vec<String> },

    #[error("Critical feature '{feature}' failed: {source}")]
    CriticalFeatureFailed {
        feature: String,
        #[source]
        source: FeatureError,
    },
}

impl WardenError {
    pub fn unknown<S: Into<String>>(id: S) -> Self {
        Self::UnknownFeature { id: id.into() }
    }
}

pub type Result<T> = std::result::Result<T, WardenError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_feature_error_codes() {
        assert_eq!(FeatureError::initialization("boom").code(), "INIT_FAILED");
        assert_eq!(FeatureError::runtime("boom").code(), "RUNTIME_FAILURE");
        assert_eq!(
            FeatureError::Timeout {
                timeout: Duration::from_secs(1)
            }
            .code(),
            "TIMEOUT"
        );
    }

    #[test]
    fn test_error_messages() {
        let err = WardenError::DependencyCycle {
            features: vec!["a".to_string(), "b".to_string()],
        };
        assert_eq!(
            err.to_string(),
            "Dependency cycle detected between features: a, b"
        );

        let err = WardenError::CriticalFeatureFailed {
            feature: "economy".to_string(),
            source: FeatureError::initialization("no database"),
        };
        assert!(err.to_string().contains("economy"));
        assert!(err.to_string().contains("no database"));
    }
}
