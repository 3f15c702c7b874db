use config::{Config, ConfigError, Environment, File};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;
use tracing::{debug, info};

#[derive(Debug, Deserialize, Serialize, Clone, PartialEq)]
pub struct WardenConfig {
    pub circuit_breaker: CircuitBreakerConfig,
    pub health: HealthConfig,
    pub execution: ExecutionConfig,
    pub orchestrator: OrchestratorConfig,
}

#[derive(Debug, Deserialize, Serialize, Clone, PartialEq)]
pub struct CircuitBreakerConfig {
    /// Consecutive failures in CLOSED that open the circuit
    #[serde(default = "default_failure_threshold")]
    pub failure_threshold: u32,

    /// Successful HALF_OPEN trials required to close the circuit
    #[serde(default = "default_success_threshold")]
    pub success_threshold: u32,

    /// Time an OPEN circuit waits before allowing a trial
    #[serde(default = "default_reset_timeout_ms")]
    pub reset_timeout_ms: u64,

    /// Upper bound on a single HALF_OPEN trial
    #[serde(default = "default_half_open_trial_timeout_ms")]
    pub half_open_trial_timeout_ms: u64,
}

#[derive(Debug, Deserialize, Serialize, Clone, PartialEq)]
pub struct HealthConfig {
    /// Period of the health-check loop
    #[serde(default = "default_check_interval_ms")]
    pub check_interval_ms: u64,

    /// A health check running longer than this counts as unhealthy
    #[serde(default = "default_check_timeout_ms")]
    pub check_timeout_ms: u64,

    /// Breaker failure count at which an optional feature is disabled
    #[serde(default = "default_disable_after_failures")]
    pub disable_after_failures: u32,

    /// Delay before a recovery attempt scheduled by the health loop
    #[serde(default = "default_recovery_delay_ms")]
    pub recovery_delay_ms: u64,
}

#[derive(Debug, Deserialize, Serialize, Clone, PartialEq)]
pub struct ExecutionConfig {
    /// Maximum number of concurrently running asynchronous guarded calls
    #[serde(default = "default_worker_pool_size")]
    pub worker_pool_size: usize,

    /// Deadline used by timeout-bounded calls that don't supply one
    #[serde(default = "default_execution_timeout_ms")]
    pub default_timeout_ms: u64,
}

#[derive(Debug, Deserialize, Serialize, Clone, PartialEq)]
pub struct OrchestratorConfig {
    /// How `start_all` orders features
    #[serde(default)]
    pub startup_ordering: StartupOrdering,

    /// Capacity of the feature event broadcast channel
    #[serde(default = "default_event_channel_capacity")]
    pub event_channel_capacity: usize,
}

#[derive(Debug, Deserialize, Serialize, Clone, Copy, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum StartupOrdering {
    /// Dependency graph order, failing fast on cycles
    #[default]
    Topological,
    /// Ascending (priority, dependency count) without graph analysis
    Priority,
}

impl StartupOrdering {
    pub fn as_str(&self) -> &'static str {
        match self {
            StartupOrdering::Topological => "topological",
            StartupOrdering::Priority => "priority",
        }
    }
}

impl CircuitBreakerConfig {
    pub fn reset_timeout(&self) -> Duration {
        Duration::from_millis(self.reset_timeout_ms)
    }

    pub fn half_open_trial_timeout(&self) -> Duration {
        Duration::from_millis(self.half_open_trial_timeout_ms)
    }
}

impl Default for CircuitBreakerConfig {
    fn default() -> Self {
        Self {
            failure_threshold: default_failure_threshold(),
            success_threshold: default_success_threshold(),
            reset_timeout_ms: default_reset_timeout_ms(),
            half_open_trial_timeout_ms: default_half_open_trial_timeout_ms(),
        }
    }
}

impl HealthConfig {
    pub fn check_interval(&self) -> Duration {
        Duration::from_millis(self.check_interval_ms)
    }

    pub fn check_timeout(&self) -> Duration {
        Duration::from_millis(self.check_timeout_ms)
    }

    pub fn recovery_delay(&self) -> Duration {
        Duration::from_millis(self.recovery_delay_ms)
    }
}

impl Default for HealthConfig {
    fn default() -> Self {
        Self {
            check_interval_ms: default_check_interval_ms(),
            check_timeout_ms: default_check_timeout_ms(),
            disable_after_failures: default_disable_after_failures(),
            recovery_delay_ms: default_recovery_delay_ms(),
        }
    }
}

impl ExecutionConfig {
    pub fn default_timeout(&self) -> Duration {
        Duration::from_millis(self.default_timeout_ms)
    }
}

impl Default for ExecutionConfig {
    fn default() -> Self {
        Self {
            worker_pool_size: default_worker_pool_size(),
            default_timeout_ms: default_execution_timeout_ms(),
        }
    }
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            startup_ordering: StartupOrdering::default(),
            event_channel_capacity: default_event_channel_capacity(),
        }
    }
}

impl WardenConfig {
    /// Load configuration from a specific file path
    pub fn load_from_file<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let path_str = path.as_ref().to_string_lossy();
        debug!("Loading configuration from: {}", path_str);

        let settings = Config::builder()
            .set_default(
                "circuit_breaker.failure_threshold",
                default_failure_threshold(),
            )?
            .set_default(
                "circuit_breaker.success_threshold",
                default_success_threshold(),
            )?
            .set_default("circuit_breaker.reset_timeout_ms", default_reset_timeout_ms())?
            .set_default(
                "circuit_breaker.half_open_trial_timeout_ms",
                default_half_open_trial_timeout_ms(),
            )?
            .set_default("health.check_interval_ms", default_check_interval_ms())?
            .set_default("health.check_timeout_ms", default_check_timeout_ms())?
            .set_default(
                "health.disable_after_failures",
                default_disable_after_failures(),
            )?
            .set_default("health.recovery_delay_ms", default_recovery_delay_ms())?
            .set_default(
                "execution.worker_pool_size",
                default_worker_pool_size() as i64,
            )?
            .set_default("execution.default_timeout_ms", default_execution_timeout_ms())?
            .set_default(
                "orchestrator.startup_ordering",
                StartupOrdering::default().as_str(),
            )?
            .set_default(
                "orchestrator.event_channel_capacity",
                default_event_channel_capacity() as i64,
            )?
            // Add configuration file (optional)
            .add_source(File::with_name(&path_str).required(false))
            // WARDEN_HEALTH__CHECK_INTERVAL_MS=1000 style overrides
            .add_source(
                Environment::with_prefix("WARDEN")
                    .prefix_separator("_")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?;

        let config: WardenConfig = settings.try_deserialize()?;

        info!("Configuration loaded successfully");
        debug!("Final configuration: {:#?}", config);

        Ok(config)
    }

    /// Validate configuration values
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.circuit_breaker.failure_threshold == 0 {
            return Err(ConfigError::Message(
                "Circuit breaker failure_threshold must be greater than 0".to_string(),
            ));
        }

        if self.circuit_breaker.success_threshold == 0 {
            return Err(ConfigError::Message(
                "Circuit breaker success_threshold must be greater than 0".to_string(),
            ));
        }

        if self.circuit_breaker.half_open_trial_timeout_ms == 0 {
            return Err(ConfigError::Message(
                "Circuit breaker half_open_trial_timeout_ms must be greater than 0".to_string(),
            ));
        }

        if self.health.check_interval_ms == 0 {
            return Err(ConfigError::Message(
                "Health check_interval_ms must be greater than 0".to_string(),
            ));
        }

        if self.health.check_timeout_ms == 0 {
            return Err(ConfigError::Message(
                "Health check_timeout_ms must be greater than 0".to_string(),
            ));
        }

        if self.health.disable_after_failures == 0 {
            return Err(ConfigError::Message(
                "Health disable_after_failures must be greater than 0".to_string(),
            ));
        }

        if self.execution.worker_pool_size == 0 {
            return Err(ConfigError::Message(
                "Execution worker_pool_size must be greater than 0".to_string(),
            ));
        }

        if self.orchestrator.event_channel_capacity == 0 {
            return Err(ConfigError::Message(
                "Orchestrator event_channel_capacity must be greater than 0".to_string(),
            ));
        }

        Ok(())
    }

    /// Render the configuration as TOML
    pub fn to_toml(&self) -> Result<String, toml::ser::Error> {
        toml::to_string_pretty(self)
    }
}

impl Default for WardenConfig {
    fn default() -> Self {
        Self {
            circuit_breaker: CircuitBreakerConfig::default(),
            health: HealthConfig::default(),
            execution: ExecutionConfig::default(),
            orchestrator: OrchestratorConfig::default(),
        }
    }
}

fn default_failure_threshold() -> u32 {
    5
}
fn default_success_threshold() -> u32 {
    3
}
fn default_reset_timeout_ms() -> u64 {
    60_000
}
fn default_half_open_trial_timeout_ms() -> u64 {
    30_000
}

fn default_check_interval_ms() -> u64 {
    30_000
}
fn default_check_timeout_ms() -> u64 {
    10_000
}
fn default_disable_after_failures() -> u32 {
    10
}
fn default_recovery_delay_ms() -> u64 {
    5_000
}

fn default_worker_pool_size() -> usize {
    8
}
fn default_execution_timeout_ms() -> u64 {
    5_000
}

fn default_event_channel_capacity() -> usize {
    256
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_default_config() {
        let config = WardenConfig::default();

        assert_eq!(config.circuit_breaker.failure_threshold, 5);
        assert_eq!(config.circuit_breaker.success_threshold, 3);
        assert_eq!(config.circuit_breaker.reset_timeout(), Duration::from_secs(60));
        assert_eq!(
            config.circuit_breaker.half_open_trial_timeout(),
            Duration::from_secs(30)
        );
        assert_eq!(config.health.check_interval(), Duration::from_secs(30));
        assert_eq!(config.health.disable_after_failures, 10);
        assert_eq!(
            config.orchestrator.startup_ordering,
            StartupOrdering::Topological
        );
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_config_validation() {
        let mut config = WardenConfig::default();
        config.circuit_breaker.failure_threshold = 0;
        assert!(config.validate().is_err());

        let mut config = WardenConfig::default();
        config.execution.worker_pool_size = 0;
        assert!(config.validate().is_err());

        let mut config = WardenConfig::default();
        config.health.check_interval_ms = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_load_from_file() {
        let mut file = tempfile::Builder::new()
            .suffix(".toml")
            .tempfile()
            .unwrap();
        writeln!(
            file,
            r#"
[circuit_breaker]
failure_threshold = 2
reset_timeout_ms = 250

[health]
check_interval_ms = 1000

[orchestrator]
startup_ordering = "priority"
"#
        )
        .unwrap();

        let config = WardenConfig::load_from_file(file.path()).unwrap();
        assert_eq!(config.circuit_breaker.failure_threshold, 2);
        assert_eq!(config.circuit_breaker.reset_timeout_ms, 250);
        // Untouched keys keep their defaults
        assert_eq!(config.circuit_breaker.success_threshold, 3);
        assert_eq!(config.health.check_interval_ms, 1000);
        assert_eq!(config.health.disable_after_failures, 10);
        assert_eq!(config.orchestrator.startup_ordering, StartupOrdering::Priority);
    }

    #[test]
    fn test_missing_file_uses_defaults() {
        let config = WardenConfig::load_from_file("/nonexistent/warden-test.toml").unwrap();
        assert_eq!(config.circuit_breaker, CircuitBreakerConfig::default());
        assert_eq!(config.execution, ExecutionConfig::default());
    }

    #[test]
    fn test_toml_round_trip_of_defaults() {
        let rendered = WardenConfig::default().to_toml().unwrap();
        assert!(rendered.contains("[circuit_breaker]"));
        assert!(rendered.contains("startup_ordering = \"topological\""));
    }
}
