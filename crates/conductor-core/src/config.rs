//! Runtime configuration for the orchestrator, bridge, and state store.
//!
//! Loaded from TOML. Every table and field is optional; missing values fall
//! back to the defaults below, so an empty document is a valid config.
//!
//! ```toml
//! [orchestrator]
//! max_iterations = 20
//! max_stage_reentries = 3
//!
//! [bridge]
//! stage_timeout_ms = 600000
//! max_attempts = 3
//! initial_backoff_ms = 1000
//! max_backoff_ms = 60000
//! backoff_multiplier = 2.0
//! jitter = true
//! admission_backoff_ms = 250
//! breaker_failure_threshold = 5
//! breaker_success_threshold = 1
//! breaker_reset_ms = 30000
//!
//! [store]
//! checkpoint_history = 10
//! retention_days = 30
//! ```

use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use conductor_contracts::error::{ConductorError, ConductorResult};

use crate::circuit_breaker::CircuitBreakerConfig;
use crate::retry::BackoffPolicy;

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ConductorConfig {
    pub orchestrator: OrchestratorConfig,
    pub bridge: BridgeConfig,
    pub store: StoreConfig,
}

impl ConductorConfig {
    /// Parse `s` as TOML and validate the result.
    pub fn from_toml_str(s: &str) -> ConductorResult<Self> {
        let config: ConductorConfig = toml::from_str(s).map_err(|e| ConductorError::Config {
            reason: format!("failed to parse conductor TOML: {}", e),
        })?;
        config.validate()?;
        Ok(config)
    }

    /// Read and parse the TOML file at `path`.
    pub fn from_file(path: &Path) -> ConductorResult<Self> {
        let contents = std::fs::read_to_string(path).map_err(|e| ConductorError::Config {
            reason: format!("failed to read config file '{}': {}", path.display(), e),
        })?;
        Self::from_toml_str(&contents)
    }

    /// Reject values the runtime cannot operate with.
    pub fn validate(&self) -> ConductorResult<()> {
        let invalid = |reason: &str| {
            Err(ConductorError::Config {
                reason: reason.to_string(),
            })
        };
        if self.orchestrator.max_iterations == 0 {
            return invalid("orchestrator.max_iterations must be at least 1");
        }
        if self.bridge.max_attempts == 0 {
            return invalid("bridge.max_attempts must be at least 1");
        }
        if self.bridge.stage_timeout_ms == 0 {
            return invalid("bridge.stage_timeout_ms must be positive");
        }
        if !(self.bridge.backoff_multiplier >= 1.0) {
            return invalid("bridge.backoff_multiplier must be >= 1.0");
        }
        if self.bridge.breaker_failure_threshold > 0 && self.bridge.breaker_success_threshold == 0 {
            return invalid("bridge.breaker_success_threshold must be at least 1");
        }
        if self.store.checkpoint_history == 0 {
            return invalid("store.checkpoint_history must be at least 1");
        }
        Ok(())
    }
}

/// Limits on the orchestrator's graph walk.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct OrchestratorConfig {
    /// Agent invocations allowed per session before it is failed.
    pub max_iterations: u32,
    /// Re-entries of one stage (retry commands, data requests) before the
    /// session is failed.
    pub max_stage_reentries: u32,
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            max_iterations: 20,
            max_stage_reentries: 3,
        }
    }
}

/// Timeout, retry, and admission settings for stage execution.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BridgeConfig {
    /// Deadline for a single attempt.
    pub stage_timeout_ms: u64,
    pub max_attempts: u32,
    pub initial_backoff_ms: u64,
    pub max_backoff_ms: u64,
    pub backoff_multiplier: f64,
    pub jitter: bool,
    /// Wait between admission retries while a tenant is over capacity.
    pub admission_backoff_ms: u64,
    /// Consecutive transient failures that open an agent's circuit; 0 disables
    /// the breaker.
    pub breaker_failure_threshold: u32,
    pub breaker_success_threshold: u32,
    /// How long an open circuit refuses attempts.
    pub breaker_reset_ms: u64,
}

impl Default for BridgeConfig {
    fn default() -> Self {
        Self {
            stage_timeout_ms: 600_000,
            max_attempts: 3,
            initial_backoff_ms: 1_000,
            max_backoff_ms: 60_000,
            backoff_multiplier: 2.0,
            jitter: true,
            admission_backoff_ms: 250,
            breaker_failure_threshold: 5,
            breaker_success_threshold: 1,
            breaker_reset_ms: 30_000,
        }
    }
}

impl BridgeConfig {
    pub fn stage_timeout(&self) -> Duration {
        Duration::from_millis(self.stage_timeout_ms)
    }

    pub fn admission_backoff(&self) -> Duration {
        Duration::from_millis(self.admission_backoff_ms)
    }

    /// Breaker settings, or `None` when the breaker is disabled.
    pub fn circuit_breaker(&self) -> Option<CircuitBreakerConfig> {
        (self.breaker_failure_threshold > 0).then(|| CircuitBreakerConfig {
            failure_threshold: self.breaker_failure_threshold,
            success_threshold: self.breaker_success_threshold,
            reset_timeout: Duration::from_millis(self.breaker_reset_ms),
        })
    }

    pub fn backoff_policy(&self) -> BackoffPolicy {
        BackoffPolicy::default()
            .with_max_attempts(self.max_attempts)
            .with_initial_delay(Duration::from_millis(self.initial_backoff_ms))
            .with_max_delay(Duration::from_millis(self.max_backoff_ms))
            .with_multiplier(self.backoff_multiplier)
            .with_jitter(self.jitter)
    }
}

/// State store retention settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StoreConfig {
    /// Checkpoints kept per session, newest last.
    pub checkpoint_history: usize,
    /// Age after which archived sessions may be purged.
    pub retention_days: u32,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            checkpoint_history: 10,
            retention_days: 30,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn empty_document_uses_defaults() {
        let config = ConductorConfig::from_toml_str("").unwrap();
        assert_eq!(config, ConductorConfig::default());
        assert_eq!(config.orchestrator.max_iterations, 20);
        assert_eq!(config.bridge.stage_timeout(), Duration::from_secs(600));
        assert_eq!(config.store.checkpoint_history, 10);
    }

    #[test]
    fn partial_table_keeps_other_defaults() {
        let config = ConductorConfig::from_toml_str(
            r#"
            [bridge]
            max_attempts = 5
            jitter = false
            "#,
        )
        .unwrap();
        assert_eq!(config.bridge.max_attempts, 5);
        assert_eq!(config.bridge.initial_backoff_ms, 1_000);

        let policy = config.bridge.backoff_policy();
        assert_eq!(policy.max_attempts, 5);
        assert!(!policy.jitter);
    }

    #[test]
    fn breaker_settings_map_to_circuit_config() {
        let config = ConductorConfig::from_toml_str(
            "[bridge]\nbreaker_failure_threshold = 2\nbreaker_reset_ms = 500\n",
        )
        .unwrap();
        let breaker = config.bridge.circuit_breaker().unwrap();
        assert_eq!(breaker.failure_threshold, 2);
        assert_eq!(breaker.success_threshold, 1);
        assert_eq!(breaker.reset_timeout, Duration::from_millis(500));

        let disabled =
            ConductorConfig::from_toml_str("[bridge]\nbreaker_failure_threshold = 0\n").unwrap();
        assert!(disabled.bridge.circuit_breaker().is_none());

        let err = ConductorConfig::from_toml_str("[bridge]\nbreaker_success_threshold = 0\n")
            .unwrap_err();
        assert!(err.to_string().contains("breaker_success_threshold"));
    }

    #[test]
    fn zero_attempts_rejected() {
        let err = ConductorConfig::from_toml_str("[bridge]\nmax_attempts = 0\n").unwrap_err();
        assert!(matches!(err, ConductorError::Config { .. }));
    }

    #[test]
    fn malformed_toml_is_config_error() {
        let err = ConductorConfig::from_toml_str("[bridge\nmax_attempts = ").unwrap_err();
        assert!(err.to_string().contains("failed to parse conductor TOML"));
    }

    #[test]
    fn loads_from_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "[orchestrator]\nmax_stage_reentries = 1").unwrap();

        let config = ConductorConfig::from_file(file.path()).unwrap();
        assert_eq!(config.orchestrator.max_stage_reentries, 1);
    }

    #[test]
    fn missing_file_is_config_error() {
        let err = ConductorConfig::from_file(Path::new("/nonexistent/conductor.toml")).unwrap_err();
        assert!(err.to_string().contains("failed to read config file"));
    }
}
