//! Layered configuration for the orchestration core.
//!
//! Defaults are defined per-section so that a missing config file, or a
//! missing `ai_guardrails.json`, still produces a fully runnable system.
//! The file is optional; when present it is layered with environment
//! overrides prefixed `ORCHESTRATOR_` (e.g. `ORCHESTRATOR_DATABASE__PATH`).

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{OrchestratorError, OrchestratorResult};
use crate::guardrail::GuardrailPolicy;

/// Top-level configuration, composed of one struct per subsystem.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct OrchestratorConfig {
    pub database: DatabaseConfig,
    pub workers: WorkersConfig,
    pub dispatcher: DispatcherConfig,
    pub execution: ExecutionConfig,
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            database: DatabaseConfig::default(),
            workers: WorkersConfig::default(),
            dispatcher: DispatcherConfig::default(),
            execution: ExecutionConfig::default(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DatabaseConfig {
    /// Path to the embedded SQLite database file. `:memory:` is valid for tests.
    pub path: String,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            path: "orchestrator.sqlite3".to_string(),
        }
    }
}

/// Worker-path overrides for each role.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct WorkersConfig {
    pub python_worker_path: String,
    pub network_worker_path: String,
    /// Bounded wait for a worker's unsolicited `READY` record on startup.
    pub startup_timeout_ms: u64,
    /// Bounded graceful window before force-terminating on stop.
    pub shutdown_grace_ms: u64,
}

impl Default for WorkersConfig {
    fn default() -> Self {
        Self {
            python_worker_path: "workers/python_worker".to_string(),
            network_worker_path: "workers/network_worker".to_string(),
            startup_timeout_ms: 10_000,
            shutdown_grace_ms: 10_000,
        }
    }
}

impl WorkersConfig {
    pub fn startup_timeout(&self) -> Duration {
        Duration::from_millis(self.startup_timeout_ms)
    }

    pub fn shutdown_grace(&self) -> Duration {
        Duration::from_millis(self.shutdown_grace_ms)
    }
}

/// Per-request dispatcher behavior.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DispatcherConfig {
    /// Timeout while awaiting a response line with a matching id.
    pub request_timeout_ms: u64,
    /// Default in-flight capacity per worker role, unless a role declares otherwise.
    pub default_in_flight_capacity: usize,
}

impl Default for DispatcherConfig {
    fn default() -> Self {
        Self {
            request_timeout_ms: 30_000,
            default_in_flight_capacity: 1,
        }
    }
}

impl DispatcherConfig {
    pub fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.request_timeout_ms)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ExecutionConfig {
    /// Bound on shutdown drain before force-cancelling remaining workers.
    pub shutdown_timeout_ms: u64,
}

impl Default for ExecutionConfig {
    fn default() -> Self {
        Self {
            shutdown_timeout_ms: 10_000,
        }
    }
}

impl OrchestratorConfig {
    /// Load configuration layered as: built-in defaults → optional TOML file
    /// → environment overrides (`ORCHESTRATOR_` prefix, `__` as nesting
    /// separator). A missing file is not an error.
    pub fn load(config_path: Option<&Path>) -> OrchestratorResult<Self> {
        let path = config_path
            .map(PathBuf::from)
            .or_else(|| std::env::var("ORCHESTRATOR_CONFIG_PATH").ok().map(PathBuf::from))
            .unwrap_or_else(|| PathBuf::from("config/orchestrator.toml"));

        let mut builder = config::Config::builder()
            .add_source(config::Config::try_from(&OrchestratorConfig::default()).map_err(|e| {
                OrchestratorError::Internal(format!("failed to seed config defaults: {e}"))
            })?);

        if path.exists() {
            builder = builder.add_source(config::File::from(path.as_path()));
        }

        builder = builder.add_source(
            config::Environment::with_prefix("ORCHESTRATOR")
                .separator("__")
                .try_parsing(true),
        );

        let settled = builder
            .build()
            .map_err(|e| OrchestratorError::Internal(format!("failed to build config: {e}")))?;

        settled
            .try_deserialize()
            .map_err(|e| OrchestratorError::Internal(format!("failed to deserialize config: {e}")))
    }
}

/// Load the guardrail policy from `ai_guardrails.json` under the given
/// config directory, falling back to [`GuardrailPolicy::default`] when the
/// file is absent or malformed.
pub fn load_guardrail_policy(config_dir: &Path) -> GuardrailPolicy {
    let path = config_dir.join("ai_guardrails.json");
    match std::fs::read_to_string(&path) {
        Ok(contents) => serde_json::from_str(&contents).unwrap_or_else(|e| {
            tracing::warn!(path = %path.display(), error = %e, "failed to parse ai_guardrails.json, using defaults");
            GuardrailPolicy::default()
        }),
        Err(_) => GuardrailPolicy::default(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_is_fully_populated() {
        let config = OrchestratorConfig::default();
        assert_eq!(config.database.path, "orchestrator.sqlite3");
        assert_eq!(config.workers.startup_timeout_ms, 10_000);
        assert_eq!(config.dispatcher.default_in_flight_capacity, 1);
    }

    #[test]
    fn missing_config_file_loads_defaults() {
        let config = OrchestratorConfig::load(Some(Path::new("/nonexistent/path.toml"))).unwrap();
        assert_eq!(config.database.path, "orchestrator.sqlite3");
    }

    #[test]
    fn missing_guardrail_file_loads_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let policy = load_guardrail_policy(dir.path());
        assert_eq!(policy, GuardrailPolicy::default());
    }
}
