use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};

const ENV_PREFIX: &str = "CONDUCTOR_";

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to read config {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },
    #[error("invalid config: {0}")]
    Parse(#[from] serde_json::Error),
    #[error("invalid value for {key}: {value:?}")]
    InvalidEnv { key: String, value: String },
    #[error("{0} must be greater than zero")]
    Zero(&'static str),
}

/// Process-wide engine settings. Per-agent limits live in the agent's
/// `RunSpec`; these are the defaults and pool sizes around them.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Concurrent backend tool bodies across all runs.
    pub tool_workers: usize,
    /// Per-run event channel capacity.
    pub event_buffer: usize,
    pub frontend_submit_timeout_ms: u64,
    /// Used when an agent does not set `max_steps`.
    pub react_max_steps: u32,
    /// Model rounds per plan task before the task is marked failed.
    pub max_task_rounds: u32,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            tool_workers: 8,
            event_buffer: 256,
            frontend_submit_timeout_ms: 300_000,
            react_max_steps: 6,
            max_task_rounds: 8,
        }
    }
}

impl EngineConfig {
    pub fn from_json(raw: &str) -> Result<Self, ConfigError> {
        let config: Self = serde_json::from_str(raw)?;
        config.validate()?;
        Ok(config)
    }

    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let raw = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.display().to_string(),
            source,
        })?;
        Self::from_json(&raw)
    }

    /// Apply `CONDUCTOR_*` overrides from the process environment.
    pub fn with_env_overrides(self) -> Result<Self, ConfigError> {
        self.with_overrides(|key| std::env::var(key).ok())
    }

    /// Apply overrides from `lookup`, keyed by `CONDUCTOR_<FIELD>` in upper
    /// case, e.g. `CONDUCTOR_TOOL_WORKERS`.
    pub fn with_overrides(
        mut self,
        lookup: impl Fn(&str) -> Option<String>,
    ) -> Result<Self, ConfigError> {
        override_field(&lookup, "TOOL_WORKERS", &mut self.tool_workers)?;
        override_field(&lookup, "EVENT_BUFFER", &mut self.event_buffer)?;
        override_field(&lookup, "FRONTEND_SUBMIT_TIMEOUT_MS", &mut self.frontend_submit_timeout_ms)?;
        override_field(&lookup, "REACT_MAX_STEPS", &mut self.react_max_steps)?;
        override_field(&lookup, "MAX_TASK_ROUNDS", &mut self.max_task_rounds)?;
        self.validate()?;
        Ok(self)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.tool_workers == 0 {
            return Err(ConfigError::Zero("tool_workers"));
        }
        if self.event_buffer == 0 {
            return Err(ConfigError::Zero("event_buffer"));
        }
        if self.react_max_steps == 0 {
            return Err(ConfigError::Zero("react_max_steps"));
        }
        if self.max_task_rounds == 0 {
            return Err(ConfigError::Zero("max_task_rounds"));
        }
        Ok(())
    }

    pub fn frontend_submit_timeout(&self) -> Duration {
        Duration::from_millis(self.frontend_submit_timeout_ms)
    }
}

fn override_field<T: std::str::FromStr>(
    lookup: &impl Fn(&str) -> Option<String>,
    name: &str,
    field: &mut T,
) -> Result<(), ConfigError> {
    let key = format!("{ENV_PREFIX}{name}");
    let Some(value) = lookup(&key) else {
        return Ok(());
    };
    *field = value
        .trim()
        .parse()
        .map_err(|_| ConfigError::InvalidEnv { key, value })?;
    Ok(())
}
