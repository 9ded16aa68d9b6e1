use std::str::FromStr;

use tracing::Level;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::{SubscriberInitExt, TryInitError};
use tracing_subscriber::{EnvFilter, Layer};

/// Configuration for the telemetry subsystem.
#[derive(Clone, Debug)]
pub struct TelemetryConfig {
    /// Default log level. Overridden by RUST_LOG env var.
    pub log_level: Level,
    /// Per-module level overrides (e.g. "conductor_engine" => DEBUG).
    pub module_levels: Vec<(String, Level)>,
    /// One JSON object per line instead of human-readable output.
    pub json: bool,
}

impl Default for TelemetryConfig {
    fn default() -> Self {
        Self {
            log_level: Level::INFO,
            module_levels: Vec::new(),
            json: false,
        }
    }
}

impl TelemetryConfig {
    pub fn with_level(mut self, level: Level) -> Self {
        self.log_level = level;
        self
    }

    pub fn with_module_level(mut self, module: impl Into<String>, level: Level) -> Self {
        let module = module.into();
        match self.module_levels.iter_mut().find(|(m, _)| *m == module) {
            Some(entry) => entry.1 = level,
            None => self.module_levels.push((module, level)),
        }
        self
    }

    pub fn json(mut self, json: bool) -> Self {
        self.json = json;
        self
    }

    /// Parse `module=level` pairs, e.g. `conductor_engine=debug`.
    pub fn parse_module_level(raw: &str) -> Option<(String, Level)> {
        let (module, level) = raw.split_once('=')?;
        let module = module.trim();
        if module.is_empty() {
            return None;
        }
        let level = Level::from_str(level.trim()).ok()?;
        Some((module.to_string(), level))
    }

    /// `EnvFilter` directive for this config, e.g. `info,conductor_engine=debug`.
    pub fn filter_directive(&self) -> String {
        let mut filter = self.log_level.to_string().to_lowercase();
        for (module, level) in &self.module_levels {
            filter.push_str(&format!(",{}={}", module, level.to_string().to_lowercase()));
        }
        filter
    }
}

/// Install the global subscriber. Logs go to stderr so stdout stays free for
/// program output. Fails if a subscriber is already installed.
pub fn init_telemetry(config: &TelemetryConfig) -> Result<(), TryInitError> {
    let env_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(config.filter_directive()));

    let fmt_layer = if config.json {
        tracing_subscriber::fmt::layer()
            .json()
            .with_target(true)
            .with_span_list(true)
            .with_writer(std::io::stderr)
            .boxed()
    } else {
        tracing_subscriber::fmt::layer()
            .with_target(true)
            .with_writer(std::io::stderr)
            .boxed()
    };

    tracing_subscriber::registry()
        .with(fmt_layer.with_filter(env_filter))
        .try_init()
}
