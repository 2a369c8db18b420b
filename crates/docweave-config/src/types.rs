//! Configuration types.
//!
//! ```toml
//! [engine]
//! default_timeout_ms = 5000
//!
//! [logging]
//! level = "info"
//! file = true
//! dir = "/var/log/docweave"
//!
//! [system]
//! env = "prod"
//! region = "eu"
//! ```

use std::path::PathBuf;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::{ConfigError, Result};

/// Console log level when `[logging] level` is not set.
pub const DEFAULT_LOG_LEVEL: &str = "info";

/// Root configuration.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DocweaveConfig {
    /// Engine and step defaults.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub engine: Option<EngineConfig>,

    /// Logging settings.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub logging: Option<LoggingConfig>,

    /// Values exposed to every step as `system`.
    #[serde(skip_serializing_if = "toml::Table::is_empty")]
    pub system: toml::Table,
}

impl DocweaveConfig {
    /// Create an empty config.
    pub fn new() -> Self {
        Self::default()
    }

    /// Parse and validate a config from a TOML string.
    pub fn from_toml(toml_str: &str) -> Result<Self> {
        let config: Self = toml::from_str(toml_str)?;
        config.validate()?;
        Ok(config)
    }

    /// Serialize to a TOML string.
    pub fn to_toml(&self) -> Result<String> {
        Ok(toml::to_string_pretty(self)?)
    }

    /// Merge another config on top of this one (other takes priority).
    ///
    /// `[engine]` and `[logging]` are replaced as a whole; `[system]` keys are
    /// merged one by one.
    pub fn merge(&mut self, other: DocweaveConfig) {
        if other.engine.is_some() {
            self.engine = other.engine;
        }
        if other.logging.is_some() {
            self.logging = other.logging;
        }
        for (key, value) in other.system {
            self.system.insert(key, value);
        }
    }

    fn validate(&self) -> Result<()> {
        if let Some(engine) = &self.engine
            && engine.default_timeout_ms == Some(0)
        {
            return Err(ConfigError::Invalid {
                field: "engine.default_timeout_ms".into(),
                reason: "must be greater than zero".into(),
            });
        }
        Ok(())
    }

    /// Timeout applied to steps that do not set `timeout_ms`, if configured.
    pub fn default_timeout_ms(&self) -> Option<u64> {
        self.engine.as_ref().and_then(|e| e.default_timeout_ms)
    }

    /// Console log level.
    pub fn log_level(&self) -> &str {
        self.logging
            .as_ref()
            .and_then(|l| l.level.as_deref())
            .unwrap_or(DEFAULT_LOG_LEVEL)
    }

    /// Whether JSON file logging is enabled.
    pub fn file_logging(&self) -> bool {
        self.logging.as_ref().is_some_and(|l| l.file)
    }

    /// Directory for log files, if set explicitly.
    pub fn log_dir(&self) -> Option<&PathBuf> {
        self.logging.as_ref().and_then(|l| l.dir.as_ref())
    }

    /// The `[system]` table as JSON.
    pub fn system_value(&self) -> Result<Value> {
        Ok(serde_json::to_value(&self.system)?)
    }
}

/// Engine settings.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Per-attempt timeout for steps without `timeout_ms`.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub default_timeout_ms: Option<u64>,
}

/// Logging settings.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Console filter directive (`info`, `debug`, `docweave_pipeline=trace`).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub level: Option<String>,
    /// Write a JSON log file in addition to the console.
    pub file: bool,
    /// Directory for log files. Defaults to `<config dir>/logs`.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub dir: Option<PathBuf>,
}
