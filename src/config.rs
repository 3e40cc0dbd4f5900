//! Configuration for the gate manager, trace collector and trace storage.
//!
//! Durations are expressed in milliseconds so the same document can be written
//! in YAML, JSON or TOML without custom encodings.

use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{ConfigError, ConfigResult};

/// Supported configuration text formats.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConfigFormat {
    /// YAML format (`.yaml` / `.yml`).
    Yaml,
    /// JSON format (`.json`).
    Json,
    /// TOML format (`.toml`).
    Toml,
}

impl ConfigFormat {
    pub fn from_path(path: &Path) -> ConfigResult<Self> {
        let ext = path
            .extension()
            .and_then(|e| e.to_str())
            .map(|e| e.to_ascii_lowercase())
            .unwrap_or_default();
        match ext.as_str() {
            "yaml" | "yml" => Ok(ConfigFormat::Yaml),
            "json" => Ok(ConfigFormat::Json),
            "toml" => Ok(ConfigFormat::Toml),
            other => Err(ConfigError::UnsupportedFormat(other.to_string())),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GateManagerConfig {
    #[serde(default = "default_enabled")]
    pub enabled: bool,
    #[serde(default = "default_gate_timeout_ms")]
    pub default_timeout_ms: u64,
}

impl Default for GateManagerConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            default_timeout_ms: default_gate_timeout_ms(),
        }
    }
}

impl GateManagerConfig {
    pub fn with_default_timeout(mut self, timeout: Duration) -> Self {
        self.default_timeout_ms = timeout.as_millis() as u64;
        self
    }

    pub fn default_timeout(&self) -> Duration {
        Duration::from_millis(self.default_timeout_ms)
    }

    pub fn validate(&self) -> ConfigResult<()> {
        if self.default_timeout_ms == 0 {
            return Err(ConfigError::InvalidTimeout(self.default_timeout_ms));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CollectorConfig {
    #[serde(default = "default_enabled")]
    pub enabled: bool,
    #[serde(default = "default_max_active_traces")]
    pub max_active_traces: usize,
}

impl Default for CollectorConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            max_active_traces: default_max_active_traces(),
        }
    }
}

impl CollectorConfig {
    pub fn validate(&self) -> ConfigResult<()> {
        if self.max_active_traces == 0 {
            return Err(ConfigError::InvalidCapacity {
                component: "collector".to_string(),
                value: self.max_active_traces,
            });
        }
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StorageConfig {
    #[serde(default = "default_max_traces")]
    pub max_traces: usize,
    #[serde(default = "default_ttl_ms")]
    pub ttl_ms: u64,
    #[serde(default = "default_enabled")]
    pub compression: bool,
    #[serde(default = "default_sweep_interval_ms")]
    pub sweep_interval_ms: u64,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            max_traces: default_max_traces(),
            ttl_ms: default_ttl_ms(),
            compression: true,
            sweep_interval_ms: default_sweep_interval_ms(),
        }
    }
}

impl StorageConfig {
    pub fn sweep_interval(&self) -> Duration {
        Duration::from_millis(self.sweep_interval_ms)
    }

    pub fn validate(&self) -> ConfigResult<()> {
        if self.max_traces == 0 {
            return Err(ConfigError::InvalidCapacity {
                component: "storage".to_string(),
                value: self.max_traces,
            });
        }
        if self.ttl_ms == 0 {
            return Err(ConfigError::InvalidTtl(self.ttl_ms));
        }
        if self.sweep_interval_ms == 0 {
            return Err(ConfigError::InvalidSweepInterval(self.sweep_interval_ms));
        }
        Ok(())
    }
}

/// Top-level document bundling all three component configs.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DebugRuntimeConfig {
    #[serde(default)]
    pub gates: GateManagerConfig,
    #[serde(default)]
    pub collector: CollectorConfig,
    #[serde(default)]
    pub storage: StorageConfig,
}

impl DebugRuntimeConfig {
    /// Parse and validate a config document.
    pub fn parse(content: &str, format: ConfigFormat) -> ConfigResult<Self> {
        let config: DebugRuntimeConfig = match format {
            ConfigFormat::Yaml => serde_saphyr::from_str(content)
                .map_err(|e| ConfigError::ParseError(e.to_string()))?,
            ConfigFormat::Json => serde_json::from_str(content)
                .map_err(|e| ConfigError::ParseError(e.to_string()))?,
            ConfigFormat::Toml => {
                toml::from_str(content).map_err(|e| ConfigError::ParseError(e.to_string()))?
            }
        };
        config.validate()?;
        Ok(config)
    }

    /// Read a config file, picking the format from its extension.
    pub fn from_file(path: impl AsRef<Path>) -> ConfigResult<Self> {
        let path = path.as_ref();
        let format = ConfigFormat::from_path(path)?;
        let content =
            std::fs::read_to_string(path).map_err(|e| ConfigError::ReadError(e.to_string()))?;
        Self::parse(&content, format)
    }

    pub fn validate(&self) -> ConfigResult<()> {
        self.gates.validate()?;
        self.collector.validate()?;
        self.storage.validate()
    }
}

fn default_enabled() -> bool {
    true
}

fn default_gate_timeout_ms() -> u64 {
    30_000
}

fn default_max_active_traces() -> usize {
    1_000
}

fn default_max_traces() -> usize {
    1_000
}

fn default_ttl_ms() -> u64 {
    3_600_000
}

fn default_sweep_interval_ms() -> u64 {
    60_000
}
