//! Application configuration.

use crate::error::{AppError, AppResult};
use gridlink_bus::RedisConfig;
use gridlink_client::AggregatorConfig;
use gridlink_core::DeviceId;
use gridlink_telemetry::LoggingConfig;
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

/// Environment variable naming the config file.
pub const CONFIG_ENV: &str = "GRIDLINK_CONFIG";

pub const DEFAULT_CONFIG_PATH: &str = "config/default.toml";

/// Top-level configuration for the agent binary.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppConfig {
    /// Devices that select the aggregator after it registers.
    #[serde(default = "default_devices")]
    pub devices: Vec<DeviceId>,
    /// Wait for each device's SELECT acknowledgment.
    #[serde(default = "default_selection_timeout_ms")]
    pub selection_timeout_ms: u64,
    #[serde(default)]
    pub logging: LoggingConfig,
    #[serde(default)]
    pub redis: RedisConfig,
    #[serde(default = "default_aggregator")]
    pub aggregator: AggregatorConfig,
}

fn default_aggregator() -> AggregatorConfig {
    AggregatorConfig::new("aggregator")
}

fn default_devices() -> Vec<DeviceId> {
    vec![DeviceId::from("house-1"), DeviceId::from("house-2")]
}

fn default_selection_timeout_ms() -> u64 {
    10_000
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            devices: default_devices(),
            selection_timeout_ms: default_selection_timeout_ms(),
            logging: LoggingConfig::default(),
            redis: RedisConfig::default(),
            aggregator: default_aggregator(),
        }
    }
}

impl AppConfig {
    /// Load from `path`, else `GRIDLINK_CONFIG`, else the default path.
    ///
    /// A missing file at the default path falls back to defaults; an
    /// explicitly named file must exist.
    pub fn load(path: Option<&str>) -> AppResult<Self> {
        let explicit = path
            .map(str::to_string)
            .or_else(|| std::env::var(CONFIG_ENV).ok());

        match explicit {
            Some(path) => Self::from_file(&path),
            None if Path::new(DEFAULT_CONFIG_PATH).exists() => Self::from_file(DEFAULT_CONFIG_PATH),
            None => Ok(Self::default()),
        }
    }

    /// Load from a specific file.
    pub fn from_file(path: &str) -> AppResult<Self> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| AppError::Config(format!("Failed to read config {path}: {e}")))?;

        toml::from_str(&content)
            .map_err(|e| AppError::Config(format!("Failed to parse config {path}: {e}")))
    }

    pub fn selection_timeout(&self) -> Duration {
        Duration::from_millis(self.selection_timeout_ms)
    }
}
