//! Structured logging configuration.

use crate::error::{TelemetryError, TelemetryResult};
use serde::{Deserialize, Serialize};
use tracing::Dispatch;
use tracing_subscriber::{fmt, layer::SubscriberExt, EnvFilter};

/// Output format.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    /// Human-readable multi-line output for development.
    #[default]
    Pretty,
    /// One JSON object per line for production.
    Json,
}

/// Logging configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// `EnvFilter` directives, e.g. `"info,gridlink=debug"`.
    #[serde(default = "default_filter")]
    pub filter: String,
    #[serde(default)]
    pub format: LogFormat,
    /// Include thread names (useful to see callback workers).
    #[serde(default = "default_thread_names")]
    pub thread_names: bool,
}

fn default_filter() -> String {
    "info,gridlink=debug".to_string()
}

fn default_thread_names() -> bool {
    true
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            filter: default_filter(),
            format: LogFormat::default(),
            thread_names: default_thread_names(),
        }
    }
}

impl LoggingConfig {
    /// Defaults overridden by `RUST_LOG` and `RUST_ENV=production`.
    pub fn from_env() -> Self {
        let mut config = Self::default();
        if let Ok(filter) = std::env::var("RUST_LOG") {
            config.filter = filter;
        }
        let is_production = std::env::var("RUST_ENV")
            .map(|v| v == "production")
            .unwrap_or(false);
        if is_production {
            config.format = LogFormat::Json;
        }
        config
    }
}

/// Build a subscriber dispatch from configuration without installing it.
pub fn build_dispatch(config: &LoggingConfig) -> TelemetryResult<Dispatch> {
    let env_filter = EnvFilter::try_new(&config.filter)
        .map_err(|e| TelemetryError::LoggingInit(format!("invalid filter: {e}")))?;

    let dispatch = match config.format {
        LogFormat::Json => Dispatch::new(
            tracing_subscriber::registry().with(env_filter).with(
                fmt::layer()
                    .json()
                    .with_current_span(true)
                    .with_span_list(true)
                    .with_thread_names(config.thread_names),
            ),
        ),
        LogFormat::Pretty => Dispatch::new(
            tracing_subscriber::registry().with(env_filter).with(
                fmt::layer()
                    .pretty()
                    .with_target(true)
                    .with_thread_names(config.thread_names),
            ),
        ),
    };

    Ok(dispatch)
}

/// Build and install the global subscriber.
pub fn init_logging(config: &LoggingConfig) -> TelemetryResult<()> {
    let dispatch = build_dispatch(config)?;
    tracing::dispatcher::set_global_default(dispatch)
        .map_err(|e| TelemetryError::LoggingInit(e.to_string()))
}
