//! Application error types.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum AppError {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Transport error: {0}")]
    Bus(#[from] gridlink_bus::BusError),

    #[error("Client error: {0}")]
    Client(#[from] gridlink_client::ClientError),

    #[error("Telemetry error: {0}")]
    Telemetry(#[from] gridlink_telemetry::TelemetryError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

pub type AppResult<T> = Result<T, AppError>;
