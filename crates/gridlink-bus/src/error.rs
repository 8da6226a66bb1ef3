//! Transport error types.

use crate::message::DecodeError;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum BusError {
    #[error("Connection failed: {0}")]
    Connection(String),

    #[error("Publish failed on {channel}: {reason}")]
    Publish { channel: String, reason: String },

    #[error("Subscribe failed: {0}")]
    Subscribe(String),

    /// Undecodable inbound message. Logged and dropped by the dispatcher.
    #[error("Delivery error: {0}")]
    Delivery(#[from] DecodeError),

    #[error("Transport closed")]
    Closed,

    #[error("Redis error: {0}")]
    Redis(#[from] ::redis::RedisError),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

pub type BusResult<T> = Result<T, BusError>;
