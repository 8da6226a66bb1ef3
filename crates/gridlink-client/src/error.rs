//! Client error types.

use std::time::Duration;

use gridlink_bus::BusError;
use gridlink_core::{AggregatorHandle, DeviceId, SessionState, TransactionId};
use thiserror::Error;

/// Failure of a single tracked transaction.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TrackerError {
    #[error("transaction {id} timed out after {timeout:?}")]
    Timeout {
        id: TransactionId,
        timeout: Duration,
    },

    /// Removed by `abandon`, `expire` or `cancel_all` while still awaited.
    #[error("transaction {0} was dropped before a response arrived")]
    Dropped(TransactionId),
}

#[derive(Debug, Error)]
pub enum ClientError {
    #[error("aggregator registration timed out after {0:?}")]
    RegistrationTimeout(Duration),

    #[error("aggregator deregistration timed out after {0:?}")]
    DeregistrationTimeout(Duration),

    #[error("device {device} (un)selecting aggregator {aggregator} timed out after {timeout:?}")]
    SelectionTimeout {
        device: DeviceId,
        aggregator: AggregatorHandle,
        timeout: Duration,
    },

    #[error("batch command {transaction_id} timed out after {timeout:?}")]
    CommandTimeout {
        transaction_id: TransactionId,
        timeout: Duration,
    },

    /// Batch keys that are not in the selected device set.
    #[error("devices not selected by this aggregator: {}", join_ids(.0))]
    DeviceNotSelected(Vec<DeviceId>),

    #[error("session is not registered (state: {0})")]
    NotRegistered(SessionState),

    #[error("session terminated")]
    SessionTerminated,

    #[error("transaction failed: {0}")]
    Transaction(TrackerError),

    #[error("callback pool error: {0}")]
    CallbackPool(String),

    #[error("Transport error: {0}")]
    Bus(#[from] BusError),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl ClientError {
    /// True for the four "the simulation did not answer in time" errors.
    #[must_use]
    pub fn is_communication_timeout(&self) -> bool {
        matches!(
            self,
            Self::RegistrationTimeout(_)
                | Self::DeregistrationTimeout(_)
                | Self::SelectionTimeout { .. }
                | Self::CommandTimeout { .. }
        )
    }
}

fn join_ids(ids: &[DeviceId]) -> String {
    ids.iter()
        .map(DeviceId::as_str)
        .collect::<Vec<_>>()
        .join(", ")
}

pub type ClientResult<T> = Result<T, ClientError>;
