//! Core domain types for the gridlink energy-market client.
//!
//! This crate provides the identifiers and payload types shared by the
//! transport, the correlation engine and the REST collaborator:
//! - `TransactionId`: Correlation token for one outbound command
//! - `AggregatorHandle`, `DeviceId`: Server-side identities
//! - `CommandPayload`, `BatchCommand`: Opaque per-device command lists
//! - `SessionState`: Aggregator session lifecycle

pub mod command;
pub mod error;
pub mod ids;
pub mod session;

pub use command::{BatchCommand, CommandPayload};
pub use error::{CoreError, Result};
pub use ids::{AggregatorHandle, DeviceId, TransactionId};
pub use session::SessionState;
