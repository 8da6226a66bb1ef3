//! Pub/sub message types.
//!
//! Inbound payloads are decoded exactly once, at the dispatcher boundary,
//! into the tagged [`Event`] type. Outbound commands are built from
//! [`OutboundMessage`].

use gridlink_core::{AggregatorHandle, BatchCommand, DeviceId, TransactionId};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;

/// Status value the server sends when a device selects an aggregator.
pub const STATUS_SELECTED: &str = "SELECTED";
/// Status value the server sends when a device unselects an aggregator.
pub const STATUS_UNSELECTED: &str = "UNSELECTED";

// ============================================================================
// Outbound
// ============================================================================

/// Commands published by aggregator and device sessions.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type")]
pub enum OutboundMessage {
    /// Register a new aggregator.
    #[serde(rename = "CREATE")]
    Create {
        name: String,
        transaction_id: TransactionId,
    },
    /// Deregister an aggregator.
    #[serde(rename = "DELETE")]
    Delete {
        name: String,
        aggregator_uuid: AggregatorHandle,
        transaction_id: TransactionId,
    },
    /// Per-device command lists on behalf of selected devices.
    #[serde(rename = "BATCHED")]
    Batched {
        transaction_id: TransactionId,
        aggregator_uuid: AggregatorHandle,
        batch_commands: BatchCommand,
    },
    /// Device opts into an aggregator.
    #[serde(rename = "SELECT")]
    Select {
        aggregator_uuid: AggregatorHandle,
        device_uuid: DeviceId,
        transaction_id: TransactionId,
    },
    /// Device opts out of an aggregator.
    #[serde(rename = "UNSELECT")]
    Unselect {
        aggregator_uuid: AggregatorHandle,
        device_uuid: DeviceId,
        transaction_id: TransactionId,
    },
}

impl OutboundMessage {
    pub fn transaction_id(&self) -> &TransactionId {
        match self {
            Self::Create { transaction_id, .. }
            | Self::Delete { transaction_id, .. }
            | Self::Batched { transaction_id, .. }
            | Self::Select { transaction_id, .. }
            | Self::Unselect { transaction_id, .. } => transaction_id,
        }
    }

    /// Wire name of the command (`CREATE`, `BATCHED`, ...).
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Create { .. } => "CREATE",
            Self::Delete { .. } => "DELETE",
            Self::Batched { .. } => "BATCHED",
            Self::Select { .. } => "SELECT",
            Self::Unselect { .. } => "UNSELECT",
        }
    }

    pub fn to_json(&self) -> serde_json::Result<String> {
        serde_json::to_string(self)
    }
}

// ============================================================================
// Inbound
// ============================================================================

/// Why an inbound payload was dropped.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DecodeError {
    /// Not valid JSON, or a known field has the wrong type.
    #[error("malformed payload: {0}")]
    Malformed(String),
    /// Valid JSON that matches no known message shape.
    #[error("unrecognized payload: {0}")]
    Unrecognized(String),
}

impl DecodeError {
    /// Short label for logs and metrics.
    pub fn reason(&self) -> &'static str {
        match self {
            Self::Malformed(_) => "malformed",
            Self::Unrecognized(_) => "unrecognized",
        }
    }
}

/// Fields the dispatcher inspects before choosing a variant.
#[derive(Debug, Deserialize)]
struct Envelope {
    #[serde(default)]
    event: Option<String>,
    #[serde(default, rename = "type")]
    command: Option<String>,
    #[serde(default)]
    transaction_id: Option<TransactionId>,
    #[serde(default)]
    status: Option<String>,
    #[serde(default)]
    device_uuid: Option<DeviceId>,
    #[serde(default)]
    aggregator_uuid: Option<AggregatorHandle>,
}

/// Body of an event that is handed to user callbacks as-is.
#[derive(Debug, Clone, PartialEq)]
pub struct EventPayload {
    pub transaction_id: Option<TransactionId>,
    pub body: Value,
}

impl EventPayload {
    pub fn get(&self, key: &str) -> Option<&Value> {
        self.body.get(key)
    }
}

/// A new market slot was opened for the aggregator's devices.
#[derive(Debug, Clone, PartialEq)]
pub struct MarketCycle {
    pub transaction_id: Option<TransactionId>,
    /// Full event body, including `content`.
    pub body: Value,
}

impl MarketCycle {
    /// Per-area market info entries.
    pub fn content(&self) -> &[Value] {
        self.body
            .get("content")
            .and_then(Value::as_array)
            .map(Vec::as_slice)
            .unwrap_or_default()
    }

    /// Area ids mentioned in `content`, skipping entries without one.
    pub fn area_ids(&self) -> Vec<DeviceId> {
        self.content()
            .iter()
            .filter_map(|entry| entry.get("area_uuid").and_then(Value::as_str))
            .map(DeviceId::from)
            .collect()
    }
}

/// Device selection or unselection notice.
#[derive(Debug, Clone, PartialEq)]
pub struct SelectionNotice {
    pub transaction_id: Option<TransactionId>,
    pub device: DeviceId,
    /// Aggregator the device (un)selected, when the server names it.
    pub aggregator: Option<AggregatorHandle>,
    pub body: Value,
}

/// Acknowledgment of a command (CREATE, DELETE, SELECT, ...).
#[derive(Debug, Clone, PartialEq)]
pub struct CommandResponse {
    pub transaction_id: Option<TransactionId>,
    /// The `type` field, e.g. `CREATE`.
    pub command: Option<String>,
    pub status: Option<String>,
    pub aggregator: Option<AggregatorHandle>,
    pub body: Value,
}

/// A decoded inbound message.
#[derive(Debug, Clone, PartialEq)]
pub enum Event {
    MarketCycle(MarketCycle),
    Finish(EventPayload),
    BatchResponse(EventPayload),
    Selection(SelectionNotice),
    Unselection(SelectionNotice),
    CommandResponse(CommandResponse),
}

impl Event {
    /// Transaction id carried by the message, if any.
    pub fn transaction_id(&self) -> Option<&TransactionId> {
        match self {
            Self::MarketCycle(e) => e.transaction_id.as_ref(),
            Self::Finish(e) | Self::BatchResponse(e) => e.transaction_id.as_ref(),
            Self::Selection(e) | Self::Unselection(e) => e.transaction_id.as_ref(),
            Self::CommandResponse(e) => e.transaction_id.as_ref(),
        }
    }

    /// Raw JSON body.
    pub fn body(&self) -> &Value {
        match self {
            Self::MarketCycle(e) => &e.body,
            Self::Finish(e) | Self::BatchResponse(e) => &e.body,
            Self::Selection(e) | Self::Unselection(e) => &e.body,
            Self::CommandResponse(e) => &e.body,
        }
    }

    /// Short label for logs and metrics.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::MarketCycle(_) => "market",
            Self::Finish(_) => "finish",
            Self::BatchResponse(_) => "batch_response",
            Self::Selection(_) => "selection",
            Self::Unselection(_) => "unselection",
            Self::CommandResponse(_) => "command_response",
        }
    }
}

/// Decode a raw pub/sub payload.
///
/// Precedence: an `event` field selects an event variant; otherwise a
/// `SELECTED`/`UNSELECTED` status naming a device is a selection notice; otherwise a
/// `BATCHED` type is a batch response; otherwise anything carrying a
/// transaction id is a generic command response.
pub fn decode_event(payload: &[u8]) -> Result<Event, DecodeError> {
    let body: Value =
        serde_json::from_slice(payload).map_err(|e| DecodeError::Malformed(e.to_string()))?;

    if !body.is_object() {
        return Err(DecodeError::Unrecognized(
            "payload is not a JSON object".to_string(),
        ));
    }

    let envelope: Envelope = serde_json::from_value(body.clone())
        .map_err(|e| DecodeError::Malformed(e.to_string()))?;

    if let Some(event) = envelope.event.as_deref() {
        let transaction_id = envelope.transaction_id;
        return match event {
            "market" => Ok(Event::MarketCycle(MarketCycle {
                transaction_id,
                body,
            })),
            "finish" => Ok(Event::Finish(EventPayload {
                transaction_id,
                body,
            })),
            "batch_response" => Ok(Event::BatchResponse(EventPayload {
                transaction_id,
                body,
            })),
            other => Err(DecodeError::Unrecognized(format!("event type {other:?}"))),
        };
    }

    // A bare acknowledgment without device_uuid still correlates by
    // transaction id below.
    if let Some(status @ (STATUS_SELECTED | STATUS_UNSELECTED)) = envelope.status.as_deref() {
        if let Some(device) = envelope.device_uuid {
            let notice = SelectionNotice {
                transaction_id: envelope.transaction_id,
                device,
                aggregator: envelope.aggregator_uuid,
                body,
            };
            return Ok(if status == STATUS_SELECTED {
                Event::Selection(notice)
            } else {
                Event::Unselection(notice)
            });
        }
    }

    if envelope.command.as_deref() == Some("BATCHED") {
        return Ok(Event::BatchResponse(EventPayload {
            transaction_id: envelope.transaction_id,
            body,
        }));
    }

    if envelope.transaction_id.is_some() {
        return Ok(Event::CommandResponse(CommandResponse {
            transaction_id: envelope.transaction_id,
            command: envelope.command,
            status: envelope.status,
            aggregator: envelope.aggregator_uuid,
            body,
        }));
    }

    Err(DecodeError::Unrecognized(
        "no event, status or transaction_id".to_string(),
    ))
}
