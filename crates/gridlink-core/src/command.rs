//! Per-device command payloads and batches.
//!
//! The client treats command bodies as opaque JSON objects: only the `type`
//! field is required, every other field is forwarded verbatim to the server.

use crate::error::CoreError;
use crate::ids::DeviceId;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::BTreeMap;

/// A single command for one device, e.g. `{"type": "offer", "energy": 10, "rate": 30}`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "Map<String, Value>", into = "Map<String, Value>")]
pub struct CommandPayload {
    fields: Map<String, Value>,
}

impl CommandPayload {
    /// Create a payload with only a `type` field.
    pub fn new(command_type: impl Into<String>) -> Self {
        let mut fields = Map::new();
        fields.insert("type".to_string(), Value::String(command_type.into()));
        Self { fields }
    }

    /// Add or replace a field.
    #[must_use]
    pub fn with_field(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.fields.insert(key.into(), value.into());
        self
    }

    pub fn offer(energy: f64, rate: f64) -> Self {
        Self::new("offer")
            .with_field("energy", energy)
            .with_field("rate", rate)
    }

    pub fn bid(energy: f64, rate: f64) -> Self {
        Self::new("bid")
            .with_field("energy", energy)
            .with_field("rate", rate)
    }

    pub fn list_market_stats() -> Self {
        Self::new("list_market_stats")
    }

    pub fn dso_market_stats() -> Self {
        Self::new("dso_market_stats").with_field("data", Map::new())
    }

    /// Grid fee update: `{"type": "grid_fees", "data": {"fee_const": fee}}`.
    ///
    /// The fee is sent as given, so integer fees stay integers on the wire.
    pub fn grid_fees(fee_const: impl Into<Value>) -> Self {
        let mut data = Map::new();
        data.insert("fee_const".to_string(), fee_const.into());
        Self::new("grid_fees").with_field("data", data)
    }

    /// The `type` field.
    pub fn command_type(&self) -> &str {
        self.fields
            .get("type")
            .and_then(Value::as_str)
            .unwrap_or_default()
    }

    pub fn get(&self, key: &str) -> Option<&Value> {
        self.fields.get(key)
    }
}

impl TryFrom<Map<String, Value>> for CommandPayload {
    type Error = CoreError;

    fn try_from(fields: Map<String, Value>) -> Result<Self, Self::Error> {
        match fields.get("type") {
            Some(Value::String(t)) if !t.is_empty() => Ok(Self { fields }),
            _ => Err(CoreError::InvalidCommand(
                "command payload requires a non-empty string `type`".to_string(),
            )),
        }
    }
}

impl From<CommandPayload> for Map<String, Value> {
    fn from(payload: CommandPayload) -> Self {
        payload.fields
    }
}

/// Commands for several devices, sent as one message.
///
/// Built fresh for each call and never persisted.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct BatchCommand {
    commands: BTreeMap<DeviceId, Vec<CommandPayload>>,
}

impl BatchCommand {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a command to a device's list (order is preserved per device).
    pub fn push(&mut self, device: impl Into<DeviceId>, payload: CommandPayload) {
        self.commands.entry(device.into()).or_default().push(payload);
    }

    #[must_use]
    pub fn with(mut self, device: impl Into<DeviceId>, payload: CommandPayload) -> Self {
        self.push(device, payload);
        self
    }

    pub fn device_ids(&self) -> impl Iterator<Item = &DeviceId> {
        self.commands.keys()
    }

    pub fn commands_for(&self, device: &DeviceId) -> Option<&[CommandPayload]> {
        self.commands.get(device).map(Vec::as_slice)
    }

    /// Number of devices in the batch.
    pub fn len(&self) -> usize {
        self.commands.len()
    }

    pub fn is_empty(&self) -> bool {
        self.commands.is_empty()
    }

    /// Total number of commands across all devices.
    pub fn command_count(&self) -> usize {
        self.commands.values().map(Vec::len).sum()
    }
}
