//! Channel naming for the simulation's pub/sub topics.

use crate::pattern::escape_glob;
use gridlink_core::{AggregatorHandle, DeviceId};
use serde::{Deserialize, Serialize};

/// Channel names and subscription patterns.
///
/// Templates use `{aggregator_uuid}` / `{device_uuid}` placeholders.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChannelLayout {
    /// CREATE / DELETE commands for aggregators.
    #[serde(default = "default_aggregator_command")]
    pub aggregator_command: String,
    /// Pattern for aggregator CRUD and selection responses.
    #[serde(default = "default_aggregator_response")]
    pub aggregator_response: String,
    /// Pattern for market events across all simulations and aggregators.
    #[serde(default = "default_aggregator_events")]
    pub aggregator_events: String,
    /// Per-aggregator batch command channel.
    #[serde(default = "default_batch_commands")]
    pub batch_commands: String,
    /// Per-device selection command channel.
    #[serde(default = "default_device_command")]
    pub device_command: String,
    /// Per-device selection response channel.
    #[serde(default = "default_device_response")]
    pub device_response: String,
}

fn default_aggregator_command() -> String {
    "crud_aggregator".to_string()
}

fn default_aggregator_response() -> String {
    "crud_aggregator_response".to_string()
}

fn default_aggregator_events() -> String {
    "external-aggregator/*/*/events/all".to_string()
}

// The double slash is what the simulation server listens on.
fn default_batch_commands() -> String {
    "external//aggregator/{aggregator_uuid}/batch_commands".to_string()
}

fn default_device_command() -> String {
    "{device_uuid}/aggregator".to_string()
}

fn default_device_response() -> String {
    "{device_uuid}/response/aggregator".to_string()
}

impl Default for ChannelLayout {
    fn default() -> Self {
        Self {
            aggregator_command: default_aggregator_command(),
            aggregator_response: default_aggregator_response(),
            aggregator_events: default_aggregator_events(),
            batch_commands: default_batch_commands(),
            device_command: default_device_command(),
            device_response: default_device_response(),
        }
    }
}

impl ChannelLayout {
    /// Patterns an aggregator session subscribes to: responses, then events.
    pub fn aggregator_patterns(&self) -> Vec<String> {
        vec![
            self.aggregator_response.clone(),
            self.aggregator_events.clone(),
        ]
    }

    pub fn batch_channel(&self, aggregator: &AggregatorHandle) -> String {
        self.batch_commands
            .replace("{aggregator_uuid}", aggregator.as_str())
    }

    pub fn device_command_channel(&self, device: &DeviceId) -> String {
        self.device_command.replace("{device_uuid}", device.as_str())
    }

    pub fn device_response_channel(&self, device: &DeviceId) -> String {
        self.device_response.replace("{device_uuid}", device.as_str())
    }

    /// Subscription pattern for the device response channel. The device id
    /// is escaped so glob characters in it match literally.
    pub fn device_response_pattern(&self, device: &DeviceId) -> String {
        self.device_response
            .replace("{device_uuid}", &escape_glob(device.as_str()))
    }
}
