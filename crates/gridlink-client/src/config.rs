//! Session configuration.

use std::collections::BTreeSet;
use std::time::Duration;

use gridlink_bus::ChannelLayout;
use gridlink_core::DeviceId;
use serde::{Deserialize, Serialize};
use tracing::Dispatch;

/// Which device selections an aggregator accepts.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(tag = "mode", content = "devices", rename_all = "snake_case")]
pub enum SelectionPolicy {
    /// Every device that selects the aggregator is accepted.
    #[default]
    AcceptAll,
    /// Only the listed devices are accepted; others are ignored.
    AllowList(BTreeSet<DeviceId>),
}

impl SelectionPolicy {
    #[must_use]
    pub fn admits(&self, device: &DeviceId) -> bool {
        match self {
            Self::AcceptAll => true,
            Self::AllowList(allowed) => allowed.contains(device),
        }
    }
}

/// Aggregator session configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AggregatorConfig {
    /// Name sent with CREATE / DELETE.
    #[serde(default = "default_aggregator_name")]
    pub name: String,
    #[serde(default)]
    pub channels: ChannelLayout,
    #[serde(default)]
    pub selection_policy: SelectionPolicy,
    /// Wait for CREATE and DELETE acknowledgments.
    #[serde(default = "default_response_timeout_ms")]
    pub registration_timeout_ms: u64,
    /// Wait for a blocking batch command response.
    #[serde(default = "default_response_timeout_ms")]
    pub command_timeout_ms: u64,
    /// Maximum concurrently running callbacks.
    #[serde(default = "default_max_workers")]
    pub max_workers: usize,
    /// Unanswered fire-and-forget transactions older than this are dropped.
    #[serde(default = "default_expire_after_ms")]
    pub expire_after_ms: u64,
    #[serde(default = "default_sweep_interval_ms")]
    pub sweep_interval_ms: u64,
    /// Subscriber for this session's logs. Falls back to the global default.
    #[serde(skip)]
    pub dispatch: Option<Dispatch>,
}

fn default_aggregator_name() -> String {
    "gridlink-aggregator".to_string()
}

fn default_response_timeout_ms() -> u64 {
    10_000
}

fn default_max_workers() -> usize {
    10
}

fn default_expire_after_ms() -> u64 {
    60_000
}

fn default_sweep_interval_ms() -> u64 {
    5_000
}

impl Default for AggregatorConfig {
    fn default() -> Self {
        Self {
            name: default_aggregator_name(),
            channels: ChannelLayout::default(),
            selection_policy: SelectionPolicy::default(),
            registration_timeout_ms: default_response_timeout_ms(),
            command_timeout_ms: default_response_timeout_ms(),
            max_workers: default_max_workers(),
            expire_after_ms: default_expire_after_ms(),
            sweep_interval_ms: default_sweep_interval_ms(),
            dispatch: None,
        }
    }
}

impl AggregatorConfig {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Self::default()
        }
    }

    #[must_use]
    pub fn with_selection_policy(mut self, policy: SelectionPolicy) -> Self {
        self.selection_policy = policy;
        self
    }

    #[must_use]
    pub fn with_dispatch(mut self, dispatch: Dispatch) -> Self {
        self.dispatch = Some(dispatch);
        self
    }

    #[must_use]
    pub fn with_timeouts(mut self, registration: Duration, command: Duration) -> Self {
        self.registration_timeout_ms = duration_ms(registration);
        self.command_timeout_ms = duration_ms(command);
        self
    }

    pub fn registration_timeout(&self) -> Duration {
        Duration::from_millis(self.registration_timeout_ms)
    }

    pub fn command_timeout(&self) -> Duration {
        Duration::from_millis(self.command_timeout_ms)
    }

    pub fn expire_after(&self) -> Duration {
        Duration::from_millis(self.expire_after_ms)
    }

    pub fn sweep_interval(&self) -> Duration {
        Duration::from_millis(self.sweep_interval_ms)
    }
}

/// Device session configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeviceConfig {
    pub device_id: DeviceId,
    #[serde(default)]
    pub channels: ChannelLayout,
    /// Wait for SELECT / UNSELECT acknowledgments.
    #[serde(default = "default_response_timeout_ms")]
    pub selection_timeout_ms: u64,
    #[serde(default = "default_expire_after_ms")]
    pub expire_after_ms: u64,
    #[serde(default = "default_sweep_interval_ms")]
    pub sweep_interval_ms: u64,
    #[serde(skip)]
    pub dispatch: Option<Dispatch>,
}

impl DeviceConfig {
    pub fn new(device_id: impl Into<DeviceId>) -> Self {
        Self {
            device_id: device_id.into(),
            channels: ChannelLayout::default(),
            selection_timeout_ms: default_response_timeout_ms(),
            expire_after_ms: default_expire_after_ms(),
            sweep_interval_ms: default_sweep_interval_ms(),
            dispatch: None,
        }
    }

    #[must_use]
    pub fn with_dispatch(mut self, dispatch: Dispatch) -> Self {
        self.dispatch = Some(dispatch);
        self
    }

    #[must_use]
    pub fn with_selection_timeout(mut self, timeout: Duration) -> Self {
        self.selection_timeout_ms = duration_ms(timeout);
        self
    }

    pub fn selection_timeout(&self) -> Duration {
        Duration::from_millis(self.selection_timeout_ms)
    }

    pub fn expire_after(&self) -> Duration {
        Duration::from_millis(self.expire_after_ms)
    }

    pub fn sweep_interval(&self) -> Duration {
        Duration::from_millis(self.sweep_interval_ms)
    }
}

fn duration_ms(duration: Duration) -> u64 {
    u64::try_from(duration.as_millis()).unwrap_or(u64::MAX)
}
