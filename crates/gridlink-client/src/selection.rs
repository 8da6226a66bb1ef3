//! Devices that selected an aggregator.

use std::collections::HashSet;

use gridlink_core::DeviceId;
use parking_lot::RwLock;
use tracing::{debug, info};

use crate::config::SelectionPolicy;

/// Set of selected devices, guarded by the session's selection policy.
///
/// Mutated only by the delivery task; read by batch validation.
#[derive(Debug, Default)]
pub struct SelectedDevices {
    policy: SelectionPolicy,
    devices: RwLock<HashSet<DeviceId>>,
}

impl SelectedDevices {
    #[must_use]
    pub fn new(policy: SelectionPolicy) -> Self {
        Self {
            policy,
            devices: RwLock::new(HashSet::new()),
        }
    }

    /// Add a device if the policy admits it. Returns whether it is selected.
    pub fn select(&self, device: DeviceId) -> bool {
        if !self.policy.admits(&device) {
            debug!(device_uuid = %device, "Selection rejected by policy");
            return false;
        }
        let mut devices = self.devices.write();
        if devices.insert(device.clone()) {
            info!(device_uuid = %device, selected = devices.len(), "Device selected aggregator");
        }
        true
    }

    /// Remove a device. Returns whether it was selected.
    pub fn unselect(&self, device: &DeviceId) -> bool {
        let mut devices = self.devices.write();
        let removed = devices.remove(device);
        if removed {
            info!(device_uuid = %device, selected = devices.len(), "Device unselected aggregator");
        }
        removed
    }

    #[must_use]
    pub fn contains(&self, device: &DeviceId) -> bool {
        self.devices.read().contains(device)
    }

    /// Devices from `candidates` that are not selected, in input order.
    pub fn missing<'a>(&self, candidates: impl IntoIterator<Item = &'a DeviceId>) -> Vec<DeviceId> {
        let devices = self.devices.read();
        candidates
            .into_iter()
            .filter(|device| !devices.contains(*device))
            .cloned()
            .collect()
    }

    /// Sorted copy of the selected devices.
    #[must_use]
    pub fn snapshot(&self) -> Vec<DeviceId> {
        let mut devices: Vec<DeviceId> = self.devices.read().iter().cloned().collect();
        devices.sort();
        devices
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.devices.read().len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.devices.read().is_empty()
    }

    pub fn policy(&self) -> &SelectionPolicy {
        &self.policy
    }
}
