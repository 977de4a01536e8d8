// ── Filter predicates for device snapshots ──
//
// Used by the CLI to narrow a snapshot without touching the engine.

use std::collections::HashSet;
use std::sync::Arc;

use crate::model::{DeviceState, DeviceStatus};

/// Filter predicate for device snapshots.
pub enum DeviceFilter {
    All,
    ByState(DeviceState),
    Online,
    Offline,
    /// Devices reporting `status: error` or a non-empty `errors` list.
    Errored,
    ById(HashSet<String>),
    Custom(Box<dyn Fn(&DeviceStatus) -> bool + Send + Sync>),
}

impl DeviceFilter {
    pub fn matches(&self, device: &DeviceStatus) -> bool {
        match self {
            Self::All => true,
            Self::ByState(state) => device.status == *state,
            Self::Online => device.is_online(),
            Self::Offline => device.status == DeviceState::Offline,
            Self::Errored => {
                device.status == DeviceState::Error
                    || device.errors.as_ref().is_some_and(|e| !e.is_empty())
            }
            Self::ById(ids) => ids.contains(&device.device_id),
            Self::Custom(f) => f(device),
        }
    }

    /// Keep the matching records, preserving order.
    pub fn apply(&self, devices: &[Arc<DeviceStatus>]) -> Vec<Arc<DeviceStatus>> {
        devices.iter().filter(|d| self.matches(d)).cloned().collect()
    }
}
