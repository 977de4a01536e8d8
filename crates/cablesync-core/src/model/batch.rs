use std::sync::Arc;

use cablesync_api::DeviceStatus;

/// Point-in-time view of every cached device, sorted by device id.
pub type Snapshot = Arc<Vec<Arc<DeviceStatus>>>;

/// One observer notification.
///
/// Carries the full snapshot as of the flush, so observers never need to
/// merge deltas, plus the ids that changed since the previous
/// notification. An id in `changed` that is absent from `devices` was
/// evicted.
#[derive(Debug, Clone)]
pub struct DeviceBatch {
    pub devices: Snapshot,
    /// Sorted, deduplicated.
    pub changed: Vec<String>,
}

impl DeviceBatch {
    pub fn device(&self, device_id: &str) -> Option<&Arc<DeviceStatus>> {
        self.devices
            .binary_search_by(|d| d.device_id.as_str().cmp(device_id))
            .ok()
            .and_then(|idx| self.devices.get(idx))
    }

    /// Changed ids that no longer have a record.
    pub fn evicted(&self) -> impl Iterator<Item = &str> {
        self.changed
            .iter()
            .map(String::as_str)
            .filter(|id| self.device(id).is_none())
    }
}
