// ── Device state cache ──
//
// Lock-free concurrent map written only by the engine task and read by
// any number of handles. Records are replaced wholesale; an update that
// is structurally equal to the stored record is not novel.

use std::sync::Arc;

use dashmap::DashMap;
use dashmap::mapref::entry::Entry;

use crate::model::{DeviceStatus, Snapshot};

/// Authoritative `deviceId -> DeviceStatus` map.
#[derive(Debug, Default)]
pub struct DeviceCache {
    records: DashMap<String, Arc<DeviceStatus>>,
}

impl DeviceCache {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    /// Store `record`, replacing any previous record for its id.
    ///
    /// Returns `true` if the cache changed (new id, or different content).
    pub(crate) fn apply(&self, record: DeviceStatus) -> bool {
        match self.records.entry(record.device_id.clone()) {
            Entry::Occupied(mut slot) => {
                if **slot.get() == record {
                    false
                } else {
                    slot.insert(Arc::new(record));
                    true
                }
            }
            Entry::Vacant(slot) => {
                slot.insert(Arc::new(record));
                true
            }
        }
    }

    /// Remove one record. Returns `true` if it existed.
    pub(crate) fn evict(&self, device_id: &str) -> bool {
        self.records.remove(device_id).is_some()
    }

    /// Remove every record whose id fails `keep`. Returns the removed ids.
    pub(crate) fn retain(&self, mut keep: impl FnMut(&str) -> bool) -> Vec<String> {
        let doomed: Vec<String> = self
            .records
            .iter()
            .filter(|r| !keep(r.key()))
            .map(|r| r.key().clone())
            .collect();
        for id in &doomed {
            self.records.remove(id);
        }
        doomed
    }

    /// Remove everything. Returns the removed ids.
    pub(crate) fn clear(&self) -> Vec<String> {
        self.retain(|_| false)
    }

    pub fn get(&self, device_id: &str) -> Option<Arc<DeviceStatus>> {
        self.records.get(device_id).map(|r| Arc::clone(r.value()))
    }

    #[cfg(test)]
    pub fn contains(&self, device_id: &str) -> bool {
        self.records.contains_key(device_id)
    }

    /// All records, sorted by device id.
    pub fn snapshot(&self) -> Snapshot {
        let mut records: Vec<Arc<DeviceStatus>> =
            self.records.iter().map(|r| Arc::clone(r.value())).collect();
        records.sort_by(|a, b| a.device_id.cmp(&b.device_id));
        Arc::new(records)
    }

    #[cfg(test)]
    pub fn len(&self) -> usize {
        self.records.len()
    }

    #[cfg(test)]
    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }
}
