// ── Subscription registry ──
//
// Reference-counts interest per device, and fleet-wide, by distinct
// subscriber id. Only 0→1 and 1→0 transitions matter to the server; the
// registry reports them and the engine turns them into control messages.

use std::collections::{BTreeMap, BTreeSet};

use cablesync_api::WireEvent;
use serde_json::Value;

use crate::model::{Subscription, events};

#[derive(Debug, Default)]
pub(crate) struct SubscriptionRegistry {
    devices: BTreeMap<String, BTreeSet<String>>,
    fleet: BTreeSet<String>,
}

impl SubscriptionRegistry {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    /// Returns `true` on the 0→1 transition for `device_id`.
    pub(crate) fn subscribe(&mut self, device_id: &str, subscriber_id: &str) -> bool {
        let subscribers = self.devices.entry(device_id.to_owned()).or_default();
        let first = subscribers.is_empty();
        subscribers.insert(subscriber_id.to_owned());
        first
    }

    /// Returns `true` on the 1→0 transition. Unknown subscribers are ignored.
    pub(crate) fn unsubscribe(&mut self, device_id: &str, subscriber_id: &str) -> bool {
        let Some(subscribers) = self.devices.get_mut(device_id) else {
            return false;
        };
        if !subscribers.remove(subscriber_id) {
            return false;
        }
        if subscribers.is_empty() {
            self.devices.remove(device_id);
            return true;
        }
        false
    }

    /// Returns `true` when fleet interest goes 0→1.
    pub(crate) fn subscribe_fleet(&mut self, subscriber_id: &str) -> bool {
        let first = self.fleet.is_empty();
        self.fleet.insert(subscriber_id.to_owned());
        first
    }

    /// Returns `true` when fleet interest goes 1→0.
    pub(crate) fn unsubscribe_fleet(&mut self, subscriber_id: &str) -> bool {
        self.fleet.remove(subscriber_id) && self.fleet.is_empty()
    }

    #[cfg(test)]
    pub(crate) fn ref_count(&self, device_id: &str) -> usize {
        self.devices.get(device_id).map_or(0, BTreeSet::len)
    }

    pub(crate) fn fleet_active(&self) -> bool {
        !self.fleet.is_empty()
    }

    /// Whether records for `device_id` belong in the cache.
    pub(crate) fn is_interested(&self, device_id: &str) -> bool {
        self.fleet_active() || self.devices.contains_key(device_id)
    }

    /// Live per-device subscriptions, sorted by device id.
    pub(crate) fn subscriptions(&self) -> Vec<Subscription> {
        self.devices
            .iter()
            .map(|(device_id, subscribers)| Subscription {
                device_id: device_id.clone(),
                ref_count: subscribers.len(),
            })
            .collect()
    }

    /// Control messages that re-establish all current interest on a fresh
    /// connection.
    pub(crate) fn resync(&self) -> Vec<WireEvent> {
        let mut messages: Vec<WireEvent> = self.devices.keys().map(|id| subscribe_device(id)).collect();
        if self.fleet_active() {
            messages.push(WireEvent::bare(events::SUBSCRIBE_DEVICE_UPDATES));
        }
        messages
    }
}

// ── Control messages ─────────────────────────────────────────────────

pub(crate) fn subscribe_device(device_id: &str) -> WireEvent {
    WireEvent::new(events::SUBSCRIBE_DEVICE, Value::String(device_id.to_owned()))
}

pub(crate) fn unsubscribe_device(device_id: &str) -> WireEvent {
    WireEvent::new(events::UNSUBSCRIBE_DEVICE, Value::String(device_id.to_owned()))
}
