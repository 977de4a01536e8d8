// ── Wire models ──
//
// Types exactly as the device server sends them. Field names follow the
// server's camelCase JSON; unknown fields ride along in `extra` so a
// replaced record never loses data the server chose to send.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Reported operational state of a cable device.
#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    Hash,
    Serialize,
    Deserialize,
    strum::Display,
    strum::EnumString,
)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase", ascii_case_insensitive)]
pub enum DeviceState {
    Online,
    Offline,
    Error,
}

/// Status record for a single device.
///
/// Records are compared structurally: two records are the same update
/// only if every field, including `extra`, is equal.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeviceStatus {
    pub device_id: String,

    pub status: DeviceState,

    pub last_seen: DateTime<Utc>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub battery_level: Option<f64>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub signal_strength: Option<f64>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub errors: Option<Vec<String>>,

    /// All remaining fields the server sends.
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl DeviceStatus {
    /// Minimal record with only the required fields set.
    pub fn new(device_id: impl Into<String>, status: DeviceState, last_seen: DateTime<Utc>) -> Self {
        Self {
            device_id: device_id.into(),
            status,
            last_seen,
            battery_level: None,
            signal_strength: None,
            errors: None,
            extra: Map::new(),
        }
    }

    pub fn is_online(&self) -> bool {
        self.status == DeviceState::Online
    }
}

/// A named event with a JSON payload, the unit the transport delivers.
///
/// On the wire each text frame is `{"event": "<name>", "data": <payload>}`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WireEvent {
    pub event: String,
    #[serde(default)]
    pub data: Value,
}

impl WireEvent {
    pub fn new(event: impl Into<String>, data: Value) -> Self {
        Self {
            event: event.into(),
            data,
        }
    }

    /// An event with a `null` payload.
    pub fn bare(event: impl Into<String>) -> Self {
        Self::new(event, Value::Null)
    }
}
