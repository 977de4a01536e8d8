// Turns status-bearing events into device records.
//
// Only three shapes feed the cache: the bulk `device_status_update`
// array, the single `device_status_changed` record, and
// `device:<id>:status` channels. Everything else is listener-only.

use serde_json::Value;

use crate::error::CoreError;
use crate::model::{DeviceStatus, events};
use crate::router::InboundEvent;

/// Extract device records from `event`.
///
/// Returns `None` when the event does not carry status at all. Bulk
/// elements are validated one by one; bad elements are skipped with a
/// warning and the rest survive.
pub(crate) fn status_records(event: &InboundEvent) -> Option<Result<Vec<DeviceStatus>, CoreError>> {
    match event.name.as_str() {
        events::DEVICE_STATUS_UPDATE => Some(bulk(event)),
        events::DEVICE_STATUS_CHANGED => Some(single(event, event.payload.clone()).map(|r| vec![r])),
        _ => {
            let channel = event.channel.as_ref().filter(|ch| ch.is_status())?;
            Some(channel_record(event, &channel.id).map(|r| vec![r]))
        }
    }
}

fn bulk(event: &InboundEvent) -> Result<Vec<DeviceStatus>, CoreError> {
    let Value::Array(items) = &event.payload else {
        return Err(malformed(event, "expected an array of device records"));
    };

    let mut records = Vec::with_capacity(items.len());
    for (index, item) in items.iter().enumerate() {
        match serde_json::from_value::<DeviceStatus>(item.clone()) {
            Ok(record) => records.push(record),
            Err(e) => tracing::warn!(
                event = %event.name,
                index,
                error = %e,
                "dropping malformed device record"
            ),
        }
    }
    Ok(records)
}

fn single(event: &InboundEvent, payload: Value) -> Result<DeviceStatus, CoreError> {
    serde_json::from_value(payload).map_err(|e| malformed(event, &e.to_string()))
}

/// A channel payload may omit `deviceId`; it then inherits the channel's
/// id. A payload naming a different device is rejected.
fn channel_record(event: &InboundEvent, channel_id: &str) -> Result<DeviceStatus, CoreError> {
    let Value::Object(mut fields) = event.payload.clone() else {
        return Err(malformed(event, "expected a device record object"));
    };

    match fields.get("deviceId") {
        None | Some(Value::Null) => {
            fields.insert("deviceId".into(), Value::String(channel_id.to_owned()));
        }
        Some(Value::String(id)) if id == channel_id => {}
        Some(other) => {
            return Err(malformed(
                event,
                &format!("deviceId {other} does not match channel id {channel_id:?}"),
            ));
        }
    }

    single(event, Value::Object(fields))
}

fn malformed(event: &InboundEvent, reason: &str) -> CoreError {
    CoreError::MalformedPayload {
        event: event.name.clone(),
        reason: reason.to_owned(),
    }
}
