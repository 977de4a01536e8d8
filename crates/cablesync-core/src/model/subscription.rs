use serde::Serialize;

/// Interest in one device, shared by `ref_count` distinct subscribers.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Subscription {
    pub device_id: String,
    pub ref_count: usize,
}
