// ── Domain model ──
//
// Engine-facing types. Device records are the wire type from
// cablesync-api; everything else here is owned by the engine.

mod batch;
mod channel;
mod state;
mod subscription;

pub use batch::{DeviceBatch, Snapshot};
pub use channel::{ChannelDescriptor, ChannelKind, Resource, events};
pub use state::{ConnectionState, GiveUp};
pub use subscription::Subscription;

pub use cablesync_api::{DeviceState, DeviceStatus};
