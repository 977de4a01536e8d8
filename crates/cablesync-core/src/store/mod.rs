// ── Device state store ──
//
// The authoritative `deviceId -> DeviceStatus` cache, the batcher that
// paces change notifications, and the payload decoder feeding both.

mod batcher;
mod cache;
pub(crate) mod decode;

pub(crate) use batcher::UpdateBatcher;
pub use cache::DeviceCache;
