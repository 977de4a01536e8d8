// cablesync-core: Real-time device-state synchronization between the
// device server and any number of local observers.

pub mod config;
pub mod error;
pub mod model;
pub mod router;
pub mod seed;
pub mod stream;

mod connection;
mod engine;
mod store;
mod subscription;

// ── Primary re-exports ──────────────────────────────────────────────
pub use config::{BatchPolicy, EngineConfig, ReconnectPolicy, SeedConfig};
pub use engine::{Observer, SyncEngine};
pub use error::CoreError;
pub use router::{InboundEvent, Listener, ListenerError, ListenerFilter, ListenerId};
pub use seed::{DeviceSource, RestSeed, SeedFuture};
pub use stream::{DeviceFilter, DeviceStream};

// Re-export model types at the crate root for ergonomics.
pub use model::{
    ChannelDescriptor, ChannelKind, ConnectionState, DeviceBatch, DeviceState, DeviceStatus,
    GiveUp, Snapshot, Subscription, events,
};
