// cablesync-api: Wire-level client for the cable device server (websocket events + REST seed)

pub mod error;
pub mod models;
pub mod rest;
pub mod transport;
pub mod websocket;

pub use error::Error;
pub use models::{DeviceState, DeviceStatus, WireEvent};
pub use rest::DeviceApi;
pub use transport::{TlsMode, TransportConfig};
pub use websocket::{Connection, Connector, WsConnector};
