//! Command handlers: bridge CLI args -> core engine -> output formatting.

pub mod config_cmd;
pub mod devices;
pub mod watch;
