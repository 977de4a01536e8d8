// ── Runtime configuration for the sync engine ──
//
// These types describe *how* to connect and pace notifications. They are
// constructed by the CLI (from cablesync-config profiles) or directly by
// embedders. This crate never reads config files.

use std::time::Duration;

use cablesync_api::{TlsMode, TransportConfig};
use secrecy::SecretString;
use url::Url;

/// Retry schedule for the single server connection.
///
/// After the Nth consecutive failure (N starting at 1) the next attempt
/// waits `min(base_delay × N, max_delay)`. After `max_attempts`
/// consecutive failures the engine stops retrying.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReconnectPolicy {
    pub base_delay: Duration,
    pub max_delay: Duration,
    pub max_attempts: u32,
}

impl Default for ReconnectPolicy {
    fn default() -> Self {
        Self {
            base_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(30),
            max_attempts: 5,
        }
    }
}

impl ReconnectPolicy {
    /// Delay before retrying after `failures` consecutive failures.
    pub fn delay_for(&self, failures: u32) -> Duration {
        self.base_delay
            .saturating_mul(failures.max(1))
            .min(self.max_delay)
    }

    /// Whether `failures` consecutive failures exhaust the budget.
    pub fn exhausted(&self, failures: u32) -> bool {
        failures >= self.max_attempts
    }
}

/// Pacing for observer notifications.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BatchPolicy {
    /// Quiet period that must elapse after the last update of interest,
    /// repeated or not.
    pub debounce: Duration,
    /// Minimum interval between two notifications. Also the longest a
    /// batch waits under a continuous stream.
    pub throttle: Duration,
}

impl Default for BatchPolicy {
    fn default() -> Self {
        Self {
            debounce: Duration::from_millis(100),
            throttle: Duration::from_secs(5),
        }
    }
}

/// Where to fetch the initial device list after each handshake.
#[derive(Debug, Clone)]
pub struct SeedConfig {
    /// REST base URL; `GET {api_url}/devices` is requested.
    pub api_url: Url,
    pub transport: TransportConfig,
}

/// Everything the engine needs to reach one device server.
#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// Websocket endpoint, e.g. `wss://console.local/socket`.
    pub endpoint: Url,
    /// Bearer token presented in the handshake. `None` makes `connect`
    /// fail fast with `AuthMissing`.
    pub token: Option<SecretString>,
    pub reconnect: ReconnectPolicy,
    pub batch: BatchPolicy,
    pub handshake_timeout: Duration,
    /// Certificate verification for a `wss://` endpoint.
    pub tls: TlsMode,
    /// Optional REST seed, fetched on every successful handshake.
    pub seed: Option<SeedConfig>,
}

impl EngineConfig {
    /// Config with default pacing and no token or seed.
    pub fn new(endpoint: Url) -> Self {
        Self {
            endpoint,
            token: None,
            reconnect: ReconnectPolicy::default(),
            batch: BatchPolicy::default(),
            handshake_timeout: Duration::from_secs(10),
            tls: TlsMode::System,
            seed: None,
        }
    }

    pub fn with_token(mut self, token: impl Into<String>) -> Self {
        self.token = Some(SecretString::from(token.into()));
        self
    }
}
