//! Configuration for the cablesync CLI and other embedders.
//!
//! TOML profiles, token resolution (env var + keyring + plaintext), and
//! translation to `cablesync_core::EngineConfig`. The CLI layers its own
//! flag overrides on top.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

use cablesync_api::{TlsMode, TransportConfig};
use cablesync_core::{BatchPolicy, EngineConfig, ReconnectPolicy, SeedConfig};
use directories::ProjectDirs;
use figment::{
    Figment,
    providers::{Env, Format, Serialized, Toml},
};
use secrecy::SecretString;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use url::Url;

/// Keyring service name; entries are `<profile>/token`.
pub const KEYRING_SERVICE: &str = "cablesync";

/// Prefix for environment overrides, e.g. `CABLESYNC_DEFAULTS__TIMEOUT`.
pub const ENV_PREFIX: &str = "CABLESYNC_";

// ── Error ───────────────────────────────────────────────────────────

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("invalid {field}: {reason}")]
    Validation { field: String, reason: String },

    #[error("profile '{name}' not found in config")]
    ProfileNotFound { name: String },

    #[error("failed to serialize config: {0}")]
    Serialization(#[from] toml::ser::Error),

    #[error("config loading failed: {0}")]
    Figment(Box<figment::Error>),
}

impl From<figment::Error> for ConfigError {
    fn from(err: figment::Error) -> Self {
        Self::Figment(Box::new(err))
    }
}

// ── TOML config structs ─────────────────────────────────────────────

/// Top-level TOML configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct Config {
    /// Default profile name.
    pub default_profile: Option<String>,

    /// Global defaults.
    #[serde(default)]
    pub defaults: Defaults,

    /// Named device-server profiles.
    #[serde(default)]
    pub profiles: HashMap<String, Profile>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            default_profile: Some("default".into()),
            defaults: Defaults::default(),
            profiles: HashMap::new(),
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct Defaults {
    #[serde(default = "default_output")]
    pub output: String,

    #[serde(default = "default_color")]
    pub color: String,

    #[serde(default)]
    pub insecure: bool,

    /// HTTP timeout in seconds.
    #[serde(default = "default_timeout")]
    pub timeout: u64,

    #[serde(default = "default_debounce_ms")]
    pub debounce_ms: u64,

    #[serde(default = "default_throttle_ms")]
    pub throttle_ms: u64,
}

impl Default for Defaults {
    fn default() -> Self {
        Self {
            output: default_output(),
            color: default_color(),
            insecure: false,
            timeout: default_timeout(),
            debounce_ms: default_debounce_ms(),
            throttle_ms: default_throttle_ms(),
        }
    }
}

fn default_output() -> String {
    "table".into()
}
fn default_color() -> String {
    "auto".into()
}
fn default_timeout() -> u64 {
    30
}
fn default_debounce_ms() -> u64 {
    100
}
fn default_throttle_ms() -> u64 {
    5000
}

/// A named device-server profile.
#[derive(Debug, Default, Clone, Deserialize, Serialize)]
pub struct Profile {
    /// Websocket endpoint (e.g., "wss://console.local/socket").
    pub server: String,

    /// REST base URL used to seed the device list (e.g., "https://console.local/api").
    pub api_url: Option<String>,

    /// Bearer token (plaintext; prefer keyring or env var).
    pub token: Option<String>,

    /// Environment variable name containing the token.
    pub token_env: Option<String>,

    /// Path to custom CA certificate.
    pub ca_cert: Option<PathBuf>,

    /// Override insecure TLS setting.
    pub insecure: Option<bool>,

    /// Override HTTP timeout (seconds).
    pub timeout: Option<u64>,

    pub debounce_ms: Option<u64>,
    pub throttle_ms: Option<u64>,
    pub reconnect_base_ms: Option<u64>,
    pub reconnect_max_ms: Option<u64>,
    pub reconnect_attempts: Option<u32>,
}

impl Config {
    /// Pick the profile named `name`, else the configured default.
    pub fn profile(&self, name: Option<&str>) -> Result<(String, &Profile), ConfigError> {
        let name = name
            .map(str::to_owned)
            .or_else(|| self.default_profile.clone())
            .unwrap_or_else(|| "default".into());
        let profile = self
            .profiles
            .get(&name)
            .ok_or_else(|| ConfigError::ProfileNotFound { name: name.clone() })?;
        Ok((name, profile))
    }

    /// Render as TOML with every plaintext token masked.
    pub fn to_redacted_toml(&self) -> Result<String, ConfigError> {
        let mut redacted = self.clone();
        for profile in redacted.profiles.values_mut() {
            if profile.token.is_some() {
                profile.token = Some("********".into());
            }
        }
        Ok(toml::to_string_pretty(&redacted)?)
    }
}

// ── Config file path ────────────────────────────────────────────────

/// Resolve the config file path via XDG / platform conventions.
pub fn config_path() -> PathBuf {
    ProjectDirs::from("dev", "cablesync", "cablesync").map_or_else(
        || {
            let mut p = dirs_fallback();
            p.push("config.toml");
            p
        },
        |dirs| dirs.config_dir().join("config.toml"),
    )
}

fn dirs_fallback() -> PathBuf {
    let mut p = PathBuf::from(std::env::var("HOME").unwrap_or_else(|_| ".".into()));
    p.push(".config");
    p.push("cablesync");
    p
}

// ── Config loading ──────────────────────────────────────────────────

/// Load the full Config from the canonical file + environment.
pub fn load_config() -> Result<Config, ConfigError> {
    load_config_from(&config_path())
}

/// Load from an explicit file path + environment. A missing file yields
/// the defaults.
pub fn load_config_from(path: &Path) -> Result<Config, ConfigError> {
    let figment = Figment::new()
        .merge(Serialized::defaults(Config::default()))
        .merge(Toml::file(path))
        .merge(Env::prefixed(ENV_PREFIX).split("__"));

    let config: Config = figment.extract()?;
    Ok(config)
}

/// Load config, returning a default if loading fails.
pub fn load_config_or_default() -> Config {
    load_config().unwrap_or_default()
}

// ── Token resolution ────────────────────────────────────────────────

/// Resolve the bearer token: `token_env` variable, then the system
/// keyring, then plaintext. `None` is not an error here; the engine
/// reports a missing token when it tries to connect.
pub fn resolve_token(profile: &Profile, profile_name: &str) -> Option<SecretString> {
    // 1. Profile's token_env → env var lookup
    if let Some(ref env_name) = profile.token_env {
        if let Ok(val) = std::env::var(env_name) {
            return Some(SecretString::from(val));
        }
    }

    // 2. System keyring
    if let Ok(entry) = keyring::Entry::new(KEYRING_SERVICE, &format!("{profile_name}/token")) {
        if let Ok(secret) = entry.get_password() {
            return Some(SecretString::from(secret));
        }
    }

    // 3. Plaintext in config
    profile.token.clone().map(SecretString::from)
}

// ── Translation to EngineConfig ─────────────────────────────────────

/// Build an `EngineConfig` from a profile and the global defaults.
///
/// The token is resolved through [`resolve_token`]; callers with their
/// own override (e.g. a CLI flag) can replace it afterwards.
pub fn profile_to_engine_config(
    profile: &Profile,
    profile_name: &str,
    defaults: &Defaults,
) -> Result<EngineConfig, ConfigError> {
    let endpoint = parse_url("server", &profile.server, &["ws", "wss"])?;

    let insecure = profile.insecure.unwrap_or(defaults.insecure);
    let tls = if insecure {
        TlsMode::DangerAcceptInvalid
    } else if let Some(ref ca_path) = profile.ca_cert {
        TlsMode::CustomCa(ca_path.clone())
    } else {
        TlsMode::System
    };
    let timeout = Duration::from_secs(profile.timeout.unwrap_or(defaults.timeout));

    let seed = profile
        .api_url
        .as_deref()
        .map(|raw| parse_url("api_url", raw, &["http", "https"]))
        .transpose()?
        .map(|api_url| SeedConfig {
            api_url,
            transport: TransportConfig {
                tls: tls.clone(),
                timeout,
            },
        });

    let reconnect_defaults = ReconnectPolicy::default();
    let reconnect = ReconnectPolicy {
        base_delay: profile
            .reconnect_base_ms
            .map_or(reconnect_defaults.base_delay, Duration::from_millis),
        max_delay: profile
            .reconnect_max_ms
            .map_or(reconnect_defaults.max_delay, Duration::from_millis),
        max_attempts: profile
            .reconnect_attempts
            .unwrap_or(reconnect_defaults.max_attempts),
    };
    if reconnect.max_attempts == 0 {
        return Err(ConfigError::Validation {
            field: "reconnect_attempts".into(),
            reason: "must be at least 1".into(),
        });
    }
    if reconnect.max_delay < reconnect.base_delay {
        return Err(ConfigError::Validation {
            field: "reconnect_max_ms".into(),
            reason: "must not be below reconnect_base_ms".into(),
        });
    }

    let batch = BatchPolicy {
        debounce: Duration::from_millis(profile.debounce_ms.unwrap_or(defaults.debounce_ms)),
        throttle: Duration::from_millis(profile.throttle_ms.unwrap_or(defaults.throttle_ms)),
    };

    let mut config = EngineConfig::new(endpoint);
    config.token = resolve_token(profile, profile_name);
    config.reconnect = reconnect;
    config.batch = batch;
    config.handshake_timeout = timeout.min(Duration::from_secs(10));
    config.tls = tls;
    config.seed = seed;
    Ok(config)
}

fn parse_url(field: &str, raw: &str, schemes: &[&str]) -> Result<Url, ConfigError> {
    let url: Url = raw.parse().map_err(|_| ConfigError::Validation {
        field: field.into(),
        reason: format!("invalid URL: {raw}"),
    })?;
    if !schemes.contains(&url.scheme()) {
        return Err(ConfigError::Validation {
            field: field.into(),
            reason: format!("expected {} URL, got '{}'", schemes.join("/"), url.scheme()),
        });
    }
    Ok(url)
}
