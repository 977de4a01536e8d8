//! CLI error types with miette diagnostics.
//!
//! Maps `CoreError` and `ConfigError` into user-facing errors with
//! actionable help text.

use miette::Diagnostic;
use thiserror::Error;

use cablesync_config::ConfigError;
use cablesync_core::{CoreError, GiveUp};

pub mod exit_code {
    pub const GENERAL: i32 = 1;
    pub const USAGE: i32 = 2;
    pub const AUTH: i32 = 3;
    pub const CONNECTION: i32 = 7;
    pub const TIMEOUT: i32 = 8;
}

#[derive(Debug, Error, Diagnostic)]
pub enum CliError {
    // ── Connection ───────────────────────────────────────────────────

    #[error("Could not connect to device server at {url}")]
    #[diagnostic(
        code(cablesync::connection_failed),
        help(
            "Check that the device server is running and reachable.\n\
             URL: {url}\n\
             Try: cablesync watch --insecure"
        )
    )]
    ConnectionFailed {
        url: String,
        #[source]
        source: Box<dyn std::error::Error + Send + Sync>,
    },

    // ── Authentication ───────────────────────────────────────────────

    #[error("Authentication failed: {message}")]
    #[diagnostic(
        code(cablesync::auth_failed),
        help("Verify the token for profile '{profile}' is valid and not expired.")
    )]
    AuthFailed { profile: String, message: String },

    #[error("No token configured for profile '{profile}'")]
    #[diagnostic(
        code(cablesync::no_credentials),
        help(
            "Set token_env or token in the profile, store it in the keyring\n\
             under service 'cablesync' as '{profile}/token', or set CABLESYNC_TOKEN."
        )
    )]
    NoCredentials { profile: String },

    // ── API ──────────────────────────────────────────────────────────

    #[error("API error{}: {message}", fmt_status(*.status))]
    #[diagnostic(code(cablesync::api_error))]
    ApiError { message: String, status: Option<u16> },

    // ── Validation ───────────────────────────────────────────────────

    #[error("Invalid value for {field}: {reason}")]
    #[diagnostic(code(cablesync::validation))]
    Validation { field: String, reason: String },

    // ── Configuration ────────────────────────────────────────────────

    #[error("Profile '{name}' not found in configuration")]
    #[diagnostic(
        code(cablesync::profile_not_found),
        help("Available profiles: {available}")
    )]
    ProfileNotFound { name: String, available: String },

    #[error("Configuration file not found")]
    #[diagnostic(
        code(cablesync::no_config),
        help(
            "Create a profile in {path}\n\
             or pass --server (and --api-url for the device list)."
        )
    )]
    NoConfig { path: String },

    #[error(transparent)]
    #[diagnostic(code(cablesync::config))]
    Config(ConfigError),

    // ── Timeout ──────────────────────────────────────────────────────

    #[error("Request timed out after {millis}ms")]
    #[diagnostic(
        code(cablesync::timeout),
        help("Increase timeout with --timeout or check server responsiveness.")
    )]
    Timeout { millis: u64 },

    // ── Internal ─────────────────────────────────────────────────────

    #[error("{0}")]
    #[diagnostic(code(cablesync::internal))]
    Internal(String),
}

fn fmt_status(status: Option<u16>) -> String {
    status.map_or_else(String::new, |s| format!(" (HTTP {s})"))
}

impl CliError {
    /// Map this error to an exit code for process termination.
    pub fn exit_code(&self) -> i32 {
        match self {
            Self::ConnectionFailed { .. } => exit_code::CONNECTION,
            Self::AuthFailed { .. } | Self::NoCredentials { .. } => exit_code::AUTH,
            Self::Timeout { .. } => exit_code::TIMEOUT,
            Self::Validation { .. } | Self::NoConfig { .. } | Self::ProfileNotFound { .. } => {
                exit_code::USAGE
            }
            _ => exit_code::GENERAL,
        }
    }

    /// Translate the engine's terminal state into an error.
    pub fn from_give_up(reason: GiveUp, url: &str, profile: &str) -> Self {
        match reason {
            GiveUp::AuthMissing => Self::NoCredentials {
                profile: profile.into(),
            },
            GiveUp::MaxAttemptsExceeded { attempts } => Self::ConnectionFailed {
                url: url.into(),
                source: format!("gave up after {attempts} attempts").into(),
            },
            GiveUp::Unrecoverable { reason } => Self::Validation {
                field: "connection".into(),
                reason,
            },
        }
    }
}

// ── ConfigError → CliError mapping ───────────────────────────────────

impl From<ConfigError> for CliError {
    fn from(err: ConfigError) -> Self {
        match err {
            ConfigError::Validation { field, reason } => Self::Validation { field, reason },
            other => Self::Config(other),
        }
    }
}

// ── CoreError → CliError mapping ─────────────────────────────────────

impl From<CoreError> for CliError {
    fn from(err: CoreError) -> Self {
        match err {
            CoreError::ConnectionFailed { url, reason } => Self::ConnectionFailed {
                url,
                source: reason.into(),
            },

            CoreError::AuthenticationFailed { message } => Self::AuthFailed {
                profile: "current".into(),
                message,
            },

            CoreError::Timeout { timeout_ms } => Self::Timeout { millis: timeout_ms },

            CoreError::Api { message, status } => Self::ApiError { message, status },

            CoreError::Config { message } => Self::Validation {
                field: "config".into(),
                reason: message,
            },

            CoreError::MalformedPayload { event, reason } => Self::ApiError {
                message: format!("malformed '{event}' payload: {reason}"),
                status: None,
            },

            CoreError::Internal(message) => Self::Internal(message),

            CoreError::EngineStopped => Self::Internal("sync engine stopped".into()),
        }
    }
}
