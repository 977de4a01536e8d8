// ── Core error types ──
//
// Domain errors from cablesync-core. Consumers never see raw HTTP or
// websocket failures; the `From<cablesync_api::Error>` impl translates
// transport errors into the variants below.

use thiserror::Error;

/// Unified error type for the core crate.
#[derive(Debug, Error)]
pub enum CoreError {
    // ── Connection errors ────────────────────────────────────────────
    #[error("Cannot connect to device server at {url}: {reason}")]
    ConnectionFailed { url: String, reason: String },

    #[error("Authentication failed: {message}")]
    AuthenticationFailed { message: String },

    #[error("Device server timed out after {timeout_ms}ms")]
    Timeout { timeout_ms: u64 },

    // ── Data errors ──────────────────────────────────────────────────
    #[error("Malformed `{event}` payload: {reason}")]
    MalformedPayload { event: String, reason: String },

    // ── API errors (wrapped, not exposed raw) ────────────────────────
    #[error("API error: {message}")]
    Api {
        message: String,
        /// HTTP status code (if applicable).
        status: Option<u16>,
    },

    // ── Configuration errors ─────────────────────────────────────────
    #[error("Configuration error: {message}")]
    Config { message: String },

    // ── Engine lifecycle ─────────────────────────────────────────────
    #[error("Sync engine has stopped")]
    EngineStopped,

    #[error("Internal error: {0}")]
    Internal(String),
}

impl CoreError {
    /// Whether a failed connection attempt with this error is worth retrying.
    ///
    /// Credentials the server explicitly rejected will be rejected again, but
    /// the retry budget still bounds the attempts, so only local
    /// misconfiguration short-circuits.
    pub fn is_retryable(&self) -> bool {
        !matches!(self, Self::Config { .. })
    }
}

// ── Conversion from transport-layer errors ───────────────────────────

impl From<cablesync_api::Error> for CoreError {
    fn from(err: cablesync_api::Error) -> Self {
        use cablesync_api::Error as Api;

        match err {
            Api::HandshakeRejected { message } => CoreError::AuthenticationFailed { message },
            Api::Unauthorized { status } => CoreError::AuthenticationFailed {
                message: format!("server returned HTTP {status}"),
            },
            Api::InvalidToken(reason) => CoreError::Config {
                message: format!("Invalid token: {reason}"),
            },
            Api::HandshakeTimeout { timeout_ms } => CoreError::Timeout { timeout_ms },
            Api::Transport(ref e) => {
                if e.is_timeout() {
                    CoreError::Timeout { timeout_ms: 0 }
                } else if e.is_connect() {
                    CoreError::ConnectionFailed {
                        url: e.url().map_or_else(|| "<unknown>".into(), ToString::to_string),
                        reason: e.to_string(),
                    }
                } else {
                    CoreError::Api {
                        message: e.to_string(),
                        status: e.status().map(|s| s.as_u16()),
                    }
                }
            }
            Api::InvalidUrl(e) => CoreError::Config {
                message: format!("Invalid URL: {e}"),
            },
            Api::Tls(msg) => CoreError::Config {
                message: format!("TLS setup failed: {msg}"),
            },
            Api::Api { message } => CoreError::Api {
                message,
                status: None,
            },
            Api::WebSocketConnect(reason) => CoreError::ConnectionFailed {
                url: String::new(),
                reason: format!("WebSocket connection failed: {reason}"),
            },
            Api::WebSocketClosed { code, reason } => CoreError::ConnectionFailed {
                url: String::new(),
                reason: format!("WebSocket closed (code {code}): {reason}"),
            },
            Api::Deserialization { message, body: _ } => {
                CoreError::Internal(format!("Deserialization error: {message}"))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn handshake_rejection_is_auth_failure() {
        let err = CoreError::from(cablesync_api::Error::HandshakeRejected {
            message: "bad token".into(),
        });
        assert!(matches!(err, CoreError::AuthenticationFailed { ref message } if message == "bad token"));
        assert!(err.is_retryable());
    }

    #[test]
    fn invalid_token_is_not_retryable() {
        let err = CoreError::from(cablesync_api::Error::InvalidToken("newline".into()));
        assert!(matches!(err, CoreError::Config { .. }));
        assert!(!err.is_retryable());
    }

    #[test]
    fn unusable_ca_is_not_retryable() {
        let err = CoreError::from(cablesync_api::Error::Tls("failed to read CA cert".into()));
        assert!(matches!(err, CoreError::Config { .. }));
        assert!(!err.is_retryable());
    }

    #[test]
    fn closed_socket_keeps_code_in_reason() {
        let err = CoreError::from(cablesync_api::Error::WebSocketClosed {
            code: 1011,
            reason: "restart".into(),
        });
        assert_eq!(
            err.to_string(),
            "Cannot connect to device server at : WebSocket closed (code 1011): restart"
        );
    }
}
