use thiserror::Error;

/// Top-level error type for the `cablesync-api` crate.
///
/// Covers every failure mode of the wire layer: websocket connect and
/// handshake, HTTP transport, the REST envelope, and payload decoding.
/// `cablesync-core` maps these into domain errors.
#[derive(Debug, Error)]
pub enum Error {
    // ── Authentication ──────────────────────────────────────────────
    /// The server answered the auth handshake with `connect_error`.
    #[error("Handshake rejected: {message}")]
    HandshakeRejected { message: String },

    /// No `connect` ack arrived before the handshake deadline.
    #[error("Handshake timed out after {timeout_ms}ms")]
    HandshakeTimeout { timeout_ms: u64 },

    /// The token cannot be carried in a request header.
    #[error("Invalid token: {0}")]
    InvalidToken(String),

    /// The REST API refused the bearer token.
    #[error("Unauthorized (HTTP {status})")]
    Unauthorized { status: u16 },

    // ── Transport ───────────────────────────────────────────────────
    /// HTTP transport error (connection refused, DNS failure, etc.)
    #[error("HTTP transport error: {0}")]
    Transport(#[from] reqwest::Error),

    /// URL parsing error.
    #[error("Invalid URL: {0}")]
    InvalidUrl(#[from] url::ParseError),

    /// TLS handshake or certificate error.
    #[error("TLS error: {0}")]
    Tls(String),

    // ── REST API ────────────────────────────────────────────────────
    /// The `{ success: false }` envelope from the device API.
    #[error("Device API error: {message}")]
    Api { message: String },

    // ── WebSocket ───────────────────────────────────────────────────
    /// WebSocket connection failed.
    #[error("WebSocket connection failed: {0}")]
    WebSocketConnect(String),

    /// WebSocket closed before the handshake completed.
    #[error("WebSocket closed (code {code}): {reason}")]
    WebSocketClosed { code: u16, reason: String },

    // ── Data ────────────────────────────────────────────────────────
    /// JSON deserialization failed, with the raw body for debugging.
    #[error("Deserialization error: {message}")]
    Deserialization { message: String, body: String },
}

impl Error {
    /// Returns `true` if retrying the same request could succeed.
    pub fn is_transient(&self) -> bool {
        match self {
            Self::Transport(e) => e.is_timeout() || e.is_connect(),
            Self::HandshakeTimeout { .. }
            | Self::WebSocketConnect(_)
            | Self::WebSocketClosed { .. } => true,
            _ => false,
        }
    }

    /// Returns `true` if the server refused our credentials.
    pub fn is_auth_rejected(&self) -> bool {
        matches!(self, Self::HandshakeRejected { .. } | Self::Unauthorized { .. })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn handshake_timeout_is_transient() {
        assert!(Error::HandshakeTimeout { timeout_ms: 10 }.is_transient());
        assert!(Error::WebSocketConnect("refused".into()).is_transient());
        assert!(!Error::Api { message: "nope".into() }.is_transient());
    }

    #[test]
    fn rejected_handshake_is_auth_failure() {
        let err = Error::HandshakeRejected {
            message: "bad token".into(),
        };
        assert!(err.is_auth_rejected());
        assert_eq!(err.to_string(), "Handshake rejected: bad token");
    }
}
