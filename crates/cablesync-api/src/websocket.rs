//! WebSocket event transport with an auth handshake.
//!
//! Opens the device server's websocket, authenticates with a bearer token,
//! waits for the server's `connect` ack, then hands back a [`Connection`]:
//! a pair of channels carrying [`WireEvent`]s in each direction. A
//! background pump task moves frames between the socket and the channels.
//!
//! Reconnection is *not* handled here. The caller owns the retry policy
//! and simply asks the [`Connector`] for a fresh [`Connection`]; a closed
//! inbound channel means the transport dropped.
//!
//! # Example
//!
//! ```rust,ignore
//! use cablesync_api::websocket::{Connector, WsConnector};
//! use cablesync_api::WireEvent;
//! use secrecy::SecretString;
//! use url::Url;
//!
//! let connector = WsConnector::default();
//! let endpoint = Url::parse("wss://console.local/socket")?;
//! let mut conn = connector.connect(&endpoint, &SecretString::from("token".to_string())).await?;
//!
//! conn.send(WireEvent::new("subscribe:device", "cable-1".into()));
//! while let Some(event) = conn.recv().await {
//!     println!("{}: {}", event.event, event.data);
//! }
//! ```

use std::time::Duration;

use futures_util::future::BoxFuture;
use futures_util::{SinkExt, StreamExt};
use secrecy::{ExposeSecret, SecretString};
use serde_json::{Value, json};
use tokio::sync::mpsc;
use tokio_tungstenite::tungstenite::{self, ClientRequestBuilder, Message};
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream};
use tokio_util::sync::{CancellationToken, DropGuard};
use url::Url;

use crate::error::Error;
use crate::models::WireEvent;
use crate::transport::TlsMode;

type WsStream = WebSocketStream<MaybeTlsStream<tokio::net::TcpStream>>;

/// Event name the client sends first, carrying `{ "token": ... }`.
pub const AUTH_EVENT: &str = "auth";
/// Event name the server uses to acknowledge the handshake.
pub const ACK_EVENT: &str = "connect";
/// Event name the server uses to reject the handshake.
pub const REJECT_EVENT: &str = "connect_error";

const DEFAULT_HANDSHAKE_TIMEOUT: Duration = Duration::from_secs(10);

// ── Connector ────────────────────────────────────────────────────────

/// Boxed future returned by [`Connector::connect`].
pub type ConnectFuture = BoxFuture<'static, Result<Connection, Error>>;

/// Something that can open an authenticated event connection.
///
/// The engine depends on this seam rather than on a concrete socket, so
/// in-memory transports can stand in for the network.
pub trait Connector: Send + Sync + 'static {
    /// Open a connection and complete the auth handshake.
    ///
    /// Resolves once the server has acknowledged the token.
    fn connect(&self, endpoint: &Url, token: &SecretString) -> ConnectFuture;
}

/// [`Connector`] backed by `tokio-tungstenite`.
#[derive(Debug, Clone)]
pub struct WsConnector {
    handshake_timeout: Duration,
    tls: TlsMode,
}

impl WsConnector {
    pub fn new(handshake_timeout: Duration) -> Self {
        Self {
            handshake_timeout,
            tls: TlsMode::System,
        }
    }

    /// Certificate verification for `wss://` endpoints.
    pub fn with_tls(mut self, tls: TlsMode) -> Self {
        self.tls = tls;
        self
    }
}

impl Default for WsConnector {
    fn default() -> Self {
        Self::new(DEFAULT_HANDSHAKE_TIMEOUT)
    }
}

impl Connector for WsConnector {
    fn connect(&self, endpoint: &Url, token: &SecretString) -> ConnectFuture {
        let url = endpoint.clone();
        let token = token.clone();
        let timeout = self.handshake_timeout;
        let tls = self.tls.clone();
        Box::pin(async move { open(url, token, timeout, &tls).await })
    }
}

// ── Connection ───────────────────────────────────────────────────────

/// An established, authenticated event connection.
///
/// Dropping the connection stops its background pump and closes the
/// socket.
pub struct Connection {
    outbound: mpsc::UnboundedSender<WireEvent>,
    inbound: mpsc::UnboundedReceiver<WireEvent>,
    _pump_guard: Option<DropGuard>,
}

impl Connection {
    /// Build a connection from raw channel halves.
    pub fn new(
        outbound: mpsc::UnboundedSender<WireEvent>,
        inbound: mpsc::UnboundedReceiver<WireEvent>,
    ) -> Self {
        Self {
            outbound,
            inbound,
            _pump_guard: None,
        }
    }

    /// Two connected in-memory endpoints. Whatever one side sends, the
    /// other receives; dropping either side closes the other's inbound.
    pub fn duplex() -> (Self, Self) {
        let (a_tx, a_rx) = mpsc::unbounded_channel();
        let (b_tx, b_rx) = mpsc::unbounded_channel();
        (Self::new(a_tx, b_rx), Self::new(b_tx, a_rx))
    }

    fn with_pump(mut self, cancel: CancellationToken) -> Self {
        self._pump_guard = Some(cancel.drop_guard());
        self
    }

    /// Queue an event for sending. Returns `false` if the transport is gone.
    pub fn send(&self, event: WireEvent) -> bool {
        self.outbound.send(event).is_ok()
    }

    /// Receive the next inbound event, or `None` once the transport dropped.
    pub async fn recv(&mut self) -> Option<WireEvent> {
        self.inbound.recv().await
    }

    /// Non-blocking receive.
    pub fn try_recv(&mut self) -> Option<WireEvent> {
        self.inbound.try_recv().ok()
    }
}

impl std::fmt::Debug for Connection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Connection")
            .field("closed", &self.outbound.is_closed())
            .finish_non_exhaustive()
    }
}

// ── Handshake ────────────────────────────────────────────────────────

async fn open(
    url: Url,
    token: SecretString,
    timeout: Duration,
    tls: &TlsMode,
) -> Result<Connection, Error> {
    tracing::info!(url = %url, "Connecting to WebSocket");

    let uri: tungstenite::http::Uri = url
        .as_str()
        .parse()
        .map_err(|e: tungstenite::http::uri::InvalidUri| Error::WebSocketConnect(e.to_string()))?;

    let connector = tls
        .rustls_config()?
        .map(tokio_tungstenite::Connector::Rustls);
    let (mut ws, _response) = tokio_tungstenite::connect_async_tls_with_config(
        ClientRequestBuilder::new(uri),
        None,
        false,
        connector,
    )
    .await
    .map_err(|e| Error::WebSocketConnect(e.to_string()))?;

    let auth = WireEvent::new(AUTH_EVENT, json!({ "token": token.expose_secret() }));
    ws.send(Message::text(encode(&auth)?))
        .await
        .map_err(|e| Error::WebSocketConnect(e.to_string()))?;

    tokio::time::timeout(timeout, await_ack(&mut ws))
        .await
        .map_err(|_| Error::HandshakeTimeout {
            timeout_ms: u64::try_from(timeout.as_millis()).unwrap_or(u64::MAX),
        })??;

    tracing::info!("WebSocket handshake acknowledged");

    let (out_tx, out_rx) = mpsc::unbounded_channel();
    let (in_tx, in_rx) = mpsc::unbounded_channel();

    let cancel = CancellationToken::new();
    tokio::spawn(pump(ws, out_rx, in_tx, cancel.clone()));

    Ok(Connection::new(out_tx, in_rx).with_pump(cancel))
}

/// Read frames until the server acks or rejects the token.
///
/// Frames the server sends after the ack stay buffered in the stream and
/// are picked up by the pump.
async fn await_ack(ws: &mut WsStream) -> Result<(), Error> {
    loop {
        match ws.next().await {
            Some(Ok(Message::Text(text))) => {
                let Some(event) = parse_frame(&text) else { continue };
                match event.event.as_str() {
                    ACK_EVENT => return Ok(()),
                    REJECT_EVENT => {
                        return Err(Error::HandshakeRejected {
                            message: error_message(&event.data),
                        });
                    }
                    other => tracing::debug!(event = other, "Ignoring event before handshake ack"),
                }
            }
            Some(Ok(Message::Close(frame))) => {
                let (code, reason) = frame
                    .map_or((1005, String::new()), |cf| (u16::from(cf.code), cf.reason.to_string()));
                return Err(Error::WebSocketClosed { code, reason });
            }
            Some(Ok(_)) => {}
            Some(Err(e)) => return Err(Error::WebSocketConnect(e.to_string())),
            None => {
                return Err(Error::WebSocketClosed {
                    code: 1006,
                    reason: "stream ended during handshake".into(),
                });
            }
        }
    }
}

// ── Frame pump ───────────────────────────────────────────────────────

/// Move frames between the socket and the connection channels until
/// either side goes away. Dropping `inbound` tells the owner the
/// transport is gone.
async fn pump(
    ws: WsStream,
    mut outbound: mpsc::UnboundedReceiver<WireEvent>,
    inbound: mpsc::UnboundedSender<WireEvent>,
    cancel: CancellationToken,
) {
    let (mut write, mut read) = ws.split();

    loop {
        tokio::select! {
            biased;
            () = cancel.cancelled() => {
                let _ = write.send(Message::Close(None)).await;
                break;
            }
            event = outbound.recv() => {
                let Some(event) = event else {
                    let _ = write.send(Message::Close(None)).await;
                    break;
                };
                let text = match encode(&event) {
                    Ok(text) => text,
                    Err(e) => {
                        tracing::warn!(error = %e, event = %event.event, "Dropping unencodable event");
                        continue;
                    }
                };
                if let Err(e) = write.send(Message::text(text)).await {
                    tracing::warn!(error = %e, "WebSocket send failed");
                    break;
                }
            }
            frame = read.next() => {
                match frame {
                    Some(Ok(Message::Text(text))) => {
                        if let Some(event) = parse_frame(&text) {
                            if inbound.send(event).is_err() {
                                break;
                            }
                        }
                    }
                    Some(Ok(Message::Ping(_))) => {
                        // tungstenite queues the pong; the next write flushes it
                        tracing::trace!("WebSocket ping");
                    }
                    Some(Ok(Message::Close(frame))) => {
                        if let Some(ref cf) = frame {
                            tracing::info!(
                                code = %cf.code,
                                reason = %cf.reason,
                                "WebSocket close frame received"
                            );
                        } else {
                            tracing::info!("WebSocket close frame received (no payload)");
                        }
                        break;
                    }
                    Some(Err(e)) => {
                        tracing::warn!(error = %e, "WebSocket read error");
                        break;
                    }
                    None => {
                        tracing::info!("WebSocket stream ended");
                        break;
                    }
                    Some(Ok(_)) => {
                        // Binary, Pong, Frame -- ignore
                    }
                }
            }
        }
    }

    tracing::debug!("WebSocket pump exiting");
}

// ── Frame encoding ───────────────────────────────────────────────────

fn encode(event: &WireEvent) -> Result<String, Error> {
    serde_json::to_string(event).map_err(|e| Error::Deserialization {
        message: e.to_string(),
        body: event.event.clone(),
    })
}

/// Parse one text frame. Frames that are not `{event, data}` objects are
/// logged and skipped.
fn parse_frame(text: &str) -> Option<WireEvent> {
    match serde_json::from_str::<WireEvent>(text) {
        Ok(event) => Some(event),
        Err(e) => {
            tracing::debug!(error = %e, "Failed to parse WebSocket frame");
            None
        }
    }
}

/// Pull a human-readable reason out of a `connect_error` payload.
fn error_message(data: &Value) -> String {
    data.as_str()
        .or_else(|| data["message"].as_str())
        .or_else(|| data["error"].as_str())
        .map_or_else(|| data.to_string(), String::from)
}

// ── Tests ────────────────────────────────────────────────────────────
