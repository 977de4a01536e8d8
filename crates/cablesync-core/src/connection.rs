// ── Connection manager ──
//
// State machine for the single server connection. Owns the live
// `Connection`, the attempt counter, the reconnect deadline and a
// generation number that tags every attempt. It performs no I/O: the
// engine loop spawns the attempts it hands out and feeds results back.
//
//   disconnected ─connect─▶ connecting ─ack─▶ connected
//        ▲                      │                 │
//        └──── retry timer ◀─ error        transport drop
//
// A result whose generation is not the current one belongs to an attempt
// that was superseded or cancelled, and is discarded.

use cablesync_api::{Connection, WireEvent};
use secrecy::SecretString;
use tokio::sync::watch;
use tokio::time::Instant;
use url::Url;

use crate::config::ReconnectPolicy;
use crate::error::CoreError;
use crate::model::{ConnectionState, GiveUp};

/// A connection attempt the engine should run.
#[derive(Debug)]
pub(crate) struct Attempt {
    pub generation: u64,
    pub endpoint: Url,
    pub token: SecretString,
}

pub(crate) struct ConnectionManager {
    policy: ReconnectPolicy,
    state: watch::Sender<ConnectionState>,
    endpoint: Option<Url>,
    token: Option<SecretString>,
    /// Consecutive failures in the current sequence.
    failures: u32,
    generation: u64,
    retry_at: Option<Instant>,
    connection: Option<Connection>,
}

impl ConnectionManager {
    pub(crate) fn new(policy: ReconnectPolicy) -> Self {
        let (state, _) = watch::channel(ConnectionState::Disconnected);
        Self {
            policy,
            state,
            endpoint: None,
            token: None,
            failures: 0,
            generation: 0,
            retry_at: None,
            connection: None,
        }
    }

    pub(crate) fn subscribe_state(&self) -> watch::Receiver<ConnectionState> {
        self.state.subscribe()
    }

    pub(crate) fn state(&self) -> ConnectionState {
        self.state.borrow().clone()
    }

    pub(crate) fn is_connected(&self) -> bool {
        self.connection.is_some()
    }

    pub(crate) fn retry_at(&self) -> Option<Instant> {
        self.retry_at
    }

    pub(crate) fn connection_mut(&mut self) -> Option<&mut Connection> {
        self.connection.as_mut()
    }

    /// Queue a control message. Dropped silently while not connected;
    /// the next ack re-issues everything that matters.
    pub(crate) fn send(&self, event: WireEvent) -> bool {
        match &self.connection {
            Some(conn) => {
                tracing::debug!(event = %event.event, "sending control message");
                conn.send(event)
            }
            None => {
                tracing::trace!(event = %event.event, "not connected, control message deferred");
                false
            }
        }
    }

    // ── Commands ─────────────────────────────────────────────────────

    /// Start connecting unless already connecting or connected.
    ///
    /// While a retry is scheduled, the wait is skipped and the attempt
    /// counter kept.
    pub(crate) fn connect(&mut self, endpoint: Url, token: Option<SecretString>) -> Option<Attempt> {
        if self.state().is_active() {
            tracing::debug!(state = %self.state(), "connect ignored, already active");
            return None;
        }

        self.endpoint = Some(endpoint);
        self.token = token;
        if self.token.is_none() {
            return self.give_up_auth_missing();
        }
        if self.state().is_failed() {
            self.failures = 0;
        }
        self.retry_at = None;
        self.begin_attempt()
    }

    /// Reset the attempt counter and connect again with the last endpoint
    /// and token, dropping any live or pending connection.
    pub(crate) fn reconnect(&mut self) -> Option<Attempt> {
        if self.endpoint.is_none() {
            tracing::warn!("reconnect requested before any connect, ignoring");
            return None;
        }
        self.connection = None;
        self.retry_at = None;
        self.failures = 0;
        if self.token.is_none() {
            return self.give_up_auth_missing();
        }
        self.begin_attempt()
    }

    /// Tear everything down. Returns `true` if a live connection was dropped.
    pub(crate) fn disconnect(&mut self) -> bool {
        self.generation += 1;
        self.retry_at = None;
        self.failures = 0;
        let was_connected = self.connection.take().is_some();
        if self.state() != ConnectionState::Disconnected {
            tracing::info!("disconnected");
            self.publish(ConnectionState::Disconnected);
        }
        was_connected
    }

    // ── Attempt results ──────────────────────────────────────────────

    /// Adopt an acknowledged connection. Returns `false` (and drops it)
    /// if the attempt is stale.
    pub(crate) fn established(&mut self, generation: u64, connection: Connection) -> bool {
        if generation != self.generation || !matches!(self.state(), ConnectionState::Connecting { .. }) {
            tracing::debug!(generation, current = self.generation, "discarding stale connection");
            return false;
        }
        self.failures = 0;
        self.connection = Some(connection);
        tracing::info!("connected");
        self.publish(ConnectionState::Connected);
        true
    }

    /// Record a failed attempt and schedule the next one. Returns `false`
    /// if the attempt is stale.
    pub(crate) fn attempt_failed(&mut self, generation: u64, error: &CoreError, now: Instant) -> bool {
        if generation != self.generation || !matches!(self.state(), ConnectionState::Connecting { .. }) {
            tracing::debug!(generation, error = %error, "ignoring failure of stale attempt");
            return false;
        }
        self.failures += 1;
        if error.is_retryable() {
            self.schedule_retry(error, now);
        } else {
            self.retry_at = None;
            tracing::error!(error = %error, "connection failed, not retrying");
            self.publish(ConnectionState::Failed(GiveUp::Unrecoverable {
                reason: error.to_string(),
            }));
        }
        true
    }

    /// The established connection went away on its own. Counts as the
    /// first failure of a new sequence.
    pub(crate) fn transport_lost(&mut self, now: Instant) {
        self.connection = None;
        self.generation += 1;
        self.failures = 1;
        let error = CoreError::ConnectionFailed {
            url: self.endpoint.as_ref().map(ToString::to_string).unwrap_or_default(),
            reason: "transport closed".into(),
        };
        self.schedule_retry(&error, now);
    }

    /// Fire the retry if its deadline has passed.
    pub(crate) fn retry_due(&mut self, now: Instant) -> Option<Attempt> {
        match self.retry_at {
            Some(at) if at <= now => {
                self.retry_at = None;
                self.begin_attempt()
            }
            _ => None,
        }
    }

    // ── Private helpers ──────────────────────────────────────────────

    fn begin_attempt(&mut self) -> Option<Attempt> {
        let endpoint = self.endpoint.clone()?;
        let token = self.token.clone()?;
        self.generation += 1;
        let attempt = self.failures + 1;
        tracing::info!(url = %endpoint, attempt, "connecting");
        self.publish(ConnectionState::Connecting { attempt });
        Some(Attempt {
            generation: self.generation,
            endpoint,
            token,
        })
    }

    fn schedule_retry(&mut self, error: &CoreError, now: Instant) {
        if self.policy.exhausted(self.failures) {
            self.give_up(error);
            return;
        }
        let delay = self.policy.delay_for(self.failures);
        self.retry_at = Some(now + delay);
        tracing::warn!(
            attempt = self.failures,
            delay_ms = u64::try_from(delay.as_millis()).unwrap_or(u64::MAX),
            error = %error,
            "connection failed, retrying"
        );
        self.publish(ConnectionState::Reconnecting {
            attempt: self.failures,
            delay,
        });
    }

    fn give_up(&mut self, error: &CoreError) {
        self.retry_at = None;
        tracing::error!(attempts = self.failures, error = %error, "giving up on connection");
        self.publish(ConnectionState::Failed(GiveUp::MaxAttemptsExceeded {
            attempts: self.failures,
        }));
    }

    fn give_up_auth_missing(&mut self) -> Option<Attempt> {
        self.retry_at = None;
        self.generation += 1;
        tracing::warn!("connect called without an auth token");
        self.publish(ConnectionState::Failed(GiveUp::AuthMissing));
        None
    }

    fn publish(&self, state: ConnectionState) {
        // `send_replace` updates even with zero receivers.
        self.state.send_replace(state);
    }
}
