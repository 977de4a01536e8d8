use std::fmt;
use std::time::Duration;

/// Why the engine stopped trying to connect.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GiveUp {
    /// `connect` was called without a token.
    AuthMissing,
    /// The retry budget ran out.
    MaxAttemptsExceeded { attempts: u32 },
    /// An attempt failed in a way retrying cannot fix, such as a token
    /// that is not a valid header value.
    Unrecoverable { reason: String },
}

/// Lifecycle of the single server connection.
///
/// `Reconnecting` and `Failed` are both "not connected"; they differ in
/// whether a retry is scheduled.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum ConnectionState {
    #[default]
    Disconnected,
    /// Attempt number `attempt` (1-based) is in flight.
    Connecting { attempt: u32 },
    Connected,
    /// `attempt` consecutive failures so far; the next try fires after `delay`.
    Reconnecting { attempt: u32, delay: Duration },
    /// Terminal until `connect`/`reconnect` is called again.
    Failed(GiveUp),
}

impl ConnectionState {
    pub fn is_connected(&self) -> bool {
        matches!(self, Self::Connected)
    }

    /// `Connecting` or `Connected`: a new `connect` would be a no-op.
    pub fn is_active(&self) -> bool {
        matches!(self, Self::Connecting { .. } | Self::Connected)
    }

    pub fn is_failed(&self) -> bool {
        matches!(self, Self::Failed(_))
    }
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Disconnected => f.write_str("disconnected"),
            Self::Connecting { attempt } => write!(f, "connecting (attempt {attempt})"),
            Self::Connected => f.write_str("connected"),
            Self::Reconnecting { attempt, delay } => {
                write!(f, "reconnecting in {}ms (after {attempt} failures)", delay.as_millis())
            }
            Self::Failed(GiveUp::AuthMissing) => f.write_str("failed: no auth token"),
            Self::Failed(GiveUp::MaxAttemptsExceeded { attempts }) => {
                write!(f, "failed: gave up after {attempts} attempts")
            }
            Self::Failed(GiveUp::Unrecoverable { reason }) => write!(f, "failed: {reason}"),
        }
    }
}
