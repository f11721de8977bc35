//! Connection state types for the tutor client.
//!
//! The client moves through these states:
//! - `Disconnected` -> `Connecting` -> `Connected`
//! - `Connected` -> `Reconnecting` on an abnormal close or non-connectivity failure
//! - `Reconnecting` -> `Connecting` when the backoff timer fires
//! - any -> `Demo` when demo mode is forced, or on a connectivity failure in
//!   automatic mode
//! - any -> `Failed` when the endpoint cannot be resolved or the transport
//!   error is unrecoverable

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::codec::TutorReply;
use crate::config::Mode;
use crate::error::ClientError;

// ============================================================================
// ConnectionState
// ============================================================================

/// Observable connection state, suitable for rendering directly in a UI.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum ConnectionState {
    /// No transport and nothing scheduled.
    #[default]
    Disconnected,
    /// A WebSocket handshake is in flight.
    Connecting,
    /// The transport is open.
    Connected,
    /// Waiting out a backoff delay before the next connect attempt.
    Reconnecting {
        /// Delay before the next attempt.
        #[serde(rename = "delayMs", with = "millis")]
        delay: Duration,
    },
    /// Replies are synthesized locally; no transport is open.
    Demo,
    /// Connection cannot proceed until an explicit `connect()`.
    Failed {
        /// Why the connection failed.
        message: String,
    },
}

impl ConnectionState {
    /// Short lowercase name of the state.
    ///
    /// # Examples
    ///
    /// ```
    /// use std::time::Duration;
    /// use tutorlink_client::ConnectionState;
    ///
    /// assert_eq!(ConnectionState::Demo.label(), "demo");
    /// let waiting = ConnectionState::Reconnecting { delay: Duration::from_secs(2) };
    /// assert_eq!(waiting.label(), "reconnecting");
    /// ```
    #[must_use]
    pub const fn label(&self) -> &'static str {
        match self {
            Self::Disconnected => "disconnected",
            Self::Connecting => "connecting",
            Self::Connected => "connected",
            Self::Reconnecting { .. } => "reconnecting",
            Self::Demo => "demo",
            Self::Failed { .. } => "failed",
        }
    }

    /// Returns `true` if the transport is open.
    #[must_use]
    pub const fn is_connected(&self) -> bool {
        matches!(self, Self::Connected)
    }

    /// Returns `true` while a live connection exists or is being pursued.
    ///
    /// # Examples
    ///
    /// ```
    /// use tutorlink_client::ConnectionState;
    ///
    /// assert!(ConnectionState::Connecting.is_live());
    /// assert!(ConnectionState::Connected.is_live());
    /// assert!(!ConnectionState::Demo.is_live());
    /// assert!(!ConnectionState::Disconnected.is_live());
    /// ```
    #[must_use]
    pub const fn is_live(&self) -> bool {
        matches!(
            self,
            Self::Connecting | Self::Connected | Self::Reconnecting { .. }
        )
    }

    /// Returns `true` in demo mode.
    #[must_use]
    pub const fn is_demo(&self) -> bool {
        matches!(self, Self::Demo)
    }

    /// Returns `true` in the failed state.
    #[must_use]
    pub const fn is_failed(&self) -> bool {
        matches!(self, Self::Failed { .. })
    }
}

impl std::fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Reconnecting { delay } => {
                write!(f, "reconnecting in {:.1}s", delay.as_secs_f64())
            }
            Self::Failed { message } => write!(f, "failed: {message}"),
            other => f.write_str(other.label()),
        }
    }
}

mod millis {
    use std::time::Duration;

    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(delay: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        let millis = u64::try_from(delay.as_millis()).unwrap_or(u64::MAX);
        serializer.serialize_u64(millis)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        u64::deserialize(deserializer).map(Duration::from_millis)
    }
}

// ============================================================================
// ClientStatus
// ============================================================================

/// Snapshot of everything a host UI renders about the client.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ClientStatus {
    /// Current connection state.
    pub state: ConnectionState,
    /// Current operating mode.
    pub mode: Mode,
    /// Reconnects scheduled since the last successful connection.
    pub reconnect_attempt: u32,
    /// Messages waiting for the transport.
    pub pending: usize,
    /// Whether demo mode was entered because the live endpoint was unreachable.
    pub demo_fallback: bool,
    /// The most recent error, cleared on successful connection.
    pub last_error: Option<ClientError>,
    /// The most recent reply.
    pub last_reply: Option<TutorReply>,
}

impl ClientStatus {
    /// Creates the initial status for a mode.
    #[must_use]
    pub fn new(mode: Mode) -> Self {
        Self {
            mode,
            ..Self::default()
        }
    }
}

// ============================================================================
// Tests
// ============================================================================
