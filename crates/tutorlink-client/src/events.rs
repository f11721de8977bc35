//! Client events and broadcasting to the hosting application.
//!
//! Hosts subscribe to a [`TutorClient`](crate::TutorClient) and receive every
//! state change, reply, error, and diagnostic line as a [`ClientEvent`].
//!
//! # Event Types
//!
//! - `state_changed` - The connection state changed
//! - `reply` - A tutor reply arrived (live or synthesized)
//! - `error` - An error was recorded as the last error
//! - `log` - Free-text diagnostic trace line
//!
//! # Example
//!
//! ```
//! use tutorlink_client::events::{ClientEvent, EventBroadcaster};
//!
//! # async fn example() {
//! let broadcaster = EventBroadcaster::new(16);
//! let mut receiver = broadcaster.subscribe();
//!
//! broadcaster.send(ClientEvent::log("connecting to ws://localhost:8080/realtime"));
//!
//! if let Ok(event) = receiver.recv().await {
//!     println!("Received: {:?}", event);
//! }
//! # }
//! ```

use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;

use crate::codec::TutorReply;
use crate::error::ClientError;
use crate::state::ConnectionState;

// ============================================================================
// Event Payloads
// ============================================================================

/// Payload for the `error` event.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorPayload {
    /// Error category, e.g. `decoding_failed`.
    pub kind: String,
    /// Human-readable error message.
    pub message: String,
}

impl From<&ClientError> for ErrorPayload {
    fn from(error: &ClientError) -> Self {
        Self {
            kind: error.kind_name().to_string(),
            message: error.to_string(),
        }
    }
}

/// Payload for the `log` event.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LogPayload {
    /// The trace line.
    pub line: String,
}

// ============================================================================
// Event Enum
// ============================================================================

/// Events published by the client.
///
/// Serialized as JSON objects with "event" and "payload" fields.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "event", content = "payload", rename_all = "snake_case")]
pub enum ClientEvent {
    /// The connection state changed.
    StateChanged(ConnectionState),
    /// A reply was received or synthesized.
    Reply(TutorReply),
    /// An error was recorded.
    Error(ErrorPayload),
    /// Diagnostic trace line.
    Log(LogPayload),
}

impl ClientEvent {
    /// Creates an `Error` event.
    #[must_use]
    pub fn error(error: &ClientError) -> Self {
        Self::Error(ErrorPayload::from(error))
    }

    /// Creates a `Log` event.
    #[must_use]
    pub fn log(line: impl Into<String>) -> Self {
        Self::Log(LogPayload { line: line.into() })
    }

    /// Returns the event name as a string.
    #[must_use]
    pub const fn event_name(&self) -> &'static str {
        match self {
            Self::StateChanged(_) => "state_changed",
            Self::Reply(_) => "reply",
            Self::Error(_) => "error",
            Self::Log(_) => "log",
        }
    }
}

// ============================================================================
// Event Broadcaster
// ============================================================================

/// Broadcasts client events to every subscriber.
///
/// Events are not retained for late subscribers; use
/// [`TutorClient::status`](crate::TutorClient::status) for current state.
#[derive(Debug, Clone)]
pub struct EventBroadcaster {
    sender: broadcast::Sender<ClientEvent>,
}

impl EventBroadcaster {
    /// Creates a new `EventBroadcaster` with the given per-subscriber buffer.
    ///
    /// A subscriber that falls more than `capacity` events behind receives a
    /// `Lagged` error and misses the oldest events.
    #[must_use]
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity);
        Self { sender }
    }

    /// Creates a new subscriber.
    #[must_use]
    pub fn subscribe(&self) -> broadcast::Receiver<ClientEvent> {
        self.sender.subscribe()
    }

    /// Broadcasts an event, returning how many subscribers will see it.
    pub fn send(&self, event: ClientEvent) -> usize {
        // send() returns Err only if there are no receivers, which is fine
        self.sender.send(event).unwrap_or(0)
    }

    /// Returns the number of active subscribers.
    #[must_use]
    pub fn receiver_count(&self) -> usize {
        self.sender.receiver_count()
    }
}

impl Default for EventBroadcaster {
    fn default() -> Self {
        Self::new(256)
    }
}

// ============================================================================
// Tests
// ============================================================================
