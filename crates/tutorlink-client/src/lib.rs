//! Tutorlink Client
//!
//! WebSocket client for a conversational language tutor, with reconnect
//! backoff and a local demo responder for when no tutor is reachable.

pub mod backoff;
pub mod client;
pub mod codec;
pub mod config;
pub mod demo;
pub mod endpoint;
pub mod error;
pub mod events;
pub mod state;
pub mod transport;

pub use backoff::Backoff;
pub use client::TutorClient;
pub use codec::{ClientMessage, EnvelopeKind, InboundFrame, ServerEnvelope, TutorReply};
pub use config::{ClientConfig, Mode, CONFIG_FILE_NAME, DEFAULT_PATH};
pub use demo::DemoResponder;
pub use error::{ClientError, Result, TransportErrorKind};
pub use events::{ClientEvent, EventBroadcaster};
pub use state::{ClientStatus, ConnectionState};
