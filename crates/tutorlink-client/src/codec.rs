//! Wire codec for the tutor protocol.
//!
//! Outbound traffic is a single message type, `asr`, carrying one recognized
//! utterance. Inbound traffic is a tolerant envelope tagged by `type`: unknown
//! fields are ignored and unknown tags are kept as [`EnvelopeKind::Unknown`]
//! so newer servers never break older clients.
//!
//! # Inbound types
//!
//! - `tutor` - a tutor reply; `reply` is required
//! - `echo`  - the server echoing a wrapped outbound message or free text
//! - `error` - an application error in `message` or `reason`
//! - `ping`  - liveness check request
//! - `pong`  - liveness check answer (ignored)

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::{ClientError, Result};

/// The `type` tag of every outbound message.
pub const ASR_TYPE: &str = "asr";

fn asr_type() -> String {
    ASR_TYPE.to_string()
}

// ============================================================================
// Outbound
// ============================================================================

/// One recognized utterance sent to the tutor.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClientMessage {
    /// Message type tag, always `asr`.
    #[serde(rename = "type", default = "asr_type")]
    pub kind: String,
    /// Recognized text.
    pub text: String,
    /// BCP 47 language code, e.g. `en-US`.
    #[serde(rename = "lang", alias = "languageCode")]
    pub language_code: String,
    /// Learner proficiency level, e.g. `B1`.
    pub level: String,
}

impl ClientMessage {
    /// Creates an `asr` message.
    #[must_use]
    pub fn asr(
        text: impl Into<String>,
        language_code: impl Into<String>,
        level: impl Into<String>,
    ) -> Self {
        Self {
            kind: asr_type(),
            text: text.into(),
            language_code: language_code.into(),
            level: level.into(),
        }
    }
}

/// Serializes an outbound message to compact JSON.
///
/// # Errors
///
/// Returns `ClientError::EncodingFailed` if serialization fails.
pub fn encode(message: &ClientMessage) -> Result<String> {
    serde_json::to_string(message).map_err(|e| ClientError::encoding(e.to_string()))
}

// ============================================================================
// Inbound
// ============================================================================

/// Raw inbound envelope. Every field is optional.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ServerEnvelope {
    /// Type tag.
    #[serde(rename = "type", default, skip_serializing_if = "Option::is_none")]
    pub kind: Option<String>,
    /// Tutor reply text.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reply: Option<String>,
    /// Optional hint for the learner.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub hint: Option<String>,
    /// Detected mistakes.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub errors: Option<Vec<String>>,
    /// Assessed CEFR level.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cefr: Option<String>,
    /// Error message (for `error`).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    /// Error reason (for `error`).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
    /// Wrapped outbound message (for `echo`).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub payload: Option<Value>,
    /// Free text (for `echo`).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub text: Option<String>,
}

impl ServerEnvelope {
    /// Classified type tag, or `None` if the envelope has no `type`.
    #[must_use]
    pub fn kind(&self) -> Option<EnvelopeKind> {
        self.kind.as_deref().map(EnvelopeKind::from_tag)
    }
}

/// Known inbound type tags.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum EnvelopeKind {
    /// `tutor`
    Tutor,
    /// `error`
    Error,
    /// `echo`
    Echo,
    /// `ping`
    Ping,
    /// `pong`
    Pong,
    /// Any other tag, kept verbatim.
    Unknown(String),
}

impl EnvelopeKind {
    /// Classifies a raw `type` tag, ignoring ASCII case.
    #[must_use]
    pub fn from_tag(tag: &str) -> Self {
        match tag.to_ascii_lowercase().as_str() {
            "tutor" => Self::Tutor,
            "error" => Self::Error,
            "echo" => Self::Echo,
            "ping" => Self::Ping,
            "pong" => Self::Pong,
            _ => Self::Unknown(tag.to_string()),
        }
    }

    /// The tag as it appears on the wire.
    #[must_use]
    pub fn as_str(&self) -> &str {
        match self {
            Self::Tutor => "tutor",
            Self::Error => "error",
            Self::Echo => "echo",
            Self::Ping => "ping",
            Self::Pong => "pong",
            Self::Unknown(tag) => tag,
        }
    }
}

/// A reply ready to hand to the hosting application.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TutorReply {
    /// Reply text, suitable for speech output.
    pub reply: String,
    /// Optional hint.
    pub hint: Option<String>,
    /// Detected mistakes or validation problems.
    pub errors: Vec<String>,
    /// Assessed CEFR level.
    pub cefr: Option<String>,
    /// When the reply was received or synthesized.
    pub received_at: DateTime<Utc>,
}

impl TutorReply {
    /// Creates a reply stamped with the current time.
    #[must_use]
    pub fn new(
        reply: impl Into<String>,
        hint: Option<String>,
        errors: Vec<String>,
        cefr: Option<String>,
    ) -> Self {
        Self {
            reply: reply.into(),
            hint,
            errors,
            cefr,
            received_at: Utc::now(),
        }
    }

    /// Creates a bare text reply with no hint, errors, or level.
    #[must_use]
    pub fn text(reply: impl Into<String>) -> Self {
        Self::new(reply, None, Vec::new(), None)
    }
}

/// What an inbound frame asks the client to do.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InboundFrame {
    /// Deliver a reply.
    Reply(TutorReply),
    /// The server echoed one of our messages; acknowledge it locally.
    Echo(ClientMessage),
    /// The server reported an error.
    ServerError(String),
    /// Answer with a pong.
    Ping,
    /// Nothing to do (`pong` or an unknown tag).
    Ignored {
        /// The tag that was ignored.
        tag: String,
    },
}

/// Parses a text frame into an envelope.
///
/// # Errors
///
/// Returns `ClientError::DecodingFailed` if the text is not a JSON object.
pub fn decode(text: &str) -> Result<ServerEnvelope> {
    serde_json::from_str(text).map_err(|e| ClientError::decoding(e.to_string()))
}

/// Parses and classifies a text frame.
pub fn decode_frame(text: &str) -> Result<InboundFrame> {
    classify(decode(text)?)
}

/// Classifies a decoded envelope.
///
/// # Errors
///
/// Returns `ClientError::DecodingFailed` if the envelope has no `type`, or if
/// a `tutor` envelope has no `reply`.
pub fn classify(envelope: ServerEnvelope) -> Result<InboundFrame> {
    let Some(kind) = envelope.kind() else {
        return Err(ClientError::decoding("frame has no 'type' tag"));
    };

    match kind {
        EnvelopeKind::Tutor => {
            let reply = envelope
                .reply
                .ok_or_else(|| ClientError::decoding("'tutor' frame is missing 'reply'"))?;
            Ok(InboundFrame::Reply(TutorReply::new(
                reply,
                non_blank(envelope.hint),
                envelope.errors.unwrap_or_default(),
                non_blank(envelope.cefr),
            )))
        }
        EnvelopeKind::Echo => {
            if let Some(message) = envelope.payload.as_ref().and_then(wrapped_message) {
                return Ok(InboundFrame::Echo(message));
            }
            match non_blank(envelope.text) {
                Some(text) => Ok(InboundFrame::Reply(TutorReply::text(text))),
                None => Ok(InboundFrame::Ignored {
                    tag: kind.as_str().to_string(),
                }),
            }
        }
        EnvelopeKind::Error => {
            let message = non_blank(envelope.message)
                .or_else(|| non_blank(envelope.reason))
                .unwrap_or_else(|| "unspecified server error".to_string());
            Ok(InboundFrame::ServerError(message))
        }
        EnvelopeKind::Ping => Ok(InboundFrame::Ping),
        EnvelopeKind::Pong | EnvelopeKind::Unknown(_) => Ok(InboundFrame::Ignored {
            tag: kind.as_str().to_string(),
        }),
    }
}

/// Extracts an outbound message wrapped in an `echo` payload.
///
/// The payload may be the message object itself or a JSON string holding it.
fn wrapped_message(payload: &Value) -> Option<ClientMessage> {
    match payload {
        Value::Object(_) => serde_json::from_value(payload.clone()).ok(),
        Value::String(raw) => serde_json::from_str(raw).ok(),
        _ => None,
    }
}

fn non_blank(value: Option<String>) -> Option<String> {
    value.filter(|s| !s.trim().is_empty())
}

// ============================================================================
// Tests
// ============================================================================
