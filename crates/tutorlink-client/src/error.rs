//! Error types for the tutor client.
//!
//! Every failure the client can encounter is represented here: endpoint
//! resolution, wire encoding and decoding, peer-reported errors, transport
//! failures, and configuration loading. None of these cross the driver task
//! boundary as panics; they end up as the observable "last error" plus a log line.

use std::path::PathBuf;

/// A specialized `Result` type for tutor client operations.
pub type Result<T> = std::result::Result<T, ClientError>;

/// Errors that can occur while running the tutor client.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ClientError {
    // ========================================================================
    // Endpoint Resolution
    // ========================================================================
    /// No connection URL could be derived from the configured inputs.
    #[error("Invalid environment: {message}\n\nSuggestion: Set an explicit endpoint URL or a host[:port][/path] environment identifier")]
    InvalidEnvironment {
        /// Why resolution failed.
        message: String,
    },

    // ========================================================================
    // Wire Codec
    // ========================================================================
    /// An outbound message could not be serialized.
    #[error("Failed to encode outbound message: {message}")]
    EncodingFailed {
        /// Serializer error text.
        message: String,
    },

    /// An inbound frame was structurally malformed.
    #[error("Failed to decode inbound frame: {message}")]
    DecodingFailed {
        /// What was wrong with the frame.
        message: String,
    },

    /// The peer reported an application-level error.
    #[error("Server error: {message}")]
    ServerError {
        /// The first non-empty of the envelope's `message` / `reason` fields.
        message: String,
    },

    // ========================================================================
    // Transport
    // ========================================================================
    /// Network-level failure on the WebSocket transport.
    #[error("Transport error ({kind}): {message}")]
    Transport {
        /// Classification used by the reconnect policy.
        kind: TransportErrorKind,
        /// Underlying error text.
        message: String,
    },

    // ========================================================================
    // Configuration
    // ========================================================================
    /// Invalid JSON syntax or values in a configuration file.
    #[error("Invalid JSON in config file '{path}': {message}\n\nSuggestion: Validate your tutorlink.json with a JSON linter")]
    ConfigParseError {
        /// Path to the configuration file.
        path: PathBuf,
        /// Description of the parse error.
        message: String,
    },

    /// Configuration validation failed.
    #[error("Invalid configuration: {message}\n\nSuggestion: {suggestion}")]
    ConfigValidationError {
        /// Description of the validation failure.
        message: String,
        /// Actionable suggestion for the user.
        suggestion: String,
    },

    // ========================================================================
    // Handle
    // ========================================================================
    /// The client driver has stopped and no longer accepts commands.
    #[error("Tutor client has been shut down")]
    ClientClosed,
}

/// Categories of transport failure for the reconnect policy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TransportErrorKind {
    /// The network is unavailable.
    NoConnectivity,
    /// The host name could not be resolved.
    DnsFailure,
    /// The host refused or could not be routed to.
    HostUnreachable,
    /// An established connection dropped.
    ConnectionLost,
    /// Connect or I/O did not complete in time.
    Timeout,
    /// The WebSocket upgrade was rejected.
    Handshake,
    /// The peer violated the WebSocket protocol.
    Protocol,
    /// The URL cannot be used for a WebSocket connection.
    InvalidUrl,
}

impl std::fmt::Display for TransportErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::NoConnectivity => write!(f, "no_connectivity"),
            Self::DnsFailure => write!(f, "dns_failure"),
            Self::HostUnreachable => write!(f, "host_unreachable"),
            Self::ConnectionLost => write!(f, "connection_lost"),
            Self::Timeout => write!(f, "timeout"),
            Self::Handshake => write!(f, "handshake"),
            Self::Protocol => write!(f, "protocol"),
            Self::InvalidUrl => write!(f, "invalid_url"),
        }
    }
}

impl TransportErrorKind {
    /// Returns `true` for connectivity failures.
    ///
    /// In automatic mode these switch the client into demo mode instead of a
    /// plain reconnect.
    #[must_use]
    pub const fn is_retryable(&self) -> bool {
        matches!(
            self,
            Self::NoConnectivity
                | Self::DnsFailure
                | Self::HostUnreachable
                | Self::ConnectionLost
                | Self::Timeout
        )
    }

    /// Returns `true` if retrying can never succeed.
    #[must_use]
    pub const fn is_fatal(&self) -> bool {
        matches!(self, Self::InvalidUrl)
    }
}

impl ClientError {
    /// Creates a new `InvalidEnvironment` error.
    #[must_use]
    pub fn invalid_environment(message: impl Into<String>) -> Self {
        Self::InvalidEnvironment {
            message: message.into(),
        }
    }

    /// Creates a new `EncodingFailed` error.
    #[must_use]
    pub fn encoding(message: impl Into<String>) -> Self {
        Self::EncodingFailed {
            message: message.into(),
        }
    }

    /// Creates a new `DecodingFailed` error.
    #[must_use]
    pub fn decoding(message: impl Into<String>) -> Self {
        Self::DecodingFailed {
            message: message.into(),
        }
    }

    /// Creates a new `ServerError`.
    #[must_use]
    pub fn server(message: impl Into<String>) -> Self {
        Self::ServerError {
            message: message.into(),
        }
    }

    /// Creates a new `Transport` error of the given kind.
    #[must_use]
    pub fn transport(kind: TransportErrorKind, message: impl Into<String>) -> Self {
        Self::Transport {
            kind,
            message: message.into(),
        }
    }

    /// Creates a new `ConfigParseError` with the given path and message.
    #[must_use]
    pub fn config_parse(path: impl Into<PathBuf>, message: impl Into<String>) -> Self {
        Self::ConfigParseError {
            path: path.into(),
            message: message.into(),
        }
    }

    /// Creates a new `ConfigValidationError` with the given message and suggestion.
    #[must_use]
    pub fn config_validation(message: impl Into<String>, suggestion: impl Into<String>) -> Self {
        Self::ConfigValidationError {
            message: message.into(),
            suggestion: suggestion.into(),
        }
    }

    /// Short machine-readable name of the error category.
    #[must_use]
    pub const fn kind_name(&self) -> &'static str {
        match self {
            Self::InvalidEnvironment { .. } => "invalid_environment",
            Self::EncodingFailed { .. } => "encoding_failed",
            Self::DecodingFailed { .. } => "decoding_failed",
            Self::ServerError { .. } => "server_error",
            Self::Transport { .. } => "transport_error",
            Self::ConfigParseError { .. } | Self::ConfigValidationError { .. } => "config_error",
            Self::ClientClosed => "client_closed",
        }
    }

    /// Returns the transport classification, if this is a transport error.
    #[must_use]
    pub const fn transport_kind(&self) -> Option<TransportErrorKind> {
        match self {
            Self::Transport { kind, .. } => Some(*kind),
            _ => None,
        }
    }

    /// Returns `true` if this error is a retryable connectivity failure.
    #[must_use]
    pub const fn is_transient(&self) -> bool {
        matches!(self, Self::Transport { kind, .. } if kind.is_retryable())
    }

    /// Returns `true` if this error puts the connection into the failed state.
    #[must_use]
    pub const fn is_fatal(&self) -> bool {
        match self {
            Self::InvalidEnvironment { .. }
            | Self::ConfigParseError { .. }
            | Self::ConfigValidationError { .. } => true,
            Self::Transport { kind, .. } => kind.is_fatal(),
            _ => false,
        }
    }
}
