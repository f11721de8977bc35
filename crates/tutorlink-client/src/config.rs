//! Configuration types for the tutor client.
//!
//! This module provides the connection configuration: where to connect, how
//! aggressively to reconnect, and whether to talk to a live tutor at all.

use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{ClientError, Result};

/// The default config file name.
pub const CONFIG_FILE_NAME: &str = "tutorlink.json";

/// Default path suffix every resolved endpoint must end with.
pub const DEFAULT_PATH: &str = "/realtime";

fn default_path() -> String {
    DEFAULT_PATH.to_string()
}

/// Default minimum reconnect delay in milliseconds.
const fn default_min_backoff_ms() -> u64 {
    1_000
}

/// Default maximum reconnect delay in milliseconds.
const fn default_max_backoff_ms() -> u64 {
    30_000
}

/// Default WebSocket handshake timeout in milliseconds.
const fn default_connect_timeout_ms() -> u64 {
    10_000
}

const fn default_true() -> bool {
    true
}

/// Connection configuration for a [`TutorClient`](crate::TutorClient).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ClientConfig {
    /// Explicit endpoint URL. Takes precedence over `environment`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub endpoint_url: Option<String>,

    /// Environment-style connection identifier, e.g. `localhost:8080` or
    /// `wss://tutor.example.com/v1`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub environment: Option<String>,

    /// Path the resolved URL must end with.
    #[serde(default = "default_path")]
    pub path: String,

    /// Whether to schedule reconnects after a transport failure.
    #[serde(default = "default_true")]
    pub auto_reconnect: bool,

    /// Lower bound for the reconnect delay.
    #[serde(default = "default_min_backoff_ms")]
    pub min_backoff_ms: u64,

    /// Upper bound for the reconnect delay.
    #[serde(default = "default_max_backoff_ms")]
    pub max_backoff_ms: u64,

    /// How long a WebSocket handshake may take before it counts as a timeout.
    #[serde(default = "default_connect_timeout_ms")]
    pub connect_timeout_ms: u64,

    /// Operating mode.
    #[serde(default)]
    pub mode: Mode,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            endpoint_url: None,
            environment: None,
            path: default_path(),
            auto_reconnect: default_true(),
            min_backoff_ms: default_min_backoff_ms(),
            max_backoff_ms: default_max_backoff_ms(),
            connect_timeout_ms: default_connect_timeout_ms(),
            mode: Mode::default(),
        }
    }
}

impl ClientConfig {
    /// Creates a configuration pointing at an explicit endpoint URL.
    #[must_use]
    pub fn with_url(url: impl Into<String>) -> Self {
        Self {
            endpoint_url: Some(url.into()),
            ..Self::default()
        }
    }

    /// Creates a configuration resolved from an environment identifier.
    #[must_use]
    pub fn with_environment(environment: impl Into<String>) -> Self {
        Self {
            environment: Some(environment.into()),
            ..Self::default()
        }
    }

    /// Creates a demo-mode configuration that never opens a transport.
    #[must_use]
    pub fn demo() -> Self {
        Self {
            mode: Mode::Demo,
            ..Self::default()
        }
    }

    /// Minimum reconnect delay.
    #[must_use]
    pub const fn min_backoff(&self) -> Duration {
        Duration::from_millis(self.min_backoff_ms)
    }

    /// Maximum reconnect delay.
    #[must_use]
    pub const fn max_backoff(&self) -> Duration {
        Duration::from_millis(self.max_backoff_ms)
    }

    /// WebSocket handshake timeout.
    #[must_use]
    pub const fn connect_timeout(&self) -> Duration {
        Duration::from_millis(self.connect_timeout_ms)
    }

    /// Loads configuration from `tutorlink.json` in the given directory.
    ///
    /// Returns the default configuration if the file does not exist.
    pub fn load_from_dir(dir: &Path) -> Result<Self> {
        Self::load_from_file(&dir.join(CONFIG_FILE_NAME))
    }

    /// Loads configuration from a specific file path.
    ///
    /// If the file does not exist, returns default configuration.
    ///
    /// # Errors
    ///
    /// Returns `ClientError::ConfigParseError` if the file exists but contains
    /// invalid JSON or an unknown mode, and `ClientError::ConfigValidationError`
    /// if the values are out of range.
    pub fn load_from_file(path: &Path) -> Result<Self> {
        let contents = match std::fs::read_to_string(path) {
            Ok(contents) => contents,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                let config = Self::default();
                config.validate()?;
                return Ok(config);
            }
            Err(e) => {
                return Err(ClientError::config_parse(
                    path,
                    format!("failed to read file: {e}"),
                ));
            }
        };

        let config: Self = serde_json::from_str(&contents)
            .map_err(|e| ClientError::config_parse(path, e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// Validates the configuration values.
    ///
    /// - `min_backoff_ms` must be greater than 0
    /// - `max_backoff_ms` must not be below `min_backoff_ms`
    /// - `connect_timeout_ms` must be greater than 0
    /// - `path` must not be blank
    pub fn validate(&self) -> Result<()> {
        if self.min_backoff_ms == 0 {
            return Err(ClientError::config_validation(
                "minBackoffMs must be greater than 0",
                "Set minBackoffMs to at least 1 in your tutorlink.json",
            ));
        }

        if self.max_backoff_ms < self.min_backoff_ms {
            return Err(ClientError::config_validation(
                format!(
                    "maxBackoffMs ({}) must not be smaller than minBackoffMs ({})",
                    self.max_backoff_ms, self.min_backoff_ms
                ),
                "Raise maxBackoffMs or lower minBackoffMs in your tutorlink.json",
            ));
        }

        if self.connect_timeout_ms == 0 {
            return Err(ClientError::config_validation(
                "connectTimeoutMs must be greater than 0",
                "Set connectTimeoutMs to at least 1 in your tutorlink.json",
            ));
        }

        if self.path.trim().trim_matches('/').is_empty() {
            return Err(ClientError::config_validation(
                "path must not be empty",
                "Provide an endpoint path such as \"/realtime\" in your tutorlink.json",
            ));
        }

        Ok(())
    }
}

/// Operating mode of the client.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
pub enum Mode {
    /// Connect live, falling back to demo replies on connectivity failure.
    #[default]
    Automatic,
    /// Connect live only; connectivity failures schedule plain reconnects.
    Live,
    /// Never open a transport; every reply is synthesized locally.
    Demo,
}

impl Mode {
    /// Parses a string into a `Mode`, case-insensitively.
    #[must_use]
    pub fn from_str_case_insensitive(s: &str) -> Option<Self> {
        match s.trim().to_lowercase().as_str() {
            "automatic" | "auto" => Some(Self::Automatic),
            "live" => Some(Self::Live),
            "demo" => Some(Self::Demo),
            _ => None,
        }
    }

    /// Canonical lowercase name.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Automatic => "automatic",
            Self::Live => "live",
            Self::Demo => "demo",
        }
    }
}

impl std::fmt::Display for Mode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl<'de> Deserialize<'de> for Mode {
    fn deserialize<D>(deserializer: D) -> std::result::Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        let s = String::deserialize(deserializer)?;
        Self::from_str_case_insensitive(&s).ok_or_else(|| {
            serde::de::Error::custom(format!(
                "invalid mode '{s}': expected one of 'automatic', 'live', 'demo'"
            ))
        })
    }
}

impl Serialize for Mode {
    fn serialize<S>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        serializer.serialize_str(self.as_str())
    }
}
