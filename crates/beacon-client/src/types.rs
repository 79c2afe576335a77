//! Client-side value types.

use std::time::Duration;

use beacon_core::constants::{DEFAULT_MAX_RECONNECT_ATTEMPTS, DEFAULT_RECONNECT_INTERVAL};
use beacon_settings::ClientSettings;
use serde::Serialize;
use serde_json::Value;

use crate::machine::{Phase, ReconnectPolicy};

/// Options fixed at `initialize`.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ClientOptions {
    /// Hub WebSocket endpoint.
    pub url: String,
    /// Reconnect attempts allowed after an unclean close.
    pub max_reconnect_attempts: u32,
    /// Fixed delay before each reconnect attempt.
    pub reconnect_interval: Duration,
    /// Oldest records are dropped past this many.
    pub message_log_capacity: usize,
}

impl Default for ClientOptions {
    fn default() -> Self {
        Self {
            url: "ws://127.0.0.1:8080/ws".to_string(),
            max_reconnect_attempts: DEFAULT_MAX_RECONNECT_ATTEMPTS,
            reconnect_interval: DEFAULT_RECONNECT_INTERVAL,
            message_log_capacity: 1000,
        }
    }
}

impl ClientOptions {
    /// Default options for `url`.
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            ..Self::default()
        }
    }

    /// Retry limits derived from these options.
    pub fn policy(&self) -> ReconnectPolicy {
        ReconnectPolicy {
            max_attempts: self.max_reconnect_attempts,
            interval: self.reconnect_interval,
        }
    }
}

impl From<&ClientSettings> for ClientOptions {
    fn from(settings: &ClientSettings) -> Self {
        Self {
            url: settings.url.clone(),
            max_reconnect_attempts: settings.max_reconnect_attempts,
            reconnect_interval: settings.reconnect_interval(),
            message_log_capacity: settings.message_log_capacity,
        }
    }
}

/// Kind of a logged message.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum RecordKind {
    /// Inbound frame that parsed as JSON.
    Message,
    /// Inbound frame that did not parse.
    Text,
    /// Outbound frame.
    Sent,
}

/// One entry of the client message log.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct MessageRecord {
    /// Record kind.
    #[serde(rename = "type")]
    pub kind: RecordKind,
    /// Parsed JSON, or the raw string.
    pub data: Value,
    /// Local time the record was made (ms since epoch).
    pub timestamp: i64,
}

/// Outbound payload.
#[derive(Clone, Debug, PartialEq)]
pub enum Payload {
    /// Sent verbatim.
    Text(String),
    /// JSON-encoded before sending.
    Json(Value),
}

impl Payload {
    pub(crate) fn encode(&self) -> String {
        match self {
            Self::Text(text) => text.clone(),
            Self::Json(value) => value.to_string(),
        }
    }

    pub(crate) fn into_value(self) -> Value {
        match self {
            Self::Text(text) => Value::String(text),
            Self::Json(value) => value,
        }
    }
}

impl From<String> for Payload {
    fn from(text: String) -> Self {
        Self::Text(text)
    }
}

impl From<&str> for Payload {
    fn from(text: &str) -> Self {
        Self::Text(text.to_owned())
    }
}

impl From<Value> for Payload {
    fn from(value: Value) -> Self {
        Self::Json(value)
    }
}

/// Snapshot published on every phase change.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ConnectionStatus {
    /// Current phase.
    pub phase: Phase,
    /// Reconnect attempts since the last open.
    pub reconnect_attempts: u32,
    /// Most recent error.
    pub last_error: Option<String>,
}

impl ConnectionStatus {
    /// Whether the socket is open.
    pub fn is_connected(&self) -> bool {
        self.phase == Phase::Connected
    }

    /// Whether a handshake is in flight.
    pub fn is_connecting(&self) -> bool {
        self.phase == Phase::Connecting
    }
}

/// Diagnostic summary of a client.
#[derive(Clone, Debug, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ConnectionStats {
    /// Whether the socket is open.
    pub is_connected: bool,
    /// Whether a handshake is in flight.
    pub is_connecting: bool,
    /// Current phase.
    pub phase: Phase,
    /// Reconnect attempts since the last open.
    pub reconnect_attempts: u32,
    /// Configured attempt budget.
    pub max_reconnect_attempts: u32,
    /// Records in the message log.
    pub total_messages: usize,
    /// Most recent error.
    pub last_error: Option<String>,
    /// Endpoint, once initialized.
    pub url: Option<String>,
}
