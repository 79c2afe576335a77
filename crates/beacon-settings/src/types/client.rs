//! Client settings.

use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Settings for the reconnecting client.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ClientSettings {
    /// Hub WebSocket endpoint.
    pub url: String,
    /// Reconnect attempts allowed after an unclean close.
    pub max_reconnect_attempts: u32,
    /// Fixed delay before each reconnect attempt.
    pub reconnect_interval_ms: u64,
    /// Oldest message records are dropped past this many.
    pub message_log_capacity: usize,
}

impl Default for ClientSettings {
    fn default() -> Self {
        Self {
            url: "ws://127.0.0.1:8080/ws".to_string(),
            max_reconnect_attempts: 5,
            reconnect_interval_ms: 3000,
            message_log_capacity: 1000,
        }
    }
}

impl ClientSettings {
    /// Reconnect delay.
    pub fn reconnect_interval(&self) -> Duration {
        Duration::from_millis(self.reconnect_interval_ms)
    }
}
