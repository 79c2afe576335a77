//! Hub settings.

use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Hub network and runtime settings.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ServerSettings {
    /// Bind address.
    pub host: String,
    /// Listen port.
    pub port: u16,
    /// Period of `system/heartbeat` notices and transport pings.
    pub heartbeat_interval_ms: u64,
    /// A connection whose last pong is older than this is closed.
    pub pong_timeout_ms: u64,
    /// How long shutdown waits for sessions before force-closing them.
    pub shutdown_timeout_ms: u64,
    /// Per-connection outbound queue depth.
    pub send_queue_capacity: usize,
    /// Largest inbound frame accepted, in bytes.
    pub max_message_size: usize,
}

impl Default for ServerSettings {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 8080,
            heartbeat_interval_ms: 30_000,
            pong_timeout_ms: 90_000,
            shutdown_timeout_ms: 5_000,
            send_queue_capacity: 1024,
            max_message_size: 16 * 1024 * 1024,
        }
    }
}

impl ServerSettings {
    /// Heartbeat period.
    pub fn heartbeat_interval(&self) -> Duration {
        Duration::from_millis(self.heartbeat_interval_ms)
    }

    /// Pong timeout.
    pub fn pong_timeout(&self) -> Duration {
        Duration::from_millis(self.pong_timeout_ms)
    }

    /// Shutdown drain timeout.
    pub fn shutdown_timeout(&self) -> Duration {
        Duration::from_millis(self.shutdown_timeout_ms)
    }

    /// `host:port` as a bind string.
    pub fn bind_address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}
