//! Server configuration.

use std::time::Duration;

use beacon_settings::ServerSettings;

/// Runtime configuration for [`crate::server::BeaconServer`].
#[derive(Clone, Debug)]
pub struct ServerConfig {
    /// Host to bind (default `"127.0.0.1"`).
    pub host: String,
    /// Port to bind (default `0` for auto-assign).
    pub port: u16,
    /// Period of `system/heartbeat` notices and transport pings.
    pub heartbeat_interval: Duration,
    /// Close a connection whose last pong is older than this.
    pub pong_timeout: Duration,
    /// How long shutdown waits for sessions before force-closing them.
    pub shutdown_timeout: Duration,
    /// Per-connection outbound queue depth.
    pub send_queue_capacity: usize,
    /// Max WebSocket message size in bytes.
    pub max_message_size: usize,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".into(),
            port: 0,
            heartbeat_interval: Duration::from_secs(30),
            pong_timeout: Duration::from_secs(90),
            shutdown_timeout: Duration::from_secs(5),
            send_queue_capacity: 1024,
            max_message_size: 16 * 1024 * 1024, // 16 MB
        }
    }
}

impl From<&ServerSettings> for ServerConfig {
    fn from(settings: &ServerSettings) -> Self {
        Self {
            host: settings.host.clone(),
            port: settings.port,
            heartbeat_interval: settings.heartbeat_interval(),
            pong_timeout: settings.pong_timeout(),
            shutdown_timeout: settings.shutdown_timeout(),
            send_queue_capacity: settings.send_queue_capacity,
            max_message_size: settings.max_message_size,
        }
    }
}

impl ServerConfig {
    /// `host:port` as a bind string.
    pub fn bind_address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}
