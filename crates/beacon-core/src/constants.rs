//! Protocol and timing constants shared by server and client.

use std::time::Duration;

/// Package version (sourced from Cargo.toml).
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// WebSocket close code for a normal, deliberate closure.
pub const NORMAL_CLOSURE: u16 = 1000;

/// Close reason sent to every connection when the hub shuts down.
pub const SHUTDOWN_CLOSE_REASON: &str = "Server shutdown";

/// Close reason sent by a client that disconnects on purpose.
pub const CLIENT_CLOSE_REASON: &str = "Manual disconnect";

/// Default listening port.
pub const DEFAULT_PORT: u16 = 8080;

/// Path of the WebSocket endpoint.
pub const WS_PATH: &str = "/ws";

/// Default period of the system heartbeat.
pub const DEFAULT_HEARTBEAT_INTERVAL: Duration = Duration::from_secs(30);

/// Default number of reconnect attempts before a client gives up.
pub const DEFAULT_MAX_RECONNECT_ATTEMPTS: u32 = 5;

/// Default delay between reconnect attempts.
pub const DEFAULT_RECONNECT_INTERVAL: Duration = Duration::from_millis(3000);

/// Placeholder recorded when a client sends no `User-Agent` header.
pub const UNKNOWN_USER_AGENT: &str = "Unknown";
