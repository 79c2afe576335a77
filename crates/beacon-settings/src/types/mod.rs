//! Settings types.
//!
//! All structs use `#[serde(rename_all = "camelCase", default)]` so a settings
//! file may name any subset of fields.

mod client;
mod logging;
mod server;

pub use client::ClientSettings;
pub use logging::{LogFormat, LoggingSettings};
pub use server::ServerSettings;

use serde::{Deserialize, Serialize};

use crate::errors::{Result, SettingsError};

/// Root settings object.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct BeaconSettings {
    /// Hub settings.
    pub server: ServerSettings,
    /// Client settings.
    pub client: ClientSettings,
    /// Log output settings.
    pub logging: LoggingSettings,
}

impl BeaconSettings {
    /// Reject values no component can run with.
    pub fn validate(&self) -> Result<()> {
        if self.server.port == 0 {
            return Err(SettingsError::InvalidValue("server.port must be non-zero".into()));
        }
        if self.server.heartbeat_interval_ms == 0 {
            return Err(SettingsError::InvalidValue(
                "server.heartbeatIntervalMs must be non-zero".into(),
            ));
        }
        if self.server.send_queue_capacity == 0 {
            return Err(SettingsError::InvalidValue(
                "server.sendQueueCapacity must be non-zero".into(),
            ));
        }
        if self.client.reconnect_interval_ms == 0 {
            return Err(SettingsError::InvalidValue(
                "client.reconnectIntervalMs must be non-zero".into(),
            ));
        }
        Ok(())
    }
}
