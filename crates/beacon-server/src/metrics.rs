//! Prometheus metrics recorder and `/metrics` rendering.

use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};
use tracing::info;

use crate::errors::ServerError;

/// Install the Prometheus metrics recorder (global).
///
/// Returns the handle used to render the `/metrics` endpoint. Call once at
/// startup before any metrics are recorded.
pub fn install_recorder() -> Result<PrometheusHandle, ServerError> {
    let handle = PrometheusBuilder::new()
        .install_recorder()
        .map_err(|e| ServerError::Metrics(e.to_string()))?;
    info!("prometheus metrics recorder installed");
    Ok(handle)
}

/// A handle backed by a recorder that is not installed globally.
///
/// Metrics recorded through the facade do not reach it; `/metrics` renders
/// empty. Used by tests and embedders that own their own recorder.
pub fn detached_handle() -> PrometheusHandle {
    PrometheusBuilder::new().build_recorder().handle()
}

// Metric name constants to avoid typos across modules.

/// Connections accepted (counter).
pub const CONNECTIONS_TOTAL: &str = "beacon_connections_total";
/// Connections closed (counter).
pub const DISCONNECTIONS_TOTAL: &str = "beacon_disconnections_total";
/// Live connections (gauge).
pub const CONNECTIONS_ACTIVE: &str = "beacon_connections_active";
/// Inbound client messages (counter, labels: kind).
pub const MESSAGES_RECEIVED_TOTAL: &str = "beacon_messages_received_total";
/// Frames that could not be queued (counter).
pub const BROADCAST_FAILURES_TOTAL: &str = "beacon_broadcast_failures_total";
/// Heartbeat notices emitted (counter).
pub const HEARTBEATS_TOTAL: &str = "beacon_heartbeats_total";
/// Connection lifetime (histogram).
pub const CONNECTION_DURATION_SECONDS: &str = "beacon_connection_duration_seconds";
