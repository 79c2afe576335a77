//! Connection lifecycle events: accept, message, close, error.
//!
//! Each method is synchronous and touches only the registry and the
//! broadcast engine, so the session driver can call [`LifecycleHandler::on_close`]
//! from a drop guard. Each event holds the engine's event gate from the
//! registry change through its last send.

use std::fmt::Display;
use std::sync::Arc;

use beacon_core::{ClientId, Envelope, Inbound};
use metrics::{counter, gauge, histogram};
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use crate::broadcast::BroadcastEngine;
use crate::connection::{ClientConnection, Outbound};
use crate::metrics::{
    CONNECTION_DURATION_SECONDS, CONNECTIONS_ACTIVE, CONNECTIONS_TOTAL, DISCONNECTIONS_TOTAL,
    MESSAGES_RECEIVED_TOTAL,
};
use crate::registry::{ConnectionMetadata, ConnectionRecord, ConnectionRegistry};

/// Applies connection events to the registry and fans out the resulting
/// envelopes.
#[derive(Debug)]
pub struct LifecycleHandler {
    registry: Arc<ConnectionRegistry>,
    engine: Arc<BroadcastEngine>,
}

impl LifecycleHandler {
    /// Create a handler sharing `engine`'s registry.
    pub fn new(engine: Arc<BroadcastEngine>) -> Self {
        Self {
            registry: engine.registry().clone(),
            engine,
        }
    }

    /// The registry.
    pub fn registry(&self) -> &Arc<ConnectionRegistry> {
        &self.registry
    }

    /// The broadcast engine.
    pub fn engine(&self) -> &Arc<BroadcastEngine> {
        &self.engine
    }

    /// Register a new transport, greet it, and announce it to everyone else.
    pub fn on_accept(
        &self,
        tx: mpsc::Sender<Outbound>,
        metadata: ConnectionMetadata,
    ) -> Arc<ClientConnection> {
        let event = self.engine.begin_event();
        let registered = self.registry.register(tx, metadata);
        let conn = registered.connection;
        let total = registered.total;

        counter!(CONNECTIONS_TOTAL).increment(1);
        gauge!(CONNECTIONS_ACTIVE).increment(1.0);
        info!(client_id = %conn.id, total, "client connected");

        let _ = event.send_to(&conn, &Envelope::welcome(conn.id.clone(), total));
        let announced = event.broadcast(
            &Envelope::client_connected(conn.id.clone(), total),
            Some(&conn.id),
        );
        debug!(client_id = %conn.id, recipients = announced, "announced new client");
        conn
    }

    /// Echo an inbound frame to its sender and relay it to everyone else.
    ///
    /// Frames that parse as JSON travel as structured data; anything else is
    /// carried as the raw string.
    pub fn on_message(&self, conn: &ClientConnection, raw: &str) {
        let inbound = Inbound::parse(raw);
        let kind = if inbound.is_structured() { "structured" } else { "text" };
        counter!(MESSAGES_RECEIVED_TOTAL, "kind" => kind).increment(1);
        debug!(client_id = %conn.id, kind, len = raw.len(), "message received");

        let echo = Envelope::echo(conn.id.clone(), inbound.clone());
        let relay = Envelope::broadcast(conn.id.clone(), inbound);

        let event = self.engine.begin_event();
        let _ = event.send_to(conn, &echo);
        let recipients = event.broadcast(&relay, Some(&conn.id));
        drop(event);
        debug!(client_id = %conn.id, recipients, "message relayed");
    }

    /// Unregister a connection and announce its departure.
    ///
    /// Repeat calls for the same id do nothing and return `None`.
    pub fn on_close(&self, id: &ClientId) -> Option<ConnectionRecord> {
        let event = self.engine.begin_event();
        let removed = self.registry.unregister(id)?;
        let remaining = removed.remaining;

        counter!(DISCONNECTIONS_TOTAL).increment(1);
        gauge!(CONNECTIONS_ACTIVE).decrement(1.0);
        histogram!(CONNECTION_DURATION_SECONDS).record(removed.connection.age().as_secs_f64());
        info!(client_id = %id, total = remaining, "client disconnected");

        let _ = event.broadcast(&Envelope::client_disconnected(id.clone(), remaining), None);
        Some(removed.record)
    }

    /// Record a transport error. The registry is left untouched.
    pub fn on_error(&self, id: &ClientId, error: &dyn Display) {
        warn!(client_id = %id, %error, "websocket error");
    }
}
