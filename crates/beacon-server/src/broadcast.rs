//! Envelope fan-out to connected clients.
//!
//! Every hub event (accept, message, close, system notice) runs under the
//! engine's event gate, so membership changes and fan-outs never interleave.
//! A client therefore sees its `welcome` before anything else, and
//! `totalClients` values reach each peer in increasing registration order.

use std::sync::Arc;

use beacon_core::{ClientId, Envelope, SystemPayload};
use metrics::counter;
use parking_lot::{Mutex, MutexGuard};
use tracing::{debug, warn};

use crate::connection::ClientConnection;
use crate::metrics::BROADCAST_FAILURES_TOTAL;
use crate::registry::ConnectionRegistry;

/// Serializes envelopes once and queues them on every recipient.
#[derive(Debug)]
pub struct BroadcastEngine {
    registry: Arc<ConnectionRegistry>,
    gate: Mutex<()>,
}

/// Proof that the event gate is held. Fan-out under the gate goes through
/// this, which keeps the gate from being taken twice.
pub struct EventGuard<'a> {
    engine: &'a BroadcastEngine,
    _held: MutexGuard<'a, ()>,
}

impl std::fmt::Debug for EventGuard<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EventGuard").finish_non_exhaustive()
    }
}

impl EventGuard<'_> {
    /// Send `envelope` to every open connection except `exclude`.
    pub fn broadcast(&self, envelope: &Envelope, exclude: Option<&ClientId>) -> usize {
        self.engine.fan_out(envelope, exclude)
    }

    /// Send `envelope` to one connection.
    pub fn send_to(&self, conn: &ClientConnection, envelope: &Envelope) -> bool {
        self.engine.send_to(conn, envelope)
    }
}

impl BroadcastEngine {
    /// Create an engine over `registry`.
    pub fn new(registry: Arc<ConnectionRegistry>) -> Self {
        Self {
            registry,
            gate: Mutex::new(()),
        }
    }

    /// Take the event gate for the duration of one hub event.
    ///
    /// Not reentrant: call the guard's methods rather than the engine's
    /// `broadcast`/`send_system` while holding it.
    pub fn begin_event(&self) -> EventGuard<'_> {
        EventGuard {
            engine: self,
            _held: self.gate.lock(),
        }
    }

    /// The registry this engine sends to.
    pub fn registry(&self) -> &Arc<ConnectionRegistry> {
        &self.registry
    }

    /// Send `envelope` to every open connection except `exclude`.
    ///
    /// Returns the number of successful sends. A failed send is logged and
    /// counted but never stops the loop or removes the connection.
    pub fn broadcast(&self, envelope: &Envelope, exclude: Option<&ClientId>) -> usize {
        let _event = self.begin_event();
        self.fan_out(envelope, exclude)
    }

    fn fan_out(&self, envelope: &Envelope, exclude: Option<&ClientId>) -> usize {
        let Some(frame) = serialize(envelope) else {
            return 0;
        };

        let mut sent = 0;
        let mut failed = 0;
        for conn in self.registry.connections() {
            if exclude == Some(&conn.id) || !conn.is_open() {
                continue;
            }
            match conn.send(frame.clone()) {
                Ok(()) => sent += 1,
                Err(error) => {
                    failed += 1;
                    counter!(BROADCAST_FAILURES_TOTAL).increment(1);
                    warn!(client_id = %conn.id, kind = envelope.kind(), %error, "failed to send to client");
                }
            }
        }
        debug!(kind = envelope.kind(), recipients = sent, failed, "broadcast");
        sent
    }

    /// Send `envelope` to one connection.
    pub fn send_to(&self, conn: &ClientConnection, envelope: &Envelope) -> bool {
        let Some(frame) = serialize(envelope) else {
            return false;
        };
        match conn.send(frame) {
            Ok(()) => true,
            Err(error) => {
                counter!(BROADCAST_FAILURES_TOTAL).increment(1);
                warn!(client_id = %conn.id, kind = envelope.kind(), %error, "failed to send to client");
                false
            }
        }
    }

    /// Broadcast a `system` notice stamped with the current connection count.
    ///
    /// The count and the recipient set come from the same gated moment.
    pub fn send_system(&self, payload: SystemPayload) -> usize {
        let subtype = payload.subtype();
        let event = self.begin_event();
        let envelope = Envelope::system(payload, self.registry.size());
        let sent = event.broadcast(&envelope, None);
        drop(event);
        debug!(subtype, recipients = sent, "system notice sent");
        sent
    }
}

fn serialize(envelope: &Envelope) -> Option<Arc<String>> {
    match envelope.to_json() {
        Ok(json) => Some(Arc::new(json)),
        Err(error) => {
            warn!(kind = envelope.kind(), %error, "failed to serialize envelope");
            None
        }
    }
}
