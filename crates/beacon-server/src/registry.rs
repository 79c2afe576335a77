//! Connection registry: the single source of truth for who is connected.
//!
//! Registration allocates the id and builds the [`ClientConnection`] handle
//! under the write lock, so an id never exists without its handle and vice
//! versa. Unregistration flips the handle to `Closed` under the same lock;
//! broadcasters that took a snapshot just before will see the flip and skip
//! the connection.

use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::Arc;

use beacon_core::constants::UNKNOWN_USER_AGENT;
use beacon_core::{ClientId, IdGenerator};
use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use serde::Serialize;
use tokio::sync::mpsc;

use crate::connection::{ClientConnection, Outbound};

/// What the transport layer knows about a peer at accept time.
#[derive(Clone, Debug, Default)]
pub struct ConnectionMetadata {
    /// Peer socket address, when the listener exposes it.
    pub remote_address: Option<SocketAddr>,
    /// `User-Agent` header, when sent.
    pub user_agent: Option<String>,
}

/// Bookkeeping kept for each live connection.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ConnectionRecord {
    /// Connection id.
    pub id: ClientId,
    /// Accept time.
    pub connected_at: DateTime<Utc>,
    /// Peer address.
    pub remote_address: Option<SocketAddr>,
    /// Peer user agent, `"Unknown"` when absent.
    pub user_agent: String,
}

/// Result of [`ConnectionRegistry::register`].
#[derive(Debug)]
pub struct Registered {
    /// Handle carrying the freshly allocated id.
    pub connection: Arc<ClientConnection>,
    /// Registry size including the new connection.
    pub total: usize,
}

/// Result of [`ConnectionRegistry::unregister`].
#[derive(Debug)]
pub struct Unregistered {
    /// The removed handle, now marked closed.
    pub connection: Arc<ClientConnection>,
    /// The removed record.
    pub record: ConnectionRecord,
    /// Registry size after removal.
    pub remaining: usize,
}

struct Entry {
    connection: Arc<ClientConnection>,
    record: ConnectionRecord,
}

/// Live connections keyed by id.
#[derive(Default)]
pub struct ConnectionRegistry {
    entries: RwLock<HashMap<ClientId, Entry>>,
    ids: IdGenerator,
}

impl ConnectionRegistry {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a transport and allocate its id.
    pub fn register(&self, tx: mpsc::Sender<Outbound>, metadata: ConnectionMetadata) -> Registered {
        let id = self.ids.next_id();
        let connection = Arc::new(ClientConnection::new(id.clone(), tx));
        let record = ConnectionRecord {
            id: id.clone(),
            connected_at: Utc::now(),
            remote_address: metadata.remote_address,
            user_agent: metadata
                .user_agent
                .filter(|ua| !ua.is_empty())
                .unwrap_or_else(|| UNKNOWN_USER_AGENT.to_string()),
        };

        let mut entries = self.entries.write();
        let _ = entries.insert(
            id,
            Entry {
                connection: connection.clone(),
                record,
            },
        );
        Registered {
            connection,
            total: entries.len(),
        }
    }

    /// Remove a connection. Returns `None` if it was already gone.
    pub fn unregister(&self, id: &ClientId) -> Option<Unregistered> {
        let mut entries = self.entries.write();
        let entry = entries.remove(id)?;
        entry.connection.mark_closed();
        Some(Unregistered {
            connection: entry.connection,
            record: entry.record,
            remaining: entries.len(),
        })
    }

    /// Number of live connections.
    pub fn size(&self) -> usize {
        self.entries.read().len()
    }

    /// Whether no connection is registered.
    pub fn is_empty(&self) -> bool {
        self.entries.read().is_empty()
    }

    /// Look up a connection handle.
    pub fn get(&self, id: &ClientId) -> Option<Arc<ClientConnection>> {
        self.entries.read().get(id).map(|e| e.connection.clone())
    }

    /// Snapshot of every connection handle.
    pub fn connections(&self) -> Vec<Arc<ClientConnection>> {
        self.entries
            .read()
            .values()
            .map(|e| e.connection.clone())
            .collect()
    }

    /// Snapshot of every record, oldest first.
    pub fn records(&self) -> Vec<ConnectionRecord> {
        let mut records: Vec<_> = self.entries.read().values().map(|e| e.record.clone()).collect();
        records.sort_by_key(|r| r.connected_at);
        records
    }

    /// Visit a snapshot of `(connection, record)` pairs.
    ///
    /// The lock is released before the first visit, so the visitor may call
    /// back into the registry.
    pub fn for_each<F>(&self, mut visit: F)
    where
        F: FnMut(&Arc<ClientConnection>, &ConnectionRecord),
    {
        let snapshot: Vec<(Arc<ClientConnection>, ConnectionRecord)> = self
            .entries
            .read()
            .values()
            .map(|e| (e.connection.clone(), e.record.clone()))
            .collect();
        for (connection, record) in &snapshot {
            visit(connection, record);
        }
    }
}

impl std::fmt::Debug for ConnectionRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConnectionRegistry")
            .field("size", &self.size())
            .field("issued", &self.ids.issued())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::connection::ReadyState;

    fn register(registry: &ConnectionRegistry) -> (Registered, mpsc::Receiver<Outbound>) {
        let (tx, rx) = mpsc::channel(8);
        (registry.register(tx, ConnectionMetadata::default()), rx)
    }

    #[test]
    fn register_returns_running_total() {
        let registry = ConnectionRegistry::new();
        let (a, _ra) = register(&registry);
        let (b, _rb) = register(&registry);
        assert_eq!(a.total, 1);
        assert_eq!(b.total, 2);
        assert_eq!(registry.size(), 2);
        assert_ne!(a.connection.id, b.connection.id);
    }

    #[test]
    fn unregister_is_idempotent() {
        let registry = ConnectionRegistry::new();
        let (a, _ra) = register(&registry);
        let (_b, _rb) = register(&registry);

        let removed = registry.unregister(&a.connection.id).unwrap();
        assert_eq!(removed.record.id, a.connection.id);
        assert_eq!(removed.remaining, 1);
        assert!(registry.unregister(&a.connection.id).is_none());
        assert_eq!(registry.size(), 1);
    }

    #[test]
    fn unregister_marks_closed() {
        let registry = ConnectionRegistry::new();
        let (a, _ra) = register(&registry);
        let _ = registry.unregister(&a.connection.id);
        assert_eq!(a.connection.ready_state(), ReadyState::Closed);
    }

    #[test]
    fn user_agent_defaults_to_unknown() {
        let registry = ConnectionRegistry::new();
        let (a, _ra) = register(&registry);
        let (tx, _rb) = mpsc::channel(1);
        let b = registry.register(
            tx,
            ConnectionMetadata {
                remote_address: Some("10.0.0.1:5000".parse().unwrap()),
                user_agent: Some("test-agent/1.0".into()),
            },
        );

        let records = registry.records();
        let rec_a = records.iter().find(|r| r.id == a.connection.id).unwrap();
        let rec_b = records.iter().find(|r| r.id == b.connection.id).unwrap();
        assert_eq!(rec_a.user_agent, "Unknown");
        assert!(rec_a.remote_address.is_none());
        assert_eq!(rec_b.user_agent, "test-agent/1.0");
        assert_eq!(rec_b.remote_address.unwrap().port(), 5000);
    }

    #[test]
    fn get_finds_live_connection_only() {
        let registry = ConnectionRegistry::new();
        let (a, _ra) = register(&registry);
        assert!(registry.get(&a.connection.id).is_some());
        let _ = registry.unregister(&a.connection.id);
        assert!(registry.get(&a.connection.id).is_none());
    }

    #[test]
    fn for_each_tolerates_mutation() {
        let registry = ConnectionRegistry::new();
        let mut receivers = Vec::new();
        for _ in 0..4 {
            let (_, rx) = register(&registry);
            receivers.push(rx);
        }

        let mut visited = 0;
        registry.for_each(|conn, record| {
            assert_eq!(conn.id, record.id);
            let _ = registry.unregister(&conn.id);
            visited += 1;
        });
        assert_eq!(visited, 4);
        assert!(registry.is_empty());
    }

    #[test]
    fn size_tracks_every_operation() {
        let registry = ConnectionRegistry::new();
        let mut live = Vec::new();
        for i in 0..10 {
            let (reg, rx) = register(&registry);
            live.push((reg.connection.id.clone(), rx));
            assert_eq!(registry.size(), i + 1);
        }
        while let Some((id, _rx)) = live.pop() {
            let removed = registry.unregister(&id).unwrap();
            assert_eq!(removed.remaining, live.len());
            assert_eq!(registry.size(), live.len());
        }
    }
}
