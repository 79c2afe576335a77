//! Per-connection send side of the hub.

use std::sync::Arc;
use std::sync::atomic::{AtomicU8, AtomicU64, Ordering};
use std::time::{Duration, Instant};

use beacon_core::ClientId;
use parking_lot::Mutex;
use tokio::sync::mpsc;

use crate::errors::SendError;

/// Item consumed by a connection's writer task.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Outbound {
    /// A serialized envelope, shared across every recipient of a broadcast.
    Frame(Arc<String>),
    /// Send a close frame and stop writing.
    Close {
        /// WebSocket close code.
        code: u16,
        /// Close reason.
        reason: String,
    },
}

/// Readiness of a transport.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[repr(u8)]
pub enum ReadyState {
    /// Accepting frames.
    Open = 0,
    /// A close frame is queued; no further frames are accepted.
    Closing = 1,
    /// Removed from the registry.
    Closed = 2,
}

impl ReadyState {
    fn from_u8(raw: u8) -> Self {
        match raw {
            0 => Self::Open,
            1 => Self::Closing,
            _ => Self::Closed,
        }
    }
}

/// Handle to a connected WebSocket client.
pub struct ClientConnection {
    /// Id assigned at registration.
    pub id: ClientId,
    /// Send channel to the client's WebSocket write task.
    tx: mpsc::Sender<Outbound>,
    state: AtomicU8,
    /// When this connection was established.
    pub connected_at: Instant,
    /// When the last Pong (or any activity) was received.
    last_pong: Mutex<Instant>,
    /// Count of messages dropped due to full channel.
    dropped_messages: AtomicU64,
}

impl ClientConnection {
    /// Create an open connection.
    pub fn new(id: ClientId, tx: mpsc::Sender<Outbound>) -> Self {
        let now = Instant::now();
        Self {
            id,
            tx,
            state: AtomicU8::new(ReadyState::Open as u8),
            connected_at: now,
            last_pong: Mutex::new(now),
            dropped_messages: AtomicU64::new(0),
        }
    }

    /// Current readiness.
    pub fn ready_state(&self) -> ReadyState {
        ReadyState::from_u8(self.state.load(Ordering::Acquire))
    }

    /// Whether frames are currently accepted.
    pub fn is_open(&self) -> bool {
        self.ready_state() == ReadyState::Open
    }

    /// Queue a serialized frame.
    ///
    /// A full queue increments the dropped message counter.
    pub fn send(&self, frame: Arc<String>) -> Result<(), SendError> {
        if !self.is_open() {
            return Err(SendError::NotOpen);
        }
        match self.tx.try_send(Outbound::Frame(frame)) {
            Ok(()) => Ok(()),
            Err(mpsc::error::TrySendError::Full(_)) => {
                let _ = self.dropped_messages.fetch_add(1, Ordering::Relaxed);
                Err(SendError::Full)
            }
            Err(mpsc::error::TrySendError::Closed(_)) => Err(SendError::Closed),
        }
    }

    /// Move to `Closing` and queue a close frame.
    ///
    /// Returns `false` if the connection was not open or the frame could not
    /// be queued.
    pub fn close(&self, code: u16, reason: &str) -> bool {
        let was_open = self
            .state
            .compare_exchange(
                ReadyState::Open as u8,
                ReadyState::Closing as u8,
                Ordering::AcqRel,
                Ordering::Acquire,
            )
            .is_ok();
        if !was_open {
            return false;
        }
        self.tx
            .try_send(Outbound::Close {
                code,
                reason: reason.to_owned(),
            })
            .is_ok()
    }

    pub(crate) fn mark_closed(&self) {
        self.state.store(ReadyState::Closed as u8, Ordering::Release);
    }

    /// Record a pong (or any inbound activity).
    pub fn mark_alive(&self) {
        *self.last_pong.lock() = Instant::now();
    }

    /// Duration since the last pong (or connection establishment).
    pub fn last_pong_elapsed(&self) -> Duration {
        self.last_pong.lock().elapsed()
    }

    /// Total messages dropped for this connection.
    pub fn drop_count(&self) -> u64 {
        self.dropped_messages.load(Ordering::Relaxed)
    }

    /// Connection age.
    pub fn age(&self) -> Duration {
        self.connected_at.elapsed()
    }
}

impl std::fmt::Debug for ClientConnection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ClientConnection")
            .field("id", &self.id)
            .field("state", &self.ready_state())
            .finish_non_exhaustive()
    }
}
