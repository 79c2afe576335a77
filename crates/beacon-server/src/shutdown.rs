//! Graceful shutdown coordination via `CancellationToken`.
//!
//! Sequence:
//! 1. Cancel the shutdown token (heartbeat stops, new upgrades get 503)
//! 2. Broadcast `system/shutdown`
//! 3. Close every open connection with 1000 "Server shutdown"
//! 4. Wait for tracked sessions, bounded by the timeout
//! 5. Cancel the force token for any stragglers
//! 6. Cancel the listener token so the HTTP server stops

use std::time::Duration;

use beacon_core::SystemPayload;
use beacon_core::constants::{NORMAL_CLOSURE, SHUTDOWN_CLOSE_REASON};
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::{info, warn};

use crate::broadcast::BroadcastEngine;

/// Extra time given to sessions after the force token fires.
const FORCE_GRACE: Duration = Duration::from_secs(1);

/// What a graceful shutdown did.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct ShutdownReport {
    /// Recipients of the `system/shutdown` notice.
    pub notified: usize,
    /// Connections sent a close frame.
    pub closed: usize,
    /// Whether the timeout elapsed and sessions were force-stopped.
    pub forced: bool,
}

/// Coordinates graceful shutdown across all server tasks.
#[derive(Debug, Default)]
pub struct ShutdownCoordinator {
    shutdown: CancellationToken,
    force: CancellationToken,
    listener: CancellationToken,
    sessions: TaskTracker,
}

impl ShutdownCoordinator {
    /// Create a new shutdown coordinator.
    pub fn new() -> Self {
        Self::default()
    }

    /// Token cancelled when shutdown begins.
    pub fn token(&self) -> CancellationToken {
        self.shutdown.clone()
    }

    /// Token cancelled when remaining sessions must stop immediately.
    pub fn force_token(&self) -> CancellationToken {
        self.force.clone()
    }

    /// Token cancelled once sessions are drained; stops the listener.
    pub fn listener_token(&self) -> CancellationToken {
        self.listener.clone()
    }

    /// Tracker every session task is registered with.
    pub fn sessions(&self) -> &TaskTracker {
        &self.sessions
    }

    /// Whether a shutdown has been initiated.
    pub fn is_shutting_down(&self) -> bool {
        self.shutdown.is_cancelled()
    }

    /// Perform a graceful shutdown of every connection.
    pub async fn graceful_shutdown(&self, engine: &BroadcastEngine, timeout: Duration) -> ShutdownReport {
        self.shutdown.cancel();
        let mut report = ShutdownReport {
            notified: engine.send_system(SystemPayload::shutdown()),
            ..ShutdownReport::default()
        };

        engine.registry().for_each(|conn, _| {
            if conn.close(NORMAL_CLOSURE, SHUTDOWN_CLOSE_REASON) {
                report.closed += 1;
            }
        });
        info!(
            notified = report.notified,
            closed = report.closed,
            timeout_ms = timeout.as_millis(),
            "waiting for sessions to finish"
        );

        let _ = self.sessions.close();
        if tokio::time::timeout(timeout, self.sessions.wait()).await.is_err() {
            report.forced = true;
            warn!(
                remaining = self.sessions.len(),
                "shutdown timed out after {timeout:?}, forcing remaining sessions closed"
            );
            self.force.cancel();
            if tokio::time::timeout(FORCE_GRACE, self.sessions.wait()).await.is_err() {
                warn!(remaining = self.sessions.len(), "sessions still running after force");
            }
        }

        self.listener.cancel();
        info!(forced = report.forced, "shutdown complete");
        report
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::connection::Outbound;
    use crate::registry::{ConnectionMetadata, ConnectionRegistry};
    use std::sync::Arc;
    use tokio::sync::mpsc;

    fn engine() -> BroadcastEngine {
        BroadcastEngine::new(Arc::new(ConnectionRegistry::new()))
    }

    #[test]
    fn initial_state_not_shutting_down() {
        let coord = ShutdownCoordinator::new();
        assert!(!coord.is_shutting_down());
        assert!(!coord.force_token().is_cancelled());
        assert!(!coord.listener_token().is_cancelled());
    }

    #[tokio::test]
    async fn empty_shutdown_cancels_everything_but_force() {
        let coord = ShutdownCoordinator::new();
        let report = coord.graceful_shutdown(&engine(), Duration::from_secs(1)).await;
        assert_eq!(report, ShutdownReport::default());
        assert!(coord.is_shutting_down());
        assert!(coord.listener_token().is_cancelled());
        assert!(!coord.force_token().is_cancelled());
    }

    #[tokio::test]
    async fn notifies_then_closes_each_connection() {
        let coord = ShutdownCoordinator::new();
        let engine = engine();
        let (tx, mut rx) = mpsc::channel(8);
        let _ = engine.registry().register(tx, ConnectionMetadata::default());

        let report = coord.graceful_shutdown(&engine, Duration::from_secs(1)).await;
        assert_eq!(report.notified, 1);
        assert_eq!(report.closed, 1);
        assert!(!report.forced);

        match rx.recv().await.unwrap() {
            Outbound::Frame(text) => {
                let v: serde_json::Value = serde_json::from_str(&text).unwrap();
                assert_eq!(v["type"], "system");
                assert_eq!(v["subtype"], "shutdown");
            }
            other => panic!("expected shutdown notice, got {other:?}"),
        }
        assert_eq!(
            rx.recv().await.unwrap(),
            Outbound::Close {
                code: 1000,
                reason: "Server shutdown".into()
            }
        );
    }

    #[tokio::test]
    async fn waits_for_tracked_sessions() {
        let coord = ShutdownCoordinator::new();
        let token = coord.token();
        let finished = Arc::new(std::sync::atomic::AtomicBool::new(false));
        let flag = finished.clone();
        let _ = coord.sessions().spawn(async move {
            token.cancelled().await;
            tokio::time::sleep(Duration::from_millis(20)).await;
            flag.store(true, std::sync::atomic::Ordering::SeqCst);
        });

        let report = coord.graceful_shutdown(&engine(), Duration::from_secs(5)).await;
        assert!(!report.forced);
        assert!(finished.load(std::sync::atomic::Ordering::SeqCst));
    }

    #[tokio::test(start_paused = true)]
    async fn stragglers_are_forced() {
        let coord = ShutdownCoordinator::new();
        let force = coord.force_token();
        let _ = coord.sessions().spawn(async move {
            // Ignores the graceful token; only the force token ends it.
            force.cancelled().await;
        });

        let report = coord.graceful_shutdown(&engine(), Duration::from_millis(100)).await;
        assert!(report.forced);
        assert!(coord.force_token().is_cancelled());
        assert!(coord.sessions().is_empty());
    }
}
