//! Periodic `system/heartbeat` notices.

use std::sync::Arc;
use std::time::Duration;

use beacon_core::{MemoryUsage, SystemPayload};
use metrics::counter;
use sysinfo::{ProcessesToUpdate, System};
use tokio::time::{self, Instant};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use crate::broadcast::BroadcastEngine;
use crate::metrics::HEARTBEATS_TOTAL;

/// Emits a heartbeat to every connection on a fixed period.
#[derive(Debug)]
pub struct HeartbeatScheduler {
    engine: Arc<BroadcastEngine>,
    interval: Duration,
    started: Instant,
}

impl HeartbeatScheduler {
    /// Create a scheduler; uptime is measured from now.
    pub fn new(engine: Arc<BroadcastEngine>, interval: Duration) -> Self {
        Self {
            engine,
            interval,
            started: Instant::now(),
        }
    }

    /// Create a scheduler whose uptime is measured from `started`.
    pub fn with_start(engine: Arc<BroadcastEngine>, interval: Duration, started: Instant) -> Self {
        Self {
            engine,
            interval,
            started,
        }
    }

    /// Emit one heartbeat unless the registry is empty.
    ///
    /// Returns the number of recipients (0 when skipped).
    pub fn tick(&self) -> usize {
        if self.engine.registry().is_empty() {
            debug!("no connections, skipping heartbeat");
            return 0;
        }
        let uptime = self.started.elapsed().as_secs_f64();
        let sent = self
            .engine
            .send_system(SystemPayload::heartbeat(uptime, process_memory()));
        counter!(HEARTBEATS_TOTAL).increment(1);
        sent
    }

    /// Tick every period until `cancel` fires. The first tick comes one full
    /// period after the call.
    pub async fn run(self, cancel: CancellationToken) {
        let mut ticker = time::interval_at(Instant::now() + self.interval, self.interval);
        info!(interval_ms = self.interval.as_millis(), "heartbeat started");
        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    let _ = self.tick();
                }
                () = cancel.cancelled() => {
                    info!("heartbeat stopped");
                    return;
                }
            }
        }
    }
}

/// Resident memory of this process, or zeros when the platform can't say.
pub fn process_memory() -> MemoryUsage {
    let Ok(pid) = sysinfo::get_current_pid() else {
        return MemoryUsage::default();
    };
    let mut system = System::new();
    let _ = system.refresh_processes(ProcessesToUpdate::Some(&[pid]), false);
    MemoryUsage {
        rss: system.process(pid).map_or(0, sysinfo::Process::memory),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::connection::Outbound;
    use crate::registry::{ConnectionMetadata, ConnectionRegistry};
    use serde_json::Value;
    use tokio::sync::mpsc;

    const PERIOD: Duration = Duration::from_secs(30);

    fn engine() -> Arc<BroadcastEngine> {
        Arc::new(BroadcastEngine::new(Arc::new(ConnectionRegistry::new())))
    }

    fn heartbeats(rx: &mut mpsc::Receiver<Outbound>) -> Vec<Value> {
        let mut out = Vec::new();
        while let Ok(Outbound::Frame(text)) = rx.try_recv() {
            out.push(serde_json::from_str(&text).unwrap());
        }
        out
    }

    #[test]
    fn tick_skips_empty_registry() {
        let scheduler = HeartbeatScheduler::new(engine(), PERIOD);
        assert_eq!(scheduler.tick(), 0);
    }

    #[tokio::test]
    async fn tick_reaches_every_connection() {
        let engine = engine();
        let (tx, mut rx) = mpsc::channel(8);
        let _ = engine.registry().register(tx, ConnectionMetadata::default());
        let (tx2, _rx2) = mpsc::channel(8);
        let _ = engine.registry().register(tx2, ConnectionMetadata::default());

        let scheduler = HeartbeatScheduler::new(engine, PERIOD);
        assert_eq!(scheduler.tick(), 2);

        let frames = heartbeats(&mut rx);
        assert_eq!(frames.len(), 1);
        assert_eq!(frames[0]["subtype"], "heartbeat");
        assert_eq!(frames[0]["activeConnections"], 2);
        assert!(frames[0]["data"]["uptime"].is_number());
        assert!(frames[0]["data"]["memory"]["rss"].is_u64());
    }

    #[test]
    fn process_memory_reports_resident_set() {
        // Every supported test platform exposes RSS for the current process.
        assert!(process_memory().rss > 0);
    }

    #[tokio::test(start_paused = true)]
    async fn first_tick_after_one_period() {
        let engine = engine();
        let (tx, mut rx) = mpsc::channel(8);
        let _ = engine.registry().register(tx, ConnectionMetadata::default());

        let cancel = CancellationToken::new();
        let handle = tokio::spawn(HeartbeatScheduler::new(engine, PERIOD).run(cancel.clone()));

        time::sleep(PERIOD - Duration::from_millis(1)).await;
        assert!(heartbeats(&mut rx).is_empty());

        time::sleep(Duration::from_millis(2)).await;
        assert_eq!(heartbeats(&mut rx).len(), 1);

        time::sleep(PERIOD * 2).await;
        assert_eq!(heartbeats(&mut rx).len(), 2);

        cancel.cancel();
        handle.await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn uptime_grows_with_ticks() {
        let engine = engine();
        let (tx, mut rx) = mpsc::channel(8);
        let _ = engine.registry().register(tx, ConnectionMetadata::default());

        let cancel = CancellationToken::new();
        let handle = tokio::spawn(HeartbeatScheduler::new(engine, PERIOD).run(cancel.clone()));

        time::sleep(PERIOD * 2 + Duration::from_millis(1)).await;
        let frames = heartbeats(&mut rx);
        assert_eq!(frames.len(), 2);
        let first = frames[0]["data"]["uptime"].as_f64().unwrap();
        let second = frames[1]["data"]["uptime"].as_f64().unwrap();
        assert!(first >= 30.0);
        assert!(second >= first + 29.0);

        cancel.cancel();
        handle.await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn empty_registry_gets_nothing_until_someone_joins() {
        let engine = engine();
        let cancel = CancellationToken::new();
        let handle = tokio::spawn(HeartbeatScheduler::new(engine.clone(), PERIOD).run(cancel.clone()));

        time::sleep(PERIOD * 3 + Duration::from_millis(1)).await;
        let (tx, mut rx) = mpsc::channel(8);
        let _ = engine.registry().register(tx, ConnectionMetadata::default());
        assert!(heartbeats(&mut rx).is_empty());

        time::sleep(PERIOD).await;
        assert_eq!(heartbeats(&mut rx).len(), 1);

        cancel.cancel();
        handle.await.unwrap();
    }

    #[tokio::test]
    async fn cancel_stops_loop() {
        let cancel = CancellationToken::new();
        let handle = tokio::spawn(HeartbeatScheduler::new(engine(), PERIOD).run(cancel.clone()));
        cancel.cancel();
        handle.await.unwrap();
    }
}
