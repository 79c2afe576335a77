//! WebSocket session driver: one task per connected client from upgrade
//! through disconnect.

use std::sync::Arc;
use std::time::Duration;

use axum::extract::ws::{CloseFrame, Message, WebSocket};
use beacon_core::ClientId;
use beacon_core::constants::{NORMAL_CLOSURE, SHUTDOWN_CLOSE_REASON};
use futures::stream::{SplitSink, SplitStream};
use futures::{SinkExt, StreamExt};
use tokio::sync::mpsc;
use tokio::time::{self, Instant};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument, warn};

use crate::connection::{ClientConnection, Outbound};
use crate::lifecycle::LifecycleHandler;
use crate::registry::ConnectionMetadata;

/// How long a finished session waits for its writer to flush.
const WRITER_GRACE: Duration = Duration::from_secs(1);

/// Everything a session needs from the server.
#[derive(Clone, Debug)]
pub struct SessionContext {
    /// Lifecycle event sink.
    pub lifecycle: Arc<LifecycleHandler>,
    /// Interval between server-initiated Ping frames.
    pub ping_interval: Duration,
    /// Close the connection when the last Pong is older than this.
    pub pong_timeout: Duration,
    /// Outbound queue depth.
    pub send_queue_capacity: usize,
    /// Cancelled when graceful shutdown begins.
    pub shutdown: CancellationToken,
    /// Cancelled when remaining sessions must stop immediately.
    pub force: CancellationToken,
}

/// Why the read loop stopped.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum ReadEnd {
    ClientClosed,
    StreamEnded,
    Error,
    Stopped,
}

/// Runs the close path when the session ends, however it ends.
struct CloseGuard {
    lifecycle: Arc<LifecycleHandler>,
    id: ClientId,
}

impl Drop for CloseGuard {
    fn drop(&mut self) {
        let _ = self.lifecycle.on_close(&self.id);
    }
}

/// Run a WebSocket session for a connected client.
///
/// 1. Registers the client (welcome + `client_connected`)
/// 2. Feeds inbound frames to the lifecycle handler in arrival order
/// 3. Forwards queued envelopes and sends periodic Ping frames
/// 4. Unregisters exactly once when the read side ends for any reason
#[instrument(skip_all, fields(client_id = tracing::field::Empty))]
pub async fn run_session(ws: WebSocket, metadata: ConnectionMetadata, ctx: SessionContext) {
    let (ws_tx, ws_rx) = ws.split();
    let (send_tx, send_rx) = mpsc::channel(ctx.send_queue_capacity);

    let conn = ctx.lifecycle.on_accept(send_tx, metadata);
    let _ = tracing::Span::current().record("client_id", tracing::field::display(&conn.id));
    let close_guard = CloseGuard {
        lifecycle: ctx.lifecycle.clone(),
        id: conn.id.clone(),
    };

    // Accepted while shutdown was sweeping the registry.
    if ctx.shutdown.is_cancelled() {
        let _ = conn.close(NORMAL_CLOSURE, SHUTDOWN_CLOSE_REASON);
    }

    let stop = ctx.force.child_token();
    let mut writer = tokio::spawn(write_loop(
        ws_tx,
        send_rx,
        conn.clone(),
        stop.clone(),
        ctx.ping_interval,
        ctx.pong_timeout,
    ));

    let end = read_loop(ws_rx, &conn, &ctx.lifecycle, &stop).await;
    debug!(?end, "read loop ended");

    stop.cancel();
    drop(close_guard);

    if time::timeout(WRITER_GRACE, &mut writer).await.is_err() {
        writer.abort();
    }
    info!(dropped = conn.drop_count(), "session finished");
}

async fn read_loop(
    mut ws_rx: SplitStream<WebSocket>,
    conn: &ClientConnection,
    lifecycle: &LifecycleHandler,
    stop: &CancellationToken,
) -> ReadEnd {
    loop {
        let next = tokio::select! {
            () = stop.cancelled() => return ReadEnd::Stopped,
            next = ws_rx.next() => next,
        };
        let msg = match next {
            Some(Ok(msg)) => msg,
            Some(Err(error)) => {
                lifecycle.on_error(&conn.id, &error);
                return ReadEnd::Error;
            }
            None => return ReadEnd::StreamEnded,
        };

        conn.mark_alive();
        match msg {
            Message::Text(text) => lifecycle.on_message(conn, text.as_str()),
            // Some clients send JSON in binary frames.
            Message::Binary(data) => match std::str::from_utf8(&data) {
                Ok(text) => lifecycle.on_message(conn, text),
                Err(_) => info!(len = data.len(), "ignoring non-UTF-8 binary frame"),
            },
            Message::Close(frame) => {
                let code = frame.as_ref().map(|f| f.code);
                debug!(?code, "client sent close frame");
                return ReadEnd::ClientClosed;
            }
            Message::Ping(_) | Message::Pong(_) => {}
        }
    }
}

async fn write_loop(
    mut ws_tx: SplitSink<WebSocket, Message>,
    mut rx: mpsc::Receiver<Outbound>,
    conn: Arc<ClientConnection>,
    stop: CancellationToken,
    ping_interval: Duration,
    pong_timeout: Duration,
) {
    let mut ping = time::interval_at(Instant::now() + ping_interval, ping_interval);

    loop {
        tokio::select! {
            () = stop.cancelled() => {
                let _ = ws_tx.close().await;
                break;
            }
            item = rx.recv() => match item {
                Some(Outbound::Frame(text)) => {
                    if ws_tx.send(Message::Text(text.as_str().into())).await.is_err() {
                        break;
                    }
                }
                Some(Outbound::Close { code, reason }) => {
                    debug!(code, %reason, "sending close frame");
                    let frame = CloseFrame { code, reason: reason.into() };
                    let _ = ws_tx.send(Message::Close(Some(frame))).await;
                    break;
                }
                None => break,
            },
            _ = ping.tick() => {
                let silent_for = conn.last_pong_elapsed();
                if silent_for > pong_timeout {
                    warn!(silent_ms = silent_for.as_millis(), "client unresponsive, disconnecting");
                    let _ = ws_tx.close().await;
                    break;
                }
                if ws_tx.send(Message::Ping(Vec::new().into())).await.is_err() {
                    break;
                }
            }
        }
    }
    stop.cancel();
}
