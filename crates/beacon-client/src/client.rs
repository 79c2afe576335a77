//! `BeaconClient`: one logical hub connection kept alive across transient
//! failures.
//!
//! The client owns:
//! - a [`ReconnectMachine`] holding phase, attempt count and last error
//! - at most one socket task, addressed through a command channel
//! - at most one reconnect timer, aborted on `disconnect`
//! - a bounded log of received and sent messages
//!
//! Every socket task carries the generation it was started under. A
//! `disconnect` or a new `connect` bumps the generation, so events from an
//! older task are discarded instead of driving the machine.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, OnceLock};

use beacon_core::constants::CLIENT_CLOSE_REASON;
use beacon_core::{Inbound, now_ms};
use futures::{SinkExt, StreamExt};
use parking_lot::Mutex;
use serde::Serialize;
use serde_json::{Value, json};
use tokio::sync::{broadcast, mpsc, watch};
use tokio::task::JoinHandle;
use tokio_tungstenite::connect_async;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::tungstenite::protocol::CloseFrame;
use tokio_tungstenite::tungstenite::protocol::frame::coding::CloseCode;
use tracing::{debug, info, warn};

use crate::errors::ClientError;
use crate::machine::{CloseOutcome, Phase, ReconnectMachine};
use crate::types::{
    ClientOptions, ConnectionStats, ConnectionStatus, MessageRecord, Payload, RecordKind,
};

/// Outbound queue depth of a socket task.
const SEND_QUEUE: usize = 256;

/// Buffered records per lagging [`BeaconClient::subscribe_messages`] receiver.
const RECORD_FEED: usize = 256;

/// Records returned by [`BeaconClient::recent_messages`].
pub const DEFAULT_RECENT_MESSAGES: usize = 10;

enum Command {
    Send(String),
    Close,
}

struct SocketHandle {
    tx: mpsc::Sender<Command>,
}

struct State {
    machine: ReconnectMachine,
    messages: VecDeque<MessageRecord>,
    socket: Option<SocketHandle>,
    reconnect_timer: Option<JoinHandle<()>>,
}

struct Inner {
    options: OnceLock<ClientOptions>,
    state: Mutex<State>,
    generation: AtomicU64,
    status: watch::Sender<ConnectionStatus>,
    records: broadcast::Sender<MessageRecord>,
}

/// Reconnecting hub client. Cheap to clone; clones share one connection.
#[derive(Clone)]
pub struct BeaconClient {
    inner: Arc<Inner>,
}

impl Default for BeaconClient {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for BeaconClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BeaconClient")
            .field("status", &self.status())
            .finish_non_exhaustive()
    }
}

impl BeaconClient {
    /// Create an uninitialized, idle client.
    pub fn new() -> Self {
        let (status, _) = watch::channel(ConnectionStatus::default());
        let (records, _) = broadcast::channel(RECORD_FEED);
        Self {
            inner: Arc::new(Inner {
                options: OnceLock::new(),
                state: Mutex::new(State {
                    machine: ReconnectMachine::default(),
                    messages: VecDeque::new(),
                    socket: None,
                    reconnect_timer: None,
                }),
                generation: AtomicU64::new(0),
                status,
                records,
            }),
        }
    }

    /// Fix the client's options. Only the first call has any effect; later
    /// calls return `false`.
    pub fn initialize(&self, options: ClientOptions) -> bool {
        let policy = options.policy();
        if self.inner.options.set(options).is_err() {
            debug!("client already initialized, ignoring");
            return false;
        }
        self.inner.state.lock().machine = ReconnectMachine::new(policy);
        true
    }

    /// Options given to `initialize`.
    pub fn options(&self) -> Option<&ClientOptions> {
        self.inner.options.get()
    }

    /// Open the connection. Returns `Ok(false)` when a connection is already
    /// in flight or established.
    ///
    /// Must be called from within a tokio runtime.
    pub fn connect(&self) -> Result<bool, ClientError> {
        self.inner.start_connect(None)
    }

    /// Close with code 1000 and cancel any pending reconnect.
    pub fn disconnect(&self) {
        {
            let mut state = self.inner.state.lock();
            let _ = self.inner.generation.fetch_add(1, Ordering::SeqCst);
            if let Some(timer) = state.reconnect_timer.take() {
                timer.abort();
            }
            if let Some(socket) = state.socket.take() {
                // Dropping the handle closes the channel even if this fails.
                let _ = socket.tx.try_send(Command::Close);
            }
            state.machine.disconnect();
        }
        info!("disconnected");
        self.inner.publish();
    }

    /// Send a payload. Fails fast (returns `false` and records an error)
    /// unless connected.
    pub fn send_message(&self, payload: impl Into<Payload>) -> bool {
        let payload = payload.into();
        let sent = {
            let mut state = self.inner.state.lock();
            let queued = match state.socket.as_ref() {
                Some(socket) if state.machine.is_connected() => {
                    socket.tx.try_send(Command::Send(payload.encode())).map_err(|e| match e {
                        mpsc::error::TrySendError::Full(_) => "send queue full",
                        mpsc::error::TrySendError::Closed(_) => "connection closed",
                    })
                }
                _ => Err("not connected"),
            };
            match queued {
                Ok(()) => {
                    self.inner.log(
                        &mut state,
                        MessageRecord {
                            kind: RecordKind::Sent,
                            data: payload.into_value(),
                            timestamp: now_ms(),
                        },
                    );
                    true
                }
                Err(reason) => {
                    warn!(reason, "cannot send message");
                    state.machine.on_error(format!("cannot send message: {reason}"));
                    false
                }
            }
        };
        if !sent {
            self.inner.publish();
        }
        sent
    }

    /// Send any serializable value as JSON.
    pub fn send_json<T: Serialize>(&self, value: &T) -> bool {
        match serde_json::to_value(value) {
            Ok(value) => self.send_message(Payload::Json(value)),
            Err(error) => {
                warn!(%error, "failed to encode message");
                false
            }
        }
    }

    /// Send a string verbatim.
    pub fn send_text(&self, text: &str) -> bool {
        self.send_message(Payload::Text(text.to_owned()))
    }

    /// Send a small JSON probe message.
    pub fn send_test_message(&self) -> bool {
        self.send_message(json!({
            "type": "test",
            "message": "Test message from client",
            "timestamp": now_ms(),
        }))
    }

    /// Drop every logged record.
    pub fn clear_messages(&self) {
        self.inner.state.lock().messages.clear();
    }

    /// Every logged record, oldest first.
    pub fn messages(&self) -> Vec<MessageRecord> {
        self.inner.state.lock().messages.iter().cloned().collect()
    }

    /// The last `n` records, oldest first.
    pub fn last_messages(&self, n: usize) -> Vec<MessageRecord> {
        let state = self.inner.state.lock();
        let skip = state.messages.len().saturating_sub(n);
        state.messages.iter().skip(skip).cloned().collect()
    }

    /// The last [`DEFAULT_RECENT_MESSAGES`] records.
    pub fn recent_messages(&self) -> Vec<MessageRecord> {
        self.last_messages(DEFAULT_RECENT_MESSAGES)
    }

    /// Records of one kind, oldest first.
    pub fn messages_by_kind(&self, kind: RecordKind) -> Vec<MessageRecord> {
        self.inner
            .state
            .lock()
            .messages
            .iter()
            .filter(|r| r.kind == kind)
            .cloned()
            .collect()
    }

    /// The newest record.
    pub fn last_message(&self) -> Option<MessageRecord> {
        self.inner.state.lock().messages.back().cloned()
    }

    /// Current status.
    pub fn status(&self) -> ConnectionStatus {
        self.inner.status.borrow().clone()
    }

    /// Observe status changes.
    pub fn subscribe(&self) -> watch::Receiver<ConnectionStatus> {
        self.inner.status.subscribe()
    }

    /// Every record as it is logged. Slow receivers lag rather than block.
    pub fn subscribe_messages(&self) -> broadcast::Receiver<MessageRecord> {
        self.inner.records.subscribe()
    }

    /// Diagnostic summary.
    pub fn connection_stats(&self) -> ConnectionStats {
        let state = self.inner.state.lock();
        ConnectionStats {
            is_connected: state.machine.is_connected(),
            is_connecting: state.machine.is_connecting(),
            phase: state.machine.phase(),
            reconnect_attempts: state.machine.attempts(),
            max_reconnect_attempts: state.machine.policy().max_attempts,
            total_messages: state.messages.len(),
            last_error: state.machine.last_error().map(str::to_owned),
            url: self.inner.options.get().map(|o| o.url.clone()),
        }
    }
}

impl Inner {
    /// Begin a connection attempt.
    ///
    /// `timer_generation` is set when the reconnect timer fires; the attempt
    /// is dropped if the client moved on since the timer was armed.
    fn start_connect(self: &Arc<Self>, timer_generation: Option<u64>) -> Result<bool, ClientError> {
        let options = self.options.get().ok_or(ClientError::NotInitialized)?;
        let runtime = tokio::runtime::Handle::try_current().map_err(|_| ClientError::NoRuntime)?;

        let generation = {
            let mut state = self.state.lock();
            match timer_generation {
                Some(armed) => {
                    if armed != self.generation.load(Ordering::SeqCst)
                        || state.machine.phase() != Phase::Reconnecting
                    {
                        return Ok(false);
                    }
                    // This is the timer's own task; release the slot.
                    drop(state.reconnect_timer.take());
                }
                None => {
                    if let Some(timer) = state.reconnect_timer.take() {
                        timer.abort();
                    }
                }
            }
            if !state.machine.begin_connect() {
                return Ok(false);
            }
            self.generation.fetch_add(1, Ordering::SeqCst) + 1
        };

        self.publish();
        debug!(url = %options.url, generation, "connecting");
        let _socket = runtime.spawn(run_socket(self.clone(), generation, options.url.clone()));
        Ok(true)
    }

    fn is_current(&self, generation: u64) -> bool {
        self.generation.load(Ordering::SeqCst) == generation
    }

    fn publish(&self) {
        let status = {
            let state = self.state.lock();
            ConnectionStatus {
                phase: state.machine.phase(),
                reconnect_attempts: state.machine.attempts(),
                last_error: state.machine.last_error().map(str::to_owned),
            }
        };
        self.status.send_if_modified(|current| {
            if *current == status {
                false
            } else {
                *current = status;
                true
            }
        });
    }

    fn log(&self, state: &mut State, record: MessageRecord) {
        let capacity = self.options.get().map_or(usize::MAX, |o| o.message_log_capacity);
        // No receivers is fine.
        let _ = self.records.send(record.clone());
        state.messages.push_back(record);
        while state.messages.len() > capacity {
            let _ = state.messages.pop_front();
        }
    }

    fn record_inbound(&self, raw: &str) {
        let record = match Inbound::parse(raw) {
            Inbound::Structured(value) => MessageRecord {
                kind: RecordKind::Message,
                data: value,
                timestamp: now_ms(),
            },
            Inbound::Text(text) => MessageRecord {
                kind: RecordKind::Text,
                data: Value::String(text),
                timestamp: now_ms(),
            },
        };
        let mut state = self.state.lock();
        self.log(&mut state, record);
    }

    fn on_opened(&self, generation: u64, tx: mpsc::Sender<Command>) -> bool {
        {
            let mut state = self.state.lock();
            if !self.is_current(generation) {
                return false;
            }
            state.socket = Some(SocketHandle { tx });
            state.machine.on_open();
        }
        info!(generation, "connected");
        self.publish();
        true
    }

    fn on_closed(self: &Arc<Self>, generation: u64, clean: bool, error: Option<String>) {
        let outcome = {
            let mut state = self.state.lock();
            if !self.is_current(generation) {
                return;
            }
            state.socket = None;
            if let Some(error) = error {
                state.machine.on_error(error);
            }
            let outcome = state.machine.on_close(clean);
            if let CloseOutcome::ReconnectAfter(delay) = outcome {
                let inner = self.clone();
                state.reconnect_timer = Some(tokio::spawn(async move {
                    tokio::time::sleep(delay).await;
                    if let Err(error) = inner.start_connect(Some(generation)) {
                        warn!(%error, "reconnect attempt could not start");
                    }
                }));
            }
            outcome
        };

        match outcome {
            CloseOutcome::Idle => info!("connection closed"),
            CloseOutcome::ReconnectAfter(delay) => {
                let attempt = self.state.lock().machine.attempts();
                info!(attempt, delay_ms = delay.as_millis(), "connection lost, reconnecting");
            }
            CloseOutcome::GaveUp => warn!("maximum reconnect attempts exceeded, giving up"),
            CloseOutcome::Ignored => {}
        }
        self.publish();
    }
}

async fn run_socket(inner: Arc<Inner>, generation: u64, url: String) {
    let ws = match connect_async(url.as_str()).await {
        Ok((ws, _response)) => ws,
        Err(error) => {
            warn!(%url, %error, "connection failed");
            inner.on_closed(generation, false, Some(format!("connection failed: {error}")));
            return;
        }
    };

    let (tx, mut rx) = mpsc::channel(SEND_QUEUE);
    let (mut sink, mut stream) = ws.split();
    if !inner.on_opened(generation, tx) {
        // Disconnected while the handshake was in flight.
        let _ = sink.send(Message::Close(Some(normal_close()))).await;
        return;
    }

    let (clean, error) = loop {
        tokio::select! {
            command = rx.recv() => match command {
                Some(Command::Send(text)) => {
                    if let Err(error) = sink.send(Message::Text(text.into())).await {
                        break (false, Some(format!("send failed: {error}")));
                    }
                }
                Some(Command::Close) | None => {
                    let _ = sink.send(Message::Close(Some(normal_close()))).await;
                    break (true, None);
                }
            },
            frame = stream.next() => match frame {
                Some(Ok(Message::Text(text))) => inner.record_inbound(text.as_str()),
                Some(Ok(Message::Binary(data))) => match std::str::from_utf8(&data) {
                    Ok(text) => inner.record_inbound(text),
                    Err(_) => debug!(len = data.len(), "ignoring non-UTF-8 binary frame"),
                },
                Some(Ok(Message::Close(frame))) => {
                    let code = frame.as_ref().map(|f| f.code);
                    debug!(?code, "server closed connection");
                    break (code == Some(CloseCode::Normal), None);
                }
                Some(Ok(_)) => {}
                Some(Err(error)) => break (false, Some(format!("connection error: {error}"))),
                None => break (false, None),
            },
        }
    };

    // Flushes the close handshake reply, if any.
    let _ = sink.close().await;
    inner.on_closed(generation, clean, error);
}

fn normal_close() -> CloseFrame {
    CloseFrame {
        code: CloseCode::Normal,
        reason: CLIENT_CLOSE_REASON.into(),
    }
}
