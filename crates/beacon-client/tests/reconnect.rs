//! Reconnect behavior against real listeners.

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use beacon_client::{
    BeaconClient, ClientOptions, ConnectionStatus, GIVE_UP_ERROR, Phase, RecordKind,
};
use beacon_server::metrics::detached_handle;
use beacon_server::{BeaconServer, ServerConfig};
use serde_json::json;
use tokio::net::TcpListener;
use tokio::sync::watch;
use tokio::time::timeout;

const TIMEOUT: Duration = Duration::from_secs(5);
const INTERVAL: Duration = Duration::from_millis(20);

async fn boot_server() -> (Arc<BeaconServer>, String) {
    let server = Arc::new(BeaconServer::new(ServerConfig::default(), detached_handle()));
    let (addr, _handle) = server.listen().await.unwrap();
    (server, format!("ws://{addr}/ws"))
}

fn client_for(url: &str, max_attempts: u32) -> BeaconClient {
    let client = BeaconClient::new();
    assert!(client.initialize(ClientOptions {
        max_reconnect_attempts: max_attempts,
        reconnect_interval: INTERVAL,
        ..ClientOptions::new(url)
    }));
    client
}

async fn wait_status(
    rx: &mut watch::Receiver<ConnectionStatus>,
    pred: impl Fn(&ConnectionStatus) -> bool,
) -> ConnectionStatus {
    let status = timeout(TIMEOUT, rx.wait_for(|s| pred(s)))
        .await
        .expect("timed out waiting for status")
        .expect("status channel closed")
        .clone();
    status
}

async fn wait_records(client: &BeaconClient, kind: RecordKind, count: usize) {
    timeout(TIMEOUT, async {
        while client.messages_by_kind(kind).len() < count {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await
    .expect("timed out waiting for records");
}

#[tokio::test]
async fn gives_up_after_max_attempts() {
    // Accepts TCP and drops it, so every handshake fails.
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let accepted = Arc::new(AtomicUsize::new(0));
    let counter = accepted.clone();
    let _acceptor = tokio::spawn(async move {
        while let Ok((socket, _)) = listener.accept().await {
            let _ = counter.fetch_add(1, Ordering::SeqCst);
            drop(socket);
        }
    });

    let client = client_for(&format!("ws://{addr}/ws"), 3);
    let mut rx = client.subscribe();
    assert!(client.connect().unwrap());

    let status = wait_status(&mut rx, |s| s.phase == Phase::GivenUp).await;
    assert_eq!(status.reconnect_attempts, 3);
    assert_eq!(status.last_error.as_deref(), Some(GIVE_UP_ERROR));

    // No further attempt after giving up.
    tokio::time::sleep(INTERVAL * 5).await;
    assert_eq!(accepted.load(Ordering::SeqCst), 4);
    assert_eq!(client.status().phase, Phase::GivenUp);
}

#[tokio::test]
async fn disconnect_never_reconnects() {
    let (server, url) = boot_server().await;
    let client = client_for(&url, 5);
    let mut rx = client.subscribe();

    assert!(client.connect().unwrap());
    let _ = wait_status(&mut rx, ConnectionStatus::is_connected).await;
    assert!(!client.connect().unwrap(), "connect while connected is a no-op");

    client.disconnect();
    assert_eq!(client.status().phase, Phase::Idle);

    timeout(TIMEOUT, async {
        while !server.registry().is_empty() {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await
    .unwrap();

    tokio::time::sleep(INTERVAL * 10).await;
    let status = client.status();
    assert_eq!(status.phase, Phase::Idle);
    assert_eq!(status.reconnect_attempts, 0);
    assert!(server.registry().is_empty());
}

#[tokio::test]
async fn unclean_drop_reconnects_and_resets_attempts() {
    // Completes the handshake, drops the first socket without a close frame,
    // keeps every later one open.
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let accepted = Arc::new(AtomicUsize::new(0));
    let counter = accepted.clone();
    let _acceptor = tokio::spawn(async move {
        let mut held = Vec::new();
        while let Ok((socket, _)) = listener.accept().await {
            let n = counter.fetch_add(1, Ordering::SeqCst);
            let Ok(ws) = tokio_tungstenite::accept_async(socket).await else {
                continue;
            };
            if n == 0 {
                drop(ws);
            } else {
                held.push(ws);
            }
        }
    });

    let client = client_for(&format!("ws://{addr}/ws"), 5);
    let mut rx = client.subscribe();
    assert!(client.connect().unwrap());

    timeout(TIMEOUT, async {
        while accepted.load(Ordering::SeqCst) < 2 {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await
    .expect("client never reconnected");
    let status = wait_status(&mut rx, ConnectionStatus::is_connected).await;
    assert_eq!(status.reconnect_attempts, 0);
    assert!(status.last_error.is_none());

    tokio::time::sleep(INTERVAL * 5).await;
    assert_eq!(accepted.load(Ordering::SeqCst), 2);
    assert!(client.status().is_connected());

    client.disconnect();
}

#[tokio::test]
async fn send_records_message_and_receives_echo() {
    let (_server, url) = boot_server().await;
    let client = client_for(&url, 5);
    let mut rx = client.subscribe();

    assert!(!client.send_text("too early"));
    assert!(client.messages_by_kind(RecordKind::Sent).is_empty());

    assert!(client.connect().unwrap());
    let _ = wait_status(&mut rx, ConnectionStatus::is_connected).await;
    wait_records(&client, RecordKind::Message, 1).await;
    assert_eq!(client.messages()[0].data["type"], "welcome");

    assert!(client.send_message(json!({"n": 1})));
    assert!(client.send_text("plain"));
    wait_records(&client, RecordKind::Message, 3).await;

    let sent = client.messages_by_kind(RecordKind::Sent);
    assert_eq!(sent.len(), 2);
    assert_eq!(sent[0].data, json!({"n": 1}));
    assert_eq!(sent[1].data, "plain");

    let received = client.messages_by_kind(RecordKind::Message);
    assert_eq!(received[1].data["type"], "echo");
    assert_eq!(received[1].data["originalData"], json!({"n": 1}));
    assert_eq!(received[2].data["type"], "echo");
    assert_eq!(received[2].data["originalData"], "plain");

    let stats = client.connection_stats();
    assert!(stats.is_connected);
    assert_eq!(stats.total_messages, client.messages().len());

    client.disconnect();
}

#[tokio::test]
async fn peers_see_each_other() {
    let (_server, url) = boot_server().await;
    let a = client_for(&url, 5);
    let b = client_for(&url, 5);
    let mut a_rx = a.subscribe();
    let mut b_rx = b.subscribe();

    assert!(a.connect().unwrap());
    let _ = wait_status(&mut a_rx, ConnectionStatus::is_connected).await;
    wait_records(&a, RecordKind::Message, 1).await;
    assert!(b.connect().unwrap());
    let _ = wait_status(&mut b_rx, ConnectionStatus::is_connected).await;
    wait_records(&a, RecordKind::Message, 2).await;
    assert_eq!(a.messages()[1].data["type"], "client_connected");

    assert!(b.send_test_message());
    wait_records(&a, RecordKind::Message, 3).await;
    let relayed = a.last_message().unwrap();
    assert_eq!(relayed.data["type"], "broadcast");
    assert_eq!(relayed.data["originalData"]["type"], "test");

    a.disconnect();
    b.disconnect();
}

#[tokio::test]
async fn server_shutdown_is_a_clean_close() {
    let (server, url) = boot_server().await;
    let client = client_for(&url, 5);
    let mut rx = client.subscribe();

    assert!(client.connect().unwrap());
    let _ = wait_status(&mut rx, ConnectionStatus::is_connected).await;

    let report = server.shutdown().await;
    assert_eq!(report.notified, 1);

    let status = wait_status(&mut rx, |s| s.phase == Phase::Idle).await;
    assert_eq!(status.reconnect_attempts, 0);

    tokio::time::sleep(INTERVAL * 5).await;
    assert_eq!(client.status().phase, Phase::Idle);

    // The shutdown notice arrived before the close frame.
    let last = client.messages_by_kind(RecordKind::Message);
    let notice = last.last().unwrap();
    assert_eq!(notice.data["type"], "system");
    assert_eq!(notice.data["subtype"], "shutdown");
}

#[tokio::test]
async fn second_initialize_is_ignored() {
    let client = client_for("ws://127.0.0.1:1/ws", 2);
    assert!(!client.initialize(ClientOptions::new("ws://127.0.0.1:2/ws")));
    assert_eq!(client.connection_stats().url.as_deref(), Some("ws://127.0.0.1:1/ws"));
    assert_eq!(client.connection_stats().max_reconnect_attempts, 2);
}
