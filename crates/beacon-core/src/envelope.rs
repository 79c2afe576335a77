//! Wire envelopes exchanged between the hub and its clients.
//!
//! Every frame the hub emits is one JSON object tagged by `type`. The set of
//! types is closed: the only way to build an envelope is through the
//! constructors below, each of which stamps the timestamp at construction.
//!
//! ```json
//! {"type":"welcome","message":"Welcome to the Beacon hub","clientId":"k3j9x0q2a-0","totalClients":1,"timestamp":1767225600000}
//! {"type":"system","subtype":"heartbeat","data":{"message":"Server is running","uptime":30.0},"activeConnections":2,"timestamp":1767225630000}
//! ```

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::errors::ProtocolError;
use crate::ids::ClientId;

const WELCOME_MESSAGE: &str = "Welcome to the Beacon hub";
const ECHO_STRUCTURED: &str = "Message received by server";
const ECHO_TEXT: &str = "Text message received by server";
const BROADCAST_STRUCTURED: &str = "Message from another client";
const BROADCAST_TEXT: &str = "Text message from another client";
const HEARTBEAT_MESSAGE: &str = "Server is running";
const SHUTDOWN_MESSAGE: &str = "Server is shutting down";

/// Current time in milliseconds since the Unix epoch.
pub fn now_ms() -> i64 {
    chrono::Utc::now().timestamp_millis()
}

/// A server-to-client message.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case", rename_all_fields = "camelCase")]
pub enum Envelope {
    /// Sent once to a newly accepted connection.
    Welcome {
        /// Greeting text.
        message: String,
        /// Id assigned to the receiving connection.
        client_id: ClientId,
        /// Live connections including the receiver.
        total_clients: usize,
        /// Construction time (ms since epoch).
        timestamp: i64,
    },
    /// Announces a new peer to everyone else.
    ClientConnected {
        /// Id of the new peer.
        client_id: ClientId,
        /// Live connections after the peer joined.
        total_clients: usize,
        /// Construction time (ms since epoch).
        timestamp: i64,
    },
    /// Announces a departed peer to everyone still connected.
    ClientDisconnected {
        /// Id of the departed peer.
        client_id: ClientId,
        /// Live connections after the peer left.
        total_clients: usize,
        /// Construction time (ms since epoch).
        timestamp: i64,
    },
    /// Acknowledges an inbound message back to its sender.
    Echo(RelayedMessage),
    /// Relays an inbound message to every other peer.
    Broadcast(RelayedMessage),
    /// Hub-originated notice delivered to everyone.
    System(SystemMessage),
}

/// Body shared by `echo` and `broadcast` envelopes.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RelayedMessage {
    /// Parsed JSON payload, or the raw string for text messages.
    pub original_data: Value,
    /// Id of the sending connection.
    pub client_id: ClientId,
    /// Construction time (ms since epoch).
    pub timestamp: i64,
    /// Time the hub processed the inbound frame (ms since epoch).
    pub server_timestamp: i64,
    /// Human-readable note distinguishing structured and text payloads.
    pub server_message: String,
}

/// Body of a `system` envelope.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SystemMessage {
    /// `subtype` plus its `data`.
    #[serde(flatten)]
    pub payload: SystemPayload,
    /// Registry size at construction.
    pub active_connections: usize,
    /// Construction time (ms since epoch).
    pub timestamp: i64,
}

/// The closed set of system notices.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "subtype", content = "data", rename_all = "snake_case")]
pub enum SystemPayload {
    /// Periodic liveness notice.
    Heartbeat(HeartbeatData),
    /// The hub is about to close every connection.
    Shutdown(ShutdownData),
}

/// `data` of a heartbeat notice.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct HeartbeatData {
    /// Status text.
    pub message: String,
    /// Hub uptime in seconds.
    pub uptime: f64,
    /// Process memory at the time of the notice.
    pub memory: MemoryUsage,
}

/// Process memory snapshot carried by heartbeats.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MemoryUsage {
    /// Resident set size in bytes; 0 when unavailable.
    pub rss: u64,
}

/// `data` of a shutdown notice.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ShutdownData {
    /// Status text.
    pub message: String,
}

impl SystemPayload {
    /// Heartbeat payload for the given uptime and memory snapshot.
    pub fn heartbeat(uptime_secs: f64, memory: MemoryUsage) -> Self {
        Self::Heartbeat(HeartbeatData {
            message: HEARTBEAT_MESSAGE.into(),
            uptime: uptime_secs,
            memory,
        })
    }

    /// Shutdown payload.
    pub fn shutdown() -> Self {
        Self::Shutdown(ShutdownData {
            message: SHUTDOWN_MESSAGE.into(),
        })
    }

    /// Wire name of the subtype.
    pub fn subtype(&self) -> &'static str {
        match self {
            Self::Heartbeat(_) => "heartbeat",
            Self::Shutdown(_) => "shutdown",
        }
    }
}

/// An inbound client frame, classified.
///
/// Anything that parses as JSON is structured; everything else is text.
#[derive(Clone, Debug, PartialEq)]
pub enum Inbound {
    /// A frame that parsed as JSON.
    Structured(Value),
    /// A frame that did not parse; carried verbatim.
    Text(String),
}

impl Inbound {
    /// Classify a raw text frame.
    pub fn parse(raw: &str) -> Self {
        match serde_json::from_str::<Value>(raw) {
            Ok(value) => Self::Structured(value),
            Err(_) => Self::Text(raw.to_owned()),
        }
    }

    /// Whether the frame parsed as JSON.
    pub fn is_structured(&self) -> bool {
        matches!(self, Self::Structured(_))
    }

    fn into_value(self) -> Value {
        match self {
            Self::Structured(value) => value,
            Self::Text(text) => Value::String(text),
        }
    }
}

impl Envelope {
    /// `welcome` for a freshly registered connection.
    pub fn welcome(client_id: ClientId, total_clients: usize) -> Self {
        Self::Welcome {
            message: WELCOME_MESSAGE.into(),
            client_id,
            total_clients,
            timestamp: now_ms(),
        }
    }

    /// `client_connected` announcing `client_id`.
    pub fn client_connected(client_id: ClientId, total_clients: usize) -> Self {
        Self::ClientConnected {
            client_id,
            total_clients,
            timestamp: now_ms(),
        }
    }

    /// `client_disconnected` announcing `client_id`.
    pub fn client_disconnected(client_id: ClientId, total_clients: usize) -> Self {
        Self::ClientDisconnected {
            client_id,
            total_clients,
            timestamp: now_ms(),
        }
    }

    /// `echo` of `inbound` back to its sender.
    pub fn echo(client_id: ClientId, inbound: Inbound) -> Self {
        let note = if inbound.is_structured() {
            ECHO_STRUCTURED
        } else {
            ECHO_TEXT
        };
        Self::Echo(RelayedMessage::new(client_id, inbound, note))
    }

    /// `broadcast` of `inbound` to the sender's peers.
    pub fn broadcast(client_id: ClientId, inbound: Inbound) -> Self {
        let note = if inbound.is_structured() {
            BROADCAST_STRUCTURED
        } else {
            BROADCAST_TEXT
        };
        Self::Broadcast(RelayedMessage::new(client_id, inbound, note))
    }

    /// `system` notice stamped with the current connection count.
    pub fn system(payload: SystemPayload, active_connections: usize) -> Self {
        Self::System(SystemMessage {
            payload,
            active_connections,
            timestamp: now_ms(),
        })
    }

    /// Wire `type` of the envelope, for logging.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Welcome { .. } => "welcome",
            Self::ClientConnected { .. } => "client_connected",
            Self::ClientDisconnected { .. } => "client_disconnected",
            Self::Echo(_) => "echo",
            Self::Broadcast(_) => "broadcast",
            Self::System(_) => "system",
        }
    }

    /// Construction timestamp (ms since epoch).
    pub fn timestamp(&self) -> i64 {
        match self {
            Self::Welcome { timestamp, .. }
            | Self::ClientConnected { timestamp, .. }
            | Self::ClientDisconnected { timestamp, .. } => *timestamp,
            Self::Echo(relayed) | Self::Broadcast(relayed) => relayed.timestamp,
            Self::System(system) => system.timestamp,
        }
    }

    /// Serialize to a JSON text frame.
    pub fn to_json(&self) -> Result<String, ProtocolError> {
        Ok(serde_json::to_string(self)?)
    }

    /// Parse a JSON text frame.
    pub fn from_json(text: &str) -> Result<Self, ProtocolError> {
        Ok(serde_json::from_str(text)?)
    }
}

impl RelayedMessage {
    fn new(client_id: ClientId, inbound: Inbound, note: &str) -> Self {
        let now = now_ms();
        Self {
            original_data: inbound.into_value(),
            client_id,
            timestamp: now,
            server_timestamp: now,
            server_message: note.into(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;
    use serde_json::json;

    fn to_value(envelope: &Envelope) -> Value {
        serde_json::from_str(&envelope.to_json().unwrap()).unwrap()
    }

    #[test]
    fn welcome_wire_shape() {
        let v = to_value(&Envelope::welcome("a-0".into(), 1));
        assert_eq!(v["type"], "welcome");
        assert_eq!(v["clientId"], "a-0");
        assert_eq!(v["totalClients"], 1);
        assert!(v["timestamp"].is_i64());
        assert!(v["message"].is_string());
    }

    #[test]
    fn membership_wire_shapes() {
        let v = to_value(&Envelope::client_connected("b-1".into(), 2));
        assert_eq!(v["type"], "client_connected");
        assert_eq!(v["clientId"], "b-1");
        assert_eq!(v["totalClients"], 2);

        let v = to_value(&Envelope::client_disconnected("b-1".into(), 1));
        assert_eq!(v["type"], "client_disconnected");
        assert_eq!(v["totalClients"], 1);
    }

    #[test]
    fn echo_carries_parsed_payload() {
        let inbound = Inbound::parse(r#"{"foo":1}"#);
        let v = to_value(&Envelope::echo("b-1".into(), inbound));
        assert_eq!(v["type"], "echo");
        assert_eq!(v["originalData"], json!({"foo": 1}));
        assert_eq!(v["clientId"], "b-1");
        assert!(v["serverTimestamp"].is_i64());
        assert_eq!(v["serverMessage"], ECHO_STRUCTURED);
    }

    #[test]
    fn broadcast_carries_raw_text() {
        let inbound = Inbound::parse("hello there");
        let v = to_value(&Envelope::broadcast("c-2".into(), inbound));
        assert_eq!(v["type"], "broadcast");
        assert_eq!(v["originalData"], "hello there");
        assert_eq!(v["serverMessage"], BROADCAST_TEXT);
    }

    #[test]
    fn system_heartbeat_wire_shape() {
        let v = to_value(&Envelope::system(SystemPayload::heartbeat(12.5, MemoryUsage { rss: 4096 }), 3));
        assert_eq!(v["type"], "system");
        assert_eq!(v["subtype"], "heartbeat");
        assert_eq!(v["data"]["uptime"], 12.5);
        assert_eq!(v["data"]["memory"]["rss"], 4096);
        assert_eq!(v["data"]["message"], HEARTBEAT_MESSAGE);
        assert_eq!(v["activeConnections"], 3);
        assert!(v["timestamp"].is_i64());
    }

    #[test]
    fn system_shutdown_wire_shape() {
        let v = to_value(&Envelope::system(SystemPayload::shutdown(), 0));
        assert_eq!(v["subtype"], "shutdown");
        assert_eq!(v["data"]["message"], SHUTDOWN_MESSAGE);
        assert_eq!(v["activeConnections"], 0);
    }

    #[test]
    fn system_parses_back() {
        let json = to_value(&Envelope::system(SystemPayload::shutdown(), 4)).to_string();
        let parsed = Envelope::from_json(&json).unwrap();
        assert_matches!(
            parsed,
            Envelope::System(SystemMessage {
                payload: SystemPayload::Shutdown(_),
                active_connections: 4,
                ..
            })
        );
    }

    #[test]
    fn unknown_type_is_rejected() {
        let err = Envelope::from_json(r#"{"type":"chat","timestamp":1}"#);
        assert!(err.is_err());
    }

    #[test]
    fn inbound_classification() {
        assert!(Inbound::parse("42").is_structured());
        assert!(Inbound::parse("null").is_structured());
        assert!(Inbound::parse(r#""quoted""#).is_structured());
        assert!(!Inbound::parse("{not json").is_structured());
        assert_eq!(Inbound::parse(""), Inbound::Text(String::new()));
    }

    #[test]
    fn kinds_match_wire_type() {
        let envelopes = [
            Envelope::welcome("a".into(), 1),
            Envelope::client_connected("a".into(), 1),
            Envelope::client_disconnected("a".into(), 0),
            Envelope::echo("a".into(), Inbound::parse("x")),
            Envelope::broadcast("a".into(), Inbound::parse("x")),
            Envelope::system(SystemPayload::heartbeat(0.0, MemoryUsage::default()), 1),
        ];
        for envelope in &envelopes {
            assert_eq!(to_value(envelope)["type"], envelope.kind());
            assert_eq!(to_value(envelope)["timestamp"], envelope.timestamp());
        }
    }

    #[test]
    fn subtype_names() {
        assert_eq!(SystemPayload::heartbeat(1.0, MemoryUsage::default()).subtype(), "heartbeat");
        assert_eq!(SystemPayload::shutdown().subtype(), "shutdown");
    }
}
