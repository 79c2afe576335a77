//! # beacon-client
//!
//! Reconnecting WebSocket client for the Beacon hub.
//!
//! [`machine`] holds the pure reconnect transitions; [`client`] drives them
//! with a tokio-tungstenite socket task, a single retry timer, and a bounded
//! message log.

#![deny(unsafe_code)]

pub mod client;
pub mod errors;
pub mod machine;
pub mod types;

pub use client::BeaconClient;
pub use errors::ClientError;
pub use machine::{CloseOutcome, GIVE_UP_ERROR, Phase, ReconnectMachine, ReconnectPolicy};
pub use types::{
    ClientOptions, ConnectionStats, ConnectionStatus, MessageRecord, Payload, RecordKind,
};
