//! # beacon-core
//!
//! Shared vocabulary for the Beacon broadcast hub and its clients:
//!
//! - **Envelopes**: the closed [`Envelope`] enum, one variant per wire `type`
//! - **Inbound payloads**: [`Inbound`] classifies client frames as structured JSON or plain text
//! - **Client ids**: [`ClientId`] newtype and the collision-free [`IdGenerator`]
//! - **Constants**: close codes, default port, and timing defaults
//! - **Errors**: [`ProtocolError`]

#![deny(unsafe_code)]

pub mod constants;
pub mod envelope;
pub mod errors;
pub mod ids;

pub use envelope::{
    Envelope, HeartbeatData, Inbound, MemoryUsage, RelayedMessage, ShutdownData, SystemMessage,
    SystemPayload, now_ms,
};
pub use errors::ProtocolError;
pub use ids::{ClientId, IdGenerator};
