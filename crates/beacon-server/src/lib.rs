//! # beacon-server
//!
//! Axum WebSocket broadcast hub.
//!
//! - [`registry`]: live connections and their records
//! - [`broadcast`]: serialize-once fan-out
//! - [`heartbeat`]: periodic `system/heartbeat` notices
//! - [`lifecycle`]: accept / message / close / error semantics
//! - [`session`]: per-connection reader and writer tasks
//! - [`shutdown`]: notify, close, drain, force
//! - [`server`]: router, `/health`, `/metrics`, listener

#![deny(unsafe_code)]

pub mod broadcast;
pub mod config;
pub mod connection;
pub mod errors;
pub mod health;
pub mod heartbeat;
pub mod lifecycle;
pub mod metrics;
pub mod registry;
pub mod server;
pub mod session;
pub mod shutdown;

pub use config::ServerConfig;
pub use errors::{SendError, ServerError};
pub use server::BeaconServer;
pub use shutdown::ShutdownReport;
