//! Server error types.

use thiserror::Error;

/// Errors surfaced by the hub's public operations.
#[derive(Debug, Error)]
pub enum ServerError {
    /// Binding or querying the listener failed.
    #[error("listener error: {0}")]
    Io(#[from] std::io::Error),
    /// The Prometheus recorder could not be installed.
    #[error("metrics recorder error: {0}")]
    Metrics(String),
}

/// Why a frame could not be queued for a connection.
#[derive(Clone, Copy, Debug, Error, PartialEq, Eq)]
pub enum SendError {
    /// The connection is closing or closed.
    #[error("connection is not open")]
    NotOpen,
    /// The outbound queue is full.
    #[error("outbound queue full")]
    Full,
    /// The writer task has gone away.
    #[error("writer task gone")]
    Closed,
}
