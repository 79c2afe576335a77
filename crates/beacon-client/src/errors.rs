//! Client error types.

use thiserror::Error;

/// Errors from [`crate::BeaconClient`] operations.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum ClientError {
    /// `connect` was called before `initialize`.
    #[error("client not initialized")]
    NotInitialized,
    /// `connect` was called outside a tokio runtime.
    #[error("no tokio runtime available to drive the connection")]
    NoRuntime,
}
