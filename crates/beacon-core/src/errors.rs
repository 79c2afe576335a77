//! Protocol error types.

use thiserror::Error;

/// Errors raised while encoding or decoding wire envelopes.
#[derive(Debug, Error)]
pub enum ProtocolError {
    /// The envelope could not be serialized or parsed as JSON.
    #[error("envelope JSON error: {0}")]
    Json(#[from] serde_json::Error),
}
