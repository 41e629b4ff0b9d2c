//! Error types for wire encoding and decoding.

use thiserror::Error;

/// Errors that can occur while encoding or decoding envelopes.
#[derive(Debug, Error)]
pub enum WireError {
    /// The frame body was not a valid envelope. Unknown message types
    /// land here too — the payload union rejects them during decode.
    #[error("envelope decode error: {0}")]
    Decode(#[from] serde_json::Error),
}

/// Convenience type alias for wire results.
pub type Result<T> = std::result::Result<T, WireError>;
