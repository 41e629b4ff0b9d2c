//! Error types for the realtime client.
//!
//! Only connection lifecycle operations return errors. Advisory
//! publishes (presence, chat, join/leave) log and drop on failure
//! instead, since they are conveniences rather than critical path.

use thiserror::Error;

use crate::transport::TransportError;

/// Errors surfaced by the realtime client.
#[derive(Debug, Error)]
pub enum RealtimeError {
    /// The transport rejected or failed to establish the connection.
    #[error("transport error: {0}")]
    Transport(#[from] TransportError),

    /// Envelope encoding or decoding failed.
    #[error("wire error: {0}")]
    Wire(#[from] taskhub_wire::WireError),

    /// `connect` was called while a connection is active or pending.
    #[error("already connected")]
    AlreadyConnected,

    /// The operation requires an active connection.
    #[error("not connected")]
    NotConnected,
}

/// Convenience type alias for realtime client results.
pub type Result<T> = std::result::Result<T, RealtimeError>;
