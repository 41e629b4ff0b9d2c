//! Transport seam between the client and the broker.
//!
//! The connection manager is the only component that touches the
//! transport; everything else operates on decoded envelopes. The seam
//! is two traits: [`Transport`] establishes a connection, and
//! [`BrokerSession`] is one live connection. Inbound frames for a
//! subscription arrive on the mpsc channel returned by `subscribe`, in
//! the order the broker delivered them on that topic; no ordering is
//! guaranteed across topics.

use std::sync::Arc;

use async_trait::async_trait;
use thiserror::Error;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

pub mod ws;

pub use ws::WsTransport;

/// Errors raised by the transport layer.
#[derive(Debug, Error)]
pub enum TransportError {
    /// The broker rejected the connection at the protocol level.
    #[error("connection rejected: {0}")]
    Rejected(String),

    /// The socket failed before or during establishment.
    #[error("transport io error: {0}")]
    Io(String),

    /// The session is no longer usable.
    #[error("not connected")]
    NotConnected,
}

/// Connects to a broker endpoint.
#[async_trait]
pub trait Transport: Send + Sync {
    /// Establish a session with the broker at `url`.
    async fn connect(&self, url: &str) -> Result<Arc<dyn BrokerSession>, TransportError>;
}

/// One live publish/subscribe connection.
#[async_trait]
pub trait BrokerSession: Send + Sync {
    /// Subscribe to a topic. Frame bodies for the topic arrive on the
    /// returned channel until `unsubscribe` or session loss.
    async fn subscribe(&self, topic: &str) -> Result<mpsc::Receiver<String>, TransportError>;

    /// Stop delivery for a topic. Best effort; unknown topics are
    /// ignored.
    async fn unsubscribe(&self, topic: &str);

    /// Publish a frame body to a destination.
    async fn publish(&self, destination: &str, body: String) -> Result<(), TransportError>;

    /// Token cancelled when the session is lost *unexpectedly*.
    /// A caller-initiated [`close`](Self::close) never trips it.
    fn closed(&self) -> CancellationToken;

    /// Tear the session down.
    async fn close(&self);
}
