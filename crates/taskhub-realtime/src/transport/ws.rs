//! WebSocket transport.
//!
//! Speaks a thin JSON frame layer over a single WebSocket: the client
//! sends `subscribe` / `unsubscribe` / `send` frames, the broker pushes
//! `message` frames tagged with the originating topic. One writer task
//! owns the sink; a reader task routes inbound frames to per-topic
//! subscriber channels and answers pings.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use futures::{SinkExt, StreamExt};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tokio_tungstenite::connect_async;
use tokio_tungstenite::tungstenite::{Bytes, Error as WsError, Message};
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use super::{BrokerSession, Transport, TransportError};

/// Channel capacity for outbound frames and per-topic inbound frames.
const CHANNEL_CAPACITY: usize = 64;

/// Frames the client sends to the broker.
#[derive(Debug, Serialize)]
#[serde(tag = "frame", rename_all = "lowercase")]
enum ClientFrame {
    Subscribe { topic: String },
    Unsubscribe { topic: String },
    Send { destination: String, body: String },
}

/// Frames the broker pushes to the client.
#[derive(Debug, Deserialize)]
#[serde(tag = "frame", rename_all = "lowercase")]
enum ServerFrame {
    Message { topic: String, body: String },
}

enum Outbound {
    Frame(String),
    Pong(Bytes),
}

/// [`Transport`] implementation over `tokio-tungstenite`.
#[derive(Clone, Copy, Debug, Default)]
pub struct WsTransport;

impl WsTransport {
    /// Create a WebSocket transport.
    #[must_use]
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl Transport for WsTransport {
    async fn connect(&self, url: &str) -> Result<Arc<dyn BrokerSession>, TransportError> {
        let (stream, _response) = connect_async(url).await.map_err(map_ws_error)?;
        let (mut sink, mut read) = stream.split();

        let (out_tx, mut out_rx) = mpsc::channel::<Outbound>(CHANNEL_CAPACITY);
        let session = Arc::new(WsSession {
            outbound: out_tx,
            subscribers: Mutex::new(HashMap::new()),
            closed: CancellationToken::new(),
            shutdown: CancellationToken::new(),
        });

        let shutdown = session.shutdown.clone();
        let _writer = tokio::spawn(async move {
            loop {
                tokio::select! {
                    maybe = out_rx.recv() => {
                        let Some(out) = maybe else { break };
                        let message = match out {
                            Outbound::Frame(text) => Message::text(text),
                            Outbound::Pong(payload) => Message::Pong(payload),
                        };
                        if sink.send(message).await.is_err() {
                            break;
                        }
                    }
                    () = shutdown.cancelled() => {
                        let _ = sink.send(Message::Close(None)).await;
                        break;
                    }
                }
            }
        });

        let reader_session = Arc::clone(&session);
        let _reader = tokio::spawn(async move {
            loop {
                tokio::select! {
                    maybe = read.next() => {
                        match maybe {
                            Some(Ok(Message::Text(text))) => reader_session.route(text.as_str()),
                            Some(Ok(Message::Ping(payload))) => {
                                let _ = reader_session.outbound.try_send(Outbound::Pong(payload));
                            }
                            Some(Ok(Message::Close(_))) | None => {
                                reader_session.on_stream_end();
                                break;
                            }
                            Some(Ok(_)) => {}
                            Some(Err(error)) => {
                                warn!(%error, "websocket read failed");
                                reader_session.on_stream_end();
                                break;
                            }
                        }
                    }
                    () = reader_session.shutdown.cancelled() => break,
                }
            }
        });

        Ok(session)
    }
}

fn map_ws_error(error: WsError) -> TransportError {
    match error {
        WsError::Http(response) => TransportError::Rejected(response.status().to_string()),
        other => TransportError::Io(other.to_string()),
    }
}

struct WsSession {
    outbound: mpsc::Sender<Outbound>,
    subscribers: Mutex<HashMap<String, mpsc::Sender<String>>>,
    /// Cancelled on unexpected stream end only.
    closed: CancellationToken,
    /// Cancelled by a caller-initiated close.
    shutdown: CancellationToken,
}

impl WsSession {
    fn route(&self, text: &str) {
        let frame: ServerFrame = match serde_json::from_str(text) {
            Ok(frame) => frame,
            Err(error) => {
                warn!(%error, "dropping unrecognized broker frame");
                return;
            }
        };
        let ServerFrame::Message { topic, body } = frame;
        let subscriber = self.subscribers.lock().get(&topic).cloned();
        match subscriber {
            Some(tx) => {
                if tx.try_send(body).is_err() {
                    warn!(topic = %topic, "subscriber channel full or gone, frame dropped");
                }
            }
            None => debug!(topic = %topic, "frame for topic with no subscriber"),
        }
    }

    fn on_stream_end(&self) {
        if !self.shutdown.is_cancelled() {
            self.closed.cancel();
        }
    }

    async fn send_frame(&self, frame: &ClientFrame) -> Result<(), TransportError> {
        let text = serde_json::to_string(frame).map_err(|e| TransportError::Io(e.to_string()))?;
        self.outbound
            .send(Outbound::Frame(text))
            .await
            .map_err(|_| TransportError::NotConnected)
    }
}

#[async_trait]
impl BrokerSession for WsSession {
    async fn subscribe(&self, topic: &str) -> Result<mpsc::Receiver<String>, TransportError> {
        let (tx, rx) = mpsc::channel(CHANNEL_CAPACITY);
        let _ = self.subscribers.lock().insert(topic.to_string(), tx);
        self.send_frame(&ClientFrame::Subscribe {
            topic: topic.to_string(),
        })
        .await?;
        Ok(rx)
    }

    async fn unsubscribe(&self, topic: &str) {
        let _ = self.subscribers.lock().remove(topic);
        let _ = self
            .send_frame(&ClientFrame::Unsubscribe {
                topic: topic.to_string(),
            })
            .await;
    }

    async fn publish(&self, destination: &str, body: String) -> Result<(), TransportError> {
        self.send_frame(&ClientFrame::Send {
            destination: destination.to_string(),
            body,
        })
        .await
    }

    fn closed(&self) -> CancellationToken {
        self.closed.clone()
    }

    async fn close(&self) {
        self.shutdown.cancel();
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────
