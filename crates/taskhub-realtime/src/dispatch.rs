//! Inbound message dispatch.
//!
//! Every decoded envelope is routed to the handlers registered for its
//! exact message kind, in registration order, then to wildcard
//! handlers, also in registration order. A failing handler is logged
//! and never prevents its siblings from running. Registration hands
//! back a [`HandlerToken`]; removal consumes the token and is a no-op
//! when the registration is already gone.

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use parking_lot::Mutex;
use tracing::{debug, warn};

use taskhub_wire::{Envelope, MessageKind, Payload};

use crate::client::ClientInner;
use crate::subscriptions::ChannelKey;

/// Result returned by message handlers. Errors are logged per handler
/// and do not abort dispatch.
pub type HandlerResult = anyhow::Result<()>;

/// A registered message handler.
pub type MessageHandler = Arc<dyn Fn(&Envelope, ChannelKey) -> HandlerResult + Send + Sync>;

/// What a handler is registered for.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum HandlerKey {
    /// Exactly one message kind.
    Kind(MessageKind),
    /// Every message, invoked after the exact-kind handlers.
    Any,
}

/// Stable identity of one handler registration.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct HandlerToken {
    key: HandlerKey,
    id: u64,
}

/// Ordered handler registrations keyed by message kind.
#[derive(Default)]
pub struct HandlerRegistry {
    entries: Mutex<HashMap<HandlerKey, Vec<(u64, MessageHandler)>>>,
    next_id: AtomicU64,
}

impl HandlerRegistry {
    /// Create an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a handler; insertion order determines invocation order.
    pub fn register(&self, key: HandlerKey, handler: MessageHandler) -> HandlerToken {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        self.entries.lock().entry(key).or_default().push((id, handler));
        HandlerToken { key, id }
    }

    /// Remove a registration. Returns `false` when the token no longer
    /// matches anything.
    pub fn remove(&self, token: HandlerToken) -> bool {
        let mut entries = self.entries.lock();
        let Some(handlers) = entries.get_mut(&token.key) else {
            return false;
        };
        let before = handlers.len();
        handlers.retain(|(id, _)| *id != token.id);
        before != handlers.len()
    }

    /// Handlers to invoke for a kind: exact registrations first, then
    /// wildcard registrations, each group in registration order.
    #[must_use]
    pub fn snapshot_for(&self, kind: MessageKind) -> Vec<MessageHandler> {
        let entries = self.entries.lock();
        let mut handlers = Vec::new();
        if let Some(exact) = entries.get(&HandlerKey::Kind(kind)) {
            handlers.extend(exact.iter().map(|(_, h)| Arc::clone(h)));
        }
        if let Some(any) = entries.get(&HandlerKey::Any) {
            handlers.extend(any.iter().map(|(_, h)| Arc::clone(h)));
        }
        handlers
    }

    /// Total live registrations.
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.lock().values().map(Vec::len).sum()
    }

    /// Whether no handlers are registered.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Invoke handlers in order, isolating failures per handler.
pub(crate) fn run_handlers(handlers: &[MessageHandler], envelope: &Envelope, channel: ChannelKey) {
    for handler in handlers {
        if let Err(error) = handler(envelope, channel) {
            warn!(kind = ?envelope.kind(), %error, "message handler failed");
        }
    }
}

impl ClientInner {
    /// Decode and dispatch one inbound frame body.
    pub(crate) async fn handle_frame(&self, channel: ChannelKey, body: &str) {
        let envelope = match Envelope::decode(body) {
            Ok(envelope) => envelope,
            Err(error) => {
                warn!(channel = channel.as_str(), %error, "dropping undecodable frame");
                return;
            }
        };
        debug!(channel = channel.as_str(), kind = ?envelope.kind(), "inbound message");

        // Notification and peer-chat traffic go through the
        // notification gate before any registered handler runs.
        match &envelope.payload {
            Payload::Notification(notification) => self.handle_notification(notification).await,
            Payload::ChatMessage(text) => self.handle_chat_notification(&envelope, text).await,
            _ => {}
        }

        let handlers = self.handlers.snapshot_for(envelope.kind());
        run_handlers(&handlers, &envelope, channel);
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────
