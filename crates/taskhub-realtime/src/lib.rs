//! # taskhub-realtime
//!
//! Long-lived presence and messaging client for the TaskHub broker.
//!
//! The client owns a single publish/subscribe connection and keeps it
//! useful across network interruption:
//!
//! - **Connection manager** ([`RealtimeClient`]): lifecycle state
//!   machine with linear-backoff reconnection up to an attempt ceiling
//! - **Subscription registry**: at most one subscription per logical
//!   channel, replace-on-change, clear-then-rebuild on reconnect
//! - **Presence heartbeat**: periodic online announcements, debounced
//!   snapshot requests, optimistic local status events
//! - **Dispatcher**: typed envelope decode, per-kind handler fan-out
//!   with stable registration tokens, wildcard handlers last
//! - **Notification gate**: sliding-window deduplication in front of
//!   an injected desktop-shell (or native) notification capability
//!
//! The client is an explicit context object: construct one at the
//! composition root via [`RealtimeClient::builder`] and hand clones to
//! whichever layer needs it. All timers run on tokio time, so tests
//! drive them deterministically with `start_paused`.

#![deny(unsafe_code)]

pub mod client;
pub mod config;
pub mod dispatch;
pub mod errors;
pub mod events;
pub mod notify;
pub mod presence;
pub mod subscriptions;
pub mod transport;

pub use client::{ConnectionState, Identity, RealtimeClient, RealtimeClientBuilder};
pub use config::{ConfigError, RealtimeConfig};
pub use dispatch::{HandlerKey, HandlerResult, HandlerToken};
pub use errors::{RealtimeError, Result};
pub use events::{LocalEvent, StatusSource};
pub use notify::{DesktopNotification, NotificationSink, NotifyError, NotifyOutcome, Urgency};
pub use subscriptions::ChannelKey;
pub use transport::{BrokerSession, Transport, TransportError, WsTransport};
