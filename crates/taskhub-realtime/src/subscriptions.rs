//! Topic subscription bookkeeping.
//!
//! At most one subscription exists per logical channel. Replacing a
//! channel's subscription always cancels the prior handle and
//! unsubscribes it before the new one is installed, so no subscription
//! leaks across project switches or reconnects. Rebuilds are
//! clear-then-rebuild: everything is torn down first, which guarantees
//! no duplicates survive a reconnect at the cost of a brief window with
//! no active subscriptions.

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::Mutex;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use taskhub_wire::topics;
use taskhub_wire::{Envelope, Payload};

use crate::client::ClientInner;

/// Logical channel names the client subscribes under.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum ChannelKey {
    /// The broadcast topic shared by every client.
    Global,
    /// The per-user queue.
    Personal,
    /// The currently joined project topic.
    Project,
}

impl ChannelKey {
    /// Stable name for logging.
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Global => "global",
            Self::Personal => "personal",
            Self::Project => "project",
        }
    }
}

/// All channel keys, in teardown order.
pub(crate) const ALL_CHANNEL_KEYS: [ChannelKey; 3] =
    [ChannelKey::Global, ChannelKey::Personal, ChannelKey::Project];

/// One active subscription: its channel, its topic path, and the
/// cancel handle that stops its frame pump.
pub(crate) struct ChannelSubscription {
    pub(crate) key: ChannelKey,
    pub(crate) topic: String,
    pub(crate) cancel: CancellationToken,
}

/// Active subscriptions keyed by logical channel.
#[derive(Default)]
pub(crate) struct SubscriptionRegistry {
    entries: Mutex<HashMap<ChannelKey, ChannelSubscription>>,
}

impl SubscriptionRegistry {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    /// Install a subscription. Any displaced entry for the same key is
    /// returned with its pump already cancelled.
    pub(crate) fn insert(&self, sub: ChannelSubscription) -> Option<ChannelSubscription> {
        let displaced = self.entries.lock().insert(sub.key, sub);
        if let Some(old) = &displaced {
            old.cancel.cancel();
        }
        displaced
    }

    /// Remove and cancel the subscription for a key, if present.
    pub(crate) fn take(&self, key: ChannelKey) -> Option<ChannelSubscription> {
        let removed = self.entries.lock().remove(&key);
        if let Some(sub) = &removed {
            sub.cancel.cancel();
        }
        removed
    }

    /// The topic currently subscribed under a key.
    pub(crate) fn topic_of(&self, key: ChannelKey) -> Option<String> {
        self.entries.lock().get(&key).map(|s| s.topic.clone())
    }

    /// Cancel every pump and drop all entries without telling the
    /// broker — used when the transport is already gone.
    pub(crate) fn clear(&self) {
        let mut entries = self.entries.lock();
        for sub in entries.values() {
            sub.cancel.cancel();
        }
        entries.clear();
    }

    pub(crate) fn len(&self) -> usize {
        self.entries.lock().len()
    }
}

impl ClientInner {
    /// Replace the subscription under `key` with one for `topic`,
    /// cancelling and unsubscribing any prior entry first.
    pub(crate) async fn install_subscription(self: &Arc<Self>, key: ChannelKey, topic: String) {
        self.drop_subscription(key).await;

        let session = self.session.lock().clone();
        let Some(session) = session else {
            warn!(key = key.as_str(), "subscribe skipped, not connected");
            return;
        };

        let mut rx = match session.subscribe(&topic).await {
            Ok(rx) => rx,
            Err(error) => {
                warn!(key = key.as_str(), topic = %topic, %error, "subscribe failed");
                return;
            }
        };

        let cancel = CancellationToken::new();
        let pump_cancel = cancel.clone();
        let inner = Arc::clone(self);
        let _pump = tokio::spawn(async move {
            loop {
                tokio::select! {
                    maybe = rx.recv() => match maybe {
                        Some(body) => inner.handle_frame(key, &body).await,
                        None => break,
                    },
                    () = pump_cancel.cancelled() => break,
                }
            }
        });

        debug!(key = key.as_str(), topic = %topic, "subscribed");
        let _ = self.subscriptions.insert(ChannelSubscription { key, topic, cancel });
    }

    /// Cancel the pump and unsubscribe the channel, if subscribed.
    pub(crate) async fn drop_subscription(&self, key: ChannelKey) {
        if let Some(sub) = self.subscriptions.take(key) {
            let session = self.session.lock().clone();
            if let Some(session) = session {
                session.unsubscribe(&sub.topic).await;
            }
            debug!(key = key.as_str(), topic = %sub.topic, "unsubscribed");
        }
    }

    /// Tear down every subscription, politely unsubscribing each.
    pub(crate) async fn clear_subscriptions(&self) {
        for key in ALL_CHANNEL_KEYS {
            self.drop_subscription(key).await;
        }
    }

    /// Clear-then-rebuild the global and personal subscriptions.
    pub(crate) async fn subscribe_to_topics(self: &Arc<Self>) {
        self.clear_subscriptions().await;

        self.install_subscription(ChannelKey::Global, topics::GLOBAL_TOPIC.to_string())
            .await;

        let identity = self.identity.lock().clone();
        if let Some(identity) = identity {
            self.install_subscription(ChannelKey::Personal, topics::personal_queue(&identity.id))
                .await;
        }
    }

    /// Join a project channel. Idempotent for the already-joined
    /// project; switches leave the previous project first. Best
    /// effort: logs and returns when disconnected or without identity.
    pub(crate) async fn join_project(self: &Arc<Self>, project_id: &str) {
        let Some(identity) = self.identity.lock().clone() else {
            warn!(project_id, "join skipped, no identity");
            return;
        };
        if self.session.lock().is_none() {
            warn!(project_id, "join skipped, not connected");
            return;
        }

        if self.active_project.lock().as_deref() == Some(project_id) {
            debug!(project_id, "already joined");
            return;
        }
        if self.active_project.lock().is_some() {
            self.leave_project().await;
        }

        self.install_subscription(ChannelKey::Project, topics::project_topic(project_id))
            .await;
        *self.active_project.lock() = Some(project_id.to_string());

        let envelope = Envelope::new(
            Payload::JoinProject("joined project".into()),
            &identity.id,
            &identity.username,
        )
        .with_project(project_id);
        let _ = self.publish(topics::destinations::PROJECT_JOIN, &envelope).await;

        info!(project_id, "joined project channel");
    }

    /// Leave the active project channel, if any. The LEAVE publish
    /// goes out before the subscription is dropped.
    pub(crate) async fn leave_project(&self) {
        let project_id = self.active_project.lock().clone();
        let Some(project_id) = project_id else {
            return;
        };

        let identity = self.identity.lock().clone();
        if let Some(identity) = identity {
            let envelope = Envelope::new(
                Payload::LeaveProject("left project".into()),
                &identity.id,
                &identity.username,
            )
            .with_project(&project_id);
            let _ = self.publish(topics::destinations::PROJECT_LEAVE, &envelope).await;
        }

        self.drop_subscription(ChannelKey::Project).await;
        *self.active_project.lock() = None;
        info!(project_id = %project_id, "left project channel");
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────
