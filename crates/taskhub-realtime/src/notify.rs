//! Desktop notification gate.
//!
//! Incoming notifications and peer chat messages are turned into
//! desktop notifications behind a dedup cache: a title+body pair seen
//! within the sliding window is suppressed before any sink is
//! consulted. Delivery prefers the shell sink when one is configured
//! and falls back to the native sink only when no shell sink exists;
//! a failing shell sink does not retry on the native one.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use thiserror::Error;
use tokio::time::Instant;
use tracing::{debug, warn};

use taskhub_wire::{Envelope, NotificationBody};

use crate::client::ClientInner;
use crate::events::LocalEvent;

/// How loudly a notification should present.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Urgency {
    /// Quiet, may be batched by the desktop environment.
    Low,
    /// Default presentation.
    Normal,
    /// Stays on screen until dismissed.
    Critical,
}

/// Map a wire priority string to a display urgency. Unknown or absent
/// priorities present as [`Urgency::Normal`].
#[must_use]
pub fn urgency_for_priority(priority: Option<&str>) -> Urgency {
    match priority {
        Some("low") => Urgency::Low,
        Some("urgent") => Urgency::Critical,
        _ => Urgency::Normal,
    }
}

/// One notification ready to hand to a desktop sink.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct DesktopNotification {
    /// Title line.
    pub title: String,
    /// Body text.
    pub body: String,
    /// Optional icon path or name.
    pub icon: Option<String>,
    /// Suppress the notification sound.
    pub silent: bool,
    /// Display urgency.
    pub urgency: Urgency,
}

/// Errors raised by a notification sink.
#[derive(Debug, Error)]
pub enum NotifyError {
    /// The sink could not display the notification.
    #[error("notification delivery failed: {0}")]
    Delivery(String),
}

/// A backend able to display desktop notifications.
#[async_trait]
pub trait NotificationSink: Send + Sync {
    /// Display one notification.
    async fn show(&self, notification: &DesktopNotification) -> Result<(), NotifyError>;
}

/// What happened to a notification offered to the gate.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum NotifyOutcome {
    /// A sink displayed it.
    Delivered,
    /// Suppressed as a duplicate inside the dedup window.
    Skipped,
    /// The chosen sink returned an error.
    Failed,
    /// No sink is configured.
    Unavailable,
}

/// Sliding-window duplicate suppression keyed on title+body.
pub(crate) struct DedupCache {
    window: Duration,
    retention: Duration,
    entries: Mutex<HashMap<String, Instant>>,
}

impl DedupCache {
    pub(crate) fn new(window: Duration, retention: Duration) -> Self {
        Self {
            window,
            retention,
            entries: Mutex::new(HashMap::new()),
        }
    }

    /// Whether a notification with this title and body may proceed.
    /// Admitting records the current instant and purges entries older
    /// than the retention horizon.
    pub(crate) fn admit(&self, title: &str, body: &str) -> bool {
        let key = format!("{title}\u{1f}{body}");
        let now = Instant::now();
        let mut entries = self.entries.lock();
        if let Some(last) = entries.get(&key) {
            if now.duration_since(*last) < self.window {
                return false;
            }
        }
        entries.retain(|_, seen| now.duration_since(*seen) < self.retention);
        let _ = entries.insert(key, now);
        true
    }

    #[cfg(test)]
    pub(crate) fn len(&self) -> usize {
        self.entries.lock().len()
    }
}

/// Routes notifications to the configured sink behind the dedup cache.
pub(crate) struct NotificationGate {
    dedup: DedupCache,
    shell: Option<Arc<dyn NotificationSink>>,
    native: Option<Arc<dyn NotificationSink>>,
}

impl NotificationGate {
    pub(crate) fn new(
        window: Duration,
        retention: Duration,
        shell: Option<Arc<dyn NotificationSink>>,
        native: Option<Arc<dyn NotificationSink>>,
    ) -> Self {
        Self {
            dedup: DedupCache::new(window, retention),
            shell,
            native,
        }
    }

    /// Offer a notification for display. The dedup check runs before
    /// any sink is chosen, so duplicates cost nothing.
    pub(crate) async fn deliver(&self, notification: &DesktopNotification) -> NotifyOutcome {
        if !self.dedup.admit(&notification.title, &notification.body) {
            debug!(title = %notification.title, "duplicate notification suppressed");
            return NotifyOutcome::Skipped;
        }

        let sink = self.shell.as_ref().or(self.native.as_ref());
        let Some(sink) = sink else {
            debug!(title = %notification.title, "no notification sink configured");
            return NotifyOutcome::Unavailable;
        };

        match sink.show(notification).await {
            Ok(()) => NotifyOutcome::Delivered,
            Err(error) => {
                warn!(title = %notification.title, %error, "notification sink failed");
                NotifyOutcome::Failed
            }
        }
    }
}

fn titled(category: Option<&str>, title: &str) -> String {
    match category {
        Some("system") => format!("System notice: {title}"),
        Some("project") => format!("Project notice: {title}"),
        Some("personal") => format!("Personal notice: {title}"),
        _ => title.to_string(),
    }
}

impl ClientInner {
    /// Handle a broker-originated notification payload.
    pub(crate) async fn handle_notification(&self, body: &NotificationBody) {
        self.emit(LocalEvent::NotificationReceived(body.clone()));

        let notification = DesktopNotification {
            title: titled(body.category.as_deref(), &body.title),
            body: body.content.clone(),
            icon: None,
            silent: false,
            urgency: urgency_for_priority(body.priority.as_deref()),
        };
        let _ = self.gate.deliver(&notification).await;
    }

    /// Turn a peer chat message into a notification. Messages echoed
    /// back from the local user never notify.
    pub(crate) async fn handle_chat_notification(&self, envelope: &Envelope, text: &str) {
        let own_id = self.identity.lock().as_ref().map(|i| i.id.clone());
        if own_id.as_deref() == Some(envelope.sender_id.as_str()) {
            return;
        }

        let body = NotificationBody {
            id: None,
            title: "New message".into(),
            content: format!("{}: {text}", envelope.sender_name),
            category: None,
            priority: None,
        };
        self.emit(LocalEvent::NotificationReceived(body.clone()));

        let notification = DesktopNotification {
            title: body.title.clone(),
            body: body.content.clone(),
            icon: None,
            silent: false,
            urgency: Urgency::Normal,
        };
        let _ = self.gate.deliver(&notification).await;
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────
