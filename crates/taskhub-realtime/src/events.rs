//! Local event bus surface emitted to the UI.
//!
//! Events are fanned out on a `tokio::sync::broadcast` channel; the UI
//! subscribes via [`crate::RealtimeClient::events`]. Sending never
//! blocks and a bus with no subscribers simply drops events.

use taskhub_wire::{NotificationBody, PresenceStatus};

/// Why a status-change event was raised, when it was not a plain
/// presence announcement.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum StatusSource {
    /// Raised by [`crate::RealtimeClient::sync_status`] when a view
    /// regains focus.
    Sync,
}

/// Events emitted to the local UI.
#[derive(Clone, Debug)]
pub enum LocalEvent {
    /// A user's presence changed. `immediate` marks optimistic local
    /// updates raised before the broker round-trip completes.
    UserStatusChange {
        /// The user whose status changed.
        user_id: String,
        /// The new status.
        status: PresenceStatus,
        /// Whether this is an optimistic local update.
        immediate: bool,
        /// Trigger, when not a plain announcement.
        source: Option<StatusSource>,
    },
    /// A notification arrived (or a chat message produced one).
    NotificationReceived(NotificationBody),
    /// The user activated a displayed notification.
    NotificationClick(NotificationBody),
}
