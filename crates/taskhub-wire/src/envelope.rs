//! Message envelope and payload union.
//!
//! [`Envelope`] is the structured message exchanged over the broker
//! connection. The `type` and `content` JSON fields form an adjacently
//! tagged union ([`Payload`]) so each message type carries exactly one
//! content shape, decoded by exhaustive matching. A frame whose `type`
//! is not one of the known kinds fails to decode instead of passing
//! through unchecked.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::errors::Result;

/// Message types carried on the wire.
///
/// Each variant serializes to the exact SCREAMING_SNAKE wire string the
/// backend dispatches on.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum MessageKind {
    /// A user joined a project channel.
    #[serde(rename = "JOIN_PROJECT")]
    JoinProject,
    /// A user left a project channel.
    #[serde(rename = "LEAVE_PROJECT")]
    LeaveProject,
    /// Project data changed.
    #[serde(rename = "PROJECT_UPDATE")]
    ProjectUpdate,
    /// A chat message.
    #[serde(rename = "CHAT_MESSAGE")]
    ChatMessage,
    /// A presence announcement or snapshot request.
    #[serde(rename = "USER_STATUS")]
    UserStatus,
    /// A user changed their avatar or display name.
    #[serde(rename = "USER_AVATAR_UPDATE")]
    AvatarUpdate,
    /// A server-issued notification.
    #[serde(rename = "NOTIFICATION")]
    Notification,
}

/// All message kind variants, for exhaustive testing.
pub const ALL_MESSAGE_KINDS: &[MessageKind] = &[
    MessageKind::JoinProject,
    MessageKind::LeaveProject,
    MessageKind::ProjectUpdate,
    MessageKind::ChatMessage,
    MessageKind::UserStatus,
    MessageKind::AvatarUpdate,
    MessageKind::Notification,
];

/// A user's presence as broadcast to peers.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PresenceStatus {
    /// Actively connected.
    Online,
    /// Disconnected or about to disconnect.
    Offline,
    /// Connected but idle.
    Away,
}

/// The only recognized status action verb.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum StatusAction {
    /// Ask every peer to re-announce its current status.
    #[serde(rename = "request_all")]
    RequestAll,
}

/// Content of a `USER_STATUS` message.
///
/// Either a presence announcement (`{"status": "online"}`) or a request
/// for a full presence snapshot (`{"action": "request_all"}`).
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum StatusContent {
    /// Announce the sender's presence.
    Announce {
        /// The announced status.
        status: PresenceStatus,
    },
    /// Request every peer's current status.
    RequestAll {
        /// The action verb.
        action: StatusAction,
    },
}

/// Content of a `USER_AVATAR_UPDATE` message.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AvatarContent {
    /// New avatar URL.
    pub avatar: String,
    /// Display name at the time of the change.
    pub real_name: String,
}

/// Content of a `NOTIFICATION` message.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NotificationBody {
    /// Backend notification id, when the notification is persisted.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<i64>,
    /// Notification title.
    pub title: String,
    /// Notification body text.
    pub content: String,
    /// Notification category (`system` / `project` / `personal`).
    #[serde(rename = "type", default, skip_serializing_if = "Option::is_none")]
    pub category: Option<String>,
    /// Display priority (`low` / `normal` / `high` / `urgent`).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub priority: Option<String>,
}

/// Typed message content, adjacently tagged over the `type` and
/// `content` JSON fields.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "content")]
pub enum Payload {
    /// Join announcement with a human-readable note.
    #[serde(rename = "JOIN_PROJECT")]
    JoinProject(String),
    /// Leave announcement with a human-readable note.
    #[serde(rename = "LEAVE_PROJECT")]
    LeaveProject(String),
    /// Opaque project update data — shape owned by the backend.
    #[serde(rename = "PROJECT_UPDATE")]
    ProjectUpdate(Value),
    /// Chat message text.
    #[serde(rename = "CHAT_MESSAGE")]
    ChatMessage(String),
    /// Presence announcement or snapshot request.
    #[serde(rename = "USER_STATUS")]
    UserStatus(StatusContent),
    /// Avatar / display name change.
    #[serde(rename = "USER_AVATAR_UPDATE")]
    AvatarUpdate(AvatarContent),
    /// Server-issued notification.
    #[serde(rename = "NOTIFICATION")]
    Notification(NotificationBody),
}

impl Payload {
    /// The message kind this payload serializes under.
    #[must_use]
    pub fn kind(&self) -> MessageKind {
        match self {
            Self::JoinProject(_) => MessageKind::JoinProject,
            Self::LeaveProject(_) => MessageKind::LeaveProject,
            Self::ProjectUpdate(_) => MessageKind::ProjectUpdate,
            Self::ChatMessage(_) => MessageKind::ChatMessage,
            Self::UserStatus(_) => MessageKind::UserStatus,
            Self::AvatarUpdate(_) => MessageKind::AvatarUpdate,
            Self::Notification(_) => MessageKind::Notification,
        }
    }
}

/// The structured message exchanged over the transport.
///
/// Wire shape (camelCase, optional fields omitted when absent):
/// ```json
/// { "type": "CHAT_MESSAGE", "content": "hi", "senderId": "u1",
///   "senderName": "ann", "projectId": "p1", "timestamp": 1755820800000 }
/// ```
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Envelope {
    /// Typed `type` + `content` pair.
    #[serde(flatten)]
    pub payload: Payload,
    /// Sender user id.
    pub sender_id: String,
    /// Sender display name.
    pub sender_name: String,
    /// Project scope, when the message is project-scoped.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub project_id: Option<String>,
    /// Direct recipient, for targeted messages.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub receiver_id: Option<String>,
    /// Send time in wall-clock milliseconds.
    pub timestamp: i64,
}

impl Envelope {
    /// Create an envelope stamped with the current wall-clock time.
    pub fn new(
        payload: Payload,
        sender_id: impl Into<String>,
        sender_name: impl Into<String>,
    ) -> Self {
        Self {
            payload,
            sender_id: sender_id.into(),
            sender_name: sender_name.into(),
            project_id: None,
            receiver_id: None,
            timestamp: chrono::Utc::now().timestamp_millis(),
        }
    }

    /// Attach a project scope.
    #[must_use]
    pub fn with_project(mut self, project_id: impl Into<String>) -> Self {
        self.project_id = Some(project_id.into());
        self
    }

    /// Attach a direct recipient.
    #[must_use]
    pub fn with_receiver(mut self, receiver_id: impl Into<String>) -> Self {
        self.receiver_id = Some(receiver_id.into());
        self
    }

    /// The message kind of this envelope.
    #[must_use]
    pub fn kind(&self) -> MessageKind {
        self.payload.kind()
    }

    /// Serialize to the JSON wire form.
    pub fn encode(&self) -> Result<String> {
        Ok(serde_json::to_string(self)?)
    }

    /// Decode a frame body. Fails on malformed JSON and on unknown
    /// message types.
    pub fn decode(body: &str) -> Result<Self> {
        Ok(serde_json::from_str(body)?)
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────
