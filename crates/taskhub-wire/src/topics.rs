//! Topic paths and outbound destinations.
//!
//! Topics use hierarchical path naming: one broadcast topic shared by
//! everyone, one queue per user, one topic per project. Outbound
//! application actions go to fixed `/app/...` destinations.

/// The broadcast topic every connected client subscribes to.
pub const GLOBAL_TOPIC: &str = "/topic/global";

/// The per-user queue for targeted messages.
#[must_use]
pub fn personal_queue(user_id: &str) -> String {
    format!("/queue/user/{user_id}")
}

/// The per-project topic for project-scoped messages.
#[must_use]
pub fn project_topic(project_id: &str) -> String {
    format!("/topic/project/{project_id}")
}

/// Fixed destinations for outbound application actions.
pub mod destinations {
    /// Announce joining a project channel.
    pub const PROJECT_JOIN: &str = "/app/project.join";
    /// Announce leaving a project channel.
    pub const PROJECT_LEAVE: &str = "/app/project.leave";
    /// Publish a project update.
    pub const PROJECT_UPDATE: &str = "/app/project.update";
    /// Send a chat message.
    pub const CHAT_MESSAGE: &str = "/app/chat.message";
    /// Announce presence or request a presence snapshot.
    pub const USER_STATUS: &str = "/app/user.status";
    /// Announce an avatar / display name change.
    pub const USER_AVATAR: &str = "/app/user.avatar";
}
