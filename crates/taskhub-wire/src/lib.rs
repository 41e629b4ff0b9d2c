//! # taskhub-wire
//!
//! Wire-level types shared by the TaskHub realtime client:
//!
//! - **Envelope**: the JSON message exchanged with the broker, with a
//!   tagged payload union so every message type carries exactly one
//!   content shape and unknown types are rejected at decode time
//! - **Topics**: hierarchical topic paths and the fixed `/app/...`
//!   destinations outbound actions are published to

#![deny(unsafe_code)]

pub mod envelope;
pub mod errors;
pub mod topics;

pub use envelope::{
    AvatarContent, Envelope, MessageKind, NotificationBody, Payload, PresenceStatus, StatusAction,
    StatusContent,
};
pub use errors::{Result, WireError};
