//! Session model
//!
//! Canonical chat-session entity shared by the local and remote stores.

mod group;
mod message;
mod types;

pub use group::GroupChatSummary;
pub use message::ChatMessage;
pub use types::{
    DEFAULT_SESSION_NAME, OwnerScope, Persona, SessionRecord, normalize_name, sort_by_recent,
};
