//! Group chat projection

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::session::Persona;

/// Read-only summary of a collaborative chat.
///
/// Comes straight from the group-chat service and is never reconciled
/// against local state.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GroupChatSummary {
    pub id: String,
    pub name: String,
    pub persona: Persona,
    /// Display name of the user who owns the group chat
    pub owner_name: String,
    pub participant_count: u32,
    pub updated_at: DateTime<Utc>,
}
