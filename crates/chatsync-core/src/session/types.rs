//! Session types

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::session::ChatMessage;

/// Label given to sessions whose name is empty
pub const DEFAULT_SESSION_NAME: &str = "New Chat";

/// Assistant personality that produced a session.
///
/// Used for filtering and grouping only. Unknown tags are kept as
/// [`Persona::Custom`] so sessions written by newer clients still load.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum Persona {
    #[default]
    General,
    Coder,
    Tutor,
    Creative,
    Custom(String),
}

impl Persona {
    pub fn as_str(&self) -> &str {
        match self {
            Persona::General => "general",
            Persona::Coder => "coder",
            Persona::Tutor => "tutor",
            Persona::Creative => "creative",
            Persona::Custom(tag) => tag,
        }
    }
}

impl From<String> for Persona {
    fn from(tag: String) -> Self {
        match tag.as_str() {
            "general" => Persona::General,
            "coder" => Persona::Coder,
            "tutor" => Persona::Tutor,
            "creative" => Persona::Creative,
            _ => Persona::Custom(tag),
        }
    }
}

impl From<&str> for Persona {
    fn from(tag: &str) -> Self {
        Persona::from(tag.to_string())
    }
}

impl From<Persona> for String {
    fn from(persona: Persona) -> Self {
        persona.as_str().to_string()
    }
}

impl fmt::Display for Persona {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Store that currently owns a session
#[derive(Debug, Clone, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(tag = "type", content = "id", rename_all = "lowercase")]
pub enum OwnerScope {
    /// Anonymous device storage
    #[default]
    Local,
    /// Remote storage of a signed-in user
    User(String),
}

impl OwnerScope {
    pub fn is_local(&self) -> bool {
        matches!(self, OwnerScope::Local)
    }
}

impl fmt::Display for OwnerScope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            OwnerScope::Local => f.write_str("local"),
            OwnerScope::User(id) => write!(f, "user:{}", id),
        }
    }
}

/// A persisted chat session
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionRecord {
    /// Stable identifier, shared by every store that ever held the session
    pub id: String,
    /// User-editable display name
    pub name: String,
    pub persona: Persona,
    /// Conversation messages, oldest first
    pub messages: Vec<ChatMessage>,
    pub created_at: DateTime<Utc>,
    /// Bumped on every mutation; the only conflict-resolution key
    pub last_modified: DateTime<Utc>,
    #[serde(default)]
    pub owner_scope: OwnerScope,
}

impl SessionRecord {
    /// Create a new local-scope session
    pub fn new(name: impl Into<String>, persona: Persona) -> Self {
        Self::with_id(uuid::Uuid::new_v4().to_string(), name, persona)
    }

    /// Create a new local-scope session with a specific ID
    pub fn with_id(id: impl Into<String>, name: impl Into<String>, persona: Persona) -> Self {
        let now = Utc::now();
        Self {
            id: id.into(),
            name: normalize_name(name.into()),
            persona,
            messages: Vec::new(),
            created_at: now,
            last_modified: now,
            owner_scope: OwnerScope::Local,
        }
    }

    /// Set both timestamps (builder style, mostly for fixtures)
    pub fn with_timestamps(mut self, created_at: DateTime<Utc>, last_modified: DateTime<Utc>) -> Self {
        self.created_at = created_at;
        self.last_modified = last_modified.max(created_at);
        self
    }

    /// Copy of this session owned by another scope
    pub fn in_scope(&self, scope: OwnerScope) -> Self {
        Self {
            owner_scope: scope,
            ..self.clone()
        }
    }

    /// Rename the session; an empty name falls back to the default label
    pub fn rename(&mut self, name: impl Into<String>) {
        self.name = normalize_name(name.into());
        self.touch();
    }

    /// Add a message to the session
    pub fn add_message(&mut self, message: ChatMessage) {
        self.messages.push(message);
        self.touch();
    }

    /// Stamp a fresh modification time, never earlier than creation
    pub fn touch(&mut self) {
        self.last_modified = Utc::now().max(self.created_at);
    }

    /// Last-writer-wins test: strictly newer only
    pub fn is_newer_than(&self, other: &SessionRecord) -> bool {
        self.last_modified > other.last_modified
    }

    /// Get message count
    pub fn message_count(&self) -> usize {
        self.messages.len()
    }
}

/// Empty or whitespace-only names become the default label
pub fn normalize_name(name: String) -> String {
    if name.trim().is_empty() {
        DEFAULT_SESSION_NAME.to_string()
    } else {
        name
    }
}

/// Sort most recently touched first
pub fn sort_by_recent(records: &mut [SessionRecord]) {
    records.sort_by(|a, b| b.last_modified.cmp(&a.last_modified));
}
