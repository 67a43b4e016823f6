//! Chat message entity carried inside a session

use serde::{Deserialize, Serialize, Serializer};
use serde_json::{Map, Value as JsonValue};

/// A single message in a conversation.
///
/// The message is kept as the JSON object the client wrote, in its original
/// field order, so it is written back out exactly as it was read. Only
/// `role` is required; `content` and every other field (timestamps, image
/// references, model names, ...) pass through untouched.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(try_from = "Map<String, JsonValue>")]
pub struct ChatMessage {
    fields: Map<String, JsonValue>,
}

impl ChatMessage {
    /// Create a user message with text
    pub fn user(text: impl Into<String>) -> Self {
        Self::text("user", text)
    }

    /// Create an assistant message with text
    pub fn assistant(text: impl Into<String>) -> Self {
        Self::text("assistant", text)
    }

    fn text(role: &str, text: impl Into<String>) -> Self {
        let mut fields = Map::new();
        fields.insert("role".to_string(), JsonValue::String(role.to_string()));
        fields.insert("content".to_string(), JsonValue::String(text.into()));
        Self { fields }
    }

    /// Attach a field this crate does not interpret. `role` cannot be
    /// replaced this way.
    pub fn with_field(mut self, key: impl Into<String>, value: JsonValue) -> Self {
        let key = key.into();
        if key != "role" {
            self.fields.insert(key, value);
        }
        self
    }

    pub fn role(&self) -> &str {
        self.fields
            .get("role")
            .and_then(JsonValue::as_str)
            .unwrap_or_default()
    }

    pub fn content(&self) -> Option<&JsonValue> {
        self.fields.get("content")
    }

    /// Text content, if the content is a plain string
    pub fn text_content(&self) -> Option<&str> {
        self.content().and_then(JsonValue::as_str)
    }

    /// Any field of the message by name
    pub fn get(&self, key: &str) -> Option<&JsonValue> {
        self.fields.get(key)
    }

    /// The message as stored, in field order
    pub fn as_object(&self) -> &Map<String, JsonValue> {
        &self.fields
    }
}

impl TryFrom<Map<String, JsonValue>> for ChatMessage {
    type Error = String;

    fn try_from(fields: Map<String, JsonValue>) -> Result<Self, Self::Error> {
        match fields.get("role") {
            Some(JsonValue::String(role)) if !role.trim().is_empty() => Ok(Self { fields }),
            Some(_) => Err("`role` must be a non-empty string".to_string()),
            None => Err("missing field `role`".to_string()),
        }
    }
}

impl Serialize for ChatMessage {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        self.fields.serialize(serializer)
    }
}
