//! Export / import document format
//!
//! An export is `{ exportDate, version: "1.0", sessions: [...] }`. Decoding
//! is lenient at the document level (unknown fields are
//! ignored, a bare session array is accepted) and strict per session: a
//! candidate that fails validation is dropped and counted, never fatal.

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value as JsonValue};
use tracing::debug;

use crate::session::{ChatMessage, OwnerScope, Persona, SessionRecord};
use crate::{Error, Result};

/// Format version written into every export
pub const EXPORT_FORMAT_VERSION: &str = "1.0";

/// MIME type of an export file
pub const EXPORT_MIME_TYPE: &str = "application/json";

/// Portable export document
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExportDocument {
    pub export_date: DateTime<Utc>,
    pub version: String,
    pub sessions: Vec<SessionRecord>,
}

impl ExportDocument {
    /// Pretty-printed JSON, the form written to export files
    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }
}

/// Build an export document for the given sessions
pub fn encode(records: &[SessionRecord], exported_at: DateTime<Utc>) -> ExportDocument {
    ExportDocument {
        export_date: exported_at,
        version: EXPORT_FORMAT_VERSION.to_string(),
        sessions: records.to_vec(),
    }
}

/// Suggested file name for an export made on `date`
pub fn export_file_name(date: DateTime<Utc>) -> String {
    format!("chat-sessions-{}.json", date.format("%Y-%m-%d"))
}

/// Result of decoding an import document
#[derive(Debug, Clone, PartialEq)]
pub struct DecodedImport {
    /// Candidates that passed validation, in document order
    pub records: Vec<SessionRecord>,
    /// Candidates that failed validation
    pub dropped: usize,
    /// Version tag of the document, if it had one
    pub version: Option<String>,
}

impl DecodedImport {
    pub fn total(&self) -> usize {
        self.records.len() + self.dropped
    }

    /// The valid records, or [`Error::NoValidRecords`] when none survived
    pub fn into_valid(self) -> Result<Vec<SessionRecord>> {
        if self.records.is_empty() {
            return Err(Error::NoValidRecords {
                dropped: self.dropped,
            });
        }
        Ok(self.records)
    }
}

/// Parse an import document and validate each session in it
pub fn decode(text: &str) -> Result<DecodedImport> {
    let document: JsonValue =
        serde_json::from_str(text).map_err(|e| Error::InvalidDocument(e.to_string()))?;

    let (candidates, version) = match document {
        JsonValue::Object(mut fields) => {
            let version = fields
                .get("version")
                .and_then(JsonValue::as_str)
                .map(str::to_string);
            match fields.remove("sessions") {
                Some(JsonValue::Array(sessions)) => (sessions, version),
                _ => {
                    return Err(Error::InvalidDocument(
                        "document has no sessions array".to_string(),
                    ));
                }
            }
        }
        // Older exports were a bare array of sessions
        JsonValue::Array(sessions) => (sessions, None),
        _ => {
            return Err(Error::InvalidDocument(
                "expected an object or an array".to_string(),
            ));
        }
    };

    if let Some(v) = version.as_deref().filter(|v| *v != EXPORT_FORMAT_VERSION) {
        debug!("Decoding export with version {}, reading it as {}", v, EXPORT_FORMAT_VERSION);
    }

    let mut records = Vec::with_capacity(candidates.len());
    let mut dropped = 0;
    for (index, candidate) in candidates.iter().enumerate() {
        match validate_candidate(candidate) {
            Ok(record) => records.push(record),
            Err(reason) => {
                debug!("Dropping import candidate #{}: {}", index, reason);
                dropped += 1;
            }
        }
    }

    Ok(DecodedImport {
        records,
        dropped,
        version,
    })
}

fn required_str<'a>(fields: &'a Map<String, JsonValue>, key: &'static str) -> std::result::Result<&'a str, String> {
    match fields.get(key).and_then(JsonValue::as_str) {
        Some(value) if !value.trim().is_empty() => Ok(value),
        _ => Err(format!("missing or empty `{}`", key)),
    }
}

fn required_timestamp(fields: &Map<String, JsonValue>, key: &'static str) -> std::result::Result<DateTime<Utc>, String> {
    fields
        .get(key)
        .and_then(parse_timestamp)
        .ok_or_else(|| format!("missing or unreadable `{}`", key))
}

/// Structural validation of one candidate session
fn validate_candidate(value: &JsonValue) -> std::result::Result<SessionRecord, String> {
    let fields = value.as_object().ok_or("not an object")?;

    let id = required_str(fields, "id")?;
    let name = required_str(fields, "name")?;
    let persona = required_str(fields, "persona")?;
    let created_at = required_timestamp(fields, "createdAt")?;
    let last_modified = required_timestamp(fields, "lastModified")?;

    if last_modified < created_at {
        return Err("`lastModified` is earlier than `createdAt`".to_string());
    }

    let messages = match fields.get("messages") {
        Some(JsonValue::Array(items)) => items
            .iter()
            .map(|m| serde_json::from_value::<ChatMessage>(m.clone()))
            .collect::<std::result::Result<Vec<_>, _>>()
            .map_err(|e| format!("malformed message: {}", e))?,
        _ => return Err("missing `messages` array".to_string()),
    };

    let owner_scope = fields
        .get("ownerScope")
        .and_then(|scope| serde_json::from_value::<OwnerScope>(scope.clone()).ok())
        .unwrap_or_default();

    Ok(SessionRecord {
        id: id.to_string(),
        name: name.to_string(),
        persona: Persona::from(persona),
        messages,
        created_at,
        last_modified,
        owner_scope,
    })
}

/// Accepts RFC 3339 strings, bare `YYYY-MM-DD` dates (midnight UTC) and
/// integer epoch milliseconds.
pub fn parse_timestamp(value: &JsonValue) -> Option<DateTime<Utc>> {
    match value {
        JsonValue::String(text) => DateTime::parse_from_rfc3339(text)
            .map(|dt| dt.with_timezone(&Utc))
            .ok()
            .or_else(|| {
                NaiveDate::parse_from_str(text, "%Y-%m-%d")
                    .ok()
                    .and_then(|date| date.and_hms_opt(0, 0, 0))
                    .map(|dt| dt.and_utc())
            }),
        JsonValue::Number(number) => number.as_i64().and_then(DateTime::from_timestamp_millis),
        _ => None,
    }
}
