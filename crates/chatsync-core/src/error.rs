//! Error types for chatsync-core

use thiserror::Error;

/// Main error type for chatsync-core
#[derive(Error, Debug)]
pub enum Error {
    /// Transient transport failure; the caller may retry the whole operation.
    #[error("Network error: {0}")]
    Network(String),

    /// Terminal until the user re-authenticates.
    #[error("Authentication error: {0}")]
    Auth(String),

    /// Local data could not be parsed.
    #[error("Local store corrupted: {0}")]
    Corruption(String),

    #[error("Session already exists: {0}")]
    Conflict(String),

    #[error("Session not found: {0}")]
    NotFound(String),

    #[error("Import contained no valid sessions ({dropped} dropped)")]
    NoValidRecords { dropped: usize },

    #[error("Invalid import document: {0}")]
    InvalidDocument(String),

    /// Non-retryable response from the remote store that has no dedicated variant.
    #[error("Remote store error ({status}): {message}")]
    Remote { status: u16, message: String },

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("JSON parsing error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Database error: {0}")]
    Database(#[from] rusqlite::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl Error {
    /// Whether retrying the same operation later may succeed
    pub fn is_retryable(&self) -> bool {
        matches!(self, Error::Network(_))
    }
}

/// Result type alias for chatsync-core
pub type Result<T> = std::result::Result<T, Error>;
