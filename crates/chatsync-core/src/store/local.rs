//! Local session persistence using SQLite
//!
//! The anonymous scope is kept the way a browser keeps it in local storage:
//! one JSON array under one fixed key. SQLite only provides the durable
//! key-value table.

use std::sync::{Mutex, MutexGuard};

use chrono::Utc;
use rusqlite::{Connection, OptionalExtension, params};
use tracing::{debug, info};

use crate::session::SessionRecord;
use crate::{Error, Result};

/// Key holding the serialized local session collection
pub const DEFAULT_STORAGE_KEY: &str = "chatSessions";

/// Durable single-writer storage for local-scope sessions
pub trait LocalStore: Send + Sync {
    /// Read every stored session. Returns an empty list when nothing was
    /// ever written and [`Error::Corruption`] when the stored text does not
    /// parse.
    fn load(&self) -> Result<Vec<SessionRecord>>;

    /// Overwrite the whole collection in one write
    fn replace_all(&self, records: &[SessionRecord]) -> Result<()>;

    /// Remove one session; absent ids are ignored
    fn delete_one(&self, id: &str) -> Result<()>;
}

/// Parse a stored collection
pub(crate) fn decode_collection(text: &str) -> Result<Vec<SessionRecord>> {
    serde_json::from_str(text).map_err(|e| Error::Corruption(e.to_string()))
}

/// SQLite-based local store
pub struct SqliteLocalStore {
    conn: Mutex<Connection>,
    key: String,
}

impl SqliteLocalStore {
    /// Open (or create) the store at the given database path
    pub fn new(db_path: &str, key: impl Into<String>) -> Result<Self> {
        debug!("Opening local session database at: {}", db_path);
        let conn = Connection::open(db_path)?;
        let store = Self::from_connection(conn, key.into())?;
        info!("Local session store initialized");
        Ok(store)
    }

    /// Create an in-memory store (for testing)
    pub fn in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()?;
        Self::from_connection(conn, DEFAULT_STORAGE_KEY.to_string())
    }

    fn from_connection(conn: Connection, key: String) -> Result<Self> {
        let store = Self {
            conn: Mutex::new(conn),
            key,
        };
        store.init_tables()?;
        Ok(store)
    }

    /// Initialize database tables
    fn init_tables(&self) -> Result<()> {
        self.conn().execute(
            "CREATE TABLE IF NOT EXISTS kv_store (
                key TEXT PRIMARY KEY,
                value TEXT NOT NULL,
                updated_at TEXT NOT NULL
            )",
            [],
        )?;
        Ok(())
    }

    fn conn(&self) -> MutexGuard<'_, Connection> {
        self.conn.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Raw stored text, bypassing parsing
    pub fn raw_value(&self) -> Result<Option<String>> {
        read_raw(&self.conn(), &self.key)
    }

    /// Overwrite the stored text as-is
    pub fn write_raw(&self, value: &str) -> Result<()> {
        write_raw(&self.conn(), &self.key, value)
    }
}

fn read_raw(conn: &Connection, key: &str) -> Result<Option<String>> {
    let value = conn
        .query_row(
            "SELECT value FROM kv_store WHERE key = ?1",
            params![key],
            |row| row.get::<_, String>(0),
        )
        .optional()?;
    Ok(value)
}

fn write_raw(conn: &Connection, key: &str, value: &str) -> Result<()> {
    conn.execute(
        "INSERT OR REPLACE INTO kv_store (key, value, updated_at) VALUES (?1, ?2, ?3)",
        params![key, value, Utc::now().to_rfc3339()],
    )?;
    Ok(())
}

impl LocalStore for SqliteLocalStore {
    fn load(&self) -> Result<Vec<SessionRecord>> {
        match self.raw_value()? {
            Some(text) => decode_collection(&text),
            None => Ok(Vec::new()),
        }
    }

    fn replace_all(&self, records: &[SessionRecord]) -> Result<()> {
        let json = serde_json::to_string(records)?;
        self.write_raw(&json)?;
        debug!("Wrote {} local sessions", records.len());
        Ok(())
    }

    fn delete_one(&self, id: &str) -> Result<()> {
        let mut conn = self.conn();
        let tx = conn.transaction()?;

        let Some(text) = read_raw(&tx, &self.key)? else {
            return Ok(());
        };
        let mut records = decode_collection(&text)?;
        let before = records.len();
        records.retain(|r| r.id != id);

        if records.len() != before {
            write_raw(&tx, &self.key, &serde_json::to_string(&records)?)?;
            debug!("Deleted local session: {}", id);
        }
        tx.commit()?;
        Ok(())
    }
}
