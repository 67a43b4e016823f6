//! chatsync-core: chat session persistence and reconciliation
//!
//! Signed-out users keep their sessions in a local store, signed-in users in
//! a remote one. This crate moves sessions between the two, merges import
//! documents with last-writer-wins, and exports the current scope.

pub mod codec;
pub mod config;
pub mod engine;
pub mod error;
pub mod session;
pub mod store;

pub use codec::{DecodedImport, ExportDocument};
pub use config::{Config, LocalConfig, RemoteConfig, SyncConfig};
pub use engine::{Identity, ImportReport, MigrationReport, ReconciliationEngine};
pub use error::{Error, Result};
pub use session::{ChatMessage, GroupChatSummary, OwnerScope, Persona, SessionRecord};
pub use store::{
    GroupChatSource, HttpRemoteStore, LocalStore, MemoryLocalStore, MemoryRemoteStore,
    RemoteStore, SqliteLocalStore,
};
