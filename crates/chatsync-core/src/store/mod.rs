//! Session stores
//!
//! `LocalStore` holds the anonymous scope on the device, `RemoteStore` holds
//! each signed-in user's sessions. Both are injected into the engine so the
//! in-memory implementations can stand in for them.

mod local;
mod memory;
mod remote;

pub use local::{DEFAULT_STORAGE_KEY, LocalStore, SqliteLocalStore};
pub use memory::{InjectedFailure, MemoryLocalStore, MemoryRemoteStore};
pub use remote::{GroupChatSource, HttpRemoteStore, RemoteStore};
