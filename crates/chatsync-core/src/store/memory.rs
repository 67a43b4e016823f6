//! In-memory store implementations
//!
//! Used by tests and by callers that want a throwaway session list. The
//! remote fake can be told to fail, which is how partial migrations are
//! exercised.

use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard};

use async_trait::async_trait;
use chrono::Utc;

use crate::session::{GroupChatSummary, SessionRecord};
use crate::store::local::decode_collection;
use crate::store::{GroupChatSource, LocalStore, RemoteStore};
use crate::{Error, Result};

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

/// Local store backed by a single serialized string, like browser storage
#[derive(Default)]
pub struct MemoryLocalStore {
    value: Mutex<Option<String>>,
}

impl MemoryLocalStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Start with the given sessions already stored
    pub fn with_records(records: &[SessionRecord]) -> Result<Self> {
        let store = Self::new();
        store.replace_all(records)?;
        Ok(store)
    }

    /// Start with arbitrary stored text, e.g. a corrupted payload
    pub fn with_raw(value: impl Into<String>) -> Self {
        Self {
            value: Mutex::new(Some(value.into())),
        }
    }

    pub fn raw_value(&self) -> Option<String> {
        lock(&self.value).clone()
    }
}

impl LocalStore for MemoryLocalStore {
    fn load(&self) -> Result<Vec<SessionRecord>> {
        match lock(&self.value).as_deref() {
            Some(text) => decode_collection(text),
            None => Ok(Vec::new()),
        }
    }

    fn replace_all(&self, records: &[SessionRecord]) -> Result<()> {
        let json = serde_json::to_string(records)?;
        *lock(&self.value) = Some(json);
        Ok(())
    }

    fn delete_one(&self, id: &str) -> Result<()> {
        let mut value = lock(&self.value);
        let Some(text) = value.as_deref() else {
            return Ok(());
        };
        let mut records = decode_collection(text)?;
        records.retain(|r| r.id != id);
        *value = Some(serde_json::to_string(&records)?);
        Ok(())
    }
}

/// Failure the in-memory remote store can be told to produce
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InjectedFailure {
    Network,
    Auth,
}

impl InjectedFailure {
    fn to_error(self) -> Error {
        match self {
            InjectedFailure::Network => Error::Network("injected network failure".to_string()),
            InjectedFailure::Auth => Error::Auth("injected auth failure".to_string()),
        }
    }
}

#[derive(Default)]
struct RemoteState {
    sessions: HashMap<String, Vec<SessionRecord>>,
    group_chats: HashMap<String, Vec<GroupChatSummary>>,
    create_calls: usize,
    upsert_calls: usize,
    fail_creates_after: Option<(usize, InjectedFailure)>,
    fail_upserts_after: Option<(usize, InjectedFailure)>,
    fail_all: Option<InjectedFailure>,
}

impl RemoteState {
    fn check_available(&self) -> Result<()> {
        match self.fail_all {
            Some(failure) => Err(failure.to_error()),
            None => Ok(()),
        }
    }

    fn find_mut(&mut self, id: &str, owner_id: &str) -> Option<&mut SessionRecord> {
        self.sessions
            .get_mut(owner_id)?
            .iter_mut()
            .find(|r| r.id == id)
    }
}

/// Fails once `calls` exceeds the allowed number of successes
fn injected(limit: Option<(usize, InjectedFailure)>, calls: usize) -> Result<()> {
    match limit {
        Some((successes, failure)) if calls > successes => Err(failure.to_error()),
        _ => Ok(()),
    }
}

/// Remote store kept in process memory, partitioned by owner
#[derive(Default)]
pub struct MemoryRemoteStore {
    state: Mutex<RemoteState>,
}

impl MemoryRemoteStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Put sessions under an owner without going through `create`
    pub fn seed(&self, owner_id: &str, records: Vec<SessionRecord>) {
        lock(&self.state)
            .sessions
            .entry(owner_id.to_string())
            .or_default()
            .extend(records);
    }

    pub fn seed_group_chats(&self, owner_id: &str, chats: Vec<GroupChatSummary>) {
        lock(&self.state)
            .group_chats
            .insert(owner_id.to_string(), chats);
    }

    /// Snapshot of an owner's sessions in insertion order
    pub fn sessions(&self, owner_id: &str) -> Vec<SessionRecord> {
        lock(&self.state)
            .sessions
            .get(owner_id)
            .cloned()
            .unwrap_or_default()
    }

    /// Number of `create` calls received, including failed ones
    pub fn create_calls(&self) -> usize {
        lock(&self.state).create_calls
    }

    /// Let `successes` creates through, then fail every following one
    pub fn fail_creates_after(&self, successes: usize, failure: InjectedFailure) {
        lock(&self.state).fail_creates_after = Some((successes, failure));
    }

    /// Number of `upsert` calls received, including failed ones
    pub fn upsert_calls(&self) -> usize {
        lock(&self.state).upsert_calls
    }

    /// Let `successes` upserts through, then fail every following one
    pub fn fail_upserts_after(&self, successes: usize, failure: InjectedFailure) {
        lock(&self.state).fail_upserts_after = Some((successes, failure));
    }

    /// Fail every operation
    pub fn fail_all(&self, failure: InjectedFailure) {
        lock(&self.state).fail_all = Some(failure);
    }

    pub fn clear_failures(&self) {
        let mut state = lock(&self.state);
        state.fail_creates_after = None;
        state.fail_upserts_after = None;
        state.fail_all = None;
    }
}

#[async_trait]
impl RemoteStore for MemoryRemoteStore {
    async fn list_by_owner(&self, owner_id: &str) -> Result<Vec<SessionRecord>> {
        let state = lock(&self.state);
        state.check_available()?;
        Ok(state.sessions.get(owner_id).cloned().unwrap_or_default())
    }

    async fn create(&self, record: &SessionRecord, owner_id: &str) -> Result<()> {
        let mut state = lock(&self.state);
        state.check_available()?;

        state.create_calls += 1;
        injected(state.fail_creates_after, state.create_calls)?;

        let owned = state.sessions.entry(owner_id.to_string()).or_default();
        if owned.iter().any(|r| r.id == record.id) {
            return Err(Error::Conflict(record.id.clone()));
        }
        owned.push(record.clone());
        Ok(())
    }

    async fn upsert(&self, record: &SessionRecord, owner_id: &str) -> Result<()> {
        let mut state = lock(&self.state);
        state.check_available()?;

        state.upsert_calls += 1;
        injected(state.fail_upserts_after, state.upsert_calls)?;

        let owned = state.sessions.entry(owner_id.to_string()).or_default();
        match owned.iter_mut().find(|r| r.id == record.id) {
            Some(existing) => *existing = record.clone(),
            None => owned.push(record.clone()),
        }
        Ok(())
    }

    async fn rename(&self, id: &str, new_name: &str, owner_id: &str) -> Result<()> {
        let mut state = lock(&self.state);
        state.check_available()?;

        let record = state
            .find_mut(id, owner_id)
            .ok_or_else(|| Error::NotFound(id.to_string()))?;
        record.name = new_name.to_string();
        record.last_modified = Utc::now().max(record.created_at);
        Ok(())
    }

    async fn delete(&self, id: &str, owner_id: &str) -> Result<()> {
        let mut state = lock(&self.state);
        state.check_available()?;

        if let Some(records) = state.sessions.get_mut(owner_id) {
            records.retain(|r| r.id != id);
        }
        Ok(())
    }
}

#[async_trait]
impl GroupChatSource for MemoryRemoteStore {
    async fn list_group_chats(&self, owner_id: &str) -> Result<Vec<GroupChatSummary>> {
        let state = lock(&self.state);
        state.check_available()?;
        Ok(state.group_chats.get(owner_id).cloned().unwrap_or_default())
    }
}
