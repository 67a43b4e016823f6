//! Reconciliation between the local and remote session stores
//!
//! The engine is a two-state machine over identity. While anonymous it
//! reads and writes only the [`LocalStore`]; once signed in it reads and
//! writes only the [`RemoteStore`] for that owner. Local sessions cross over
//! exactly once, through [`ReconciliationEngine::migrate_to_remote`].
//!
//! Conflicts are settled per session by last-writer-wins on
//! `lastModified`. Message lists are never merged.

use std::collections::HashMap;
use std::sync::Arc;

use chrono::Utc;
use tokio::sync::RwLock;
use tracing::{debug, info, warn};

use crate::codec::{self, ExportDocument};
use crate::config::Config;
use crate::session::{
    ChatMessage, GroupChatSummary, OwnerScope, Persona, SessionRecord, normalize_name,
    sort_by_recent,
};
use crate::store::{GroupChatSource, HttpRemoteStore, LocalStore, RemoteStore, SqliteLocalStore};
use crate::{Error, Result};

/// Who the engine is acting for
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum Identity {
    #[default]
    Anonymous,
    Authenticated { owner_id: String },
}

/// Outcome of one migration pass
#[derive(Debug, Default)]
pub struct MigrationReport {
    /// Sessions created remotely and removed locally in this pass
    pub migrated: usize,
    /// Sessions the remote store already had; removed locally, not counted
    pub already_migrated: usize,
    /// Sessions left in the local store for the next pass
    pub pending: usize,
    /// Error that ended the pass early, if any
    pub stopped_by: Option<Error>,
}

impl MigrationReport {
    pub fn is_complete(&self) -> bool {
        self.pending == 0 && self.stopped_by.is_none()
    }

    /// The pass stopped because the user must sign in again
    pub fn requires_reauth(&self) -> bool {
        matches!(self.stopped_by, Some(Error::Auth(_)))
    }
}

/// Outcome of an import
#[derive(Debug, Default)]
pub struct ImportReport {
    /// Sessions the merge classified as new
    pub added: usize,
    /// Sessions the merge classified as replacing an older copy
    pub updated: usize,
    /// Imported sessions that lost to an existing one (older or tied)
    pub unchanged: usize,
    /// Candidates dropped by validation
    pub dropped: usize,
    /// Added or updated sessions actually written
    pub applied: usize,
    /// Added or updated sessions not written because the import stopped
    pub pending: usize,
    /// Error that ended the writes early, if any
    pub stopped_by: Option<Error>,
}

impl ImportReport {
    /// Sessions newly added or replaced in the store
    pub fn count(&self) -> usize {
        self.applied
    }

    pub fn is_complete(&self) -> bool {
        self.pending == 0 && self.stopped_by.is_none()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Change {
    Added,
    Updated,
}

/// Result of merging imported sessions into an existing collection
#[derive(Debug, Clone, Default)]
pub struct MergeOutcome {
    /// Full collection after the merge, most recent first
    pub merged: Vec<SessionRecord>,
    /// Only the sessions that were added or replaced
    pub changed: Vec<SessionRecord>,
    pub added: usize,
    pub updated: usize,
    pub unchanged: usize,
}

/// Last-writer-wins merge keyed by id.
///
/// An imported session replaces an existing one only when its
/// `lastModified` is strictly greater; ties keep the existing session.
/// Every accepted session is re-scoped to `scope`.
pub fn merge_records(
    existing: Vec<SessionRecord>,
    incoming: Vec<SessionRecord>,
    scope: &OwnerScope,
) -> MergeOutcome {
    let mut merged = existing;
    let mut index: HashMap<String, usize> = merged
        .iter()
        .enumerate()
        .map(|(i, r)| (r.id.clone(), i))
        .collect();
    let mut changes: HashMap<String, Change> = HashMap::new();
    let mut unchanged = 0;

    for mut record in incoming {
        record.owner_scope = scope.clone();
        match index.get(&record.id) {
            Some(&i) => {
                if record.is_newer_than(&merged[i]) {
                    debug!("Import replaces session {}", record.id);
                    changes.entry(record.id.clone()).or_insert(Change::Updated);
                    merged[i] = record;
                } else {
                    unchanged += 1;
                }
            }
            None => {
                index.insert(record.id.clone(), merged.len());
                changes.insert(record.id.clone(), Change::Added);
                merged.push(record);
            }
        }
    }

    sort_by_recent(&mut merged);
    let changed = merged
        .iter()
        .filter(|r| changes.contains_key(&r.id))
        .cloned()
        .collect();
    let added = changes.values().filter(|c| **c == Change::Added).count();

    MergeOutcome {
        merged,
        changed,
        added,
        updated: changes.len() - added,
        unchanged,
    }
}

/// Store that owns sessions for the current identity
enum Target {
    Local,
    Remote {
        store: Arc<dyn RemoteStore>,
        owner_id: String,
    },
}

impl Target {
    fn scope(&self) -> OwnerScope {
        match self {
            Target::Local => OwnerScope::Local,
            Target::Remote { owner_id, .. } => OwnerScope::User(owner_id.clone()),
        }
    }
}

/// Routes session operations to the store that owns them
pub struct ReconciliationEngine {
    local: Arc<dyn LocalStore>,
    remote: Option<Arc<dyn RemoteStore>>,
    group_chats: Option<Arc<dyn GroupChatSource>>,
    identity: RwLock<Identity>,
    auto_migrate: bool,
}

impl ReconciliationEngine {
    /// Create an anonymous engine with only a local store
    pub fn new(local: Arc<dyn LocalStore>) -> Self {
        Self {
            local,
            remote: None,
            group_chats: None,
            identity: RwLock::new(Identity::Anonymous),
            auto_migrate: false,
        }
    }

    pub fn with_remote(mut self, remote: Arc<dyn RemoteStore>) -> Self {
        self.remote = Some(remote);
        self
    }

    pub fn with_group_chats(mut self, source: Arc<dyn GroupChatSource>) -> Self {
        self.group_chats = Some(source);
        self
    }

    /// Run a migration pass automatically on sign-in
    pub fn with_auto_migrate(mut self, enabled: bool) -> Self {
        self.auto_migrate = enabled;
        self
    }

    /// Build the SQLite + HTTP engine described by the configuration
    pub fn from_config(config: &Config) -> Result<Self> {
        if let Some(parent) = std::path::Path::new(&config.local.db_path).parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }
        let local = SqliteLocalStore::new(&config.local.db_path, config.local.storage_key.clone())?;
        let mut engine =
            Self::new(Arc::new(local)).with_auto_migrate(config.sync.auto_migrate_on_sign_in);

        if config.remote_enabled() {
            let remote = Arc::new(HttpRemoteStore::new(&config.remote)?);
            engine = engine
                .with_remote(remote.clone())
                .with_group_chats(remote);
        } else {
            info!("No remote store configured; running local-only");
        }
        Ok(engine)
    }

    /// Current identity
    pub async fn identity(&self) -> Identity {
        self.identity.read().await.clone()
    }

    /// Switch to the signed-in state for `owner_id`.
    ///
    /// When auto-migration is on and local sessions exist, a migration pass
    /// runs immediately and its report is returned. The identity is left
    /// unchanged if the local store cannot be read.
    pub async fn sign_in(&self, owner_id: impl Into<String>) -> Result<Option<MigrationReport>> {
        let owner_id = owner_id.into();
        if owner_id.trim().is_empty() {
            return Err(Error::Auth("empty user id".to_string()));
        }
        if self.remote.is_none() {
            return Err(Error::Config("no remote store configured".to_string()));
        }
        let has_local = self.auto_migrate && !self.load_local_or_empty()?.is_empty();

        *self.identity.write().await = Identity::Authenticated {
            owner_id: owner_id.clone(),
        };
        info!("Signed in as {}", owner_id);

        if has_local {
            return Ok(Some(self.migrate_to_remote().await?));
        }
        Ok(None)
    }

    /// Return to the anonymous state. Remote sessions stay remote.
    pub async fn sign_out(&self) {
        *self.identity.write().await = Identity::Anonymous;
        info!("Signed out");
    }

    async fn target(&self) -> Result<Target> {
        match &*self.identity.read().await {
            Identity::Anonymous => Ok(Target::Local),
            Identity::Authenticated { owner_id } => {
                let store = self
                    .remote
                    .clone()
                    .ok_or_else(|| Error::Config("no remote store configured".to_string()))?;
                Ok(Target::Remote {
                    store,
                    owner_id: owner_id.clone(),
                })
            }
        }
    }

    /// Local sessions, with unreadable data treated as none
    fn load_local_or_empty(&self) -> Result<Vec<SessionRecord>> {
        match self.local.load() {
            Err(Error::Corruption(reason)) => {
                warn!("Local session data is unreadable, treating as empty: {}", reason);
                Ok(Vec::new())
            }
            other => other,
        }
    }

    async fn load_target(&self, target: &Target) -> Result<Vec<SessionRecord>> {
        match target {
            Target::Local => self.load_local_or_empty(),
            Target::Remote { store, owner_id } => store.list_by_owner(owner_id).await,
        }
    }

    /// All sessions of the current scope, most recently touched first
    pub async fn load(&self) -> Result<Vec<SessionRecord>> {
        let target = self.target().await?;
        let mut records = self.load_target(&target).await?;
        sort_by_recent(&mut records);
        debug!("Loaded {} sessions from {}", records.len(), target.scope());
        Ok(records)
    }

    /// Move every local session to the signed-in owner's remote store.
    ///
    /// Each session is created remotely and then deleted locally. A
    /// conflict on create means an earlier pass already moved it, so the
    /// local copy is dropped without counting it. The first other failure
    /// ends the pass; what is left stays local until the next call.
    pub async fn migrate_to_remote(&self) -> Result<MigrationReport> {
        let Target::Remote { store, owner_id } = self.target().await? else {
            return Err(Error::Auth("migration requires a signed-in user".to_string()));
        };

        let records = self.load_local_or_empty()?;
        let mut report = MigrationReport::default();
        if records.is_empty() {
            debug!("No local sessions to migrate");
            return Ok(report);
        }

        let scope = OwnerScope::User(owner_id.clone());
        for (position, record) in records.iter().enumerate() {
            match store.create(&record.in_scope(scope.clone()), &owner_id).await {
                Ok(()) => report.migrated += 1,
                Err(Error::Conflict(_)) => {
                    // The remote copy wins even if this one is newer
                    warn!(
                        "Session {} already exists remotely; discarding local copy (lastModified {})",
                        record.id, record.last_modified
                    );
                    report.already_migrated += 1;
                }
                Err(e) => {
                    warn!("Migration stopped at session {}: {}", record.id, e);
                    report.pending = records.len() - position;
                    report.stopped_by = Some(e);
                    break;
                }
            }

            if let Err(e) = self.local.delete_one(&record.id) {
                warn!("Failed to remove migrated session {} locally: {}", record.id, e);
                report.pending = records.len() - position - 1;
                report.stopped_by = Some(e);
                break;
            }
        }

        info!(
            "Migrated {} sessions to {} ({} already present, {} pending)",
            report.migrated, owner_id, report.already_migrated, report.pending
        );
        Ok(report)
    }

    /// Start a new conversation in the current scope
    pub async fn create_session(
        &self,
        name: impl Into<String>,
        persona: Persona,
    ) -> Result<SessionRecord> {
        let target = self.target().await?;
        let record = SessionRecord::new(name, persona).in_scope(target.scope());

        match &target {
            Target::Local => {
                let mut records = self.load_local_or_empty()?;
                records.push(record.clone());
                self.local.replace_all(&records)?;
            }
            Target::Remote { store, owner_id } => store.create(&record, owner_id).await?,
        }

        info!("Created session {}", record.id);
        Ok(record)
    }

    /// Append a message to a session and persist it to its owning store
    pub async fn append_message(&self, id: &str, message: ChatMessage) -> Result<SessionRecord> {
        let target = self.target().await?;
        let mut records = self.load_target(&target).await?;
        let record = records
            .iter_mut()
            .find(|r| r.id == id)
            .ok_or_else(|| Error::NotFound(id.to_string()))?;
        record.add_message(message);
        let updated = record.clone();

        match &target {
            Target::Local => self.local.replace_all(&records)?,
            Target::Remote { store, owner_id } => store.upsert(&updated, owner_id).await?,
        }
        Ok(updated)
    }

    /// Rename a session in whichever store owns it. Empty names fall back
    /// to the default label.
    pub async fn rename(&self, id: &str, new_name: &str) -> Result<()> {
        let name = normalize_name(new_name.to_string());

        match self.target().await? {
            Target::Local => {
                let mut records = self.load_local_or_empty()?;
                let record = records
                    .iter_mut()
                    .find(|r| r.id == id)
                    .ok_or_else(|| Error::NotFound(id.to_string()))?;
                record.rename(name);
                self.local.replace_all(&records)?;
            }
            Target::Remote { store, owner_id } => store.rename(id, &name, &owner_id).await?,
        }

        info!("Renamed session {}", id);
        Ok(())
    }

    /// Delete a session from whichever store owns it. Missing ids are fine.
    pub async fn delete(&self, id: &str) -> Result<()> {
        match self.target().await? {
            Target::Local => match self.local.delete_one(id) {
                Err(Error::Corruption(reason)) => {
                    warn!("Local session data is unreadable, nothing to delete: {}", reason);
                }
                other => other?,
            },
            Target::Remote { store, owner_id } => store.delete(id, &owner_id).await?,
        }

        info!("Deleted session {}", id);
        Ok(())
    }

    /// Snapshot the current scope into an export document. Read-only.
    pub async fn export(&self) -> Result<ExportDocument> {
        let records = self.load().await?;
        info!("Exporting {} sessions", records.len());
        Ok(codec::encode(&records, Utc::now()))
    }

    /// Merge an import document into the current scope.
    ///
    /// Invalid candidates are dropped; if none are left the store is not
    /// touched and [`Error::NoValidRecords`] is returned. The merge is
    /// computed in full before the first write. A remote write failure ends
    /// the import and is returned in the report alongside the number of
    /// sessions already written; importing the same document again finishes
    /// the rest.
    pub async fn import(&self, document: &str) -> Result<ImportReport> {
        let decoded = codec::decode(document)?;
        let dropped = decoded.dropped;
        let incoming = decoded.into_valid()?;

        let target = self.target().await?;
        let existing = self.load_target(&target).await?;
        let outcome = merge_records(existing, incoming, &target.scope());

        let mut report = ImportReport {
            added: outcome.added,
            updated: outcome.updated,
            unchanged: outcome.unchanged,
            dropped,
            ..Default::default()
        };

        if outcome.changed.is_empty() {
            info!("Import changed nothing ({} unchanged, {} dropped)", report.unchanged, dropped);
            return Ok(report);
        }

        match &target {
            Target::Local => {
                self.local.replace_all(&outcome.merged)?;
                report.applied = outcome.changed.len();
            }
            Target::Remote { store, owner_id } => {
                for (position, record) in outcome.changed.iter().enumerate() {
                    if let Err(e) = store.upsert(record, owner_id).await {
                        warn!("Import stopped at session {}: {}", record.id, e);
                        report.pending = outcome.changed.len() - position;
                        report.stopped_by = Some(e);
                        break;
                    }
                    report.applied += 1;
                }
            }
        }

        info!(
            "Imported {} sessions ({} added, {} updated, {} dropped, {} pending)",
            report.count(),
            report.added,
            report.updated,
            dropped,
            report.pending
        );
        Ok(report)
    }

    /// Group chats of the signed-in user. Anonymous users have none.
    pub async fn list_group_chats(&self) -> Result<Vec<GroupChatSummary>> {
        let Identity::Authenticated { owner_id } = self.identity().await else {
            return Ok(Vec::new());
        };
        match &self.group_chats {
            Some(source) => source.list_group_chats(&owner_id).await,
            None => Ok(Vec::new()),
        }
    }
}
