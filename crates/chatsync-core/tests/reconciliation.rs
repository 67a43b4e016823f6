//! End-to-end behaviour of the reconciliation engine over in-memory stores

use std::sync::Arc;

use chatsync_core::codec;
use chatsync_core::store::InjectedFailure;
use chatsync_core::{
    ChatMessage, Error, GroupChatSummary, Identity, LocalStore, MemoryLocalStore,
    MemoryRemoteStore, OwnerScope, Persona, ReconciliationEngine, SessionRecord,
    SqliteLocalStore,
};
use chrono::{DateTime, TimeZone, Utc};
use serde_json::json;

fn date(year: i32, month: u32, day: u32) -> DateTime<Utc> {
    Utc.with_ymd_and_hms(year, month, day, 0, 0, 0).unwrap()
}

fn record(id: &str, last_modified: DateTime<Utc>) -> SessionRecord {
    SessionRecord::with_id(id, format!("chat {}", id), Persona::General)
        .with_timestamps(date(2024, 1, 1), last_modified)
}

struct Harness {
    local: Arc<MemoryLocalStore>,
    remote: Arc<MemoryRemoteStore>,
    engine: ReconciliationEngine,
}

fn harness(local_records: &[SessionRecord]) -> Harness {
    let local = Arc::new(MemoryLocalStore::with_records(local_records).unwrap());
    let remote = Arc::new(MemoryRemoteStore::new());
    let engine = ReconciliationEngine::new(local.clone())
        .with_remote(remote.clone())
        .with_group_chats(remote.clone());
    Harness {
        local,
        remote,
        engine,
    }
}

fn import_document(sessions: serde_json::Value) -> String {
    json!({
        "exportDate": "2024-07-01T00:00:00Z",
        "version": "1.0",
        "sessions": sessions,
    })
    .to_string()
}

#[tokio::test]
async fn test_import_merges_by_last_modified() {
    let h = harness(&[record("a", date(2024, 1, 1))]);

    let document = import_document(json!([
        {"id": "a", "name": "updated a", "persona": "general",
         "createdAt": "2024-01-01", "lastModified": "2024-06-01", "messages": []},
        {"id": "b", "name": "new b", "persona": "tutor",
         "createdAt": "2024-01-01", "lastModified": "2024-01-01", "messages": []}
    ]));

    let report = h.engine.import(&document).await.unwrap();
    assert_eq!(report.count(), 2);
    assert_eq!((report.added, report.updated), (1, 1));

    let sessions = h.engine.load().await.unwrap();
    assert_eq!(sessions.len(), 2);
    let a = sessions.iter().find(|s| s.id == "a").unwrap();
    assert_eq!(a.last_modified, date(2024, 6, 1));
    assert_eq!(a.name, "updated a");
}

#[tokio::test]
async fn test_import_with_no_valid_records_leaves_store_untouched() {
    let h = harness(&[record("a", date(2024, 1, 1))]);
    let before = h.local.raw_value();

    let document = import_document(json!([{"id": "broken", "messages": "nope"}]));
    let result = h.engine.import(&document).await;

    assert!(matches!(result, Err(Error::NoValidRecords { dropped: 1 })));
    assert_eq!(h.local.raw_value(), before);
}

#[tokio::test]
async fn test_import_is_idempotent() {
    let h = harness(&[record("a", date(2024, 2, 1))]);
    let document = import_document(json!([
        {"id": "a", "name": "a", "persona": "general",
         "createdAt": "2024-01-01", "lastModified": "2024-03-01", "messages": []},
        {"id": "c", "name": "c", "persona": "coder",
         "createdAt": "2024-01-01", "lastModified": "2024-01-05",
         "messages": [{"role": "user", "content": "hi", "timestamp": 1}]}
    ]));

    h.engine.import(&document).await.unwrap();
    let once = h.engine.load().await.unwrap();

    let second = h.engine.import(&document).await.unwrap();
    assert_eq!(second.count(), 0);
    assert_eq!(second.unchanged, 2);
    assert_eq!(h.engine.load().await.unwrap(), once);
}

#[tokio::test]
async fn test_import_tie_keeps_existing() {
    let mut existing = record("a", date(2024, 4, 1));
    existing.add_message(ChatMessage::user("local history"));
    existing.last_modified = date(2024, 4, 1);
    let h = harness(std::slice::from_ref(&existing));

    let document = import_document(json!([
        {"id": "a", "name": "imported", "persona": "general",
         "createdAt": "2024-01-01", "lastModified": "2024-04-01", "messages": []}
    ]));
    let report = h.engine.import(&document).await.unwrap();

    assert_eq!(report.count(), 0);
    assert_eq!(h.engine.load().await.unwrap(), vec![existing]);
}

#[tokio::test]
async fn test_export_then_import_roundtrip() {
    let mut original = record("a", date(2024, 5, 1));
    original.add_message(
        ChatMessage::assistant("hello").with_field("images", json!(["img-1", "img-2"])),
    );
    let h = harness(std::slice::from_ref(&original));

    let exported = h.engine.export().await.unwrap().to_json().unwrap();
    let decoded = codec::decode(&exported).unwrap();
    assert_eq!(decoded.records, vec![original.clone()]);

    // Exporting does not modify the store
    assert_eq!(h.local.load().unwrap(), vec![original.clone()]);

    // Importing into an empty profile reproduces the session
    let fresh = harness(&[]);
    let report = fresh.engine.import(&exported).await.unwrap();
    assert_eq!(report.added, 1);
    assert_eq!(fresh.engine.load().await.unwrap(), vec![original]);
}

#[tokio::test]
async fn test_migration_treats_conflict_as_already_migrated() {
    let locals = [
        record("one", date(2024, 1, 2)),
        record("two", date(2024, 1, 3)),
        record("three", date(2024, 1, 4)),
    ];
    let h = harness(&locals);
    h.remote.seed("user-1", vec![record("two", date(2024, 1, 1)).in_scope(OwnerScope::User("user-1".into()))]);

    h.engine.sign_in("user-1").await.unwrap();
    let report = h.engine.migrate_to_remote().await.unwrap();

    assert_eq!(report.migrated, 2);
    assert_eq!(report.already_migrated, 1);
    assert!(report.is_complete());
    assert!(h.local.load().unwrap().is_empty());

    let remote = h.remote.sessions("user-1");
    assert_eq!(remote.len(), 3);
    assert!(remote.iter().all(|r| r.owner_scope == OwnerScope::User("user-1".into())));
}

#[tokio::test]
async fn test_migration_is_idempotent() {
    let h = harness(&[record("a", date(2024, 2, 1)), record("b", date(2024, 3, 1))]);
    h.engine.sign_in("user-1").await.unwrap();

    let first = h.engine.migrate_to_remote().await.unwrap();
    assert_eq!(first.migrated, 2);

    let second = h.engine.migrate_to_remote().await.unwrap();
    assert_eq!(second.migrated, 0);
    assert_eq!(h.remote.sessions("user-1").len(), 2);
}

#[tokio::test]
async fn test_interrupted_migration_resumes_on_next_pass() {
    let h = harness(&[
        record("a", date(2024, 2, 1)),
        record("b", date(2024, 3, 1)),
        record("c", date(2024, 4, 1)),
    ]);
    h.engine.sign_in("user-1").await.unwrap();
    h.remote.fail_creates_after(1, InjectedFailure::Network);

    let first = h.engine.migrate_to_remote().await.unwrap();
    assert_eq!(first.migrated, 1);
    assert_eq!(first.pending, 2);
    assert!(first.stopped_by.as_ref().is_some_and(Error::is_retryable));
    // No immediate retry loop: one failed create, then the pass stops
    assert_eq!(h.remote.create_calls(), 2);
    assert_eq!(h.local.load().unwrap().len(), 2);

    h.remote.clear_failures();
    let second = h.engine.migrate_to_remote().await.unwrap();
    assert_eq!(second.migrated, 2);
    assert!(h.local.load().unwrap().is_empty());
    assert_eq!(h.remote.sessions("user-1").len(), 3);
}

#[tokio::test]
async fn test_migration_auth_failure_requires_reauth() {
    let h = harness(&[record("a", date(2024, 2, 1))]);
    h.engine.sign_in("user-1").await.unwrap();
    h.remote.fail_creates_after(0, InjectedFailure::Auth);

    let report = h.engine.migrate_to_remote().await.unwrap();
    assert_eq!(report.migrated, 0);
    assert!(report.requires_reauth());
    assert_eq!(h.local.load().unwrap().len(), 1);
}

#[tokio::test]
async fn test_sign_in_auto_migrates() {
    let local = Arc::new(MemoryLocalStore::with_records(&[record("a", date(2024, 2, 1))]).unwrap());
    let remote = Arc::new(MemoryRemoteStore::new());
    let engine = ReconciliationEngine::new(local.clone())
        .with_remote(remote.clone())
        .with_auto_migrate(true);

    let report = engine.sign_in("user-1").await.unwrap().unwrap();
    assert_eq!(report.migrated, 1);
    assert_eq!(
        engine.identity().await,
        Identity::Authenticated { owner_id: "user-1".into() }
    );
    assert_eq!(engine.load().await.unwrap().len(), 1);
    assert!(local.load().unwrap().is_empty());
}

#[tokio::test]
async fn test_load_sorts_most_recent_first() {
    let h = harness(&[
        record("old", date(2024, 1, 1)),
        record("newest", date(2024, 9, 1)),
        record("mid", date(2024, 5, 1)),
    ]);
    let ids: Vec<_> = h.engine.load().await.unwrap().into_iter().map(|r| r.id).collect();
    assert_eq!(ids, ["newest", "mid", "old"]);

    h.remote.seed("user-1", vec![record("r1", date(2024, 2, 1)), record("r2", date(2024, 8, 1))]);
    h.engine.sign_in("user-1").await.unwrap();
    // Remote scope only; local sessions are not visible until migrated
    let ids: Vec<_> = h.engine.load().await.unwrap().into_iter().map(|r| r.id).collect();
    assert_eq!(ids, ["r2", "r1"]);
}

#[tokio::test]
async fn test_corrupted_local_store_loads_empty() {
    let local = Arc::new(MemoryLocalStore::with_raw("{{{ definitely not json"));
    let engine = ReconciliationEngine::new(local.clone());

    assert!(engine.load().await.unwrap().is_empty());
    engine.delete("anything").await.unwrap();

    // A new session overwrites the unreadable payload
    let created = engine.create_session("fresh start", Persona::General).await.unwrap();
    assert_eq!(engine.load().await.unwrap(), vec![created]);
}

#[tokio::test]
async fn test_rename_and_delete_local() {
    let h = harness(&[record("a", date(2024, 1, 1))]);

    h.engine.rename("a", "Holiday plans").await.unwrap();
    let renamed = &h.engine.load().await.unwrap()[0];
    assert_eq!(renamed.name, "Holiday plans");
    assert!(renamed.last_modified > date(2024, 1, 1));

    h.engine.rename("a", "").await.unwrap();
    assert_eq!(h.engine.load().await.unwrap()[0].name, "New Chat");

    assert!(matches!(h.engine.rename("missing", "x").await, Err(Error::NotFound(_))));

    h.engine.delete("a").await.unwrap();
    h.engine.delete("a").await.unwrap();
    assert!(h.engine.load().await.unwrap().is_empty());
}

#[tokio::test]
async fn test_rename_and_delete_remote() {
    let h = harness(&[]);
    h.remote.seed("user-1", vec![record("r", date(2024, 1, 1)).in_scope(OwnerScope::User("user-1".into()))]);
    h.engine.sign_in("user-1").await.unwrap();

    h.engine.rename("r", "Renamed remotely").await.unwrap();
    let sessions = h.engine.load().await.unwrap();
    assert_eq!(sessions[0].name, "Renamed remotely");
    assert!(sessions[0].last_modified > date(2024, 1, 1));

    assert!(matches!(h.engine.rename("missing", "x").await, Err(Error::NotFound(_))));

    h.engine.delete("missing").await.unwrap();
    h.engine.delete("r").await.unwrap();
    assert!(h.engine.load().await.unwrap().is_empty());
}

#[tokio::test]
async fn test_import_into_remote_scope_upserts_changed_only() {
    let h = harness(&[]);
    let scope = OwnerScope::User("user-1".into());
    h.remote.seed(
        "user-1",
        vec![
            record("keep", date(2024, 5, 1)).in_scope(scope.clone()),
            record("stale", date(2024, 1, 1)).in_scope(scope.clone()),
        ],
    );
    h.engine.sign_in("user-1").await.unwrap();

    let document = import_document(json!([
        {"id": "keep", "name": "older copy", "persona": "general",
         "createdAt": "2024-01-01", "lastModified": "2024-02-01", "messages": []},
        {"id": "stale", "name": "fresher", "persona": "general",
         "createdAt": "2024-01-01", "lastModified": "2024-06-01", "messages": []},
        {"id": "extra", "name": "brand new", "persona": "creative",
         "createdAt": "2024-01-01", "lastModified": "2024-01-02", "messages": []}
    ]));

    let report = h.engine.import(&document).await.unwrap();
    assert_eq!((report.added, report.updated, report.unchanged), (1, 1, 1));

    let remote = h.remote.sessions("user-1");
    assert_eq!(remote.len(), 3);
    assert_eq!(remote.iter().find(|r| r.id == "keep").unwrap().name, "chat keep");
    assert_eq!(remote.iter().find(|r| r.id == "stale").unwrap().name, "fresher");
    assert!(remote.iter().all(|r| r.owner_scope == scope));
}

#[tokio::test]
async fn test_remote_failures_surface_typed_errors() {
    let h = harness(&[]);
    h.engine.sign_in("user-1").await.unwrap();

    h.remote.fail_all(InjectedFailure::Network);
    let err = h.engine.load().await.unwrap_err();
    assert!(err.is_retryable());

    h.remote.fail_all(InjectedFailure::Auth);
    assert!(matches!(h.engine.load().await, Err(Error::Auth(_))));
}

#[tokio::test]
async fn test_create_and_append_follow_identity() {
    let h = harness(&[]);

    let local_session = h.engine.create_session("local chat", Persona::Coder).await.unwrap();
    h.engine
        .append_message(&local_session.id, ChatMessage::user("hello"))
        .await
        .unwrap();
    assert_eq!(h.local.load().unwrap()[0].message_count(), 1);

    h.engine.sign_in("user-1").await.unwrap();
    let remote_session = h.engine.create_session("", Persona::Tutor).await.unwrap();
    assert_eq!(remote_session.name, "New Chat");
    assert_eq!(remote_session.owner_scope, OwnerScope::User("user-1".into()));

    let updated = h
        .engine
        .append_message(&remote_session.id, ChatMessage::assistant("hi there"))
        .await
        .unwrap();
    assert_eq!(updated.message_count(), 1);
    assert_eq!(h.remote.sessions("user-1")[0].message_count(), 1);

    assert!(matches!(
        h.engine.append_message("missing", ChatMessage::user("?")).await,
        Err(Error::NotFound(_))
    ));
}

#[tokio::test]
async fn test_group_chats_only_when_signed_in() {
    let h = harness(&[]);
    h.remote.seed_group_chats(
        "user-1",
        vec![GroupChatSummary {
            id: "g1".into(),
            name: "Book club".into(),
            persona: Persona::Creative,
            owner_name: "Robin".into(),
            participant_count: 5,
            updated_at: date(2024, 6, 1),
        }],
    );

    assert!(h.engine.list_group_chats().await.unwrap().is_empty());

    h.engine.sign_in("user-1").await.unwrap();
    let chats = h.engine.list_group_chats().await.unwrap();
    assert_eq!(chats.len(), 1);
    assert_eq!(chats[0].name, "Book club");

    h.engine.sign_out().await;
    assert!(h.engine.list_group_chats().await.unwrap().is_empty());
}

#[tokio::test]
async fn test_engine_over_sqlite_store() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("sessions.db");
    let local = Arc::new(SqliteLocalStore::new(path.to_str().unwrap(), "chatSessions").unwrap());
    let engine = ReconciliationEngine::new(local.clone());

    let created = engine.create_session("persisted", Persona::General).await.unwrap();
    engine.rename(&created.id, "persisted and renamed").await.unwrap();

    let reopened = SqliteLocalStore::new(path.to_str().unwrap(), "chatSessions").unwrap();
    let sessions = reopened.load().unwrap();
    assert_eq!(sessions.len(), 1);
    assert_eq!(sessions[0].name, "persisted and renamed");
}

#[tokio::test]
async fn test_remote_rename_and_delete_only_touch_own_sessions() {
    let h = harness(&[]);
    h.remote.seed("alice", vec![record("a", date(2024, 1, 1)).in_scope(OwnerScope::User("alice".into()))]);
    h.remote.seed("bob", vec![record("a", date(2024, 1, 1)).in_scope(OwnerScope::User("bob".into()))]);
    h.engine.sign_in("alice").await.unwrap();

    h.engine.rename("a", "alice only").await.unwrap();
    assert_eq!(h.remote.sessions("alice")[0].name, "alice only");
    assert_eq!(h.remote.sessions("bob")[0].name, "chat a");

    h.engine.delete("a").await.unwrap();
    assert!(h.remote.sessions("alice").is_empty());
    assert_eq!(h.remote.sessions("bob").len(), 1);

    // Bob's session is invisible to alice
    assert!(matches!(h.engine.rename("a", "x").await, Err(Error::NotFound(_))));
}

#[tokio::test]
async fn test_messages_export_exactly_as_imported() {
    let message = r#"{"timestamp":1.0,"role":"user","content":"hi","zeta":1,"alpha":2}"#;
    let document = format!(
        r#"{{"exportDate":"2024-07-01T00:00:00Z","version":"1.0","sessions":[
            {{"id":"a","name":"a","persona":"general","createdAt":"2024-01-01",
              "lastModified":"2024-01-02","messages":[{}]}}]}}"#,
        message
    );
    let h = harness(&[]);
    h.engine.import(&document).await.unwrap();

    let exported = h.engine.export().await.unwrap();
    let written = serde_json::to_string(&exported.sessions[0].messages[0]).unwrap();
    assert_eq!(written, message);

    // And again through the export file text
    let reimported = codec::decode(&exported.to_json().unwrap()).unwrap();
    assert_eq!(serde_json::to_string(&reimported.records[0].messages[0]).unwrap(), message);
}

#[tokio::test]
async fn test_remote_import_failure_reports_progress() {
    let h = harness(&[]);
    h.engine.sign_in("user-1").await.unwrap();
    h.remote.fail_upserts_after(1, InjectedFailure::Network);

    let document = import_document(json!([
        {"id": "x", "name": "x", "persona": "general",
         "createdAt": "2024-01-01", "lastModified": "2024-03-01", "messages": []},
        {"id": "y", "name": "y", "persona": "general",
         "createdAt": "2024-01-01", "lastModified": "2024-02-01", "messages": []},
        {"id": "z", "name": "z", "persona": "general",
         "createdAt": "2024-01-01", "lastModified": "2024-01-15", "messages": []}
    ]));

    let report = h.engine.import(&document).await.unwrap();
    assert_eq!(report.added, 3);
    assert_eq!(report.count(), 1);
    assert_eq!(report.pending, 2);
    assert!(!report.is_complete());
    assert!(report.stopped_by.as_ref().is_some_and(Error::is_retryable));
    // One failed upsert, then the import stops
    assert_eq!(h.remote.upsert_calls(), 2);
    assert_eq!(h.remote.sessions("user-1").len(), 1);

    h.remote.clear_failures();
    let retry = h.engine.import(&document).await.unwrap();
    assert!(retry.is_complete());
    assert_eq!(retry.count(), 2);
    assert_eq!(retry.unchanged, 1);
    assert_eq!(h.remote.sessions("user-1").len(), 3);
}
