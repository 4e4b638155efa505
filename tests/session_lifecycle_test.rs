//! Integration tests for engine and session lifecycles on SQLite.
//!
//! Tests verify that:
//! - No engine is created without a descriptor
//! - Scoped sessions are shared within a context and distinct across contexts
//! - The persisted plain session survives until closed
//! - Closing an explicit session leaves the persisted or scoped sessions alone
//! - Queries reject undeclared attributes
//! - Committed inserts are visible to an independent session
//! - Failed commits leave nothing behind

use db_session_manager::db::{InitializeOptions, ScopedFactory, SessionManager, with_scope};
use db_session_manager::error::DbError;
use db_session_manager::models::{Record, SchemaMetadata, SqlValue, Table, fields};
use std::sync::Arc;
use tempfile::NamedTempFile;

/// Create a temporary SQLite database file and return its URL.
fn temp_db_url() -> String {
    let temp_file = NamedTempFile::new().unwrap();
    // Keep the temp file alive - prevent deletion when function returns
    let db_path = temp_file.into_temp_path().keep().unwrap();
    format!("sqlite:{}?mode=rwc", db_path.to_str().unwrap())
}

/// A plain-mode manager over a bootstrapped ledger schema.
async fn setup_manager(url: &str) -> (SessionManager, Arc<Table>) {
    let mut manager = SessionManager::new();
    manager
        .initialize(
            InitializeOptions::new()
                .descriptor(url)
                .metadata(SchemaMetadata::file_ledger().unwrap())
                .bootstrap(true)
                .create_session(true),
        )
        .await
        .unwrap();
    let ledger = ledger_table(&manager);
    (manager, ledger)
}

fn ledger_table(manager: &SessionManager) -> Arc<Table> {
    manager
        .connections()
        .metadata()
        .unwrap()
        .require_table(fields::FILE_LEDGER_TABLE)
        .unwrap()
        .clone()
}

fn ledger_record(ledger: &Arc<Table>, name: &str, size: i64) -> Record {
    Record::new(ledger.clone())
        .with("file_name", name)
        .unwrap()
        .with("file_path", format!("/data/{}", name))
        .unwrap()
        .with("file_size", size)
        .unwrap()
        .with("completed", false)
        .unwrap()
}

#[tokio::test]
async fn test_no_descriptor_no_engine() {
    let mut manager = SessionManager::new();
    manager
        .initialize(InitializeOptions::new().bootstrap(true).create_session(true))
        .await
        .unwrap();

    assert!(manager.engine().is_none());
    assert!(manager.factory().is_none());
    assert!(manager.persisted_session().is_none());
    assert!(matches!(
        manager.create_session(true),
        Err(DbError::Uninitialized { .. })
    ));
}

#[tokio::test]
async fn test_descriptor_yields_engine() {
    let url = temp_db_url();
    let mut manager = SessionManager::new();
    manager
        .initialize(InitializeOptions::new().descriptor(&url))
        .await
        .unwrap();

    let engine = manager.engine().expect("engine should be created");
    let version = engine.server_version().await.unwrap();
    assert!(version.starts_with('3'));
}

#[tokio::test]
async fn test_scoped_same_context_same_session() {
    let url = temp_db_url();
    let mut manager = SessionManager::scoped();
    manager
        .initialize(InitializeOptions::new().descriptor(&url))
        .await
        .unwrap();

    let handle = manager.create_session(true).unwrap();
    let factory = handle.as_factory().unwrap();
    assert_eq!(factory.session(), factory.session());
    assert_eq!(handle.session(), manager.create_session(false).unwrap().session());
}

#[tokio::test]
async fn test_scoped_different_threads_different_sessions() {
    let url = temp_db_url();
    let mut manager = SessionManager::scoped();
    manager
        .initialize(InitializeOptions::new().descriptor(&url))
        .await
        .unwrap();

    let factory: ScopedFactory = manager.create_session(true).unwrap().as_factory().unwrap().clone();
    let here = factory.session();
    let other_factory = factory.clone();
    let there = std::thread::spawn(move || other_factory.session()).join().unwrap();

    assert_ne!(here, there);
    assert_eq!(factory.active_scopes(), 2);
}

#[tokio::test]
async fn test_scoped_named_scopes() {
    let url = temp_db_url();
    let mut manager = SessionManager::scoped();
    manager
        .initialize(InitializeOptions::new().descriptor(&url))
        .await
        .unwrap();
    let factory = manager.create_session(true).unwrap().as_factory().unwrap().clone();

    let first = with_scope("request-1", async { factory.session() }).await;
    let again = with_scope("request-1", async { factory.session() }).await;
    let second = with_scope("request-2", async { factory.session() }).await;
    assert_eq!(first, again);
    assert_ne!(first, second);

    // Closing tears down only the current scope's session
    with_scope("request-1", async { manager.close_session(None) }).await;
    let replaced = with_scope("request-1", async { factory.session() }).await;
    assert_ne!(first, replaced);
    let kept = with_scope("request-2", async { factory.session() }).await;
    assert_eq!(second, kept);
}

#[tokio::test]
async fn test_scoped_named_scope_across_tasks() {
    let url = temp_db_url();
    let mut manager = SessionManager::scoped();
    manager
        .initialize(InitializeOptions::new().descriptor(&url))
        .await
        .unwrap();
    let factory = manager.create_session(true).unwrap().as_factory().unwrap().clone();

    let task_factory = factory.clone();
    let spawned = tokio::spawn(with_scope("job", async move {
        tokio::task::yield_now().await;
        task_factory.session()
    }))
    .await
    .unwrap();
    let local = with_scope("job", async { factory.session() }).await;
    assert_eq!(spawned, local);
}

#[tokio::test]
async fn test_plain_persisted_session_until_closed() {
    let url = temp_db_url();
    let (mut manager, _ledger) = setup_manager(&url).await;

    let persisted = manager.persisted_session().cloned().unwrap();
    assert_eq!(manager.create_session(true).unwrap().session(), persisted);

    let transient = manager.create_session(false).unwrap().session();
    assert_ne!(transient, persisted);
    assert_eq!(manager.persisted_session(), Some(&persisted));

    manager.close_session(None);
    assert!(manager.persisted_session().is_none());
    let fresh = manager.create_session(true).unwrap().session();
    assert_ne!(fresh, persisted);
}

#[tokio::test]
async fn test_plain_close_explicit_session_keeps_persisted() {
    let url = temp_db_url();
    let (mut manager, ledger) = setup_manager(&url).await;
    let persisted = manager.persisted_session().cloned().unwrap();
    persisted.add(ledger_record(&ledger, "kept.log", 1)).unwrap();

    let transient = manager.create_session(false).unwrap().session();
    transient.add(ledger_record(&ledger, "dropped.log", 2)).unwrap();
    manager.close_session(Some(&transient));

    assert_eq!(transient.pending_count(), 0);
    assert_eq!(manager.persisted_session(), Some(&persisted));
    assert_eq!(persisted.pending_count(), 1);
    assert_eq!(manager.create_session(true).unwrap().session(), persisted);
}

#[tokio::test]
async fn test_scoped_close_explicit_session_keeps_scopes() {
    let url = temp_db_url();
    let mut manager = SessionManager::scoped();
    manager
        .initialize(InitializeOptions::new().descriptor(&url))
        .await
        .unwrap();
    let factory = manager.create_session(true).unwrap().as_factory().unwrap().clone();

    let current = factory.session();
    let named = with_scope("request-1", async { factory.session() }).await;
    assert_eq!(factory.active_scopes(), 2);

    manager.close_session(Some(&named));
    assert_eq!(factory.active_scopes(), 2);
    assert_eq!(factory.session(), current);
    let again = with_scope("request-1", async { factory.session() }).await;
    assert_eq!(again, named);
}

#[tokio::test]
async fn test_query_filters_and_rejects_unknown_attribute() {
    let url = temp_db_url();
    let (manager, ledger) = setup_manager(&url).await;
    manager
        .add(ledger_record(&ledger, "a.log", 10), None, false)
        .await
        .unwrap()
        .add(ledger_record(&ledger, "b.log", 20), None, false)
        .await
        .unwrap()
        .commit(None)
        .await
        .unwrap();

    let matches = manager
        .query(&ledger, [("file_name", "b.log")])
        .unwrap()
        .all()
        .await
        .unwrap();
    assert_eq!(matches.len(), 1);
    assert_eq!(matches[0].get("file_size"), Some(&SqlValue::Int(20)));
    // Server default applied
    assert!(!matches[0].get("created_at").unwrap().is_null());

    let everything = manager
        .query(&ledger, Vec::<(&str, SqlValue)>::new())
        .unwrap();
    assert_eq!(everything.count().await.unwrap(), 2);

    let result = manager.query(&ledger, [("bogus", 1)]);
    match result {
        Err(DbError::Attribute { model, attribute }) => {
            assert_eq!(model, "fileledger");
            assert_eq!(attribute, "bogus");
        }
        other => panic!("Expected attribute error, got {:?}", other),
    }
}

#[tokio::test]
async fn test_add_commit_visible_to_independent_session() {
    let url = temp_db_url();
    let (manager, ledger) = setup_manager(&url).await;
    manager
        .add(ledger_record(&ledger, "seen.log", 42), None, true)
        .await
        .unwrap();

    // A second manager opens its own engine on the same file
    let mut observer = SessionManager::new();
    observer
        .initialize(InitializeOptions::new().descriptor(&url))
        .await
        .unwrap();
    let session = observer.create_session(false).unwrap().session();
    let found = session
        .query(&ledger)
        .filter_eq("file_name", "seen.log")
        .unwrap()
        .first()
        .await
        .unwrap()
        .expect("committed row should be visible");
    assert_eq!(found.get("file_size"), Some(&SqlValue::Int(42)));
    assert_eq!(found.get("completed"), Some(&SqlValue::Bool(false)));
}

#[tokio::test]
async fn test_rollback_discards_staged_operations() {
    let url = temp_db_url();
    let (manager, ledger) = setup_manager(&url).await;
    manager
        .add(ledger_record(&ledger, "dropped.log", 1), None, false)
        .await
        .unwrap()
        .rollback(None)
        .unwrap()
        .commit(None)
        .await
        .unwrap();

    let count = manager
        .query(&ledger, [("file_name", "dropped.log")])
        .unwrap()
        .count()
        .await
        .unwrap();
    assert_eq!(count, 0);
    assert_eq!(manager.persisted_session().unwrap().pending_count(), 0);
}

#[tokio::test]
async fn test_failed_commit_rolls_back_everything() {
    let url = temp_db_url();
    let (mut manager, ledger) = setup_manager(&url).await;
    let session = manager.create_session(false).unwrap().session();

    session
        .add(ledger_record(&ledger, "one.log", 1).with("id", 7).unwrap())
        .unwrap();
    session
        .add(ledger_record(&ledger, "two.log", 2).with("id", 7).unwrap())
        .unwrap();
    assert!(session.commit().await.is_err());
    assert_eq!(session.pending_count(), 0);

    let count = session.query(&ledger).count().await.unwrap();
    assert_eq!(count, 0);
}

#[tokio::test]
async fn test_delete_by_primary_key() {
    let url = temp_db_url();
    let (manager, ledger) = setup_manager(&url).await;
    manager
        .add(ledger_record(&ledger, "gone.log", 5), None, true)
        .await
        .unwrap();

    let record = manager
        .query(&ledger, [("file_name", "gone.log")])
        .unwrap()
        .first()
        .await
        .unwrap()
        .unwrap();
    manager.delete(record, None, true).await.unwrap();

    let remaining = manager
        .query(&ledger, Vec::<(&str, SqlValue)>::new())
        .unwrap()
        .count()
        .await
        .unwrap();
    assert_eq!(remaining, 0);
}

#[tokio::test]
async fn test_operations_need_a_session() {
    let url = temp_db_url();
    let mut manager = SessionManager::new();
    manager
        .initialize(
            InitializeOptions::new()
                .descriptor(&url)
                .metadata(SchemaMetadata::file_ledger().unwrap())
                .bootstrap(true),
        )
        .await
        .unwrap();
    let ledger = ledger_table(&manager);

    let result = manager.add(ledger_record(&ledger, "x.log", 1), None, true).await;
    assert!(matches!(result, Err(DbError::NoSession { .. })));
    assert!(matches!(
        manager.query(&ledger, [("file_name", "x.log")]),
        Err(DbError::NoSession { .. })
    ));

    // An explicit session always works
    let session = manager.create_session(false).unwrap().session();
    manager
        .add(ledger_record(&ledger, "x.log", 1), Some(&session), true)
        .await
        .unwrap();
    assert_eq!(session.query(&ledger).count().await.unwrap(), 1);
}
