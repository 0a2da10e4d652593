use std::sync::Arc;

use registry_db::{create_pool, run_migrations, DbPool, DbRuntimeSettings};
use registry_types::{Operation, DB_VERSIONING_FLAG, LEGAL_API_SERVICE};
use registry_versioning::{
    history_for_entity, versions_for_entity, Business, LegacyEngine, ModeSelector, Session,
    StaticFlags, VersionedSession,
};
use serde_json::json;
use tempfile::TempDir;

fn pool_in(dir: &TempDir, pool_max_size: u32) -> DbPool {
    let path = dir.path().join("registry.db");
    let pool = create_pool(
        path.to_str().expect("temp path should be utf-8"),
        DbRuntimeSettings {
            busy_timeout_ms: 5_000,
            pool_max_size,
        },
    )
    .expect("failed to create pool");
    let conn = pool.get().expect("failed to get connection");
    run_migrations(&conn).expect("failed to run migrations");
    pool
}

fn versioning_flag(new: bool) -> serde_json::Value {
    json!({
        "initialize-new-versioning": new,
        "enable-new-versioning": { "legal-api": new },
    })
}

#[test]
fn pooled_sessions_share_one_legacy_registry() {
    let dir = TempDir::new().expect("failed to create temp dir");
    let pool = pool_in(&dir, 4);
    let flags = Arc::new(StaticFlags::from_values([(
        DB_VERSIONING_FLAG.to_string(),
        versioning_flag(false),
    )]));
    let legacy = LegacyEngine::new();

    let mut first = VersionedSession::open(
        Session::new(pool.get().expect("failed to get connection")),
        ModeSelector::new(flags.clone(), LEGAL_API_SERVICE),
        legacy.clone(),
    )
    .expect("failed to open first session");
    let mut second = VersionedSession::open(
        Session::new(pool.get().expect("failed to get connection")),
        ModeSelector::new(flags.clone(), LEGAL_API_SERVICE),
        legacy.clone(),
    )
    .expect("failed to open second session");

    // Both sessions write the same file, so only one may hold a write
    // transaction at a time. The first session's entry is opened without
    // a flush.
    first.add(Business::new("BC1000001", "Pooled One Ltd.", "BC"));
    let noted = legacy.unit_of_work(first.identity(), |uow| uow.pending.len());
    assert_eq!(noted, 0);
    assert!(legacy.contains(first.identity().key()));

    second.add(Business::new("BC1000002", "Pooled Two Ltd.", "BC"));
    second.commit().expect("second commit failed");
    assert!(
        legacy.contains(first.identity().key()),
        "clearing one session must not touch another live session"
    );

    first.commit().expect("first commit failed");
    assert!(legacy.is_empty());

    let conn = pool.get().expect("failed to get connection");
    for identifier in ["BC1000001", "BC1000002"] {
        let business = Business::find_by_identifier(&conn, identifier)
            .expect("failed to load business")
            .expect("business should exist");
        let id = business.id.expect("stored business has an id");
        let versions = versions_for_entity(&conn, "business", id).expect("failed to load versions");
        assert_eq!(versions.len(), 1, "{identifier}");
        assert_eq!(versions[0].operation, Operation::Insert);
    }
}

#[test]
fn flag_flip_moves_later_commits_to_the_new_engine() {
    let dir = TempDir::new().expect("failed to create temp dir");
    let pool = pool_in(&dir, 4);
    let flags = Arc::new(StaticFlags::from_values([(
        DB_VERSIONING_FLAG.to_string(),
        versioning_flag(false),
    )]));

    let mut session = VersionedSession::open(
        Session::new(pool.get().expect("failed to get connection")),
        ModeSelector::new(flags.clone(), LEGAL_API_SERVICE),
        LegacyEngine::new(),
    )
    .expect("failed to open session");

    let handle = session.add(Business::new("BC1000003", "Flip Ltd.", "BC"));
    session.commit().expect("old-mode commit failed");

    flags.set(DB_VERSIONING_FLAG, versioning_flag(true));
    session
        .modify(handle, |b: &mut Business| b.state = "HISTORICAL".to_string())
        .expect("modify failed");
    session.commit().expect("new-mode commit failed");
    assert!(session.is_new_versioning_active());

    let conn = pool.get().expect("failed to get connection");
    let id = session
        .get::<Business>(handle)
        .expect("business should be tracked")
        .id
        .expect("business should have an id");
    assert_eq!(
        versions_for_entity(&conn, "business", id)
            .expect("failed to load versions")
            .len(),
        1
    );

    let history = history_for_entity(&conn, "business", "BC1000003").expect("failed to load history");
    assert_eq!(history.len(), 1);
    assert_eq!(history[0].operation, Operation::Update);
    assert_eq!(history[0].snapshot["state"], "HISTORICAL");
}

#[test]
fn dropped_session_does_not_leak_its_writes_into_the_next_checkout() {
    let dir = TempDir::new().expect("failed to create temp dir");
    let pool = pool_in(&dir, 1);
    let flags = Arc::new(StaticFlags::from_values([(
        DB_VERSIONING_FLAG.to_string(),
        versioning_flag(true),
    )]));
    let legacy = LegacyEngine::new();

    {
        let mut abandoned = VersionedSession::open(
            Session::new(pool.get().expect("failed to get connection")),
            ModeSelector::new(flags.clone(), LEGAL_API_SERVICE),
            legacy.clone(),
        )
        .expect("failed to open session");
        abandoned.add(Business::new("BC9000001", "Abandoned Ltd.", "BC"));
        abandoned.flush().expect("flush failed");
        assert!(!abandoned.connection().is_autocommit());
    }

    let conn = pool.get().expect("failed to get connection");
    assert!(conn.is_autocommit(), "pooled connection came back mid-transaction");
    drop(conn);

    let mut next = VersionedSession::open(
        Session::new(pool.get().expect("failed to get connection")),
        ModeSelector::new(flags.clone(), LEGAL_API_SERVICE),
        legacy.clone(),
    )
    .expect("failed to open session");
    next.add(Business::new("BC9000002", "Next Request Ltd.", "BC"));
    next.commit().expect("commit failed");
    drop(next);

    let conn = pool.get().expect("failed to get connection");
    let leaked = Business::find_by_identifier(&conn, "BC9000001").expect("failed to query");
    assert!(leaked.is_none());
    assert!(Business::find_by_identifier(&conn, "BC9000002")
        .expect("failed to query")
        .is_some());
    assert!(history_for_entity(&conn, "business", "BC9000001")
        .expect("failed to load history")
        .is_empty());
    assert_eq!(
        history_for_entity(&conn, "business", "BC9000002")
            .expect("failed to load history")
            .len(),
        1
    );
    let transactions: i64 = conn
        .query_row("SELECT COUNT(*) FROM \"transaction\"", [], |row| row.get(0))
        .expect("failed to count transactions");
    assert_eq!(transactions, 1);
    assert!(legacy.is_empty());
}
