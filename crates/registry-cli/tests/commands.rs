use std::collections::BTreeMap;

use registry_cli::commands::{self, CommandError};
use registry_cli::config::VersioningConfig;
use registry_db::{open_connection, DbRuntimeSettings, MigrationError};
use registry_types::VersioningMode;
use rusqlite::Connection;
use serde_json::json;

fn fresh_db(dir: &tempfile::TempDir) -> Connection {
    let path = dir.path().join("registry.db");
    open_connection(
        path.to_str().expect("temp path should be utf-8"),
        &DbRuntimeSettings::default(),
    )
    .expect("failed to open database")
}

#[test]
fn upgrade_history_and_downgrade_walk_the_ledger() {
    let dir = tempfile::tempdir().expect("failed to create temp dir");
    let conn = fresh_db(&dir);

    assert_eq!(commands::current(&conn).expect("current failed"), None);
    assert!(commands::history(&conn)
        .expect("history failed")
        .iter()
        .all(|entry| !entry.applied));

    assert_eq!(commands::upgrade(&conn, "c47d2e9a1f06").expect("upgrade failed"), 3);
    let entries = commands::history(&conn).expect("history failed");
    let applied: Vec<bool> = entries.iter().map(|e| e.applied).collect();
    assert_eq!(applied, vec![true, true, true, false]);
    assert!(entries[2].current);
    assert!(entries[1].irreversible, "corp type seed has a no-op downgrade");

    assert_eq!(commands::upgrade(&conn, "head").expect("upgrade failed"), 1);
    assert_eq!(
        commands::current(&conn).expect("current failed").as_deref(),
        Some("f99e7bda56bb")
    );

    assert_eq!(commands::downgrade(&conn, "base").expect("downgrade failed"), 4);
    assert_eq!(commands::current(&conn).expect("current failed"), None);
}

#[test]
fn upgrade_rejects_a_target_behind_the_current_revision() {
    let dir = tempfile::tempdir().expect("failed to create temp dir");
    let conn = fresh_db(&dir);
    commands::upgrade(&conn, "head").expect("upgrade failed");

    let err = commands::upgrade(&conn, "a1c3e5f70b01").expect_err("should refuse to go backwards");
    assert!(matches!(
        err,
        CommandError::Migration(MigrationError::WrongDirection { .. })
    ));

    let err = commands::downgrade(&conn, "0000deadbeef").expect_err("unknown revision");
    assert!(matches!(
        err,
        CommandError::Migration(MigrationError::UnknownRevision(_))
    ));
}

#[test]
fn history_rejects_a_stored_revision_outside_the_chain() {
    let dir = tempfile::tempdir().expect("failed to create temp dir");
    let conn = fresh_db(&dir);
    commands::upgrade(&conn, "head").expect("upgrade failed");
    conn.execute("UPDATE _registry_version SET version_num = '0000deadbeef'", [])
        .expect("failed to rewrite the stored revision");

    let err = commands::history(&conn).expect_err("unknown stored revision");
    assert!(matches!(
        err,
        CommandError::Migration(MigrationError::UnknownRevision(rev)) if rev == "0000deadbeef"
    ));
}

#[test]
fn corp_types_are_listed_after_upgrade() {
    let dir = tempfile::tempdir().expect("failed to create temp dir");
    let conn = fresh_db(&dir);
    commands::upgrade(&conn, "head").expect("upgrade failed");

    let rows = commands::corp_types(&conn).expect("corp types failed");
    assert_eq!(rows.len(), 46);
    assert!(rows.windows(2).all(|w| w[0].corp_type_cd < w[1].corp_type_cd));
}

#[test]
fn mode_follows_configured_flags() {
    let mut versioning = VersioningConfig::default();
    let report = commands::mode(&versioning).expect("mode failed");
    assert_eq!(report.service, "legal-api");
    assert_eq!(report.mode, VersioningMode::Old);

    versioning.flags = BTreeMap::from([(
        "db-versioning".to_string(),
        json!({
            "initialize-new-versioning": true,
            "enable-new-versioning": { "legal-api": true },
        }),
    )]);
    assert_eq!(
        commands::mode(&versioning).expect("mode failed").mode,
        VersioningMode::New
    );

    versioning.service = "business-filer".to_string();
    assert_eq!(
        commands::mode(&versioning).expect("mode failed").mode,
        VersioningMode::Old
    );
}
