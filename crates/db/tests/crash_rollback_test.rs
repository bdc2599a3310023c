//! Fault-injected update: BLAZEDB_CRASH_BEFORE_UPDATE makes `update` fail
//! inside the safe-write harness, which must restore the pre-update files.
//!
//! The env var is process-wide, so this file holds exactly one test.

use common::{Document, Value};
use db::{Database, DbError};
use tempfile::TempDir;

#[test]
fn failed_update_rolls_back_to_the_snapshot() {
    let dir = TempDir::new().unwrap();
    let database = Database::open(dir.path().join("bugs.db"), "hunter2hunter2", "bugs").unwrap();

    let mut document = Document::new();
    document.set("title", Value::Text("Before crash".to_string()));
    let id = database.insert(document).unwrap();

    unsafe { std::env::set_var("BLAZEDB_CRASH_BEFORE_UPDATE", "1") };
    let mut mutated = Document::new();
    mutated.set("title", Value::Text("Crash incoming".to_string()));
    let err = database.update(id, mutated).unwrap_err();
    assert!(matches!(err, DbError::FaultInjected));
    unsafe { std::env::remove_var("BLAZEDB_CRASH_BEFORE_UPDATE") };

    let all = database.fetch_all().unwrap();
    assert_eq!(all.len(), 1);
    assert_eq!(
        all[0].get("title"),
        Some(&Value::Text("Before crash".to_string()))
    );

    // The harness cleaned its backups up after restoring.
    let backup = dir.path().join("bugs_backup.db");
    assert!(!backup.exists());
}
