use common::{Document, Value};
use db::{Database, DbError};
use tempfile::TempDir;

const PASSWORD: &str = "hunter2hunter2";

fn doc(title: &str) -> Document {
    let mut document = Document::new();
    document.set("title", Value::Text(title.to_string()));
    document
}

#[test]
fn commit_keeps_mutations_and_clears_the_snapshot() {
    let dir = TempDir::new().unwrap();
    let database = Database::open(dir.path().join("bugs.db"), PASSWORD, "bugs").unwrap();
    database.insert(doc("before")).unwrap();

    database.begin_transaction().unwrap();
    let id = database.insert(doc("inside")).unwrap();
    database.commit_transaction().unwrap();

    assert!(database.fetch(id).unwrap().is_some());
    assert_eq!(database.fetch_all().unwrap().len(), 2);
    assert!(!dir.path().join("txn_in_progress.db").exists());
    assert!(!dir.path().join("txn_in_progress.layout").exists());
    assert!(!dir.path().join("txn_log.json").exists());
}

#[test]
fn rollback_restores_the_snapshot_and_clears_it() {
    let dir = TempDir::new().unwrap();
    let database = Database::open(dir.path().join("bugs.db"), PASSWORD, "bugs").unwrap();
    let keeper = database.insert(doc("keeper")).unwrap();

    database.begin_transaction().unwrap();
    let doomed = database.insert(doc("doomed")).unwrap();
    database.rollback_transaction().unwrap();

    assert!(database.fetch(keeper).unwrap().is_some());
    assert!(database.fetch(doomed).unwrap().is_none());
    assert_eq!(database.fetch_all().unwrap().len(), 1);
    assert!(!dir.path().join("txn_in_progress.db").exists());
    assert!(!dir.path().join("txn_in_progress.layout").exists());
    assert!(!dir.path().join("txn_log.json").exists());

    // The restored state survives a reopen (nothing replays over it).
    drop(database);
    let database = Database::open(dir.path().join("bugs.db"), PASSWORD, "bugs").unwrap();
    assert_eq!(database.fetch_all().unwrap().len(), 1);
}

#[test]
fn misuse_of_the_transaction_api_is_surfaced() {
    let dir = TempDir::new().unwrap();
    let database = Database::open(dir.path().join("bugs.db"), PASSWORD, "bugs").unwrap();

    assert!(matches!(
        database.commit_transaction(),
        Err(DbError::NoTransaction)
    ));
    assert!(matches!(
        database.rollback_transaction(),
        Err(DbError::NoTransaction)
    ));

    database.begin_transaction().unwrap();
    assert!(matches!(
        database.begin_transaction(),
        Err(DbError::TransactionInProgress)
    ));
    database.commit_transaction().unwrap();
    assert!(matches!(
        database.commit_transaction(),
        Err(DbError::NoTransaction)
    ));
}

#[test]
fn side_log_records_each_mutation_inside_a_transaction() {
    let dir = TempDir::new().unwrap();
    let database = Database::open(dir.path().join("bugs.db"), PASSWORD, "bugs").unwrap();

    database.begin_transaction().unwrap();
    let id = database.insert(doc("tracked")).unwrap();
    database.update(id, doc("tracked-2")).unwrap();

    let log: Vec<serde_json::Value> =
        serde_json::from_slice(&std::fs::read(dir.path().join("txn_log.json")).unwrap()).unwrap();
    assert_eq!(log.len(), 2);
    assert_eq!(log[0]["op"], "insert");
    assert_eq!(log[1]["op"], "update");

    database.rollback_transaction().unwrap();
}

#[test]
fn leftover_snapshot_is_restored_on_open() {
    let dir = TempDir::new().unwrap();
    let db_path = dir.path().join("bugs.db");
    let keeper;
    {
        let database = Database::open(&db_path, PASSWORD, "bugs").unwrap();
        keeper = database.insert(doc("keeper")).unwrap();
        database.begin_transaction().unwrap();
        database.insert(doc("phantom")).unwrap();
        // Dropped without commit or rollback: a crashed process.
    }
    assert!(dir.path().join("txn_in_progress.db").exists());

    let database = Database::open(&db_path, PASSWORD, "bugs").unwrap();
    let all = database.fetch_all().unwrap();
    assert_eq!(all.len(), 1);
    assert!(database.fetch(keeper).unwrap().is_some());
    assert!(!dir.path().join("txn_in_progress.db").exists());
    assert!(!dir.path().join("txn_log.json").exists());
}
