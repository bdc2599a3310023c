use common::{Document, Value};
use db::{Database, DbError};
use tempfile::TempDir;

#[test]
fn weak_password_fails_before_touching_any_file() {
    let dir = TempDir::new().unwrap();
    let db_path = dir.path().join("bugs.db");

    let err = Database::open(&db_path, "123", "bugs").unwrap_err();
    assert!(matches!(err, DbError::PasswordTooWeak { .. }));
    assert!(
        std::fs::read_dir(dir.path()).unwrap().next().is_none(),
        "no file may be created or modified"
    );
}

#[test]
fn wrong_password_puts_the_store_into_key_mismatch() {
    let dir = TempDir::new().unwrap();
    let db_path = dir.path().join("bugs.db");

    let id = {
        let database = Database::open(&db_path, "correct-password", "bugs").unwrap();
        let mut document = Document::new();
        document.set("title", Value::Text("locked away".to_string()));
        database.insert(document).unwrap()
    };

    let database = Database::open(&db_path, "wrong-password", "bugs").unwrap();
    assert!(matches!(
        database.fetch(id),
        Err(DbError::KeyMismatch)
    ));
    assert!(matches!(
        database.fetch_all(),
        Err(DbError::KeyMismatch)
    ));
    assert!(matches!(
        database.insert(Document::new()),
        Err(DbError::KeyMismatch)
    ));
    assert!(matches!(
        database.begin_transaction(),
        Err(DbError::KeyMismatch)
    ));
    assert!(matches!(database.stats(), Err(DbError::KeyMismatch)));

    // Reopening with the right password restores access.
    let database = Database::open(&db_path, "correct-password", "bugs").unwrap();
    assert!(database.fetch(id).unwrap().is_some());
}
