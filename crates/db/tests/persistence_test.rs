use std::sync::Arc;
use std::thread;

use common::{Document, Value};
use db::Database;
use tempfile::TempDir;

const PASSWORD: &str = "hunter2hunter2";

fn doc(fields: &[(&str, Value)]) -> Document {
    fields
        .iter()
        .map(|(name, value)| (name.to_string(), value.clone()))
        .collect()
}

#[test]
fn records_survive_a_reopen() {
    let dir = TempDir::new().unwrap();
    let db_path = dir.path().join("bugs.db");

    let id = {
        let database = Database::open(&db_path, PASSWORD, "bugs").unwrap();
        database
            .insert(doc(&[
                ("title", Value::Text("persist me".to_string())),
                ("severity", Value::Int(2)),
                ("ratio", Value::Float(0.25)),
                ("open", Value::Bool(true)),
            ]))
            .unwrap()
    };

    let database = Database::open(&db_path, PASSWORD, "bugs").unwrap();
    let fetched = database.fetch(id).unwrap().expect("record survives reopen");
    assert_eq!(
        fetched.get("title"),
        Some(&Value::Text("persist me".to_string()))
    );
    assert_eq!(fetched.get("severity"), Some(&Value::Int(2)));
    assert_eq!(fetched.get("ratio"), Some(&Value::Float(0.25)));
    assert_eq!(fetched.get("open"), Some(&Value::Bool(true)));
}

#[test]
fn indexes_survive_a_reopen_even_without_the_sidecar() {
    let dir = TempDir::new().unwrap();
    let db_path = dir.path().join("bugs.db");
    let fields = vec!["status".to_string()];

    {
        let database = Database::open(&db_path, PASSWORD, "bugs").unwrap();
        database.create_index(&fields).unwrap();
        for status in ["open", "open", "closed"] {
            database
                .insert(doc(&[("status", Value::Text(status.to_string()))]))
                .unwrap();
        }
    }

    // Blank the persisted materializations and drop the sidecar: the
    // definitions alone must be enough to rebuild by scanning documents.
    std::fs::remove_file(dir.path().join("bugs.indexes")).unwrap();
    let layout_path = dir.path().join("bugs.layout");
    let mut layout: serde_json::Value =
        serde_json::from_slice(&std::fs::read(&layout_path).unwrap()).unwrap();
    layout["secondaryIndexes"] = serde_json::json!({});
    std::fs::write(&layout_path, serde_json::to_vec(&layout).unwrap()).unwrap();

    let database = Database::open(&db_path, PASSWORD, "bugs").unwrap();
    let hits = database
        .fetch_by_indexed_field("status", &Value::Text("open".to_string()))
        .unwrap();
    assert_eq!(hits.len(), 2);
}

#[test]
fn update_and_delete_persist_across_reopen() {
    let dir = TempDir::new().unwrap();
    let db_path = dir.path().join("bugs.db");

    let (kept, removed) = {
        let database = Database::open(&db_path, PASSWORD, "bugs").unwrap();
        let kept = database
            .insert(doc(&[("value", Value::Int(100))]))
            .unwrap();
        let removed = database
            .insert(doc(&[("value", Value::Int(200))]))
            .unwrap();
        database
            .update(kept, doc(&[("value", Value::Int(999))]))
            .unwrap();
        database.delete(removed).unwrap();
        (kept, removed)
    };

    let database = Database::open(&db_path, PASSWORD, "bugs").unwrap();
    assert_eq!(
        database.fetch(kept).unwrap().unwrap().get("value"),
        Some(&Value::Int(999))
    );
    assert!(database.fetch(removed).unwrap().is_none());
}

#[test]
fn destroyed_database_starts_over() {
    let dir = TempDir::new().unwrap();
    let db_path = dir.path().join("bugs.db");
    let database = Database::open(&db_path, PASSWORD, "bugs").unwrap();
    database
        .insert(doc(&[("title", Value::Text("gone soon".to_string()))]))
        .unwrap();

    database.destroy().unwrap();
    assert!(database.fetch_all().unwrap().is_empty());
    assert!(!dir.path().join("bugs.layout").exists());
}

#[test]
fn parallel_readers_during_writes_see_consistent_index_state() {
    let dir = TempDir::new().unwrap();
    let database =
        Arc::new(Database::open(dir.path().join("bugs.db"), PASSWORD, "bugs").unwrap());
    let fields = vec!["status".to_string(), "priority".to_string()];
    database.create_index(&fields).unwrap();

    let writer = {
        let database = Arc::clone(&database);
        thread::spawn(move || {
            for round in 0..30 {
                database
                    .insert(doc(&[
                        ("status", Value::Text("open".to_string())),
                        ("priority", Value::Int(round % 3)),
                    ]))
                    .unwrap();
            }
        })
    };
    let readers: Vec<_> = (0..3)
        .map(|_| {
            let database = Arc::clone(&database);
            let fields = fields.clone();
            thread::spawn(move || {
                for _ in 0..30 {
                    // Every indexed hit must actually carry the looked-up key.
                    let hits = database
                        .fetch_by_indexed_fields(
                            &fields,
                            &[Value::Text("open".to_string()), Value::Int(1)],
                        )
                        .unwrap();
                    for hit in hits {
                        assert_eq!(
                            hit.get("status"),
                            Some(&Value::Text("open".to_string()))
                        );
                        assert_eq!(hit.get("priority"), Some(&Value::Int(1)));
                    }
                }
            })
        })
        .collect();

    writer.join().unwrap();
    for reader in readers {
        reader.join().unwrap();
    }

    assert_eq!(database.fetch_all().unwrap().len(), 30);
}

#[test]
fn write_is_visible_to_a_read_that_starts_afterwards() {
    let dir = TempDir::new().unwrap();
    let database = Database::open(dir.path().join("bugs.db"), PASSWORD, "bugs").unwrap();
    let id = database
        .insert(doc(&[("title", Value::Text("just written".to_string()))]))
        .unwrap();
    assert!(database.fetch(id).unwrap().is_some());
    assert_eq!(database.fetch_all().unwrap().len(), 1);
}
