use common::{Document, Value};
use db::Database;
use storage::PageStore;
use tempfile::TempDir;
use uuid::Uuid;
use wal::{Journal, JournalEntry};

const PASSWORD: &str = "hunter2hunter2";

fn record_bytes(title: &str) -> (Uuid, Vec<u8>) {
    let mut document = Document::new();
    let id = Uuid::new_v4();
    document.set_id(id);
    document.set("title", Value::Text(title.to_string()));
    document.set("createdAt", Value::now());
    document.set("project", Value::Text("bugs".to_string()));
    (id, document.to_bytes().unwrap())
}

#[test]
fn committed_journal_replays_into_the_page_store() {
    let dir = TempDir::new().unwrap();
    let store_path = dir.path().join("pages.db");
    let journal_path = dir.path().join("pages.wal");

    let (_, p1) = record_bytes("one");
    let (_, p2) = record_bytes("two");

    // Log a full transaction but never write the pages: the crash window
    // between commit marker and store apply.
    let journal = Journal::open(&journal_path).unwrap();
    journal.begin(7).unwrap();
    journal
        .append(&JournalEntry::Write {
            page_index: 1,
            bytes: p1.clone(),
        })
        .unwrap();
    journal
        .append(&JournalEntry::Write {
            page_index: 2,
            bytes: p2.clone(),
        })
        .unwrap();
    journal.commit(7).unwrap();
    drop(journal);

    let store = PageStore::open(&store_path).unwrap();
    let journal = Journal::open(&journal_path).unwrap();
    journal.recover(&store).unwrap();
    assert_eq!(store.read(1).unwrap(), Some(p1.clone()));
    assert_eq!(store.read(2).unwrap(), Some(p2.clone()));

    // Running recover again changes nothing.
    journal.recover(&store).unwrap();
    assert_eq!(store.read(1).unwrap(), Some(p1));
    assert_eq!(store.read(2).unwrap(), Some(p2));
}

#[test]
fn database_open_replays_the_journal_and_rebuilds_the_layout() {
    let dir = TempDir::new().unwrap();
    let db_path = dir.path().join("bugs.db");

    // First open binds the key-tag and lays the files down.
    drop(Database::open(&db_path, PASSWORD, "bugs").unwrap());

    let (id_one, p1) = record_bytes("one");
    let (id_two, p2) = record_bytes("two");
    let journal = Journal::open(db_path.with_extension("wal")).unwrap();
    journal.begin(1).unwrap();
    journal
        .append(&JournalEntry::Write {
            page_index: 0,
            bytes: p1,
        })
        .unwrap();
    journal
        .append(&JournalEntry::Write {
            page_index: 1,
            bytes: p2,
        })
        .unwrap();
    journal.commit(1).unwrap();
    drop(journal);

    let database = Database::open(&db_path, PASSWORD, "bugs").unwrap();
    let all = database.fetch_all().unwrap();
    assert_eq!(all.len(), 2);
    assert!(database.fetch(id_one).unwrap().is_some());
    assert!(database.fetch(id_two).unwrap().is_some());
}

#[test]
fn dangling_transaction_is_discarded_at_open() {
    let dir = TempDir::new().unwrap();
    let db_path = dir.path().join("bugs.db");
    drop(Database::open(&db_path, PASSWORD, "bugs").unwrap());

    let (_, payload) = record_bytes("never committed");
    let journal = Journal::open(db_path.with_extension("wal")).unwrap();
    journal.begin(1).unwrap();
    journal
        .append(&JournalEntry::Write {
            page_index: 0,
            bytes: payload,
        })
        .unwrap();
    drop(journal); // no commit

    let database = Database::open(&db_path, PASSWORD, "bugs").unwrap();
    assert!(database.fetch_all().unwrap().is_empty());
}
