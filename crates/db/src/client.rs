//! Database client: opens the store, layout, journal, and safe-write harness
//! as one unit and exposes CRUD, file-level transactions, migrations, and
//! integrity checks.

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use log::{info, warn};
use parking_lot::Mutex;
use serde_json::json;
use uuid::Uuid;

use common::{Document, Value};
use query::Query;
use storage::{PageIndex, PageStoreStats, PageStore};
use wal::Journal;

use crate::collection::{CollectionPaths, DocumentCollection};
use crate::crypto::{self, DerivedKey};
use crate::error::{DbError, DbResult};
use crate::integrity::{self, ValidationReport};
use crate::migrate::{self, SchemaMigration};
use crate::safe_write::SafeWriteHarness;

const CRASH_BEFORE_UPDATE_ENV: &str = "BLAZEDB_CRASH_BEFORE_UPDATE";
const TXN_SNAPSHOT_DB: &str = "txn_in_progress.db";
const TXN_SNAPSHOT_LAYOUT: &str = "txn_in_progress.layout";
const TXN_SIDE_LOG: &str = "txn_log.json";

/// All sibling files owned by one database.
#[derive(Debug, Clone)]
pub struct DbPaths {
    pub db: PathBuf,
    pub layout: PathBuf,
    pub indexes: PathBuf,
    pub journal: PathBuf,
    pub keytag: PathBuf,
}

impl DbPaths {
    pub fn for_db(db_path: impl AsRef<Path>) -> Self {
        let collection = CollectionPaths::for_db(&db_path);
        let db = db_path.as_ref().to_path_buf();
        Self {
            layout: collection.layout,
            indexes: collection.indexes,
            journal: db.with_extension("wal"),
            keytag: db.with_extension("keytag"),
            db,
        }
    }

    fn sibling(&self, name: &str) -> PathBuf {
        self.db.with_file_name(name)
    }

    fn txn_snapshot_db(&self) -> PathBuf {
        self.sibling(TXN_SNAPSHOT_DB)
    }

    fn txn_snapshot_layout(&self) -> PathBuf {
        self.sibling(TXN_SNAPSHOT_LAYOUT)
    }

    fn txn_side_log(&self) -> PathBuf {
        self.sibling(TXN_SIDE_LOG)
    }
}

pub struct Database {
    collection: DocumentCollection,
    journal: Arc<Journal>,
    harness: SafeWriteHarness,
    paths: DbPaths,
    #[allow(dead_code)]
    key: DerivedKey,
    key_ok: bool,
    txn_active: Mutex<bool>,
}

impl std::fmt::Debug for Database {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Database").field("paths", &self.paths).finish()
    }
}

impl Database {
    /// Opens (or creates) a database: derives the key, verifies the key-tag,
    /// restores any leftover snapshots, replays the journal, and loads the
    /// collection.
    pub fn open(
        path: impl AsRef<Path>,
        password: &str,
        project: impl Into<String>,
    ) -> DbResult<Self> {
        // Key derivation comes first: a weak password must fail before any
        // file is created or touched.
        let key = crypto::derive_key(password)?;
        let paths = DbPaths::for_db(&path);
        let harness = SafeWriteHarness::new(paths.db.clone(), paths.layout.clone());

        // A crashed file-level transaction or mutation leaves snapshots
        // behind; restore them before anything reads the files.
        restore_leftover_txn_snapshot(&paths)?;
        if harness.leftover_backup_exists() {
            info!("restoring interrupted mutation backup for {}", paths.db.display());
            harness.restore_leftover_backup()?;
        }

        let key_ok = match crypto::verify_or_create_key_tag(&paths.keytag, &key) {
            Ok(()) => true,
            Err(DbError::KeyMismatch) => {
                warn!("key-tag mismatch for {}; all operations will fail", paths.db.display());
                false
            }
            Err(err) => return Err(err),
        };

        let store = Arc::new(PageStore::open(&paths.db)?);
        let journal = Arc::new(Journal::open(&paths.journal)?);
        if key_ok {
            let applied = journal.recover(&store)?;
            if applied > 0 {
                info!("journal replay applied {} page operation(s)", applied);
            }
        }

        let collection = DocumentCollection::open_with(
            store,
            CollectionPaths::for_db(&paths.db),
            project,
            Some(Arc::clone(&journal)),
        )?;

        Ok(Self {
            collection,
            journal,
            harness,
            paths,
            key,
            key_ok,
            txn_active: Mutex::new(false),
        })
    }

    fn ensure_key(&self) -> DbResult<()> {
        if !self.key_ok {
            return Err(DbError::KeyMismatch);
        }
        Ok(())
    }

    pub fn paths(&self) -> &DbPaths {
        &self.paths
    }

    pub fn project(&self) -> String {
        self.collection.project()
    }

    pub fn collection(&self) -> &DocumentCollection {
        &self.collection
    }

    // ----- CRUD ------------------------------------------------------------

    pub fn insert(&self, document: Document) -> DbResult<Uuid> {
        self.ensure_key()?;
        let id = self
            .harness
            .run(&self.collection, || self.collection.insert(document))?;
        self.record_txn_op(json!({"op": "insert", "id": id.to_string()}))?;
        Ok(id)
    }

    pub fn fetch(&self, id: Uuid) -> DbResult<Option<Document>> {
        self.ensure_key()?;
        self.collection.fetch(id)
    }

    pub fn fetch_all(&self) -> DbResult<Vec<Document>> {
        self.ensure_key()?;
        self.collection.fetch_all()
    }

    pub fn fetch_all_by_project(&self, project: &str) -> DbResult<Vec<Document>> {
        self.ensure_key()?;
        self.collection.fetch_all_by_project(project)
    }

    pub fn fetch_by_indexed_field(&self, field: &str, value: &Value) -> DbResult<Vec<Document>> {
        self.ensure_key()?;
        self.collection.fetch_by_indexed_field(field, value)
    }

    pub fn fetch_by_indexed_fields(
        &self,
        fields: &[String],
        values: &[Value],
    ) -> DbResult<Vec<Document>> {
        self.ensure_key()?;
        self.collection.fetch_by_indexed_fields(fields, values)
    }

    pub fn update(&self, id: Uuid, document: Document) -> DbResult<()> {
        self.ensure_key()?;
        self.harness.run(&self.collection, || {
            if std::env::var(CRASH_BEFORE_UPDATE_ENV).is_ok_and(|value| value == "1") {
                return Err(DbError::FaultInjected);
            }
            self.collection.update(id, document)
        })?;
        self.record_txn_op(json!({"op": "update", "id": id.to_string()}))?;
        Ok(())
    }

    pub fn delete(&self, id: Uuid) -> DbResult<()> {
        self.ensure_key()?;
        self.harness
            .run(&self.collection, || self.collection.delete(id))?;
        self.record_txn_op(json!({"op": "delete", "id": id.to_string()}))?;
        Ok(())
    }

    pub fn soft_delete(&self, id: Uuid) -> DbResult<()> {
        self.ensure_key()?;
        self.harness
            .run(&self.collection, || self.collection.soft_delete(id))?;
        self.record_txn_op(json!({"op": "softDelete", "id": id.to_string()}))?;
        Ok(())
    }

    pub fn purge(&self) -> DbResult<usize> {
        self.ensure_key()?;
        let purged = self
            .harness
            .run(&self.collection, || self.collection.purge())?;
        self.record_txn_op(json!({"op": "purge", "count": purged}))?;
        Ok(purged)
    }

    pub fn create_index(&self, fields: &[String]) -> DbResult<()> {
        self.ensure_key()?;
        self.harness
            .run(&self.collection, || self.collection.create_index(fields))
    }

    pub fn index_definitions(&self) -> DbResult<std::collections::BTreeMap<String, Vec<String>>> {
        self.ensure_key()?;
        Ok(self.collection.index_definitions())
    }

    pub fn run_query(&self, query: &Query) -> DbResult<Vec<Document>> {
        self.ensure_key()?;
        self.collection.run_query(query)
    }

    // ----- file-level transactions -----------------------------------------

    /// Snapshots the live files; mutations until commit/rollback append one
    /// record each to the side log.
    pub fn begin_transaction(&self) -> DbResult<()> {
        self.ensure_key()?;
        let mut active = self.txn_active.lock();
        if *active {
            return Err(DbError::TransactionInProgress);
        }
        if self.paths.db.exists() {
            fs::copy(&self.paths.db, self.paths.txn_snapshot_db())?;
        }
        if self.paths.layout.exists() {
            fs::copy(&self.paths.layout, self.paths.txn_snapshot_layout())?;
        }
        fs::write(self.paths.txn_side_log(), b"[]")?;
        *active = true;
        Ok(())
    }

    /// Keeps the mutations made inside the transaction and discards the
    /// snapshot and side log.
    pub fn commit_transaction(&self) -> DbResult<()> {
        self.ensure_key()?;
        let mut active = self.txn_active.lock();
        if !*active {
            return Err(DbError::NoTransaction);
        }
        remove_txn_files(&self.paths);
        *active = false;
        Ok(())
    }

    /// Restores the snapshot taken at begin, reloads the collection, and
    /// clears the side log.
    pub fn rollback_transaction(&self) -> DbResult<()> {
        self.ensure_key()?;
        let mut active = self.txn_active.lock();
        if !*active {
            return Err(DbError::NoTransaction);
        }
        let snapshot_db = self.paths.txn_snapshot_db();
        let snapshot_layout = self.paths.txn_snapshot_layout();
        if snapshot_db.exists() {
            fs::copy(&snapshot_db, &self.paths.db)?;
        }
        if snapshot_layout.exists() {
            fs::copy(&snapshot_layout, &self.paths.layout)?;
        } else {
            let _ = fs::remove_file(&self.paths.layout);
        }
        remove_txn_files(&self.paths);
        // Journaled mutations from inside the transaction must not replay
        // over the restored files on the next open.
        self.journal.truncate()?;
        self.collection.reload()?;
        *active = false;
        Ok(())
    }

    pub fn transaction_in_progress(&self) -> bool {
        *self.txn_active.lock()
    }

    fn record_txn_op(&self, record: serde_json::Value) -> DbResult<()> {
        let active = self.txn_active.lock();
        if !*active {
            return Ok(());
        }
        let log_path = self.paths.txn_side_log();
        let mut records: Vec<serde_json::Value> = match fs::read(&log_path) {
            Ok(bytes) => serde_json::from_slice(&bytes).unwrap_or_default(),
            Err(_) => Vec::new(),
        };
        records.push(record);
        fs::write(&log_path, serde_json::to_vec_pretty(&records)?)?;
        Ok(())
    }

    // ----- maintenance ------------------------------------------------------

    /// Emits an integrity report. In strict mode any error-severity issue
    /// fails the call.
    pub fn check_integrity(&self, strict: bool) -> DbResult<ValidationReport> {
        self.ensure_key()?;
        let report = integrity::validate(&self.collection)?;
        if strict && report.has_errors() {
            return Err(DbError::Integrity(format!(
                "{} error(s): {}",
                report.error_count(),
                report
            )));
        }
        Ok(report)
    }

    /// Applies pending schema migrations under the safe-write harness.
    pub fn run_migrations(&self, migrations: &[SchemaMigration]) -> DbResult<usize> {
        self.ensure_key()?;
        migrate::run_migrations(&self.collection, &self.harness, migrations)
    }

    pub fn schema_version(&self) -> i64 {
        self.collection.schema_version()
    }

    /// Page index -> payload bytes for every live page.
    pub fn dump_raw(&self) -> DbResult<std::collections::BTreeMap<PageIndex, Vec<u8>>> {
        self.ensure_key()?;
        self.collection.dump_raw()
    }

    pub fn stats(&self) -> DbResult<PageStoreStats> {
        self.ensure_key()?;
        self.collection.stats()
    }

    pub fn flush(&self) -> DbResult<()> {
        self.ensure_key()?;
        Ok(self.collection.store().sync()?)
    }

    /// Removes every file the database owns and resets in-memory state.
    pub fn destroy(&self) -> DbResult<()> {
        self.ensure_key()?;
        self.collection.destroy()?;
        self.journal.truncate()?;
        let _ = fs::remove_file(&self.paths.keytag);
        remove_txn_files(&self.paths);
        *self.txn_active.lock() = false;
        Ok(())
    }
}

fn remove_txn_files(paths: &DbPaths) {
    let _ = fs::remove_file(paths.txn_snapshot_db());
    let _ = fs::remove_file(paths.txn_snapshot_layout());
    let _ = fs::remove_file(paths.txn_side_log());
}

/// A leftover `txn_in_progress.*` pair means a file-level transaction never
/// finished; restore the snapshot before opening.
fn restore_leftover_txn_snapshot(paths: &DbPaths) -> DbResult<()> {
    let snapshot_db = paths.txn_snapshot_db();
    let snapshot_layout = paths.txn_snapshot_layout();
    if !snapshot_db.exists() && !snapshot_layout.exists() {
        return Ok(());
    }
    info!("restoring interrupted transaction snapshot for {}", paths.db.display());
    if snapshot_db.exists() {
        fs::copy(&snapshot_db, &paths.db)?;
    }
    if snapshot_layout.exists() {
        fs::copy(&snapshot_layout, &paths.layout)?;
    }
    remove_txn_files(paths);
    Ok(())
}
