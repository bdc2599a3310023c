//! Document collection: CRUD over records with single-field and compound
//! secondary indexes.
//!
//! Invariants:
//! - One logical writer at a time; readers run in parallel (one RwLock)
//! - Index mutations and the page write publish together: readers never see
//!   a half-applied compound-key move
//! - The layout is persisted after every mutation; the page file stays the
//!   source of truth and the layout is rebuilt from it when lost

use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use chrono::Utc;
use log::warn;
use parking_lot::RwLock;
use uuid::Uuid;

use common::{Document, FIELD_CREATED_AT, FIELD_PROJECT, FIELD_UPDATED_AT, IndexKey, Value};
use query::Query;
use storage::{Layout, PageIndex, PageStore, PageStoreStats};
use wal::{Journal, JournalEntry};

use crate::error::{DbError, DbResult};

/// Sibling files owned by one collection, all derived from the page-file path.
#[derive(Debug, Clone)]
pub struct CollectionPaths {
    pub db: PathBuf,
    pub layout: PathBuf,
    pub indexes: PathBuf,
}

impl CollectionPaths {
    pub fn for_db(db_path: impl AsRef<Path>) -> Self {
        let db = db_path.as_ref().to_path_buf();
        Self {
            layout: db.with_extension("layout"),
            indexes: db.with_extension("indexes"),
            db,
        }
    }
}

pub(crate) struct CollectionInner {
    pub(crate) store: Arc<PageStore>,
    pub(crate) layout: Layout,
    pub(crate) paths: CollectionPaths,
    pub(crate) project: String,
    journal: Option<Arc<Journal>>,
    next_txn_id: u64,
}

pub struct DocumentCollection {
    inner: RwLock<CollectionInner>,
}

impl DocumentCollection {
    /// Opens the collection: page store, layout (rebuilt from pages when
    /// lost), indexes sidecar, and any index materializations that need a
    /// backfill.
    pub fn open(db_path: impl AsRef<Path>, project: impl Into<String>) -> DbResult<Self> {
        let paths = CollectionPaths::for_db(db_path);
        let store = Arc::new(PageStore::open(&paths.db)?);
        Self::open_with(store, paths, project, None)
    }

    /// Opens over an existing page store, optionally journaling mutations.
    /// The caller replays the journal before handing the store in, so the
    /// layout and index rebuild below see the recovered pages.
    pub fn open_with(
        store: Arc<PageStore>,
        paths: CollectionPaths,
        project: impl Into<String>,
        journal: Option<Arc<Journal>>,
    ) -> DbResult<Self> {
        let mut layout = Layout::load(&paths.layout);

        // A fresh or reset layout in front of a populated page file means the
        // layout was lost; the pages know better.
        if layout.index_map.is_empty() && store.page_count()? > 0 {
            let rebuilt = Layout::rebuild(&store)?;
            layout.index_map = rebuilt.index_map;
            layout.next_page_index = rebuilt.next_page_index;
            for (field, tag) in rebuilt.field_types {
                layout.field_types.entry(field).or_insert(tag);
            }
        }

        // The sidecar, when present, supersedes the materializations carried
        // inside the main layout file.
        if let Some(indexes) = Layout::load_indexes_sidecar(&paths.indexes) {
            layout.indexes = indexes;
        }

        let mut inner = CollectionInner {
            store,
            layout,
            paths,
            project: project.into(),
            journal,
            next_txn_id: 1,
        };
        rebuild_missing_indexes(&mut inner)?;
        Ok(Self {
            inner: RwLock::new(inner),
        })
    }

    pub fn store(&self) -> Arc<PageStore> {
        Arc::clone(&self.inner.read().store)
    }

    pub fn paths(&self) -> CollectionPaths {
        self.inner.read().paths.clone()
    }

    pub fn project(&self) -> String {
        self.inner.read().project.clone()
    }

    /// Re-reads layout and sidecar from disk, rebuilding from the page file
    /// if the layout no longer parses. Used after external file restores.
    pub fn reload(&self) -> DbResult<()> {
        let mut inner = self.inner.write();
        let mut layout = Layout::load(&inner.paths.layout);
        if layout.index_map.is_empty() && inner.store.page_count()? > 0 {
            let rebuilt = Layout::rebuild(&inner.store)?;
            layout.index_map = rebuilt.index_map;
            layout.next_page_index = rebuilt.next_page_index;
        }
        if let Some(indexes) = Layout::load_indexes_sidecar(&inner.paths.indexes) {
            layout.indexes = indexes;
        }
        inner.layout = layout;
        rebuild_missing_indexes(&mut inner)
    }

    /// Registers a (possibly compound) index over the ordered field list.
    /// Idempotent; when records already exist the new index is backfilled.
    pub fn create_index(&self, fields: &[String]) -> DbResult<()> {
        let mut inner = self.inner.write();
        let name = Layout::index_name(fields);
        if !inner.layout.index_definitions.contains_key(&name) {
            inner
                .layout
                .index_definitions
                .insert(name.clone(), fields.to_vec());
        }
        inner.layout.indexes.entry(name.clone()).or_default();
        backfill_index(&mut inner, &name)?;
        persist(&inner)
    }

    pub fn index_definitions(&self) -> BTreeMap<String, Vec<String>> {
        self.inner.read().layout.index_definitions.clone()
    }

    pub fn insert(&self, mut document: Document) -> DbResult<Uuid> {
        let mut inner = self.inner.write();
        let id = document.id().unwrap_or_else(Uuid::new_v4);
        if inner.layout.index_map.contains_key(&id) {
            return Err(DbError::AlreadyExists(id));
        }
        document.set_id(id);
        if document.created_at().is_none() {
            document.set(FIELD_CREATED_AT, Value::Timestamp(Utc::now()));
        }
        if document.project().is_none() {
            let project = inner.project.clone();
            document.set(FIELD_PROJECT, Value::Text(project));
        }

        let bytes = document.to_bytes()?;
        let page_index = inner.store.append(&bytes)?;
        inner.layout.note_page(id, page_index);
        index_document(&mut inner.layout, id, &document);
        inner.layout.record_field_types(&document);
        persist(&inner)?;
        journal_committed(&mut inner, vec![JournalEntry::Write { page_index, bytes }])?;
        Ok(id)
    }

    pub fn fetch(&self, id: Uuid) -> DbResult<Option<Document>> {
        let inner = self.inner.read();
        let Some(&page_index) = inner.layout.index_map.get(&id) else {
            return Ok(None);
        };
        read_document(&inner, page_index)
    }

    /// All live documents, in no particular order.
    pub fn fetch_all(&self) -> DbResult<Vec<Document>> {
        let inner = self.inner.read();
        collect_documents(&inner)
    }

    pub fn fetch_all_by_project(&self, project: &str) -> DbResult<Vec<Document>> {
        Ok(self
            .fetch_all()?
            .into_iter()
            .filter(|document| document.project() == Some(project))
            .collect())
    }

    /// Indexed lookup over a single field; requires an index on exactly
    /// `[field]`. Absent index or unmatched key yield an empty list.
    pub fn fetch_by_indexed_field(&self, field: &str, value: &Value) -> DbResult<Vec<Document>> {
        self.fetch_by_indexed_fields(
            std::slice::from_ref(&field.to_string()),
            std::slice::from_ref(value),
        )
    }

    /// Indexed lookup over an ordered field list; requires an index keyed on
    /// exactly `fields` and `fields.len() == values.len()`.
    pub fn fetch_by_indexed_fields(
        &self,
        fields: &[String],
        values: &[Value],
    ) -> DbResult<Vec<Document>> {
        if fields.len() != values.len() {
            return Ok(Vec::new());
        }
        let inner = self.inner.read();
        let name = Layout::index_name(fields);
        if !inner.layout.index_definitions.contains_key(&name) {
            return Ok(Vec::new());
        }
        let key = IndexKey::from_fields(fields, |field| {
            fields
                .iter()
                .position(|candidate| candidate == field)
                .map(|position| &values[position])
        });
        let Some(ids) = inner
            .layout
            .indexes
            .get(&name)
            .and_then(|buckets| buckets.get(&key))
        else {
            return Ok(Vec::new());
        };

        let mut documents = Vec::with_capacity(ids.len());
        for id in ids {
            let Some(&page_index) = inner.layout.index_map.get(id) else {
                continue;
            };
            if let Some(document) = read_document(&inner, page_index)? {
                documents.push(document);
            }
        }
        Ok(documents)
    }

    /// Replaces the record in its page slot, moving it between compound-key
    /// buckets as needed.
    pub fn update(&self, id: Uuid, document: Document) -> DbResult<()> {
        let mut inner = self.inner.write();
        update_in_place(&mut inner, id, document)?;
        persist(&inner)
    }

    pub fn delete(&self, id: Uuid) -> DbResult<()> {
        let mut inner = self.inner.write();
        delete_in_place(&mut inner, id)?;
        persist(&inner)
    }

    /// Update that sets `isDeleted = true`; the record keeps its page and
    /// index entries until `purge`.
    pub fn soft_delete(&self, id: Uuid) -> DbResult<()> {
        let mut inner = self.inner.write();
        let Some(&page_index) = inner.layout.index_map.get(&id) else {
            return Err(DbError::NotFound(id));
        };
        let Some(mut document) = read_document(&inner, page_index)? else {
            return Err(DbError::NotFound(id));
        };
        document.mark_deleted();
        update_in_place(&mut inner, id, document)?;
        persist(&inner)
    }

    /// Hard-deletes every soft-deleted record. Returns how many went away.
    pub fn purge(&self) -> DbResult<usize> {
        let mut inner = self.inner.write();
        let mut doomed = Vec::new();
        for (&id, &page_index) in &inner.layout.index_map {
            if let Some(document) = read_document(&inner, page_index)?
                && document.is_deleted()
            {
                doomed.push(id);
            }
        }
        for &id in &doomed {
            delete_in_place(&mut inner, id)?;
        }
        persist(&inner)?;
        Ok(doomed.len())
    }

    /// Applies a query chain to all documents by full scan.
    pub fn run_query(&self, query: &Query) -> DbResult<Vec<Document>> {
        Ok(query.apply(self.fetch_all()?))
    }

    /// Rewrites every live document through `transform`, maintaining indexes.
    /// Used by the schema migrator.
    pub fn transform_documents(
        &self,
        transform: &dyn Fn(&mut Document) -> DbResult<()>,
    ) -> DbResult<usize> {
        let mut inner = self.inner.write();
        let ids: Vec<Uuid> = inner.layout.index_map.keys().copied().collect();
        let mut touched = 0;
        for id in ids {
            let Some(&page_index) = inner.layout.index_map.get(&id) else {
                continue;
            };
            let Some(mut document) = read_document(&inner, page_index)? else {
                continue;
            };
            transform(&mut document)?;
            update_in_place(&mut inner, id, document)?;
            touched += 1;
        }
        persist(&inner)?;
        Ok(touched)
    }

    pub fn schema_version(&self) -> i64 {
        self.inner
            .read()
            .layout
            .meta
            .get("schemaVersion")
            .and_then(Value::as_int)
            .unwrap_or(0)
    }

    pub fn set_schema_version(&self, version: i64) -> DbResult<()> {
        let mut inner = self.inner.write();
        inner
            .layout
            .meta
            .insert("schemaVersion".to_string(), Value::Int(version));
        persist(&inner)
    }

    pub fn stats(&self) -> DbResult<PageStoreStats> {
        Ok(self.inner.read().store.stats()?)
    }

    pub fn record_count(&self) -> usize {
        self.inner.read().layout.index_map.len()
    }

    /// Page index -> payload bytes for every readable, non-hole page.
    pub fn dump_raw(&self) -> DbResult<BTreeMap<PageIndex, Vec<u8>>> {
        let inner = self.inner.read();
        let mut pages = BTreeMap::new();
        for index in 0..inner.store.page_count()? {
            match inner.store.read(index) {
                Ok(Some(payload)) if !payload.is_empty() => {
                    pages.insert(index, payload);
                }
                Ok(_) => {}
                Err(_) => {} // orphaned pages are tolerated when scanning
            }
        }
        Ok(pages)
    }

    /// Removes database, layout, and sidecar files and resets in-memory
    /// state. The collection stays usable (empty) afterwards.
    pub fn destroy(&self) -> DbResult<()> {
        let mut inner = self.inner.write();
        let _ = fs::remove_file(&inner.paths.db);
        let _ = fs::remove_file(&inner.paths.layout);
        let _ = fs::remove_file(&inner.paths.indexes);
        inner.store = Arc::new(PageStore::open(&inner.paths.db)?);
        inner.layout = Layout::default();
        Ok(())
    }

    pub(crate) fn with_read<R>(&self, f: impl FnOnce(&CollectionInner) -> R) -> R {
        f(&self.inner.read())
    }
}

fn persist(inner: &CollectionInner) -> DbResult<()> {
    inner.layout.save(&inner.paths.layout)?;
    inner.layout.save_indexes_sidecar(&inner.paths.indexes)?;
    Ok(())
}

fn read_document(inner: &CollectionInner, page_index: PageIndex) -> DbResult<Option<Document>> {
    let Some(payload) = inner.store.read(page_index)? else {
        return Ok(None);
    };
    if payload.is_empty() {
        return Ok(None);
    }
    match Document::from_bytes(&payload) {
        Ok(document) => Ok(Some(document)),
        Err(err) => {
            warn!("page {} holds an undecodable document: {}", page_index, err);
            Ok(None)
        }
    }
}

fn collect_documents(inner: &CollectionInner) -> DbResult<Vec<Document>> {
    let mut documents = Vec::with_capacity(inner.layout.index_map.len());
    for &page_index in inner.layout.index_map.values() {
        if let Some(document) = read_document(inner, page_index)? {
            documents.push(document);
        }
    }
    Ok(documents)
}

/// Inserts `id` into every index whose required fields are all present on
/// the document.
fn index_document(layout: &mut Layout, id: Uuid, document: &Document) {
    let definitions = layout.index_definitions.clone();
    for (name, fields) in definitions {
        if !fields.iter().all(|field| document.contains(field)) {
            continue;
        }
        let key = IndexKey::from_fields(&fields, |field| document.get(field));
        layout.bucket_insert(&name, key, id);
    }
}

/// Removes `id` from every bucket the document currently occupies, pruning
/// empty buckets.
fn deindex_document(layout: &mut Layout, id: &Uuid, document: &Document) {
    let definitions = layout.index_definitions.clone();
    for (name, fields) in definitions {
        if !fields.iter().all(|field| document.contains(field)) {
            continue;
        }
        let key = IndexKey::from_fields(&fields, |field| document.get(field));
        layout.bucket_remove(&name, &key, id);
    }
}

fn update_in_place(inner: &mut CollectionInner, id: Uuid, mut document: Document) -> DbResult<()> {
    let Some(&page_index) = inner.layout.index_map.get(&id) else {
        return Err(DbError::NotFound(id));
    };
    let previous = read_document(inner, page_index)?;

    // Old compound-key entries come out before the new ones go in.
    if let Some(previous) = &previous {
        deindex_document(&mut inner.layout, &id, previous);
    }

    document.set_id(id);
    document.set(FIELD_UPDATED_AT, Value::Timestamp(Utc::now()));
    if document.created_at().is_none()
        && let Some(created) = previous.as_ref().and_then(Document::created_at)
    {
        document.set(FIELD_CREATED_AT, Value::Timestamp(created));
    }
    if document.project().is_none() {
        let project = inner.project.clone();
        document.set(FIELD_PROJECT, Value::Text(project));
    }

    let bytes = document.to_bytes()?;
    inner.store.write(page_index, &bytes)?;
    index_document(&mut inner.layout, id, &document);
    inner.layout.record_field_types(&document);
    journal_committed(inner, vec![JournalEntry::Write { page_index, bytes }])?;
    Ok(())
}

fn delete_in_place(inner: &mut CollectionInner, id: Uuid) -> DbResult<()> {
    let Some(&page_index) = inner.layout.index_map.get(&id) else {
        return Err(DbError::NotFound(id));
    };
    if let Some(document) = read_document(inner, page_index)? {
        deindex_document(&mut inner.layout, &id, &document);
    } else {
        // The page is gone; sweep any bucket that still mentions the id.
        for buckets in inner.layout.indexes.values_mut() {
            buckets.retain(|_, ids| {
                ids.remove(&id);
                !ids.is_empty()
            });
        }
    }
    inner.layout.index_map.remove(&id);
    inner.store.delete(page_index)?;
    journal_committed(inner, vec![JournalEntry::Delete { page_index }])?;
    Ok(())
}

/// Records an already-applied mutation in the journal as one committed
/// transaction, then truncates. Crash windows inside the sequence leave an
/// open-ended transaction that replay discards; the safe-write backup is the
/// net for those.
fn journal_committed(inner: &mut CollectionInner, ops: Vec<JournalEntry>) -> DbResult<()> {
    let Some(journal) = inner.journal.clone() else {
        return Ok(());
    };
    let txn_id = inner.next_txn_id;
    inner.next_txn_id += 1;
    journal.begin(txn_id)?;
    for op in &ops {
        journal.append(op)?;
    }
    journal.commit(txn_id)?;
    journal.truncate()?;
    Ok(())
}

/// Rebuild policy on open: a definition whose materialization is missing or
/// empty while documents exist gets a full backfill, then everything is
/// persisted.
fn rebuild_missing_indexes(inner: &mut CollectionInner) -> DbResult<()> {
    if inner.layout.index_map.is_empty() {
        return Ok(());
    }
    let names: Vec<String> = inner
        .layout
        .index_definitions
        .keys()
        .filter(|name| {
            inner
                .layout
                .indexes
                .get(*name)
                .is_none_or(|buckets| buckets.is_empty())
        })
        .cloned()
        .collect();
    if names.is_empty() {
        return Ok(());
    }
    for name in names {
        backfill_index(inner, &name)?;
    }
    persist(inner)
}

fn backfill_index(inner: &mut CollectionInner, name: &str) -> DbResult<()> {
    let Some(fields) = inner.layout.index_definitions.get(name).cloned() else {
        return Ok(());
    };
    if inner
        .layout
        .indexes
        .get(name)
        .is_some_and(|buckets| !buckets.is_empty())
    {
        return Ok(());
    }
    let entries: Vec<(Uuid, PageIndex)> = inner
        .layout
        .index_map
        .iter()
        .map(|(&id, &page_index)| (id, page_index))
        .collect();
    for (id, page_index) in entries {
        let Some(document) = read_document(inner, page_index)? else {
            continue;
        };
        if !fields.iter().all(|field| document.contains(field)) {
            continue;
        }
        let key = IndexKey::from_fields(&fields, |field| document.get(field));
        inner.layout.bucket_insert(name, key, id);
    }
    Ok(())
}
