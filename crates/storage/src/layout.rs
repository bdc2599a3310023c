//! Storage layout: persistent metadata kept separate from record pages.
//!
//! The page file is the source of truth for records; the layout can always be
//! rebuilt from it. Loading therefore trades conservatism for availability:
//! an unparseable layout file is logged, deleted, and replaced with an empty
//! layout instead of failing the open.

use std::collections::{BTreeMap, BTreeSet};
use std::fs::{self, File, OpenOptions};
use std::io::Write;
use std::path::Path;

use log::warn;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use common::{Document, IndexKey, KeyComponent, Value};

use crate::error::StorageResult;
use crate::page::PageIndex;
use crate::pager::PageStore;

pub const LAYOUT_VERSION: u32 = 2;

/// Materialized buckets of one secondary index: compound key -> member ids.
pub type IndexBuckets = BTreeMap<IndexKey, BTreeSet<Uuid>>;

#[derive(Debug, Clone)]
pub struct Layout {
    /// Document id -> page index. Keys unique; no page index appears twice.
    pub index_map: BTreeMap<Uuid, PageIndex>,
    /// Smallest never-used page slot; strictly greater than every mapped page.
    pub next_page_index: PageIndex,
    /// Compound key name ("a+b") -> ordered field list.
    pub index_definitions: BTreeMap<String, Vec<String>>,
    /// Compound key name -> materialized buckets.
    pub indexes: BTreeMap<String, IndexBuckets>,
    /// Free-form metadata; the migration subsystem keeps its schema version here.
    pub meta: BTreeMap<String, Value>,
    /// Field name -> value type tag, refreshed on insert/update. Informational.
    pub field_types: BTreeMap<String, String>,
    pub version: u32,
}

impl Default for Layout {
    fn default() -> Self {
        Self {
            index_map: BTreeMap::new(),
            next_page_index: 0,
            index_definitions: BTreeMap::new(),
            indexes: BTreeMap::new(),
            meta: BTreeMap::new(),
            field_types: BTreeMap::new(),
            version: LAYOUT_VERSION,
        }
    }
}

/// On-disk shape of the layout file. Unknown top-level keys are ignored.
#[derive(Serialize, Deserialize)]
struct LayoutFile {
    #[serde(rename = "indexMap", default)]
    index_map: BTreeMap<Uuid, PageIndex>,
    #[serde(rename = "nextPageIndex", default)]
    next_page_index: PageIndex,
    #[serde(rename = "secondaryIndexDefinitions", default)]
    index_definitions: BTreeMap<String, Vec<String>>,
    #[serde(rename = "secondaryIndexes", default)]
    indexes: BTreeMap<String, BTreeMap<String, Vec<Uuid>>>,
    #[serde(rename = "metaData", default)]
    meta: BTreeMap<String, Value>,
    #[serde(rename = "fieldTypes", default)]
    field_types: BTreeMap<String, String>,
    version: u32,
}

impl From<&Layout> for LayoutFile {
    fn from(layout: &Layout) -> Self {
        LayoutFile {
            index_map: layout.index_map.clone(),
            next_page_index: layout.next_page_index,
            index_definitions: layout.index_definitions.clone(),
            indexes: encode_materializations(&layout.indexes),
            meta: layout.meta.clone(),
            field_types: layout.field_types.clone(),
            version: layout.version,
        }
    }
}

impl From<LayoutFile> for Layout {
    fn from(file: LayoutFile) -> Self {
        Layout {
            index_map: file.index_map,
            next_page_index: file.next_page_index,
            index_definitions: file.index_definitions,
            indexes: decode_materializations(file.indexes),
            meta: file.meta,
            field_types: file.field_types,
            version: file.version,
        }
    }
}

fn encode_materializations(
    indexes: &BTreeMap<String, IndexBuckets>,
) -> BTreeMap<String, BTreeMap<String, Vec<Uuid>>> {
    indexes
        .iter()
        .map(|(name, buckets)| {
            let encoded = buckets
                .iter()
                .map(|(key, ids)| (key.encode(), ids.iter().copied().collect()))
                .collect();
            (name.clone(), encoded)
        })
        .collect()
}

fn decode_materializations(
    indexes: BTreeMap<String, BTreeMap<String, Vec<Uuid>>>,
) -> BTreeMap<String, IndexBuckets> {
    let mut decoded = BTreeMap::new();
    for (name, buckets) in indexes {
        let mut out = IndexBuckets::new();
        for (encoded, ids) in buckets {
            match IndexKey::decode(&encoded) {
                Some(key) => {
                    out.insert(key, ids.into_iter().collect());
                }
                None => warn!("dropping undecodable index key {:?} in {}", encoded, name),
            }
        }
        decoded.insert(name, out);
    }
    decoded
}

impl Layout {
    /// Canonical index name for an ordered field list.
    pub fn index_name(fields: &[String]) -> String {
        fields.join("+")
    }

    /// Loads the layout from disk, following the recovery rules in the
    /// module docs. Never fails: the worst case is an empty layout.
    pub fn load(path: &Path) -> Layout {
        if !path.exists() {
            return Layout::default();
        }
        let bytes = match fs::read(path) {
            Ok(bytes) => bytes,
            Err(err) => {
                warn!("layout file {} unreadable ({}), starting empty", path.display(), err);
                return Layout::default();
            }
        };
        let mut json: serde_json::Value = match serde_json::from_slice(&bytes) {
            Ok(json) => json,
            Err(err) => {
                warn!(
                    "layout file {} corrupt ({}), deleting and starting empty",
                    path.display(),
                    err
                );
                let _ = fs::remove_file(path);
                return Layout::default();
            }
        };
        let version = json.get("version").and_then(|v| v.as_u64()).unwrap_or(1) as u32;
        if version < LAYOUT_VERSION {
            migrate_legacy(&mut json);
        }
        match serde_json::from_value::<LayoutFile>(json) {
            Ok(file) => file.into(),
            Err(err) => {
                warn!(
                    "layout file {} has an unusable structure ({}), deleting and starting empty",
                    path.display(),
                    err
                );
                let _ = fs::remove_file(path);
                Layout::default()
            }
        }
    }

    /// Writes the entire layout atomically: temp file, flush, rename.
    pub fn save(&self, path: &Path) -> StorageResult<()> {
        let bytes = serde_json::to_vec_pretty(&LayoutFile::from(self))
            .map_err(|err| std::io::Error::other(err))?;
        write_atomically(path, &bytes)
    }

    /// Writes the indexes sidecar: a single mapping from index name to
    /// (encoded key -> id list). On load the sidecar supersedes whatever
    /// materialization the main layout carried.
    pub fn save_indexes_sidecar(&self, path: &Path) -> StorageResult<()> {
        let encoded = encode_materializations(&self.indexes);
        let bytes =
            serde_json::to_vec_pretty(&encoded).map_err(|err| std::io::Error::other(err))?;
        write_atomically(path, &bytes)
    }

    pub fn load_indexes_sidecar(path: &Path) -> Option<BTreeMap<String, IndexBuckets>> {
        if !path.exists() {
            return None;
        }
        let bytes = fs::read(path).ok()?;
        match serde_json::from_slice::<BTreeMap<String, BTreeMap<String, Vec<Uuid>>>>(&bytes) {
            Ok(encoded) => Some(decode_materializations(encoded)),
            Err(err) => {
                warn!("indexes sidecar {} corrupt ({}), ignoring", path.display(), err);
                None
            }
        }
    }

    /// Reconstructs `index_map` and `next_page_index` by scanning every page.
    /// Orphaned pages and holes are tolerated. Secondary indexes are NOT
    /// rebuilt here; the collection rebuilds them from the definitions.
    pub fn rebuild(store: &PageStore) -> StorageResult<Layout> {
        let mut layout = Layout::default();
        let page_count = store.page_count()?;
        for index in 0..page_count {
            let payload = match store.read(index) {
                Ok(Some(payload)) if !payload.is_empty() => payload,
                Ok(_) => continue,
                Err(_) => continue,
            };
            let Ok(document) = Document::from_bytes(&payload) else {
                continue;
            };
            if let Some(id) = document.id() {
                layout.index_map.insert(id, index);
                layout.record_field_types(&document);
            }
        }
        layout.next_page_index = page_count;
        Ok(layout)
    }

    /// Records a freshly written page for `id`, keeping `next_page_index`
    /// strictly above every mapped slot.
    pub fn note_page(&mut self, id: Uuid, index: PageIndex) {
        self.index_map.insert(id, index);
        self.next_page_index = self.next_page_index.max(index + 1);
    }

    pub fn bucket_insert(&mut self, name: &str, key: IndexKey, id: Uuid) {
        self.indexes
            .entry(name.to_string())
            .or_default()
            .entry(key)
            .or_default()
            .insert(id);
    }

    /// Removes `id` from a bucket, pruning the bucket when it empties.
    pub fn bucket_remove(&mut self, name: &str, key: &IndexKey, id: &Uuid) {
        let Some(buckets) = self.indexes.get_mut(name) else {
            return;
        };
        if let Some(ids) = buckets.get_mut(key) {
            ids.remove(id);
            if ids.is_empty() {
                buckets.remove(key);
            }
        }
    }

    pub fn record_field_types(&mut self, document: &Document) {
        for (name, value) in document.iter() {
            self.field_types
                .insert(name.clone(), value.type_tag().to_string());
        }
    }
}

/// Structural migration of a version-1 layout: single-component index keys
/// (plain strings) are lifted into compound keys of length one, and scalar
/// index definitions become one-element field lists. Bumps the version.
fn migrate_legacy(json: &mut serde_json::Value) {
    let Some(root) = json.as_object_mut() else {
        return;
    };
    if let Some(defs) = root
        .get_mut("secondaryIndexDefinitions")
        .and_then(|v| v.as_object_mut())
    {
        for (_, fields) in defs.iter_mut() {
            if let serde_json::Value::String(field) = fields {
                *fields = serde_json::Value::Array(vec![serde_json::Value::String(field.clone())]);
            }
        }
    }
    if let Some(indexes) = root
        .get_mut("secondaryIndexes")
        .and_then(|v| v.as_object_mut())
    {
        for (_, buckets) in indexes.iter_mut() {
            let Some(buckets) = buckets.as_object_mut() else {
                continue;
            };
            let lifted: serde_json::Map<String, serde_json::Value> = buckets
                .iter()
                .map(|(key, ids)| {
                    let key = match IndexKey::decode(key) {
                        Some(_) => key.clone(),
                        None => IndexKey(vec![KeyComponent::Text(key.clone())]).encode(),
                    };
                    (key, ids.clone())
                })
                .collect();
            *buckets = lifted;
        }
    }
    root.insert(
        "version".to_string(),
        serde_json::Value::from(LAYOUT_VERSION),
    );
}

fn write_atomically(path: &Path, bytes: &[u8]) -> StorageResult<()> {
    let tmp = path.with_extension("tmp");
    {
        let mut file = OpenOptions::new()
            .write(true)
            .create(true)
            .truncate(true)
            .open(&tmp)?;
        file.write_all(bytes)?;
        file.sync_all()?;
    }
    fs::rename(&tmp, path)?;
    // Push the rename itself to disk where the platform allows it.
    if let Some(parent) = path.parent()
        && let Ok(dir) = File::open(parent)
    {
        let _ = dir.sync_all();
    }
    Ok(())
}
