//! Integrity reporter: walks the layout and page file and emits a report of
//! warnings and errors without mutating anything.

use std::fmt;

use serde::Serialize;

use common::{Document, IndexKey};
use storage::PAGE_SIZE;

use crate::collection::DocumentCollection;
use crate::error::DbResult;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Warning,
    Error,
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Severity::Warning => write!(f, "warning"),
            Severity::Error => write!(f, "error"),
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct Issue {
    pub severity: Severity,
    pub message: String,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct ValidationReport {
    pub issues: Vec<Issue>,
}

impl ValidationReport {
    fn push(&mut self, severity: Severity, message: impl Into<String>) {
        self.issues.push(Issue {
            severity,
            message: message.into(),
        });
    }

    pub fn is_clean(&self) -> bool {
        self.issues.is_empty()
    }

    pub fn has_errors(&self) -> bool {
        self.issues
            .iter()
            .any(|issue| issue.severity == Severity::Error)
    }

    pub fn error_count(&self) -> usize {
        self.issues
            .iter()
            .filter(|issue| issue.severity == Severity::Error)
            .count()
    }
}

impl fmt::Display for ValidationReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.issues.is_empty() {
            return write!(f, "ok");
        }
        for (position, issue) in self.issues.iter().enumerate() {
            if position > 0 {
                writeln!(f)?;
            }
            write!(f, "[{}] {}", issue.severity, issue.message)?;
        }
        Ok(())
    }
}

/// Checks the collection against its storage invariants.
pub fn validate(collection: &DocumentCollection) -> DbResult<ValidationReport> {
    let mut report = ValidationReport::default();

    collection.with_read(|inner| -> DbResult<()> {
        let stats = inner.store.stats()?;
        if stats.file_bytes % PAGE_SIZE as u64 != 0 {
            report.push(
                Severity::Warning,
                format!(
                    "page file has a {}-byte trailing remainder",
                    stats.file_bytes % PAGE_SIZE as u64
                ),
            );
        }
        if stats.orphaned_pages > 0 {
            report.push(
                Severity::Warning,
                format!("{} orphaned page(s) in the file", stats.orphaned_pages),
            );
        }

        // Every mapped page must hold a matching document or be a hole.
        let mut max_page = None;
        for (id, &page_index) in &inner.layout.index_map {
            max_page = Some(max_page.map_or(page_index, |max: u64| max.max(page_index)));
            match inner.store.read(page_index) {
                Err(err) => report.push(
                    Severity::Error,
                    format!("record {} page {}: {}", id, page_index, err),
                ),
                Ok(None) => report.push(
                    Severity::Warning,
                    format!("record {} maps to hole page {}", id, page_index),
                ),
                Ok(Some(payload)) if payload.is_empty() => report.push(
                    Severity::Warning,
                    format!("record {} maps to header-only page {}", id, page_index),
                ),
                Ok(Some(payload)) => match Document::from_bytes(&payload) {
                    Err(err) => report.push(
                        Severity::Error,
                        format!("record {} page {} undecodable: {}", id, page_index, err),
                    ),
                    Ok(document) => {
                        if document.id() != Some(*id) {
                            report.push(
                                Severity::Error,
                                format!(
                                    "record {} page {} holds a document with id {:?}",
                                    id,
                                    page_index,
                                    document.id()
                                ),
                            );
                        }
                    }
                },
            }
        }
        if let Some(max_page) = max_page
            && inner.layout.next_page_index <= max_page
        {
            report.push(
                Severity::Error,
                format!(
                    "nextPageIndex {} is not above the highest mapped page {}",
                    inner.layout.next_page_index, max_page
                ),
            );
        }

        // Buckets must not reference ids the layout no longer knows, and
        // every qualifying document must be present in its bucket.
        for (name, buckets) in &inner.layout.indexes {
            for (key, ids) in buckets {
                for id in ids {
                    if !inner.layout.index_map.contains_key(id) {
                        report.push(
                            Severity::Error,
                            format!("index {} bucket {} holds dangling id {}", name, key.encode(), id),
                        );
                    }
                }
            }
        }
        for (name, fields) in &inner.layout.index_definitions {
            let buckets = inner.layout.indexes.get(name);
            for (id, &page_index) in &inner.layout.index_map {
                let Ok(Some(payload)) = inner.store.read(page_index) else {
                    continue;
                };
                if payload.is_empty() {
                    continue;
                }
                let Ok(document) = Document::from_bytes(&payload) else {
                    continue;
                };
                if !fields.iter().all(|field| document.contains(field)) {
                    continue;
                }
                let key = IndexKey::from_fields(fields, |field| document.get(field));
                let indexed = buckets
                    .and_then(|buckets| buckets.get(&key))
                    .is_some_and(|ids| ids.contains(id));
                if !indexed {
                    report.push(
                        Severity::Warning,
                        format!("record {} missing from index {}", id, name),
                    );
                }
            }
        }
        Ok(())
    })?;

    Ok(report)
}

#[cfg(test)]
mod tests {
    use super::*;
    use common::Value;
    use tempfile::TempDir;

    fn doc(fields: &[(&str, Value)]) -> Document {
        fields
            .iter()
            .map(|(name, value)| (name.to_string(), value.clone()))
            .collect()
    }

    #[test]
    fn healthy_collection_is_clean() {
        let dir = TempDir::new().unwrap();
        let collection = DocumentCollection::open(dir.path().join("bugs.db"), "bugs").unwrap();
        collection.create_index(&["status".to_string()]).unwrap();
        collection
            .insert(doc(&[("status", Value::Text("open".to_string()))]))
            .unwrap();

        let report = validate(&collection).unwrap();
        assert!(report.is_clean(), "unexpected issues: {}", report);
    }

    #[test]
    fn deleted_page_under_a_live_id_warns() {
        let dir = TempDir::new().unwrap();
        let collection = DocumentCollection::open(dir.path().join("bugs.db"), "bugs").unwrap();
        let id = collection
            .insert(doc(&[("title", Value::Text("x".to_string()))]))
            .unwrap();
        // Zero the page behind the layout's back.
        collection.store().delete(0).unwrap();

        let report = validate(&collection).unwrap();
        assert!(!report.is_clean());
        assert!(!report.has_errors());
        assert!(report.issues.iter().any(|issue| issue
            .message
            .contains(&id.to_string())));
    }

    #[test]
    fn orphaned_page_under_a_live_id_errors() {
        let dir = TempDir::new().unwrap();
        let db_path = dir.path().join("bugs.db");
        let collection = DocumentCollection::open(&db_path, "bugs").unwrap();
        collection
            .insert(doc(&[("title", Value::Text("x".to_string()))]))
            .unwrap();

        let mut bytes = std::fs::read(&db_path).unwrap();
        bytes[0] = b'X';
        std::fs::write(&db_path, &bytes).unwrap();

        let report = validate(&collection).unwrap();
        assert!(report.has_errors());
    }
}
