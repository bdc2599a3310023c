use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::value::Value;

pub const FIELD_ID: &str = "id";
pub const FIELD_CREATED_AT: &str = "createdAt";
pub const FIELD_UPDATED_AT: &str = "updatedAt";
pub const FIELD_PROJECT: &str = "project";
pub const FIELD_IS_DELETED: &str = "isDeleted";

/// Schemaless record: an unordered mapping from field name to tagged value.
///
/// Every persisted document carries at least `id`, `createdAt`, and
/// `project`; the collection stamps those at insert when absent.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Document {
    fields: BTreeMap<String, Value>,
}

impl Document {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, name: &str) -> Option<&Value> {
        self.fields.get(name)
    }

    pub fn set(&mut self, name: impl Into<String>, value: Value) {
        self.fields.insert(name.into(), value);
    }

    pub fn remove(&mut self, name: &str) -> Option<Value> {
        self.fields.remove(name)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.fields.contains_key(name)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&String, &Value)> {
        self.fields.iter()
    }

    pub fn field_names(&self) -> impl Iterator<Item = &String> {
        self.fields.keys()
    }

    pub fn len(&self) -> usize {
        self.fields.len()
    }

    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }

    /// Record identifier, accepting both the identifier variant and a
    /// parseable text form.
    pub fn id(&self) -> Option<Uuid> {
        self.fields.get(FIELD_ID).and_then(Value::as_id)
    }

    pub fn set_id(&mut self, id: Uuid) {
        self.set(FIELD_ID, Value::Id(id));
    }

    pub fn created_at(&self) -> Option<DateTime<Utc>> {
        self.fields.get(FIELD_CREATED_AT).and_then(Value::as_timestamp)
    }

    pub fn project(&self) -> Option<&str> {
        self.fields.get(FIELD_PROJECT).and_then(Value::as_text)
    }

    pub fn is_deleted(&self) -> bool {
        self.fields
            .get(FIELD_IS_DELETED)
            .and_then(Value::as_bool)
            .unwrap_or(false)
    }

    pub fn mark_deleted(&mut self) {
        self.set(FIELD_IS_DELETED, Value::Bool(true));
    }

    /// Serialized form written to a page payload.
    pub fn to_bytes(&self) -> Result<Vec<u8>, serde_json::Error> {
        serde_json::to_vec(self)
    }

    pub fn from_bytes(bytes: &[u8]) -> Result<Self, serde_json::Error> {
        serde_json::from_slice(bytes)
    }

    /// Builds a document from a natural JSON object, mapping each field
    /// through [`Value::from_json`]. Non-object input yields an empty
    /// document.
    pub fn from_json(json: &serde_json::Value) -> Self {
        let mut document = Document::new();
        if let serde_json::Value::Object(entries) = json {
            for (name, value) in entries {
                if value.is_null() {
                    continue;
                }
                document.set(name.clone(), Value::from_json(value));
            }
        }
        document
    }

    pub fn to_json(&self) -> serde_json::Value {
        serde_json::Value::Object(
            self.fields
                .iter()
                .map(|(name, value)| (name.clone(), value.to_json()))
                .collect(),
        )
    }
}

impl FromIterator<(String, Value)> for Document {
    fn from_iter<T: IntoIterator<Item = (String, Value)>>(iter: T) -> Self {
        Document {
            fields: iter.into_iter().collect(),
        }
    }
}
