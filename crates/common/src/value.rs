use std::cmp::Ordering;
use std::collections::BTreeMap;
use std::fmt;
use std::hash::{Hash, Hasher};

use chrono::{DateTime, SecondsFormat, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Tagged value stored in a document field.
///
/// Documents are schemaless: any field may hold any variant, and the same
/// field may differ across documents in one collection.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Value {
    Text(String),
    Int(i64),
    Float(f64),
    Bool(bool),
    Timestamp(DateTime<Utc>),
    Id(Uuid),
    Seq(Vec<Value>),
    Map(BTreeMap<String, Value>),
}

impl Value {
    pub fn now() -> Self {
        Value::Timestamp(Utc::now())
    }

    pub fn as_text(&self) -> Option<&str> {
        match self {
            Value::Text(text) => Some(text),
            _ => None,
        }
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Value::Bool(flag) => Some(*flag),
            _ => None,
        }
    }

    pub fn as_int(&self) -> Option<i64> {
        match self {
            Value::Int(number) => Some(*number),
            _ => None,
        }
    }

    /// Interprets the value as a record identifier, accepting both the
    /// identifier variant and a parseable text form.
    pub fn as_id(&self) -> Option<Uuid> {
        match self {
            Value::Id(id) => Some(*id),
            Value::Text(text) => Uuid::parse_str(text).ok(),
            _ => None,
        }
    }

    pub fn as_timestamp(&self) -> Option<DateTime<Utc>> {
        match self {
            Value::Timestamp(ts) => Some(*ts),
            _ => None,
        }
    }

    /// Short tag describing the variant, used for the layout's field-type map.
    pub fn type_tag(&self) -> &'static str {
        match self {
            Value::Text(_) => "text",
            Value::Int(_) => "int",
            Value::Float(_) => "float",
            Value::Bool(_) => "bool",
            Value::Timestamp(_) => "timestamp",
            Value::Id(_) => "id",
            Value::Seq(_) => "seq",
            Value::Map(_) => "map",
        }
    }

    /// Converts a natural JSON value into a tagged value. Strings stay text,
    /// integral numbers become ints, everything else maps structurally.
    /// JSON null has no counterpart and becomes empty text.
    pub fn from_json(json: &serde_json::Value) -> Self {
        match json {
            serde_json::Value::Null => Value::Text(String::new()),
            serde_json::Value::Bool(flag) => Value::Bool(*flag),
            serde_json::Value::Number(number) => {
                if let Some(int) = number.as_i64() {
                    Value::Int(int)
                } else {
                    Value::Float(number.as_f64().unwrap_or(0.0))
                }
            }
            serde_json::Value::String(text) => Value::Text(text.clone()),
            serde_json::Value::Array(items) => {
                Value::Seq(items.iter().map(Value::from_json).collect())
            }
            serde_json::Value::Object(entries) => Value::Map(
                entries
                    .iter()
                    .map(|(name, value)| (name.clone(), Value::from_json(value)))
                    .collect(),
            ),
        }
    }

    /// Renders the value as natural JSON for display surfaces.
    pub fn to_json(&self) -> serde_json::Value {
        match self {
            Value::Text(text) => serde_json::Value::String(text.clone()),
            Value::Int(number) => serde_json::Value::from(*number),
            Value::Float(number) => serde_json::Value::from(*number),
            Value::Bool(flag) => serde_json::Value::Bool(*flag),
            Value::Timestamp(ts) => {
                serde_json::Value::String(ts.to_rfc3339_opts(SecondsFormat::Millis, true))
            }
            Value::Id(id) => serde_json::Value::String(id.to_string()),
            Value::Seq(items) => {
                serde_json::Value::Array(items.iter().map(Value::to_json).collect())
            }
            Value::Map(entries) => serde_json::Value::Object(
                entries
                    .iter()
                    .map(|(name, value)| (name.clone(), value.to_json()))
                    .collect(),
            ),
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Text(text) => write!(f, "{}", text),
            Value::Int(number) => write!(f, "{}", number),
            Value::Float(number) => write!(f, "{}", number),
            Value::Bool(flag) => write!(f, "{}", flag),
            Value::Timestamp(ts) => {
                write!(f, "{}", ts.to_rfc3339_opts(SecondsFormat::Millis, true))
            }
            Value::Id(id) => write!(f, "{}", id),
            Value::Seq(_) | Value::Map(_) => write!(f, "{}", self.to_json()),
        }
    }
}

/// One normalized component of a compound index key.
///
/// Only scalar variants participate in index keys. Components have a total
/// order and total equality so composite keys built from value-equal inputs
/// hash and compare equal regardless of how the value was expressed.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum KeyComponent {
    Text(String),
    Int(i64),
    Float(f64),
    Bool(bool),
    /// Milliseconds since the Unix epoch.
    Timestamp(i64),
    Id(Uuid),
}

impl KeyComponent {
    /// Normalizes a field value into a key component. Missing fields and
    /// unsupported variants collapse to empty text; integral floats collapse
    /// to ints so `1`, `1.0`, and an int-typed query all hit the same bucket.
    pub fn normalize(value: Option<&Value>) -> Self {
        match value {
            Some(Value::Text(text)) => KeyComponent::Text(text.clone()),
            Some(Value::Int(number)) => KeyComponent::Int(*number),
            Some(Value::Float(number)) => {
                if number.is_finite()
                    && number.fract() == 0.0
                    && *number >= i64::MIN as f64
                    && *number <= i64::MAX as f64
                {
                    KeyComponent::Int(*number as i64)
                } else {
                    KeyComponent::Float(*number)
                }
            }
            Some(Value::Bool(flag)) => KeyComponent::Bool(*flag),
            Some(Value::Timestamp(ts)) => KeyComponent::Timestamp(ts.timestamp_millis()),
            Some(Value::Id(id)) => KeyComponent::Id(*id),
            Some(Value::Seq(_)) | Some(Value::Map(_)) | None => KeyComponent::Text(String::new()),
        }
    }

    fn rank(&self) -> u8 {
        match self {
            KeyComponent::Text(_) => 0,
            KeyComponent::Int(_) => 1,
            KeyComponent::Float(_) => 2,
            KeyComponent::Bool(_) => 3,
            KeyComponent::Timestamp(_) => 4,
            KeyComponent::Id(_) => 5,
        }
    }
}

impl PartialEq for KeyComponent {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for KeyComponent {}

impl Ord for KeyComponent {
    fn cmp(&self, other: &Self) -> Ordering {
        match (self, other) {
            (KeyComponent::Text(a), KeyComponent::Text(b)) => a.cmp(b),
            (KeyComponent::Int(a), KeyComponent::Int(b)) => a.cmp(b),
            (KeyComponent::Float(a), KeyComponent::Float(b)) => a.total_cmp(b),
            (KeyComponent::Bool(a), KeyComponent::Bool(b)) => a.cmp(b),
            (KeyComponent::Timestamp(a), KeyComponent::Timestamp(b)) => a.cmp(b),
            (KeyComponent::Id(a), KeyComponent::Id(b)) => a.cmp(b),
            // Numeric cross-variant comparison keeps int-vs-float queries
            // consistent with normalization.
            (KeyComponent::Int(a), KeyComponent::Float(b)) => (*a as f64).total_cmp(b),
            (KeyComponent::Float(a), KeyComponent::Int(b)) => a.total_cmp(&(*b as f64)),
            _ => self.rank().cmp(&other.rank()),
        }
    }
}

impl PartialOrd for KeyComponent {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Hash for KeyComponent {
    fn hash<H: Hasher>(&self, state: &mut H) {
        match self {
            KeyComponent::Text(text) => {
                state.write_u8(0);
                text.hash(state);
            }
            KeyComponent::Int(number) => {
                state.write_u8(1);
                number.hash(state);
            }
            KeyComponent::Float(number) => {
                // Integral floats compare equal to ints, so they must hash
                // like ints too.
                if number.is_finite()
                    && number.fract() == 0.0
                    && *number >= i64::MIN as f64
                    && *number <= i64::MAX as f64
                {
                    state.write_u8(1);
                    (*number as i64).hash(state);
                } else {
                    state.write_u8(2);
                    number.to_bits().hash(state);
                }
            }
            KeyComponent::Bool(flag) => {
                state.write_u8(3);
                flag.hash(state);
            }
            KeyComponent::Timestamp(millis) => {
                state.write_u8(4);
                millis.hash(state);
            }
            KeyComponent::Id(id) => {
                state.write_u8(5);
                id.hash(state);
            }
        }
    }
}

/// Ordered sequence of normalized components identifying a compound-index
/// bucket.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct IndexKey(pub Vec<KeyComponent>);

impl IndexKey {
    /// Builds the key for `fields` (in order) from a field lookup.
    pub fn from_fields<'a, F>(fields: &[String], lookup: F) -> Self
    where
        F: Fn(&str) -> Option<&'a Value>,
    {
        IndexKey(
            fields
                .iter()
                .map(|field| KeyComponent::normalize(lookup(field)))
                .collect(),
        )
    }

    /// Canonical text encoding, used as the map key in persisted index
    /// materializations (JSON object keys must be strings).
    pub fn encode(&self) -> String {
        serde_json::to_string(&self.0).unwrap_or_default()
    }

    pub fn decode(encoded: &str) -> Option<Self> {
        serde_json::from_str(encoded).ok().map(IndexKey)
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}
