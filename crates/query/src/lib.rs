//! In-memory query chains: predicates, ordering, and range limits applied to
//! a document sequence by linear scan. There is no planner; indexed lookups
//! live on the collection itself.

use std::cmp::Ordering;

use common::{Document, KeyComponent, Value};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    Ascending,
    Descending,
}

/// One field predicate. Comparisons go through key-component normalization,
/// so `Eq("priority", Int(1))` matches a document holding `Float(1.0)`.
#[derive(Debug, Clone)]
pub enum Predicate {
    Eq(String, Value),
    Ne(String, Value),
    Gt(String, Value),
    Gte(String, Value),
    Lt(String, Value),
    Lte(String, Value),
    Exists(String),
    Contains(String, String),
}

impl Predicate {
    pub fn matches(&self, document: &Document) -> bool {
        match self {
            Predicate::Eq(field, value) => compare(document, field, value) == Ordering::Equal,
            Predicate::Ne(field, value) => compare(document, field, value) != Ordering::Equal,
            Predicate::Gt(field, value) => compare(document, field, value) == Ordering::Greater,
            Predicate::Gte(field, value) => compare(document, field, value) != Ordering::Less,
            Predicate::Lt(field, value) => compare(document, field, value) == Ordering::Less,
            Predicate::Lte(field, value) => compare(document, field, value) != Ordering::Greater,
            Predicate::Exists(field) => document.contains(field),
            Predicate::Contains(field, needle) => document
                .get(field)
                .and_then(Value::as_text)
                .is_some_and(|text| text.contains(needle.as_str())),
        }
    }
}

fn compare(document: &Document, field: &str, value: &Value) -> Ordering {
    let stored = KeyComponent::normalize(document.get(field));
    let wanted = KeyComponent::normalize(Some(value));
    stored.cmp(&wanted)
}

/// A query chain. Predicates are conjunctive; ordering and range limits
/// apply after filtering.
#[derive(Debug, Clone, Default)]
pub struct Query {
    predicates: Vec<Predicate>,
    order_by: Option<(String, Direction)>,
    skip: usize,
    take: Option<usize>,
}

impl Query {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn filter(mut self, predicate: Predicate) -> Self {
        self.predicates.push(predicate);
        self
    }

    pub fn sort(mut self, field: impl Into<String>, direction: Direction) -> Self {
        self.order_by = Some((field.into(), direction));
        self
    }

    pub fn skip(mut self, count: usize) -> Self {
        self.skip = count;
        self
    }

    pub fn limit(mut self, count: usize) -> Self {
        self.take = Some(count);
        self
    }

    pub fn apply(&self, documents: Vec<Document>) -> Vec<Document> {
        let mut matched: Vec<Document> = documents
            .into_iter()
            .filter(|document| {
                self.predicates
                    .iter()
                    .all(|predicate| predicate.matches(document))
            })
            .collect();

        if let Some((field, direction)) = &self.order_by {
            matched.sort_by(|a, b| {
                let left = KeyComponent::normalize(a.get(field));
                let right = KeyComponent::normalize(b.get(field));
                match direction {
                    Direction::Ascending => left.cmp(&right),
                    Direction::Descending => right.cmp(&left),
                }
            });
        }

        matched
            .into_iter()
            .skip(self.skip)
            .take(self.take.unwrap_or(usize::MAX))
            .collect()
    }
}
