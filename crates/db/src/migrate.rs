//! Schema migration: ordered document transforms recorded against the
//! schema version the layout keeps in its metadata.

use log::info;

use common::Document;

use crate::collection::DocumentCollection;
use crate::error::DbResult;
use crate::safe_write::SafeWriteHarness;

type Transform = Box<dyn Fn(&mut Document) -> DbResult<()> + Send + Sync>;

/// One migration step. Steps apply in ascending version order; a step runs
/// only when its version is above the collection's current schema version.
pub struct SchemaMigration {
    pub version: i64,
    pub name: String,
    transform: Transform,
}

impl SchemaMigration {
    pub fn new(
        version: i64,
        name: impl Into<String>,
        transform: impl Fn(&mut Document) -> DbResult<()> + Send + Sync + 'static,
    ) -> Self {
        Self {
            version,
            name: name.into(),
            transform: Box::new(transform),
        }
    }
}

/// Applies pending migrations, each wrapped in the safe-write harness so a
/// failing step restores the pre-step files. Returns the number of steps run.
pub fn run_migrations(
    collection: &DocumentCollection,
    harness: &SafeWriteHarness,
    migrations: &[SchemaMigration],
) -> DbResult<usize> {
    let mut steps: Vec<&SchemaMigration> = migrations.iter().collect();
    steps.sort_by_key(|step| step.version);

    let mut applied = 0;
    for step in steps {
        if step.version <= collection.schema_version() {
            continue;
        }
        info!(
            "applying schema migration {} ({} -> {})",
            step.name,
            collection.schema_version(),
            step.version
        );
        harness.run(collection, || {
            collection.transform_documents(step.transform.as_ref())?;
            collection.set_schema_version(step.version)
        })?;
        applied += 1;
    }
    Ok(applied)
}
