//! Safe-write harness: a file-level snapshot/restore wrapper around every
//! mutating client call. Coarser than the journal and independent of it.

use std::cell::Cell;
use std::fs;
use std::path::{Path, PathBuf};

use log::warn;
use parking_lot::ReentrantMutex;

use crate::collection::DocumentCollection;
use crate::error::DbResult;

/// Deterministic sibling backup path: `bugs.db` -> `bugs_backup.db`.
pub fn backup_path(path: &Path) -> PathBuf {
    let stem = path
        .file_stem()
        .and_then(|stem| stem.to_str())
        .unwrap_or("db");
    let name = match path.extension().and_then(|ext| ext.to_str()) {
        Some(ext) => format!("{}_backup.{}", stem, ext),
        None => format!("{}_backup", stem),
    };
    path.with_file_name(name)
}

pub struct SafeWriteHarness {
    db_path: PathBuf,
    layout_path: PathBuf,
    // Reentrant: a nested run on the same thread re-enters and short-circuits,
    // while a second writer thread blocks until the snapshot window closes.
    active: ReentrantMutex<Cell<bool>>,
}

impl SafeWriteHarness {
    pub fn new(db_path: PathBuf, layout_path: PathBuf) -> Self {
        Self {
            db_path,
            layout_path,
            active: ReentrantMutex::new(Cell::new(false)),
        }
    }

    pub fn backup_paths(&self) -> (PathBuf, PathBuf) {
        (backup_path(&self.db_path), backup_path(&self.layout_path))
    }

    /// True when backups from an interrupted mutation are still on disk.
    pub fn leftover_backup_exists(&self) -> bool {
        let (db_backup, layout_backup) = self.backup_paths();
        db_backup.exists() || layout_backup.exists()
    }

    /// Restores both files from leftover backups and removes them. Used at
    /// open when a previous process died mid-mutation.
    pub fn restore_leftover_backup(&self) -> DbResult<()> {
        let (db_backup, layout_backup) = self.backup_paths();
        if db_backup.exists() {
            fs::copy(&db_backup, &self.db_path)?;
            fs::remove_file(&db_backup)?;
        }
        if layout_backup.exists() {
            fs::copy(&layout_backup, &self.layout_path)?;
            fs::remove_file(&layout_backup)?;
        }
        Ok(())
    }

    /// Snapshots the database and layout files, runs the mutation, and on
    /// failure restores both and reloads the collection before re-raising.
    /// Non-recursive: a nested call just runs the body.
    pub fn run<T>(
        &self,
        collection: &DocumentCollection,
        body: impl FnOnce() -> DbResult<T>,
    ) -> DbResult<T> {
        let guard = self.active.lock();
        if guard.get() {
            return body();
        }
        guard.set(true);
        let result = self.run_guarded(collection, body);
        guard.set(false);
        result
    }

    fn run_guarded<T>(
        &self,
        collection: &DocumentCollection,
        body: impl FnOnce() -> DbResult<T>,
    ) -> DbResult<T> {
        let (db_backup, layout_backup) = self.backup_paths();
        let db_existed = self.db_path.exists();
        let layout_existed = self.layout_path.exists();
        if db_existed {
            fs::copy(&self.db_path, &db_backup)?;
        }
        if layout_existed {
            fs::copy(&self.layout_path, &layout_backup)?;
        }

        match body() {
            Ok(value) => {
                let _ = fs::remove_file(&db_backup);
                let _ = fs::remove_file(&layout_backup);
                Ok(value)
            }
            Err(err) => {
                // fs::copy truncates the destination in place, so the open
                // page-store handle keeps seeing the restored bytes.
                if db_existed {
                    fs::copy(&db_backup, &self.db_path)?;
                } else {
                    let _ = fs::remove_file(&self.db_path);
                }
                if layout_existed {
                    fs::copy(&layout_backup, &self.layout_path)?;
                } else {
                    let _ = fs::remove_file(&self.layout_path);
                }
                let _ = fs::remove_file(&db_backup);
                let _ = fs::remove_file(&layout_backup);
                if let Err(reload_err) = collection.reload() {
                    warn!("collection reload after restore failed: {}", reload_err);
                }
                Err(err)
            }
        }
    }
}
