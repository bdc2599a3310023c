//! Mount manager: an in-process registry of opened databases with
//! current-selection semantics. An explicit value, not a global; the
//! "current database" is just a field on it.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use crate::client::Database;
use crate::error::{DbError, DbResult};

struct Mount {
    database: Database,
    path: PathBuf,
    layout_path: PathBuf,
    password: String,
    project: String,
}

#[derive(Default)]
pub struct MountManager {
    mounts: BTreeMap<String, Mount>,
    current: Option<String>,
}

impl MountManager {
    pub fn new() -> Self {
        Self::default()
    }

    /// Opens a database, registers it under `name`, and makes it current.
    pub fn mount(
        &mut self,
        name: impl Into<String>,
        path: impl AsRef<Path>,
        password: &str,
        project: impl Into<String>,
    ) -> DbResult<()> {
        let name = name.into();
        let project = project.into();
        let database = Database::open(&path, password, project.clone())?;
        let layout_path = database.paths().layout.clone();
        self.mounts.insert(
            name.clone(),
            Mount {
                database,
                path: path.as_ref().to_path_buf(),
                layout_path,
                password: password.to_string(),
                project,
            },
        );
        self.current = Some(name);
        Ok(())
    }

    /// Makes a mounted database current. Purely a pointer change.
    pub fn use_db(&mut self, name: &str) -> DbResult<()> {
        if !self.mounts.contains_key(name) {
            return Err(DbError::NotMounted(name.to_string()));
        }
        self.current = Some(name.to_string());
        Ok(())
    }

    pub fn switch_to(&mut self, name: &str) -> DbResult<()> {
        self.use_db(name)
    }

    /// Drops the reference; no on-disk effect. Returns whether it existed.
    pub fn unmount(&mut self, name: &str) -> bool {
        let existed = self.mounts.remove(name).is_some();
        if self.current.as_deref() == Some(name) {
            self.current = None;
        }
        existed
    }

    pub fn unmount_all(&mut self) {
        self.mounts.clear();
        self.current = None;
    }

    pub fn current(&self) -> Option<&Database> {
        self.current
            .as_ref()
            .and_then(|name| self.mounts.get(name))
            .map(|mount| &mount.database)
    }

    pub fn current_name(&self) -> Option<&str> {
        self.current.as_deref()
    }

    pub fn get(&self, name: &str) -> Option<&Database> {
        self.mounts.get(name).map(|mount| &mount.database)
    }

    pub fn names(&self) -> Vec<String> {
        self.mounts.keys().cloned().collect()
    }

    pub fn mounted_paths(&self, name: &str) -> Option<(PathBuf, PathBuf)> {
        self.mounts
            .get(name)
            .map(|mount| (mount.path.clone(), mount.layout_path.clone()))
    }

    /// Reopens a mounted database from disk, e.g. after external file
    /// changes. The current selection is unaffected.
    pub fn reload(&mut self, name: &str) -> DbResult<()> {
        let Some(mount) = self.mounts.get_mut(name) else {
            return Err(DbError::NotMounted(name.to_string()));
        };
        mount.database = Database::open(&mount.path, &mount.password, mount.project.clone())?;
        Ok(())
    }

    /// Forwards a flush request to every open store.
    pub fn flush_all(&self) -> DbResult<()> {
        for mount in self.mounts.values() {
            mount.database.flush()?;
        }
        Ok(())
    }
}
