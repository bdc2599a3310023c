//! PageStore: framed, fixed-size page I/O on one file.
//!
//! Invariants:
//! - Every live page starts with the magic+version header; holes are all zero
//! - The file grows in whole pages; a short trailing remainder is ignored
//! - Writes are durable on return (sync_data before acknowledgement)
//! - Readers run concurrently; writers are serialized and exclude readers,
//!   so a reader sees either the pre-write or post-write page in full

use std::fs::{File, OpenOptions};
use std::os::unix::fs::FileExt;
use std::path::{Path, PathBuf};

use parking_lot::RwLock;

use crate::error::StorageResult;
use crate::page::{self, PAGE_SIZE, PageIndex};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PageStoreStats {
    pub total_pages: u64,
    pub orphaned_pages: u64,
    pub file_bytes: u64,
}

pub struct PageStore {
    file: RwLock<File>,
    path: PathBuf,
}

impl PageStore {
    /// Opens or creates the page file.
    pub fn open(path: impl AsRef<Path>) -> StorageResult<Self> {
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(&path)?;
        Ok(Self {
            file: RwLock::new(file),
            path: path.as_ref().to_path_buf(),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Writes a framed payload at the given page slot and flushes.
    pub fn write(&self, index: PageIndex, payload: &[u8]) -> StorageResult<()> {
        let buf = page::frame(payload)?;
        let file = self.file.write();
        file.write_at(&buf, index * PAGE_SIZE as u64)?;
        file.sync_data()?;
        Ok(())
    }

    /// Reads the payload at the given page slot.
    ///
    /// Returns `None` for holes and for reads past end-of-file; fails with
    /// `InvalidHeader` when the slot holds bytes that are not a framed page.
    pub fn read(&self, index: PageIndex) -> StorageResult<Option<Vec<u8>>> {
        let file = self.file.read();
        let offset = index * PAGE_SIZE as u64;
        if offset + PAGE_SIZE as u64 > file.metadata()?.len() {
            return Ok(None);
        }
        let mut buf = [0u8; PAGE_SIZE];
        file.read_exact_at(&mut buf, offset)?;
        page::unframe(index, &buf)
    }

    /// Appends a framed payload at the next file-size-derived slot and
    /// returns the newly assigned index.
    pub fn append(&self, payload: &[u8]) -> StorageResult<PageIndex> {
        let buf = page::frame(payload)?;
        let file = self.file.write();
        let index = file.metadata()?.len() / PAGE_SIZE as u64;
        file.write_at(&buf, index * PAGE_SIZE as u64)?;
        file.sync_data()?;
        Ok(index)
    }

    /// Overwrites the slot with zeros and flushes. The slot becomes a hole;
    /// it is not reclaimed.
    pub fn delete(&self, index: PageIndex) -> StorageResult<()> {
        let zeroes = [0u8; PAGE_SIZE];
        let file = self.file.write();
        file.write_at(&zeroes, index * PAGE_SIZE as u64)?;
        file.sync_data()?;
        Ok(())
    }

    /// Number of whole pages in the file. A short trailing remainder does not
    /// count as a page.
    pub fn page_count(&self) -> StorageResult<u64> {
        Ok(self.file.read().metadata()?.len() / PAGE_SIZE as u64)
    }

    pub fn stats(&self) -> StorageResult<PageStoreStats> {
        let file = self.file.read();
        let file_bytes = file.metadata()?.len();
        let total_pages = file_bytes / PAGE_SIZE as u64;
        let mut orphaned_pages = 0;
        let mut buf = [0u8; PAGE_SIZE];
        for index in 0..total_pages {
            file.read_exact_at(&mut buf, index * PAGE_SIZE as u64)?;
            if !page::has_valid_header(&buf) {
                orphaned_pages += 1;
            }
        }
        Ok(PageStoreStats {
            total_pages,
            orphaned_pages,
            file_bytes,
        })
    }

    /// Forces buffered data to disk.
    pub fn sync(&self) -> StorageResult<()> {
        self.file.read().sync_data()?;
        Ok(())
    }
}
