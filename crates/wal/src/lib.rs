//! Transaction journal: an append-only log of page-level operations
//! bracketed by begin/commit markers, replayed into the page store on open.
//!
//! Invariants:
//! - Entries are length-prefixed; unknown kinds are skipped on read
//! - Only transactions whose Begin is followed by a matching Commit replay
//! - Replay is idempotent and never fails on corrupt content (the page file
//!   is authoritative); it logs and stops at the first undecodable record
//! - The Commit marker is durable before buffered pages reach the store, so
//!   a crash between the two is repaired by replay

use std::fs::{File, OpenOptions};
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use log::warn;
use parking_lot::Mutex;
use thiserror::Error;

use storage::{PageIndex, PageStore, StorageError};

pub type TxnId = u64;

#[derive(Debug, Error)]
pub enum JournalError {
    #[error("journal io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("journal corruption: {0}")]
    Corrupt(String),
    #[error("transaction already finalized")]
    AlreadyFinalized,
    #[error(transparent)]
    Storage(#[from] StorageError),
}

pub type JournalResult<T> = Result<T, JournalError>;

// Generous bound for one record: a framed page plus its envelope.
const MAX_RECORD_LEN: usize = 1024 * 1024;

const TAG_BEGIN: u8 = 1;
const TAG_COMMIT: u8 = 2;
const TAG_ABORT: u8 = 3;
const TAG_WRITE: u8 = 4;
const TAG_DELETE: u8 = 5;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum JournalEntry {
    Begin(TxnId),
    Write { page_index: PageIndex, bytes: Vec<u8> },
    Delete { page_index: PageIndex },
    Commit(TxnId),
    Abort(TxnId),
}

impl JournalEntry {
    pub fn to_bytes(&self) -> Vec<u8> {
        let mut buffer = Vec::new();
        buffer.extend_from_slice(&0u32.to_le_bytes());
        match self {
            JournalEntry::Begin(txn_id) => {
                buffer.push(TAG_BEGIN);
                buffer.extend_from_slice(&txn_id.to_le_bytes());
            }
            JournalEntry::Commit(txn_id) => {
                buffer.push(TAG_COMMIT);
                buffer.extend_from_slice(&txn_id.to_le_bytes());
            }
            JournalEntry::Abort(txn_id) => {
                buffer.push(TAG_ABORT);
                buffer.extend_from_slice(&txn_id.to_le_bytes());
            }
            JournalEntry::Write { page_index, bytes } => {
                buffer.push(TAG_WRITE);
                buffer.extend_from_slice(&page_index.to_le_bytes());
                buffer.extend_from_slice(&(bytes.len() as u32).to_le_bytes());
                buffer.extend_from_slice(bytes);
            }
            JournalEntry::Delete { page_index } => {
                buffer.push(TAG_DELETE);
                buffer.extend_from_slice(&page_index.to_le_bytes());
            }
        }
        let len = (buffer.len() - 4) as u32;
        buffer[0..4].copy_from_slice(&len.to_le_bytes());
        buffer
    }

    /// Decodes one record body (everything after the length prefix).
    /// Returns `None` for unknown kinds so readers can skip them.
    pub fn from_bytes(bytes: &[u8]) -> JournalResult<Option<Self>> {
        let Some((&tag, rest)) = bytes.split_first() else {
            return Err(JournalError::Corrupt("empty journal record".to_string()));
        };
        match tag {
            TAG_BEGIN | TAG_COMMIT | TAG_ABORT => {
                if rest.len() < 8 {
                    return Err(JournalError::Corrupt("marker record truncated".to_string()));
                }
                let txn_id = read_u64(&rest[..8]);
                Ok(Some(match tag {
                    TAG_BEGIN => JournalEntry::Begin(txn_id),
                    TAG_COMMIT => JournalEntry::Commit(txn_id),
                    _ => JournalEntry::Abort(txn_id),
                }))
            }
            TAG_WRITE => {
                if rest.len() < 12 {
                    return Err(JournalError::Corrupt("write record truncated".to_string()));
                }
                let page_index = read_u64(&rest[..8]);
                let byte_len = read_u32(&rest[8..12]) as usize;
                if rest.len() < 12 + byte_len {
                    return Err(JournalError::Corrupt("write bytes truncated".to_string()));
                }
                Ok(Some(JournalEntry::Write {
                    page_index,
                    bytes: rest[12..12 + byte_len].to_vec(),
                }))
            }
            TAG_DELETE => {
                if rest.len() < 8 {
                    return Err(JournalError::Corrupt("delete record truncated".to_string()));
                }
                Ok(Some(JournalEntry::Delete {
                    page_index: read_u64(&rest[..8]),
                }))
            }
            _ => Ok(None),
        }
    }
}

pub struct Journal {
    file: Mutex<File>,
    path: PathBuf,
}

impl Journal {
    pub fn open(path: impl AsRef<Path>) -> JournalResult<Self> {
        let file = OpenOptions::new()
            .create(true)
            .read(true)
            .write(true)
            .truncate(false)
            .open(&path)?;
        Ok(Self {
            file: Mutex::new(file),
            path: path.as_ref().to_path_buf(),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Appends one entry and syncs.
    pub fn append(&self, entry: &JournalEntry) -> JournalResult<()> {
        let mut file = self.file.lock();
        file.seek(SeekFrom::End(0))?;
        file.write_all(&entry.to_bytes())?;
        file.sync_data()?;
        Ok(())
    }

    pub fn begin(&self, txn_id: TxnId) -> JournalResult<()> {
        self.append(&JournalEntry::Begin(txn_id))
    }

    /// Makes the commit marker durable. The caller applies the buffered
    /// pages afterwards and then truncates.
    pub fn commit(&self, txn_id: TxnId) -> JournalResult<()> {
        self.append(&JournalEntry::Commit(txn_id))
    }

    pub fn abort(&self, txn_id: TxnId) -> JournalResult<()> {
        self.append(&JournalEntry::Abort(txn_id))
    }

    pub fn truncate(&self) -> JournalResult<()> {
        let file = self.file.lock();
        file.set_len(0)?;
        file.sync_data()?;
        Ok(())
    }

    /// Reads the decodable prefix of the log. Undecodable content ends the
    /// prefix: the remainder is treated as empty.
    pub fn entries(&self) -> JournalResult<Vec<JournalEntry>> {
        let mut file = self.file.lock();
        file.seek(SeekFrom::Start(0))?;
        let mut entries = Vec::new();
        loop {
            let mut len_bytes = [0u8; 4];
            match file.read_exact(&mut len_bytes) {
                Ok(()) => {}
                Err(err) if err.kind() == std::io::ErrorKind::UnexpectedEof => break,
                Err(err) => return Err(err.into()),
            }
            let len = u32::from_le_bytes(len_bytes) as usize;
            if len > MAX_RECORD_LEN {
                warn!("journal record length {} implausible, ignoring remainder", len);
                break;
            }
            let mut body = vec![0u8; len];
            if let Err(err) = file.read_exact(&mut body) {
                warn!("journal tail truncated ({}), ignoring remainder", err);
                break;
            }
            match JournalEntry::from_bytes(&body) {
                Ok(Some(entry)) => entries.push(entry),
                Ok(None) => {} // unknown kind, skipped
                Err(err) => {
                    warn!("journal record undecodable ({}), ignoring remainder", err);
                    break;
                }
            }
        }
        Ok(entries)
    }

    /// Replays committed transactions into the page store and truncates the
    /// log. Open-ended transactions are discarded. Returns the number of
    /// page operations applied.
    pub fn recover(&self, store: &PageStore) -> JournalResult<usize> {
        let entries = self.entries()?;
        let mut committed: Vec<JournalEntry> = Vec::new();
        let mut current: Option<(TxnId, Vec<JournalEntry>)> = None;

        for entry in entries {
            match entry {
                JournalEntry::Begin(txn_id) => {
                    if let Some((abandoned, _)) = current.replace((txn_id, Vec::new())) {
                        warn!("transaction {} reopened before completion, discarded", abandoned);
                    }
                }
                JournalEntry::Write { .. } | JournalEntry::Delete { .. } => {
                    if let Some((_, ops)) = current.as_mut() {
                        ops.push(entry);
                    }
                }
                JournalEntry::Commit(txn_id) => match current.take() {
                    Some((open_id, ops)) if open_id == txn_id => committed.extend(ops),
                    other => {
                        warn!("commit marker for {} without matching begin", txn_id);
                        current = other;
                    }
                },
                JournalEntry::Abort(txn_id) => {
                    if current.as_ref().is_some_and(|(open_id, _)| *open_id == txn_id) {
                        current = None;
                    }
                }
            }
        }

        let applied = committed.len();
        for op in committed {
            match op {
                JournalEntry::Write { page_index, bytes } => store.write(page_index, &bytes)?,
                JournalEntry::Delete { page_index } => store.delete(page_index)?,
                _ => unreachable!("only page ops are collected"),
            }
        }
        self.truncate()?;
        Ok(applied)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TxnState {
    Open,
    Committed,
    RolledBack,
}

/// In-process transaction: buffers page operations and defers them to commit.
///
/// Reads consult the buffer first, so a transaction observes its own writes.
/// Rollback discards the buffer without modifying the store.
pub struct TransactionContext {
    journal: Arc<Journal>,
    store: Arc<PageStore>,
    txn_id: TxnId,
    state: TxnState,
    ops: Vec<JournalEntry>,
}

impl TransactionContext {
    pub fn begin(
        journal: Arc<Journal>,
        store: Arc<PageStore>,
        txn_id: TxnId,
    ) -> JournalResult<Self> {
        journal.begin(txn_id)?;
        Ok(Self {
            journal,
            store,
            txn_id,
            state: TxnState::Open,
            ops: Vec::new(),
        })
    }

    pub fn txn_id(&self) -> TxnId {
        self.txn_id
    }

    pub fn state(&self) -> TxnState {
        self.state
    }

    fn ensure_open(&self) -> JournalResult<()> {
        if self.state != TxnState::Open {
            return Err(JournalError::AlreadyFinalized);
        }
        Ok(())
    }

    pub fn write(&mut self, page_index: PageIndex, bytes: Vec<u8>) -> JournalResult<()> {
        self.ensure_open()?;
        let entry = JournalEntry::Write { page_index, bytes };
        self.journal.append(&entry)?;
        self.ops.push(entry);
        Ok(())
    }

    pub fn delete(&mut self, page_index: PageIndex) -> JournalResult<()> {
        self.ensure_open()?;
        let entry = JournalEntry::Delete { page_index };
        self.journal.append(&entry)?;
        self.ops.push(entry);
        Ok(())
    }

    /// Returns the buffered value for the page if this transaction touched
    /// it, else delegates to the store.
    pub fn read(&self, page_index: PageIndex) -> JournalResult<Option<Vec<u8>>> {
        for op in self.ops.iter().rev() {
            match op {
                JournalEntry::Write { page_index: index, bytes } if *index == page_index => {
                    return Ok(Some(bytes.clone()));
                }
                JournalEntry::Delete { page_index: index } if *index == page_index => {
                    return Ok(None);
                }
                _ => {}
            }
        }
        Ok(self.store.read(page_index)?)
    }

    /// Appends the durable commit marker, applies buffered operations to the
    /// store in insertion order, then truncates the log.
    pub fn commit(&mut self) -> JournalResult<()> {
        self.ensure_open()?;
        self.journal.commit(self.txn_id)?;
        for op in &self.ops {
            match op {
                JournalEntry::Write { page_index, bytes } => {
                    self.store.write(*page_index, bytes)?;
                }
                JournalEntry::Delete { page_index } => self.store.delete(*page_index)?,
                _ => {}
            }
        }
        self.journal.truncate()?;
        self.state = TxnState::Committed;
        self.ops.clear();
        Ok(())
    }

    /// Discards buffered operations; the page file is left untouched.
    pub fn rollback(&mut self) -> JournalResult<()> {
        self.ensure_open()?;
        self.journal.abort(self.txn_id)?;
        self.journal.truncate()?;
        self.state = TxnState::RolledBack;
        self.ops.clear();
        Ok(())
    }
}

fn read_u64(bytes: &[u8]) -> u64 {
    let mut array = [0u8; 8];
    array.copy_from_slice(bytes);
    u64::from_le_bytes(array)
}

fn read_u32(bytes: &[u8]) -> u32 {
    let mut array = [0u8; 4];
    array.copy_from_slice(bytes);
    u32::from_le_bytes(array)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use std::path::PathBuf;

    struct TestContext {
        dir: PathBuf,
    }

    impl TestContext {
        fn new(test_name: &str) -> Self {
            let dir = std::env::temp_dir().join(format!(
                "blazedb_wal_{}_{}",
                test_name,
                std::process::id()
            ));
            let _ = fs::remove_dir_all(&dir);
            fs::create_dir_all(&dir).expect("create test dir");
            Self { dir }
        }

        fn journal_path(&self) -> PathBuf {
            self.dir.join("journal.wal")
        }

        fn store_path(&self) -> PathBuf {
            self.dir.join("pages.db")
        }
    }

    impl Drop for TestContext {
        fn drop(&mut self) {
            let _ = fs::remove_dir_all(&self.dir);
        }
    }

    #[test]
    fn entry_codec_round_trips() {
        let entries = vec![
            JournalEntry::Begin(7),
            JournalEntry::Write {
                page_index: 3,
                bytes: vec![1, 2, 3],
            },
            JournalEntry::Delete { page_index: 9 },
            JournalEntry::Commit(7),
            JournalEntry::Abort(8),
        ];
        for entry in entries {
            let bytes = entry.to_bytes();
            let len = u32::from_le_bytes(bytes[0..4].try_into().unwrap()) as usize;
            assert_eq!(len, bytes.len() - 4);
            assert_eq!(JournalEntry::from_bytes(&bytes[4..]).unwrap(), Some(entry));
        }
    }

    #[test]
    fn unknown_entry_kinds_are_skipped() {
        assert_eq!(JournalEntry::from_bytes(&[99, 0, 0]).unwrap(), None);
    }

    #[test]
    fn recover_applies_only_committed_transactions() {
        let ctx = TestContext::new("committed_only");
        let journal = Journal::open(ctx.journal_path()).unwrap();
        journal.begin(1).unwrap();
        journal
            .append(&JournalEntry::Write {
                page_index: 0,
                bytes: b"committed".to_vec(),
            })
            .unwrap();
        journal.commit(1).unwrap();
        journal.begin(2).unwrap();
        journal
            .append(&JournalEntry::Write {
                page_index: 1,
                bytes: b"dangling".to_vec(),
            })
            .unwrap();
        // No commit for transaction 2.

        let store = PageStore::open(ctx.store_path()).unwrap();
        let applied = journal.recover(&store).unwrap();
        assert_eq!(applied, 1);
        assert_eq!(store.read(0).unwrap(), Some(b"committed".to_vec()));
        assert_eq!(store.read(1).unwrap(), None);
    }

    #[test]
    fn recover_is_idempotent() {
        let ctx = TestContext::new("idempotent");
        let journal = Journal::open(ctx.journal_path()).unwrap();
        journal.begin(1).unwrap();
        journal
            .append(&JournalEntry::Write {
                page_index: 1,
                bytes: b"p1".to_vec(),
            })
            .unwrap();
        journal
            .append(&JournalEntry::Write {
                page_index: 2,
                bytes: b"p2".to_vec(),
            })
            .unwrap();
        journal.commit(1).unwrap();

        let store = PageStore::open(ctx.store_path()).unwrap();
        assert_eq!(journal.recover(&store).unwrap(), 2);
        assert_eq!(store.read(1).unwrap(), Some(b"p1".to_vec()));
        assert_eq!(store.read(2).unwrap(), Some(b"p2".to_vec()));

        assert_eq!(journal.recover(&store).unwrap(), 0);
        assert_eq!(store.read(1).unwrap(), Some(b"p1".to_vec()));
        assert_eq!(store.read(2).unwrap(), Some(b"p2".to_vec()));
    }

    #[test]
    fn recover_replays_deletes() {
        let ctx = TestContext::new("deletes");
        let store = PageStore::open(ctx.store_path()).unwrap();
        store.write(4, b"stale").unwrap();

        let journal = Journal::open(ctx.journal_path()).unwrap();
        journal.begin(1).unwrap();
        journal
            .append(&JournalEntry::Delete { page_index: 4 })
            .unwrap();
        journal.commit(1).unwrap();

        journal.recover(&store).unwrap();
        assert_eq!(store.read(4).unwrap(), None);
    }

    #[test]
    fn corrupt_log_is_treated_as_empty() {
        let ctx = TestContext::new("corrupt");
        fs::write(ctx.journal_path(), b"\xFF\xFF\xFF\xFFgarbage").unwrap();
        let journal = Journal::open(ctx.journal_path()).unwrap();
        let store = PageStore::open(ctx.store_path()).unwrap();
        assert_eq!(journal.recover(&store).unwrap(), 0);
    }

    #[test]
    fn corrupt_tail_keeps_decodable_prefix() {
        let ctx = TestContext::new("corrupt_tail");
        let journal = Journal::open(ctx.journal_path()).unwrap();
        journal.begin(1).unwrap();
        journal
            .append(&JournalEntry::Write {
                page_index: 0,
                bytes: b"good".to_vec(),
            })
            .unwrap();
        journal.commit(1).unwrap();
        drop(journal);
        let mut bytes = fs::read(ctx.journal_path()).unwrap();
        bytes.extend_from_slice(&[0x10, 0x00, 0x00, 0x00, 0x01]);
        fs::write(ctx.journal_path(), &bytes).unwrap();

        let journal = Journal::open(ctx.journal_path()).unwrap();
        let store = PageStore::open(ctx.store_path()).unwrap();
        assert_eq!(journal.recover(&store).unwrap(), 1);
        assert_eq!(store.read(0).unwrap(), Some(b"good".to_vec()));
    }

    #[test]
    fn context_reads_its_own_buffered_writes() {
        let ctx = TestContext::new("buffered_reads");
        let journal = Arc::new(Journal::open(ctx.journal_path()).unwrap());
        let store = Arc::new(PageStore::open(ctx.store_path()).unwrap());
        store.write(0, b"old").unwrap();

        let mut txn = TransactionContext::begin(journal, Arc::clone(&store), 1).unwrap();
        assert_eq!(txn.read(0).unwrap(), Some(b"old".to_vec()));
        txn.write(0, b"new".to_vec()).unwrap();
        assert_eq!(txn.read(0).unwrap(), Some(b"new".to_vec()));
        txn.delete(0).unwrap();
        assert_eq!(txn.read(0).unwrap(), None);

        // The store is untouched until commit.
        assert_eq!(store.read(0).unwrap(), Some(b"old".to_vec()));
        txn.commit().unwrap();
        assert_eq!(store.read(0).unwrap(), None);
    }

    #[test]
    fn commit_applies_in_insertion_order_and_truncates() {
        let ctx = TestContext::new("commit_order");
        let journal = Arc::new(Journal::open(ctx.journal_path()).unwrap());
        let store = Arc::new(PageStore::open(ctx.store_path()).unwrap());

        let mut txn =
            TransactionContext::begin(Arc::clone(&journal), Arc::clone(&store), 9).unwrap();
        txn.write(0, b"first".to_vec()).unwrap();
        txn.write(0, b"second".to_vec()).unwrap();
        txn.commit().unwrap();

        assert_eq!(store.read(0).unwrap(), Some(b"second".to_vec()));
        assert!(journal.entries().unwrap().is_empty());
    }

    #[test]
    fn rollback_leaves_the_store_untouched() {
        let ctx = TestContext::new("rollback");
        let journal = Arc::new(Journal::open(ctx.journal_path()).unwrap());
        let store = Arc::new(PageStore::open(ctx.store_path()).unwrap());
        store.write(2, b"keep").unwrap();

        let mut txn =
            TransactionContext::begin(Arc::clone(&journal), Arc::clone(&store), 3).unwrap();
        txn.write(2, b"discard".to_vec()).unwrap();
        txn.delete(2).unwrap();
        txn.rollback().unwrap();

        assert_eq!(store.read(2).unwrap(), Some(b"keep".to_vec()));
        assert!(journal.entries().unwrap().is_empty());
        // Nothing to replay either.
        assert_eq!(journal.recover(&store).unwrap(), 0);
        assert_eq!(store.read(2).unwrap(), Some(b"keep".to_vec()));
    }

    #[test]
    fn operations_after_finalize_fail() {
        let ctx = TestContext::new("finalized");
        let journal = Arc::new(Journal::open(ctx.journal_path()).unwrap());
        let store = Arc::new(PageStore::open(ctx.store_path()).unwrap());

        let mut txn =
            TransactionContext::begin(Arc::clone(&journal), Arc::clone(&store), 1).unwrap();
        txn.commit().unwrap();
        assert!(matches!(txn.commit(), Err(JournalError::AlreadyFinalized)));
        assert!(matches!(
            txn.rollback(),
            Err(JournalError::AlreadyFinalized)
        ));
        assert!(matches!(
            txn.write(0, vec![1]),
            Err(JournalError::AlreadyFinalized)
        ));

        let mut txn =
            TransactionContext::begin(Arc::clone(&journal), Arc::clone(&store), 2).unwrap();
        txn.rollback().unwrap();
        assert!(matches!(txn.commit(), Err(JournalError::AlreadyFinalized)));
    }
}
