use thiserror::Error;
use uuid::Uuid;

use storage::StorageError;
use wal::JournalError;

#[derive(Debug, Error)]
pub enum DbError {
    #[error("record {0} not found")]
    NotFound(Uuid),
    #[error("record {0} already exists")]
    AlreadyExists(Uuid),
    #[error("database {0} is not mounted")]
    NotMounted(String),
    #[error("database file is bound to a different key")]
    KeyMismatch,
    #[error("password must be at least {min} characters")]
    PasswordTooWeak { min: usize },
    #[error("a transaction is already in progress")]
    TransactionInProgress,
    #[error("no transaction is in progress")]
    NoTransaction,
    #[error("update aborted by injected fault")]
    FaultInjected,
    #[error("integrity check failed: {0}")]
    Integrity(String),
    #[error("document codec error: {0}")]
    Codec(#[from] serde_json::Error),
    #[error(transparent)]
    Storage(#[from] StorageError),
    #[error(transparent)]
    Journal(#[from] JournalError),
    #[error("db io error: {0}")]
    Io(#[from] std::io::Error),
}

pub type DbResult<T> = Result<T, DbError>;
