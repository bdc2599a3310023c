use thiserror::Error;

#[derive(Debug, Error)]
pub enum StorageError {
    #[error("storage io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("payload of {size} bytes exceeds page capacity of {max}")]
    PayloadTooLarge { size: usize, max: usize },
    #[error("page {index} has an invalid header")]
    InvalidHeader { index: u64 },
}

pub type StorageResult<T> = Result<T, StorageError>;
