use anyhow::anyhow;
use thiserror::Error;
use tokio::task::JoinError;

#[non_exhaustive]
#[derive(Error, Debug)]
pub enum ChunkStoreError {
    #[error("IO Error: {0}")]
    IOError(#[from] std::io::Error),

    #[error("Invalid path component: {0}")]
    InvalidName(String),

    #[error("Missing chunk {ordinal} for {filename}")]
    MissingChunk { filename: String, ordinal: u32 },

    #[error("Reassembled size {actual} does not match declared size {expected}")]
    SizeMismatch { expected: u64, actual: u64 },

    #[error("Other Internal Error: {0}")]
    InternalError(#[from] anyhow::Error),
}

pub type Result<T> = std::result::Result<T, ChunkStoreError>;

impl From<JoinError> for ChunkStoreError {
    fn from(value: JoinError) -> Self {
        ChunkStoreError::InternalError(anyhow!("{value:?}"))
    }
}
