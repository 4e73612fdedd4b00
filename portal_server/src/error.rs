use anyhow::anyhow;
use thiserror::Error;
use tokio::task::JoinError;

use crate::registry::RegistryError;

#[non_exhaustive]
#[derive(Error, Debug)]
pub enum PortalError {
    #[error("Chunk Store Error: {0}")]
    ChunkStore(#[from] chunk_store::ChunkStoreError),

    #[error("Integrity Error: {0}")]
    Integrity(#[from] integrity::IntegrityError),

    #[error("Sample Match Error: {0}")]
    Match(#[from] sample_match::MatchError),

    #[error("Registry Error: {0}")]
    Registry(#[from] RegistryError),

    #[error("Sync Error: {0}")]
    Sync(#[from] object_sync::SyncError),

    #[error("IO Error: {0}")]
    IOError(#[from] std::io::Error),

    #[error("Other Internal Error: {0}")]
    InternalError(#[from] anyhow::Error),
}

pub type Result<T> = std::result::Result<T, PortalError>;

impl From<JoinError> for PortalError {
    fn from(value: JoinError) -> Self {
        PortalError::InternalError(anyhow!("{value:?}"))
    }
}
