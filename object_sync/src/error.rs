use anyhow::anyhow;
use thiserror::Error;
use tokio::task::JoinError;

#[non_exhaustive]
#[derive(Error, Debug)]
pub enum SyncError {
    #[error("IO Error: {0}")]
    IOError(#[from] std::io::Error),

    #[error("Integrity Error: {0}")]
    Integrity(#[from] integrity::IntegrityError),

    #[error("Remote hash {remote} does not match local digest of {object}")]
    IntegrityMismatch { object: String, remote: String },

    #[error("Remote transfer failed: {0}")]
    RemoteTransferFailure(String),

    #[error("Operation not supported by this store: {0}")]
    Unsupported(&'static str),

    #[error("Other Internal Error: {0}")]
    InternalError(#[from] anyhow::Error),
}

pub type Result<T> = std::result::Result<T, SyncError>;

impl SyncError {
    /// Whether the dispatcher may re-run the whole job. Integrity failures
    /// are terminal for the attempt and need an operator.
    pub fn is_retryable(&self) -> bool {
        matches!(self, SyncError::RemoteTransferFailure(_) | SyncError::IOError(_))
    }
}

impl From<JoinError> for SyncError {
    fn from(value: JoinError) -> Self {
        SyncError::InternalError(anyhow!("{value:?}"))
    }
}
