use thiserror::Error;

/// Errors surfaced by the cold-store client layer.
#[non_exhaustive]
#[derive(Error, Debug)]
pub enum VaultClientError {
    /// The archive no longer exists at the source. Terminal for that archive.
    #[error("Archive not found: {0}")]
    ArchiveNotFound(String),

    /// The retrieval job id is unknown to the store, typically because a
    /// cached job expired between runs.
    #[error("Job not found: {0}")]
    JobNotFound(String),

    #[error("Transient service error: {0}")]
    TransientError(String),

    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    SerializationError(#[from] serde_json::Error),

    #[error("Internal error: {0}")]
    InternalError(String),
}

pub type Result<T> = std::result::Result<T, VaultClientError>;

impl VaultClientError {
    /// Whether retrying the same call can be expected to succeed.
    pub fn is_retryable(&self) -> bool {
        matches!(self, VaultClientError::TransientError(_))
    }
}
