use mapping_store::MappingStoreError;
use thiserror::Error;
use vault_client::VaultClientError;

/// Errors that abort a restore run. Missing archives and stale job ids never
/// surface here; the download loop absorbs those and carries on.
#[non_exhaustive]
#[derive(Error, Debug)]
pub enum RestoreError {
    #[error("Cold store error: {0}")]
    VaultClient(#[from] VaultClientError),

    #[error("Mapping store error: {0}")]
    MappingStore(#[from] MappingStoreError),

    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),

    #[error("Invalid inventory document: {0}")]
    InvalidInventory(String),

    #[error("Internal error: {0}")]
    InternalError(String),
}

pub type Result<T> = std::result::Result<T, RestoreError>;
