use thiserror::Error;

#[non_exhaustive]
#[derive(Error, Debug)]
pub enum MappingStoreError {
    #[error("Mapping database error: {0}")]
    Database(#[from] rusqlite::Error),

    #[error("Invalid filter pattern: {0}")]
    InvalidPattern(String),
}

pub type Result<T> = std::result::Result<T, MappingStoreError>;
