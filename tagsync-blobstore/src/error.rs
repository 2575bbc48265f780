use thiserror::Error;

pub type BlobStoreResult<T> = Result<T, BlobStoreError>;

#[derive(Debug, Error)]
pub enum BlobStoreError {
    #[error("blob not found: {0}")]
    NotFound(String),

    #[error("storage error: {0}")]
    Storage(String),
}

impl From<rusqlite::Error> for BlobStoreError {
    fn from(e: rusqlite::Error) -> Self {
        BlobStoreError::Storage(e.to_string())
    }
}
