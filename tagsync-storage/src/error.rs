//! Error types for the storage layer.

use tagsync_types::ItemId;
use thiserror::Error;

/// Result type for storage operations.
pub type StorageResult<T> = Result<T, StorageError>;

/// Errors that can occur in storage operations.
#[derive(Debug, Error)]
pub enum StorageError {
    /// Database error from SQLite.
    #[error("database error: {0}")]
    Database(#[from] rusqlite::Error),

    /// Serialization/deserialization error.
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// A lock guarding the backing store was poisoned.
    #[error("store lock poisoned")]
    Poisoned,
}

/// Rejections of a local save. No delta is recorded when one is returned.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ValidationError {
    /// The item id is empty or whitespace.
    #[error("item id is required")]
    EmptyId,

    /// An item with this id already exists.
    #[error("duplicate item id: {0}")]
    DuplicateId(ItemId),
}
