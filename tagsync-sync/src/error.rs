//! Error types for the sync layer.

use tagsync_storage::StorageError;
use thiserror::Error;

/// Result type for sync operations.
pub type SyncResult<T> = Result<T, SyncError>;

/// Errors that can occur in sync operations.
#[derive(Debug, Error)]
pub enum SyncError {
    /// Network error.
    #[error("network error: {0}")]
    Network(String),

    /// Protocol error (invalid message format).
    #[error("protocol error: {0}")]
    Protocol(String),

    /// A message with a `type` this build does not understand.
    #[error("unknown message type: {0}")]
    UnknownMessage(String),

    /// A connection descriptor that is missing, undecodable or structurally
    /// invalid.
    #[error("malformed connection descriptor: {0}")]
    MalformedDescriptor(String),

    /// Serialization error.
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Storage error.
    #[error("storage error: {0}")]
    Storage(String),

    /// Timeout.
    #[error("operation timed out")]
    Timeout,

    /// Channel closed.
    #[error("channel closed")]
    ChannelClosed,

    /// The operation is not valid in the current handshake state.
    #[error("invalid state: {0}")]
    InvalidState(String),

    /// The link cannot be recovered without a fresh descriptor exchange.
    #[error("connection lost; a new handshake is required")]
    NeedsNewHandshake,
}

impl From<StorageError> for SyncError {
    fn from(e: StorageError) -> Self {
        SyncError::Storage(e.to_string())
    }
}

impl From<std::io::Error> for SyncError {
    fn from(e: std::io::Error) -> Self {
        SyncError::Network(e.to_string())
    }
}
