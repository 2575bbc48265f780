//! Photo blob storage for TagSync.
//!
//! Items reference photos by `PhotoId`; the bytes live here. Photos are
//! replicated separately from item deltas, one `Blob` per message.

mod blob;
mod error;
mod store;

pub use blob::Blob;
pub use error::{BlobStoreError, BlobStoreResult};
pub use store::{BlobMetadata, BlobStore};

use tagsync_types::PhotoId;

/// Collaborator interface the sync layer needs from a photo store.
pub trait BlobRepository: Send + Sync {
    /// Bytes for a photo, or `None` if it is not stored locally.
    fn get_blob_data(&self, id: &PhotoId) -> Option<Vec<u8>>;

    /// Stores received photos, skipping ids already present. Returns how
    /// many were newly stored.
    fn import_blobs(&self, blobs: Vec<Blob>) -> usize;
}
