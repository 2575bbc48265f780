//! Core type definitions for TagSync.
//!
//! This crate defines the fundamental types shared by every other crate:
//! - Device, item and photo identifiers
//! - Millisecond-precision timestamps used for delta ordering and watermarks
//! - The materialized `Item` and the immutable `ItemDelta` change record
//!
//! Items are never mutated directly. Every change is expressed as an
//! `ItemDelta`, and the materialized item set is a fold over the delta log.

mod delta;
mod ids;
mod item;
mod timestamp;

pub use delta::{DedupKey, ItemAction, ItemDelta};
pub use ids::{DeviceId, ItemId, PhotoId};
pub use item::{Destination, Item};
pub use timestamp::Timestamp;

/// Result type alias using the crate's error type.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur in type operations.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("invalid timestamp: {0}")]
    InvalidTimestamp(String),
}
