//! Storage layer for TagSync.
//!
//! Provides the local replica of the inventory:
//! - `DeltaStore`: append-only delta log plus the materialized item set
//! - `ReconciliationEngine`: idempotent merge of remote delta batches
//! - `KeyValueStore`: the injected persistence capability, with in-memory
//!   and SQLite implementations
//!
//! # Example
//!
//! ```
//! use std::sync::Arc;
//! use tagsync_storage::{DeltaStore, MemoryKv};
//! use tagsync_types::{DeviceId, Item};
//!
//! let mut store = DeltaStore::open(DeviceId::generate(), Arc::new(MemoryKv::new())).unwrap();
//! store.save(Item::new("X1").with_checklist_tags(["ready"])).unwrap();
//! assert_eq!(store.deltas().len(), 1);
//! ```

mod delta_store;
mod error;
pub mod kv;
mod log;
pub mod reconcile;
mod tag_index;

pub use delta_store::{DeltaStore, ItemRepository, DELTAS_KEY, ITEMS_KEY};
pub use error::{StorageError, StorageResult, ValidationError};
pub use kv::{load_json, store_json, KeyValueStore, MemoryKv, SqliteKv};
pub use log::DeltaLog;
pub use reconcile::{ApplyReport, DeltaEffect, ReconciliationEngine};
pub use tag_index::TagIndex;
