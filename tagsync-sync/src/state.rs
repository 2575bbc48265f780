//! Sync state tracking.
//!
//! Holds this installation's device id and the watermark table: for each
//! peer device, the time up to which that peer's deltas have been merged.
//! Both are persisted through the injected key-value store.

use crate::error::SyncResult;
use std::collections::BTreeMap;
use std::sync::Arc;
use tagsync_storage::{load_json, store_json, KeyValueStore, StorageError};
use tagsync_types::{DeviceId, Timestamp};
use tracing::{debug, info, warn};

/// Key holding the local device id (raw string).
pub const DEVICE_ID_KEY: &str = "deviceId";
/// Key holding the watermark table (JSON object of device id to timestamp).
pub const WATERMARKS_KEY: &str = "lastSync";

/// Device identity plus per-peer watermarks.
pub struct SyncState {
    device_id: DeviceId,
    watermarks: BTreeMap<DeviceId, Timestamp>,
    kv: Arc<dyn KeyValueStore>,
}

impl std::fmt::Debug for SyncState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SyncState")
            .field("device_id", &self.device_id)
            .field("watermarks", &self.watermarks)
            .finish()
    }
}

impl SyncState {
    /// Loads state from the store, generating and persisting a device id on
    /// first use. A corrupt watermark table is discarded.
    pub fn load(kv: Arc<dyn KeyValueStore>) -> SyncResult<Self> {
        let device_id = match kv.get(DEVICE_ID_KEY)? {
            Some(id) if !id.trim().is_empty() => DeviceId::new(id),
            _ => {
                let id = DeviceId::generate();
                kv.set(DEVICE_ID_KEY, id.as_str())?;
                info!("Generated device id {}", id);
                id
            }
        };

        let watermarks = match load_json::<BTreeMap<DeviceId, Timestamp>>(kv.as_ref(), WATERMARKS_KEY) {
            Ok(table) => table.unwrap_or_default(),
            Err(StorageError::Serialization(e)) => {
                warn!("Discarding corrupt watermark table: {}", e);
                BTreeMap::new()
            }
            Err(e) => return Err(e.into()),
        };

        debug!("Loaded sync state for {} with {} peers", device_id, watermarks.len());
        Ok(Self {
            device_id,
            watermarks,
            kv,
        })
    }

    /// This installation's device id.
    pub fn device_id(&self) -> &DeviceId {
        &self.device_id
    }

    /// The watermark for `peer`, if it was ever seen.
    pub fn watermark(&self, peer: &DeviceId) -> Option<Timestamp> {
        self.watermarks.get(peer).copied()
    }

    /// Records first contact with `peer` at the epoch watermark, so the
    /// first exchange covers its full history. Returns whether it was new.
    pub fn ensure_peer(&mut self, peer: &DeviceId) -> bool {
        if self.watermarks.contains_key(peer) {
            return false;
        }
        self.watermarks.insert(peer.clone(), Timestamp::EPOCH);
        self.persist();
        info!("First contact with {}", peer);
        true
    }

    /// Moves the watermark for `peer` forward to `time`. Earlier values are
    /// ignored. Returns whether the watermark moved.
    pub fn advance(&mut self, peer: &DeviceId, time: Timestamp) -> bool {
        let current = self.watermarks.entry(peer.clone()).or_insert(Timestamp::EPOCH);
        if time <= *current {
            debug!("Ignoring watermark {} for {} (at {})", time, peer, current);
            return false;
        }
        *current = time;
        self.persist();
        debug!("Watermark for {} advanced to {}", peer, time);
        true
    }

    /// Every known peer and its watermark.
    pub fn peers(&self) -> &BTreeMap<DeviceId, Timestamp> {
        &self.watermarks
    }

    /// Forgets every peer. The device id is kept.
    pub fn reset(&mut self) -> SyncResult<()> {
        self.watermarks.clear();
        self.kv.remove(WATERMARKS_KEY)?;
        info!("Sync state reset");
        Ok(())
    }

    fn persist(&self) {
        if let Err(e) = store_json(self.kv.as_ref(), WATERMARKS_KEY, &self.watermarks) {
            warn!("Failed to persist watermarks: {}", e);
        }
    }
}
