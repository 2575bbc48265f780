//! The append-only delta log.

use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use tagsync_types::{DedupKey, DeviceId, ItemDelta, Timestamp};

/// Ordered, append-only list of deltas with a dedup index.
///
/// Holds both locally originated deltas and deltas merged from peers.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(from = "Vec<ItemDelta>", into = "Vec<ItemDelta>")]
pub struct DeltaLog {
    entries: Vec<ItemDelta>,
    seen: HashSet<DedupKey>,
}

impl DeltaLog {
    /// Creates an empty log.
    pub fn new() -> Self {
        Self::default()
    }

    /// Whether a delta with this key was already appended.
    pub fn contains(&self, key: &DedupKey) -> bool {
        self.seen.contains(key)
    }

    /// Appends a delta. Returns `false` (and leaves the log untouched) if a
    /// delta with the same dedup key is already present.
    pub fn append(&mut self, delta: ItemDelta) -> bool {
        if !self.seen.insert(delta.dedup_key()) {
            return false;
        }
        self.entries.push(delta);
        true
    }

    /// All deltas in append order.
    pub fn entries(&self) -> &[ItemDelta] {
        &self.entries
    }

    /// Deltas with `time > since`, sorted by `(time, device id)`.
    pub fn since(&self, since: Timestamp) -> Vec<ItemDelta> {
        let mut out: Vec<ItemDelta> = self
            .entries
            .iter()
            .filter(|d| d.time > since)
            .cloned()
            .collect();
        out.sort_by(|a, b| a.time.cmp(&b.time).then_with(|| a.device_id.cmp(&b.device_id)));
        out
    }

    /// Latest timestamp among deltas originated by `device`.
    pub fn latest_from(&self, device: &DeviceId) -> Option<Timestamp> {
        self.entries
            .iter()
            .filter(|d| &d.device_id == device)
            .map(|d| d.time)
            .max()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn clear(&mut self) {
        self.entries.clear();
        self.seen.clear();
    }
}

impl From<Vec<ItemDelta>> for DeltaLog {
    fn from(deltas: Vec<ItemDelta>) -> Self {
        let mut log = Self::new();
        for delta in deltas {
            log.append(delta);
        }
        log
    }
}

impl From<DeltaLog> for Vec<ItemDelta> {
    fn from(log: DeltaLog) -> Self {
        log.entries
    }
}
