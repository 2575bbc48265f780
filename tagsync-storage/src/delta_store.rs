//! The item repository: append-only delta log plus materialized items.
//!
//! Every local mutation is diffed against the previous record and recorded
//! as an `ItemDelta` before the materialized item changes. Remote batches go
//! through the `ReconciliationEngine`.

use crate::error::{StorageResult, ValidationError};
use crate::kv::{load_json, store_json, KeyValueStore};
use crate::log::DeltaLog;
use crate::reconcile::{ApplyReport, ReconciliationEngine};
use crate::tag_index::TagIndex;
use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;
use tagsync_types::{DeviceId, Item, ItemAction, ItemDelta, ItemId, Timestamp};
use tokio::sync::watch;
use tracing::{debug, info, warn};

/// Key holding the materialized items.
pub const ITEMS_KEY: &str = "items";
/// Key holding the delta log.
pub const DELTAS_KEY: &str = "itemDeltas";

/// Collaborator interface the sync layer needs from an item store.
pub trait ItemRepository: Send {
    /// All known deltas (local and merged) with `time > since`.
    fn deltas_since(&self, since: Timestamp) -> Vec<ItemDelta>;

    /// Merges a batch of remote deltas.
    fn apply_remote_deltas(&mut self, deltas: Vec<ItemDelta>) -> ApplyReport;

    /// Devices that originated at least one known delta.
    fn known_devices(&self) -> BTreeSet<DeviceId>;

    /// Number of deltas originated by `device` after `since`.
    fn changes_since_by(&self, device: &DeviceId, since: Timestamp) -> usize;

    /// Number of photos added by `device` after `since`.
    fn photos_added_since_by(&self, device: &DeviceId, since: Timestamp) -> usize;

    /// Revision counter bumped after every local save or remove. Merged
    /// remote deltas do not bump it.
    fn subscribe_changes(&self) -> watch::Receiver<u64>;
}

/// Local replica of the inventory.
pub struct DeltaStore {
    device_id: DeviceId,
    kv: Arc<dyn KeyValueStore>,
    items: BTreeMap<ItemId, Item>,
    log: DeltaLog,
    tags: TagIndex,
    last_local: Option<Timestamp>,
    engine: ReconciliationEngine,
    changes: watch::Sender<u64>,
}

impl std::fmt::Debug for DeltaStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DeltaStore")
            .field("device_id", &self.device_id)
            .field("items", &self.items.len())
            .field("deltas", &self.log.len())
            .field("revision", &*self.changes.borrow())
            .finish_non_exhaustive()
    }
}

impl DeltaStore {
    /// Opens the store, loading any persisted items and deltas.
    ///
    /// A corrupt persisted payload is logged and treated as empty rather
    /// than failing startup.
    pub fn open(device_id: DeviceId, kv: Arc<dyn KeyValueStore>) -> StorageResult<Self> {
        let items: Vec<Item> = load_or_empty(kv.as_ref(), ITEMS_KEY)?;
        let log: DeltaLog = load_or_empty(kv.as_ref(), DELTAS_KEY)?;

        let items: BTreeMap<ItemId, Item> = items.into_iter().map(|i| (i.id.clone(), i)).collect();
        let last_local = log.latest_from(&device_id);
        let tags = TagIndex::build(&items);

        info!(
            "Opened delta store for {}: {} items, {} deltas",
            device_id,
            items.len(),
            log.len()
        );

        Ok(Self {
            device_id,
            kv,
            items,
            log,
            tags,
            last_local,
            engine: ReconciliationEngine::new(),
            changes: watch::channel(0).0,
        })
    }

    /// The local device id stamped on new deltas.
    pub fn device_id(&self) -> &DeviceId {
        &self.device_id
    }

    /// Looks up a materialized item.
    pub fn item(&self, id: &ItemId) -> Option<&Item> {
        self.items.get(id)
    }

    /// All materialized items, ordered by id.
    pub fn items(&self) -> impl Iterator<Item = &Item> {
        self.items.values()
    }

    pub fn item_count(&self) -> usize {
        self.items.len()
    }

    /// The full delta log in append order.
    pub fn deltas(&self) -> &[ItemDelta] {
        self.log.entries()
    }

    /// Distinct tags for autocompletion.
    pub fn tag_index(&self) -> &TagIndex {
        &self.tags
    }

    // ── Local mutations ──────────────────────────────────────────

    /// Creates a new item. Fails if the id is blank or already taken.
    pub fn create(&mut self, item: Item) -> Result<ItemDelta, ValidationError> {
        if self.items.contains_key(&item.id) {
            return Err(ValidationError::DuplicateId(item.id));
        }
        self.save(item)
    }

    /// Creates or updates an item, recording the difference as a delta.
    pub fn save(&mut self, item: Item) -> Result<ItemDelta, ValidationError> {
        if item.id.is_blank() {
            return Err(ValidationError::EmptyId);
        }

        // Normalise list fields into ordered sets.
        let mut normalized = Item::new(item.id.clone())
            .with_item_tags(item.item_tags)
            .with_checklist_tags(item.checklist_tags)
            .with_photos(item.photos);
        normalized.weight = item.weight;
        normalized.destination = item.destination;
        let item = normalized;

        let time = self.next_local_time();
        let delta = match self.items.get(&item.id) {
            Some(prev) => diff(prev, &item, time, self.device_id.clone()),
            None => ItemDelta {
                item_tags_added: item.item_tags.clone(),
                checklist_tags_added: item.checklist_tags.clone(),
                photos_added: item.photos.clone(),
                weight: item.weight,
                destination: item.destination,
                ..ItemDelta::new(time, item.id.clone(), ItemAction::Add, self.device_id.clone())
            },
        };

        debug!("Recording {:?} delta for item {}", delta.action, item.id);
        self.items.insert(item.id.clone(), item);
        self.log.append(delta.clone());
        self.after_mutation();
        self.notify_local_change();
        Ok(delta)
    }

    /// Removes an item, recording a delta that carries its final state.
    /// Returns `None` if the item does not exist.
    pub fn remove(&mut self, id: &ItemId) -> Option<ItemDelta> {
        let item = self.items.remove(id)?;
        let time = self.next_local_time();
        let delta = ItemDelta {
            item_tags_removed: item.item_tags,
            checklist_tags_removed: item.checklist_tags,
            photos_removed: item.photos,
            weight: item.weight,
            destination: item.destination,
            ..ItemDelta::new(time, id.clone(), ItemAction::Remove, self.device_id.clone())
        };

        debug!("Recording remove delta for item {}", id);
        self.log.append(delta.clone());
        self.after_mutation();
        self.notify_local_change();
        Some(delta)
    }

    /// Deletes every item and delta, locally and in the backing store.
    pub fn reset(&mut self) -> StorageResult<()> {
        self.items.clear();
        self.log.clear();
        self.tags = TagIndex::default();
        self.last_local = None;
        self.kv.remove(ITEMS_KEY)?;
        self.kv.remove(DELTAS_KEY)?;
        info!("Delta store reset");
        Ok(())
    }

    /// Watches the local revision counter.
    pub fn subscribe_changes(&self) -> watch::Receiver<u64> {
        self.changes.subscribe()
    }

    // ── Queries ──────────────────────────────────────────────────

    /// Deltas with `time > since`, sorted by `(time, device id)`.
    pub fn deltas_since(&self, since: Timestamp) -> Vec<ItemDelta> {
        self.log.since(since)
    }

    /// Devices that originated at least one known delta.
    pub fn known_devices(&self) -> BTreeSet<DeviceId> {
        self.log.entries().iter().map(|d| d.device_id.clone()).collect()
    }

    /// Number of deltas originated by `device` after `since`.
    pub fn changes_since_by(&self, device: &DeviceId, since: Timestamp) -> usize {
        self.log
            .entries()
            .iter()
            .filter(|d| &d.device_id == device && d.time > since)
            .count()
    }

    /// Number of photos added by `device` after `since`.
    pub fn photos_added_since_by(&self, device: &DeviceId, since: Timestamp) -> usize {
        self.log
            .entries()
            .iter()
            .filter(|d| &d.device_id == device && d.time > since)
            .map(|d| d.photos_added.len())
            .sum()
    }

    // ── Remote merge ─────────────────────────────────────────────

    /// Merges remote deltas, then rebuilds the tag index and persists.
    pub fn apply_remote_deltas(&mut self, deltas: Vec<ItemDelta>) -> ApplyReport {
        let report = self.engine.apply_remote(&mut self.items, &mut self.log, deltas);
        if report.applied > 0 {
            self.after_mutation();
        }
        report
    }

    // ── Internals ────────────────────────────────────────────────

    fn next_local_time(&mut self) -> Timestamp {
        let time = Timestamp::after(self.last_local);
        self.last_local = Some(time);
        time
    }

    fn after_mutation(&mut self) {
        self.tags = TagIndex::build(&self.items);
        if let Err(e) = self.persist() {
            warn!("Failed to persist delta store: {}", e);
        }
    }

    fn notify_local_change(&self) {
        self.changes.send_modify(|revision| *revision += 1);
    }

    fn persist(&self) -> StorageResult<()> {
        let items: Vec<&Item> = self.items.values().collect();
        store_json(self.kv.as_ref(), ITEMS_KEY, &items)?;
        store_json(self.kv.as_ref(), DELTAS_KEY, self.log.entries())?;
        Ok(())
    }
}

impl ItemRepository for DeltaStore {
    fn deltas_since(&self, since: Timestamp) -> Vec<ItemDelta> {
        DeltaStore::deltas_since(self, since)
    }

    fn apply_remote_deltas(&mut self, deltas: Vec<ItemDelta>) -> ApplyReport {
        DeltaStore::apply_remote_deltas(self, deltas)
    }

    fn known_devices(&self) -> BTreeSet<DeviceId> {
        DeltaStore::known_devices(self)
    }

    fn changes_since_by(&self, device: &DeviceId, since: Timestamp) -> usize {
        DeltaStore::changes_since_by(self, device, since)
    }

    fn photos_added_since_by(&self, device: &DeviceId, since: Timestamp) -> usize {
        DeltaStore::photos_added_since_by(self, device, since)
    }

    fn subscribe_changes(&self) -> watch::Receiver<u64> {
        DeltaStore::subscribe_changes(self)
    }
}

/// Diffs two versions of an item into an `Update` delta.
fn diff(prev: &Item, next: &Item, time: Timestamp, device_id: DeviceId) -> ItemDelta {
    ItemDelta {
        item_tags_added: minus(&next.item_tags, &prev.item_tags),
        item_tags_removed: minus(&prev.item_tags, &next.item_tags),
        checklist_tags_added: minus(&next.checklist_tags, &prev.checklist_tags),
        checklist_tags_removed: minus(&prev.checklist_tags, &next.checklist_tags),
        photos_added: minus(&next.photos, &prev.photos),
        photos_removed: minus(&prev.photos, &next.photos),
        weight: next.weight,
        destination: next.destination,
        ..ItemDelta::new(time, next.id.clone(), ItemAction::Update, device_id)
    }
}

fn minus<T: PartialEq + Clone>(a: &[T], b: &[T]) -> Vec<T> {
    a.iter().filter(|v| !b.contains(v)).cloned().collect()
}

fn load_or_empty<T>(kv: &dyn KeyValueStore, key: &str) -> StorageResult<T>
where
    T: serde::de::DeserializeOwned + Default,
{
    match load_json(kv, key) {
        Ok(value) => Ok(value.unwrap_or_default()),
        Err(crate::StorageError::Serialization(e)) => {
            warn!("Discarding corrupt `{}` payload: {}", key, e);
            Ok(T::default())
        }
        Err(e) => Err(e),
    }
}
