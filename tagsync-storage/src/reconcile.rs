//! Reconciliation engine: folds remote deltas into local state.
//!
//! Pure state transformation with no I/O: given the materialized items, the
//! local delta log and a batch of remote deltas, produce the merged state.
//! The caller persists and rebuilds derived indices afterwards.
//!
//! Merge policy:
//! - tags and photos: set union for additions, set difference for removals
//! - `weight` / `destination`: overwritten whenever the delta carries a
//!   value, so within a batch the delta processed last wins

use crate::log::DeltaLog;
use std::collections::BTreeMap;
use tagsync_types::{Item, ItemAction, ItemDelta, ItemId};
use tracing::{debug, info};

/// What happened to each delta of a batch.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ApplyReport {
    /// Deltas appended to the log.
    pub applied: usize,
    /// Deltas skipped because the log already had them.
    pub duplicates: usize,
    /// Items materialized by an `Add`.
    pub created: usize,
    /// Existing items merged with an `Add` or `Update`.
    pub updated: usize,
    /// Items deleted by a `Remove`.
    pub removed: usize,
    /// Deltas logged without touching materialized state (remove of a
    /// missing item, update of an item never seen).
    pub ignored: usize,
}

impl ApplyReport {
    /// Whether the batch changed the materialized item set.
    pub fn changed_items(&self) -> bool {
        self.created + self.updated + self.removed > 0
    }
}

/// Effect of a single delta on the materialized set.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeltaEffect {
    Created,
    Updated,
    Removed,
    Ignored,
}

/// Applies remote delta batches to a replica.
#[derive(Debug, Clone, Copy, Default)]
pub struct ReconciliationEngine;

impl ReconciliationEngine {
    pub fn new() -> Self {
        Self
    }

    /// Applies a batch of remote deltas.
    ///
    /// Deltas whose `(item id, device id, time)` is already in `log` are
    /// skipped, which makes applying the same batch twice a no-op. Every
    /// other delta is appended to `log` whether or not it changed an item,
    /// so this replica can relay it onward.
    pub fn apply_remote<I>(
        &self,
        items: &mut BTreeMap<ItemId, Item>,
        log: &mut DeltaLog,
        deltas: I,
    ) -> ApplyReport
    where
        I: IntoIterator<Item = ItemDelta>,
    {
        let mut report = ApplyReport::default();

        for delta in deltas {
            if log.contains(&delta.dedup_key()) {
                report.duplicates += 1;
                continue;
            }

            match self.apply_delta(items, &delta) {
                DeltaEffect::Created => report.created += 1,
                DeltaEffect::Updated => report.updated += 1,
                DeltaEffect::Removed => report.removed += 1,
                DeltaEffect::Ignored => report.ignored += 1,
            }

            log.append(delta);
            report.applied += 1;
        }

        info!(
            "Reconciled batch: {} applied, {} duplicate, {} created, {} updated, {} removed",
            report.applied, report.duplicates, report.created, report.updated, report.removed
        );
        report
    }

    /// Applies one delta to the materialized items without touching the log.
    pub fn apply_delta(&self, items: &mut BTreeMap<ItemId, Item>, delta: &ItemDelta) -> DeltaEffect {
        match delta.action {
            ItemAction::Remove => {
                if items.remove(&delta.item_id).is_some() {
                    debug!("Removed item {} (from {})", delta.item_id, delta.device_id);
                    DeltaEffect::Removed
                } else {
                    debug!("Remove of missing item {} ignored", delta.item_id);
                    DeltaEffect::Ignored
                }
            }
            ItemAction::Add | ItemAction::Update => match items.get_mut(&delta.item_id) {
                Some(existing) => {
                    merge_into(existing, delta);
                    debug!("Merged delta into item {}", delta.item_id);
                    DeltaEffect::Updated
                }
                None if delta.action == ItemAction::Add => {
                    items.insert(delta.item_id.clone(), materialize(delta));
                    debug!("Created item {} from remote add", delta.item_id);
                    DeltaEffect::Created
                }
                None => {
                    debug!("Update for unknown item {} ignored", delta.item_id);
                    DeltaEffect::Ignored
                }
            },
        }
    }
}

fn materialize(delta: &ItemDelta) -> Item {
    let mut item = Item::new(delta.item_id.clone());
    union_into(&mut item.item_tags, &delta.item_tags_added);
    union_into(&mut item.checklist_tags, &delta.checklist_tags_added);
    union_into(&mut item.photos, &delta.photos_added);
    item.weight = delta.weight;
    item.destination = delta.destination;
    item
}

fn merge_into(item: &mut Item, delta: &ItemDelta) {
    union_into(&mut item.item_tags, &delta.item_tags_added);
    subtract(&mut item.item_tags, &delta.item_tags_removed);
    union_into(&mut item.checklist_tags, &delta.checklist_tags_added);
    subtract(&mut item.checklist_tags, &delta.checklist_tags_removed);
    union_into(&mut item.photos, &delta.photos_added);
    subtract(&mut item.photos, &delta.photos_removed);
    if let Some(weight) = delta.weight {
        item.weight = Some(weight);
    }
    if let Some(destination) = delta.destination {
        item.destination = Some(destination);
    }
}

/// Appends values not yet present, preserving order.
fn union_into<T: PartialEq + Clone>(target: &mut Vec<T>, added: &[T]) {
    for value in added {
        if !target.contains(value) {
            target.push(value.clone());
        }
    }
}

fn subtract<T: PartialEq>(target: &mut Vec<T>, removed: &[T]) {
    if !removed.is_empty() {
        target.retain(|v| !removed.contains(v));
    }
}
