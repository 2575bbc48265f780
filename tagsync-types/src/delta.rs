//! Item deltas: the unit of replication.
//!
//! A delta records only what changed in one mutation of one item. Deltas
//! are immutable once appended to a log; a replica's materialized items are
//! a fold over its log.

use crate::{Destination, DeviceId, ItemId, PhotoId, Timestamp};
use serde::{Deserialize, Serialize};

/// The kind of mutation a delta records.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ItemAction {
    Add,
    Update,
    Remove,
}

/// Identity of a delta across replicas: `(item id, origin device, time)`.
pub type DedupKey = (ItemId, DeviceId, Timestamp);

/// An immutable change record for one item.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ItemDelta {
    /// When the mutation happened on the origin device.
    pub time: Timestamp,
    /// The item the mutation applies to.
    pub item_id: ItemId,
    pub action: ItemAction,
    /// The device that originated the mutation.
    pub device_id: DeviceId,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub item_tags_added: Vec<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub item_tags_removed: Vec<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub checklist_tags_added: Vec<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub checklist_tags_removed: Vec<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub photos_added: Vec<PhotoId>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub photos_removed: Vec<PhotoId>,

    /// New weight, present only when the mutation carried one.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub weight: Option<f64>,
    /// New destination, present only when the mutation carried one.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub destination: Option<Destination>,
}

impl ItemDelta {
    /// Creates a delta with no field changes.
    #[must_use]
    pub fn new(
        time: Timestamp,
        item_id: impl Into<ItemId>,
        action: ItemAction,
        device_id: DeviceId,
    ) -> Self {
        Self {
            time,
            item_id: item_id.into(),
            action,
            device_id,
            item_tags_added: Vec::new(),
            item_tags_removed: Vec::new(),
            checklist_tags_added: Vec::new(),
            checklist_tags_removed: Vec::new(),
            photos_added: Vec::new(),
            photos_removed: Vec::new(),
            weight: None,
            destination: None,
        }
    }

    /// The key used to recognise this delta when it arrives a second time.
    #[must_use]
    pub fn dedup_key(&self) -> DedupKey {
        (self.item_id.clone(), self.device_id.clone(), self.time)
    }

    /// Whether the delta carries no field change at all.
    #[must_use]
    pub fn is_empty_change(&self) -> bool {
        self.item_tags_added.is_empty()
            && self.item_tags_removed.is_empty()
            && self.checklist_tags_added.is_empty()
            && self.checklist_tags_removed.is_empty()
            && self.photos_added.is_empty()
            && self.photos_removed.is_empty()
            && self.weight.is_none()
            && self.destination.is_none()
    }

    #[must_use]
    pub fn with_item_tags_added<I: IntoIterator<Item = S>, S: Into<String>>(mut self, tags: I) -> Self {
        self.item_tags_added = tags.into_iter().map(Into::into).collect();
        self
    }

    #[must_use]
    pub fn with_item_tags_removed<I: IntoIterator<Item = S>, S: Into<String>>(mut self, tags: I) -> Self {
        self.item_tags_removed = tags.into_iter().map(Into::into).collect();
        self
    }

    #[must_use]
    pub fn with_checklist_tags_added<I: IntoIterator<Item = S>, S: Into<String>>(mut self, tags: I) -> Self {
        self.checklist_tags_added = tags.into_iter().map(Into::into).collect();
        self
    }

    #[must_use]
    pub fn with_checklist_tags_removed<I: IntoIterator<Item = S>, S: Into<String>>(mut self, tags: I) -> Self {
        self.checklist_tags_removed = tags.into_iter().map(Into::into).collect();
        self
    }

    #[must_use]
    pub fn with_photos_added<I: IntoIterator<Item = P>, P: Into<PhotoId>>(mut self, photos: I) -> Self {
        self.photos_added = photos.into_iter().map(Into::into).collect();
        self
    }

    #[must_use]
    pub fn with_photos_removed<I: IntoIterator<Item = P>, P: Into<PhotoId>>(mut self, photos: I) -> Self {
        self.photos_removed = photos.into_iter().map(Into::into).collect();
        self
    }

    #[must_use]
    pub fn with_weight(mut self, weight: f64) -> Self {
        self.weight = Some(weight);
        self
    }

    #[must_use]
    pub fn with_destination(mut self, destination: Destination) -> Self {
        self.destination = Some(destination);
        self
    }
}
