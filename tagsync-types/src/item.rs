//! The materialized item record.

use crate::{ItemId, PhotoId};
use serde::{Deserialize, Serialize};

/// Where a packed item should end up after the move.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Destination {
    Kitchen,
    LivingRoom,
    DiningRoom,
    Bedroom,
    Bathroom,
    Office,
    Garage,
    Basement,
    Attic,
    Storage,
    /// A value sent by a peer that this build does not know about.
    #[serde(other)]
    Unknown,
}

/// A tagged item in the inventory.
///
/// Tag and photo lists behave as insertion-ordered sets.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Item {
    pub id: ItemId,
    #[serde(default)]
    pub item_tags: Vec<String>,
    #[serde(default)]
    pub checklist_tags: Vec<String>,
    #[serde(default)]
    pub photos: Vec<PhotoId>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub weight: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub destination: Option<Destination>,
}

impl Item {
    /// Creates an empty item.
    #[must_use]
    pub fn new(id: impl Into<ItemId>) -> Self {
        Self {
            id: id.into(),
            item_tags: Vec::new(),
            checklist_tags: Vec::new(),
            photos: Vec::new(),
            weight: None,
            destination: None,
        }
    }

    #[must_use]
    pub fn with_item_tags<I, S>(mut self, tags: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.item_tags = dedup(tags.into_iter().map(Into::into));
        self
    }

    #[must_use]
    pub fn with_checklist_tags<I, S>(mut self, tags: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.checklist_tags = dedup(tags.into_iter().map(Into::into));
        self
    }

    #[must_use]
    pub fn with_photos<I, P>(mut self, photos: I) -> Self
    where
        I: IntoIterator<Item = P>,
        P: Into<PhotoId>,
    {
        self.photos = dedup(photos.into_iter().map(Into::into));
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

impl From<String> for ItemId {
    fn from(s: String) -> Self {
        Self::new(s)
    }
}

impl From<String> for PhotoId {
    fn from(s: String) -> Self {
        Self::new(s)
    }
}

fn dedup<T: PartialEq>(values: impl Iterator<Item = T>) -> Vec<T> {
    let mut out: Vec<T> = Vec::new();
    for v in values {
        if !out.contains(&v) {
            out.push(v);
        }
    }
    out
}
