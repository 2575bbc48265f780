//! Distinct tag sets for autocompletion.
//!
//! A derived cache over the materialized items, rebuilt after every
//! mutation. Never persisted and never authoritative.

use std::collections::{BTreeMap, BTreeSet};
use tagsync_types::{Item, ItemId};

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TagIndex {
    item_tags: BTreeSet<String>,
    checklist_tags: BTreeSet<String>,
}

impl TagIndex {
    /// Builds the index from scratch.
    pub fn build(items: &BTreeMap<ItemId, Item>) -> Self {
        let mut index = Self::default();
        for item in items.values() {
            index.item_tags.extend(item.item_tags.iter().cloned());
            index.checklist_tags.extend(item.checklist_tags.iter().cloned());
        }
        index
    }

    pub fn item_tags(&self) -> &BTreeSet<String> {
        &self.item_tags
    }

    pub fn checklist_tags(&self) -> &BTreeSet<String> {
        &self.checklist_tags
    }

    /// Item tags starting with `prefix` (case-insensitive).
    pub fn complete_item_tag<'a>(&'a self, prefix: &'a str) -> impl Iterator<Item = &'a str> + 'a {
        complete(&self.item_tags, prefix)
    }

    /// Checklist tags starting with `prefix` (case-insensitive).
    pub fn complete_checklist_tag<'a>(&'a self, prefix: &'a str) -> impl Iterator<Item = &'a str> + 'a {
        complete(&self.checklist_tags, prefix)
    }
}

fn complete<'a>(set: &'a BTreeSet<String>, prefix: &'a str) -> impl Iterator<Item = &'a str> + 'a {
    let prefix = prefix.to_lowercase();
    set.iter()
        .filter(move |t| t.to_lowercase().starts_with(&prefix))
        .map(String::as_str)
}
