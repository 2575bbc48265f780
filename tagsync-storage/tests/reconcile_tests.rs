use pretty_assertions::assert_eq;
use std::sync::Arc;
use tagsync_storage::{DeltaStore, MemoryKv};
use tagsync_types::{Destination, DeviceId, Item, ItemAction, ItemDelta, ItemId, Timestamp};

fn open(device: &str) -> DeltaStore {
    DeltaStore::open(DeviceId::new(device), Arc::new(MemoryKv::new())).unwrap()
}

fn remote(ms: i64, id: &str, action: ItemAction) -> ItemDelta {
    ItemDelta::new(Timestamp::from_millis(ms), id, action, DeviceId::new("remote"))
}

// ── Basic application ────────────────────────────────────────────

#[test]
fn add_materializes_new_item() {
    let mut store = open("local");
    let report = store.apply_remote_deltas(vec![
        remote(1_000, "X1", ItemAction::Add)
            .with_checklist_tags_added(["ready"])
            .with_weight(3.0),
    ]);

    assert_eq!(report.applied, 1);
    assert_eq!(report.created, 1);
    let item = store.item(&ItemId::new("X1")).unwrap();
    assert_eq!(item.checklist_tags, vec!["ready".to_string()]);
    assert_eq!(item.weight, Some(3.0));
}

#[test]
fn applying_same_batch_twice_is_noop() {
    let mut store = open("local");
    let batch = vec![
        remote(1_000, "X1", ItemAction::Add).with_item_tags_added(["a"]),
        remote(2_000, "X1", ItemAction::Update).with_item_tags_added(["b"]),
    ];

    let first = store.apply_remote_deltas(batch.clone());
    let snapshot: Vec<Item> = store.items().cloned().collect();
    let second = store.apply_remote_deltas(batch);

    assert_eq!(first.applied, 2);
    assert_eq!(second.applied, 0);
    assert_eq!(second.duplicates, 2);
    assert_eq!(store.deltas().len(), 2);
    assert_eq!(store.items().cloned().collect::<Vec<_>>(), snapshot);
}

#[test]
fn duplicates_within_one_batch_apply_once() {
    let mut store = open("local");
    let delta = remote(1_000, "X1", ItemAction::Add);
    let report = store.apply_remote_deltas(vec![delta.clone(), delta]);
    assert_eq!(report.applied, 1);
    assert_eq!(report.duplicates, 1);
}

// ── Merge policy ─────────────────────────────────────────────────

#[test]
fn concurrent_tag_additions_union() {
    let mut store = open("local");
    store.save(Item::new("X1").with_item_tags(["local-tag"])).unwrap();

    store.apply_remote_deltas(vec![
        remote(1_000, "X1", ItemAction::Update).with_item_tags_added(["remote-tag"]),
    ]);

    let item = store.item(&ItemId::new("X1")).unwrap();
    assert_eq!(
        item.item_tags,
        vec!["local-tag".to_string(), "remote-tag".to_string()]
    );
}

#[test]
fn removals_subtract_from_existing() {
    let mut store = open("local");
    store
        .save(Item::new("X1").with_checklist_tags(["packed", "labelled"]))
        .unwrap();

    store.apply_remote_deltas(vec![
        remote(1_000, "X1", ItemAction::Update).with_checklist_tags_removed(["packed"]),
    ]);

    let item = store.item(&ItemId::new("X1")).unwrap();
    assert_eq!(item.checklist_tags, vec!["labelled".to_string()]);
}

#[test]
fn scalar_fields_last_applied_wins() {
    let mut store = open("local");
    store.apply_remote_deltas(vec![
        remote(2_000, "X1", ItemAction::Add).with_destination(Destination::Garage),
        remote(1_000, "X1", ItemAction::Update).with_destination(Destination::Attic),
    ]);

    let item = store.item(&ItemId::new("X1")).unwrap();
    assert_eq!(item.destination, Some(Destination::Attic));
}

#[test]
fn absent_scalar_keeps_existing_value() {
    let mut store = open("local");
    store.save(Item::new("X1").with_weight(4.0)).unwrap();
    store.apply_remote_deltas(vec![
        remote(1_000, "X1", ItemAction::Update).with_item_tags_added(["x"]),
    ]);
    assert_eq!(store.item(&ItemId::new("X1")).unwrap().weight, Some(4.0));
}

// ── Removal ──────────────────────────────────────────────────────

#[test]
fn remote_remove_deletes_item() {
    let mut store = open("local");
    store.save(Item::new("X1")).unwrap();

    let report = store.apply_remote_deltas(vec![remote(5_000, "X1", ItemAction::Remove)]);
    assert_eq!(report.removed, 1);
    assert!(store.item(&ItemId::new("X1")).is_none());
}

#[test]
fn remove_of_missing_item_is_logged_but_ignored() {
    let mut store = open("local");
    let report = store.apply_remote_deltas(vec![remote(5_000, "ghost", ItemAction::Remove)]);

    assert_eq!(report.applied, 1);
    assert_eq!(report.ignored, 1);
    assert!(!report.changed_items());
    assert_eq!(store.deltas().len(), 1);
}

#[test]
fn merged_deltas_are_relayed_onward() {
    let mut store = open("local");
    store.apply_remote_deltas(vec![remote(5_000, "X1", ItemAction::Add)]);

    let relay = store.deltas_since(Timestamp::from_millis(4_999));
    assert_eq!(relay.len(), 1);
    assert_eq!(relay[0].device_id, DeviceId::new("remote"));
}
