//! Tests for state.rs: device identity and watermarks.

use pretty_assertions::assert_eq;
use std::sync::Arc;
use tagsync_storage::{KeyValueStore, MemoryKv};
use tagsync_sync::{SyncState, DEVICE_ID_KEY, WATERMARKS_KEY};
use tagsync_types::{DeviceId, Timestamp};

fn kv() -> Arc<dyn KeyValueStore> {
    Arc::new(MemoryKv::new())
}

// ── Device identity ─────────────────────────────────────────────

#[test]
fn device_id_generated_once_and_persisted() {
    let kv = kv();
    let first = SyncState::load(kv.clone()).unwrap();
    let stored = kv.get(DEVICE_ID_KEY).unwrap().unwrap();
    assert_eq!(first.device_id().as_str(), stored);

    let second = SyncState::load(kv).unwrap();
    assert_eq!(second.device_id(), first.device_id());
}

#[test]
fn existing_device_id_is_used() {
    let kv = kv();
    kv.set(DEVICE_ID_KEY, "phone-1").unwrap();
    let state = SyncState::load(kv).unwrap();
    assert_eq!(state.device_id(), &DeviceId::new("phone-1"));
}

// ── Watermarks ──────────────────────────────────────────────────

#[test]
fn first_contact_starts_at_epoch() {
    let mut state = SyncState::load(kv()).unwrap();
    let peer = DeviceId::new("peer");
    assert_eq!(state.watermark(&peer), None);

    assert!(state.ensure_peer(&peer));
    assert_eq!(state.watermark(&peer), Some(Timestamp::EPOCH));
    assert!(!state.ensure_peer(&peer));
}

#[test]
fn watermark_never_moves_backwards() {
    let mut state = SyncState::load(kv()).unwrap();
    let peer = DeviceId::new("peer");

    assert!(state.advance(&peer, Timestamp::from_millis(5_000)));
    assert!(!state.advance(&peer, Timestamp::from_millis(4_000)));
    assert!(!state.advance(&peer, Timestamp::from_millis(5_000)));
    assert_eq!(state.watermark(&peer), Some(Timestamp::from_millis(5_000)));

    assert!(state.advance(&peer, Timestamp::from_millis(6_000)));
    assert_eq!(state.watermark(&peer), Some(Timestamp::from_millis(6_000)));
}

#[test]
fn ensure_peer_keeps_existing_watermark() {
    let mut state = SyncState::load(kv()).unwrap();
    let peer = DeviceId::new("peer");
    state.advance(&peer, Timestamp::from_millis(9_000));
    assert!(!state.ensure_peer(&peer));
    assert_eq!(state.watermark(&peer), Some(Timestamp::from_millis(9_000)));
}

#[test]
fn watermarks_survive_reload() {
    let kv = kv();
    let peer = DeviceId::new("peer");
    {
        let mut state = SyncState::load(kv.clone()).unwrap();
        state.advance(&peer, Timestamp::from_millis(7_000));
    }
    let state = SyncState::load(kv.clone()).unwrap();
    assert_eq!(state.watermark(&peer), Some(Timestamp::from_millis(7_000)));

    let raw: serde_json::Value = serde_json::from_str(&kv.get(WATERMARKS_KEY).unwrap().unwrap()).unwrap();
    assert_eq!(raw["peer"], "1970-01-01T00:00:07.000Z");
}

#[test]
fn corrupt_watermark_table_starts_empty() {
    let kv = kv();
    kv.set(WATERMARKS_KEY, "{not json").unwrap();
    let state = SyncState::load(kv).unwrap();
    assert!(state.peers().is_empty());
}

#[test]
fn reset_forgets_peers_but_keeps_identity() {
    let kv = kv();
    let mut state = SyncState::load(kv.clone()).unwrap();
    let me = state.device_id().clone();
    state.ensure_peer(&DeviceId::new("peer"));

    state.reset().unwrap();
    assert!(state.peers().is_empty());
    assert_eq!(kv.get(WATERMARKS_KEY).unwrap(), None);
    assert_eq!(SyncState::load(kv).unwrap().device_id(), &me);
}
