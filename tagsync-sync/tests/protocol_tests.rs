//! Tests for protocol.rs: wire shapes and decoding failures.

use pretty_assertions::assert_eq;
use serde_json::json;
use tagsync_blobstore::Blob;
use tagsync_sync::{SyncError, SyncMessage};
use tagsync_types::{DeviceId, ItemAction, ItemDelta, PhotoId, Timestamp};

fn to_value(message: &SyncMessage) -> serde_json::Value {
    serde_json::from_str(&message.encode().unwrap()).unwrap()
}

// ── Wire shapes ─────────────────────────────────────────────────

#[test]
fn device_id_wire_shape() {
    let message = SyncMessage::DeviceId {
        device_id: DeviceId::new("dev-a"),
    };
    assert_eq!(to_value(&message), json!({"type": "device-id", "deviceId": "dev-a"}));
    assert_eq!(message.kind(), "device-id");
}

#[test]
fn watermark_wire_shape() {
    let message = SyncMessage::Watermark {
        device_id: DeviceId::new("dev-a"),
        for_device: DeviceId::new("dev-b"),
        watermark: Timestamp::EPOCH,
    };
    assert_eq!(
        to_value(&message),
        json!({
            "type": "watermark",
            "deviceId": "dev-a",
            "forDevice": "dev-b",
            "watermark": "1970-01-01T00:00:00.000Z"
        })
    );
}

#[test]
fn item_sync_wire_shape() {
    let delta = ItemDelta::new(
        Timestamp::from_millis(1_000),
        "X1",
        ItemAction::Add,
        DeviceId::new("dev-a"),
    )
    .with_item_tags_added(["Fragile"]);
    let message = SyncMessage::ItemSync {
        deltas: vec![delta],
        from: DeviceId::new("dev-a"),
        to: DeviceId::new("dev-b"),
    };
    assert_eq!(
        to_value(&message),
        json!({
            "type": "item-sync",
            "deltas": [{
                "time": "1970-01-01T00:00:01.000Z",
                "itemId": "X1",
                "action": "add",
                "deviceId": "dev-a",
                "itemTagsAdded": ["Fragile"]
            }],
            "from": "dev-a",
            "to": "dev-b"
        })
    );
}

#[test]
fn blob_sync_carries_base64_data() {
    let message = SyncMessage::BlobSync {
        blobs: vec![Blob::new(PhotoId::new("p1"), b"hello".to_vec())],
        from: DeviceId::new("dev-a"),
        to: DeviceId::new("dev-b"),
    };
    let value = to_value(&message);
    assert_eq!(value["type"], "blob-sync");
    assert_eq!(value["blobs"][0], json!({"id": "p1", "data": "aGVsbG8="}));
}

#[test]
fn decode_reverses_encode() {
    let message = SyncMessage::Watermark {
        device_id: DeviceId::new("a"),
        for_device: DeviceId::new("b"),
        watermark: Timestamp::from_millis(1_714_557_600_000),
    };
    let decoded = SyncMessage::decode(&message.encode().unwrap()).unwrap();
    assert_eq!(decoded, message);
}

// ── Decoding failures ───────────────────────────────────────────

#[test]
fn unknown_type_is_reported_separately() {
    let err = SyncMessage::decode(r#"{"type":"ping","nonce":1}"#).unwrap_err();
    assert!(matches!(err, SyncError::UnknownMessage(ref kind) if kind == "ping"));
}

#[test]
fn missing_type_is_protocol_error() {
    let err = SyncMessage::decode(r#"{"deviceId":"a"}"#).unwrap_err();
    assert!(matches!(err, SyncError::Protocol(_)));
}

#[test]
fn invalid_json_is_protocol_error() {
    let err = SyncMessage::decode("not json").unwrap_err();
    assert!(matches!(err, SyncError::Protocol(_)));
}

#[test]
fn known_type_with_bad_fields_is_protocol_error() {
    let err = SyncMessage::decode(r#"{"type":"watermark","deviceId":"a"}"#).unwrap_err();
    assert!(matches!(err, SyncError::Protocol(ref msg) if msg.contains("watermark")));
}

#[test]
fn bad_watermark_timestamp_is_protocol_error() {
    let text = r#"{"type":"watermark","deviceId":"a","forDevice":"b","watermark":"yesterday"}"#;
    assert!(matches!(SyncMessage::decode(text), Err(SyncError::Protocol(_))));
}
