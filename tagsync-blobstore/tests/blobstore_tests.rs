use pretty_assertions::assert_eq;
use tagsync_blobstore::{Blob, BlobRepository, BlobStore, BlobStoreError};
use tagsync_types::PhotoId;

// ── Error type coverage ─────────────────────────────────────────

#[test]
fn error_display() {
    let err = BlobStoreError::NotFound("p1".to_string());
    assert!(format!("{err}").contains("p1"));

    let err = BlobStoreError::Storage("disk full".to_string());
    assert!(format!("{err}").contains("disk full"));
}

// ── Store / read ────────────────────────────────────────────────

#[test]
fn add_photo_generates_id() {
    let store = BlobStore::open_in_memory().unwrap();
    let a = store.add_photo(b"jpeg a").unwrap();
    let b = store.add_photo(b"jpeg b").unwrap();

    assert_ne!(a, b);
    assert_eq!(store.read(&a).unwrap(), b"jpeg a");
    assert_eq!(store.read(&b).unwrap(), b"jpeg b");
}

#[test]
fn put_replaces_content() {
    let store = BlobStore::open_in_memory().unwrap();
    let id = PhotoId::new("p1");
    store.put(&id, b"old").unwrap();
    store.put(&id, b"new").unwrap();
    assert_eq!(store.read(&id).unwrap(), b"new");
    assert_eq!(store.ids().unwrap().len(), 1);
}

#[test]
fn read_nonexistent_fails() {
    let store = BlobStore::open_in_memory().unwrap();
    assert!(matches!(
        store.read(&PhotoId::new("nope")),
        Err(BlobStoreError::NotFound(_))
    ));
}

#[test]
fn remove_photo() {
    let store = BlobStore::open_in_memory().unwrap();
    let id = store.add_photo(b"data").unwrap();
    store.remove(&id).unwrap();
    assert!(!store.contains(&id).unwrap());
    assert!(store.remove(&id).is_err());
}

#[test]
fn list_reports_sizes() {
    let store = BlobStore::open_in_memory().unwrap();
    store.put(&PhotoId::new("a"), b"12345").unwrap();
    store.put(&PhotoId::new("b"), b"").unwrap();

    let list = store.list().unwrap();
    assert_eq!(list.len(), 2);
    assert_eq!(list[0].id, PhotoId::new("a"));
    assert_eq!(list[0].size, 5);
    assert_eq!(list[1].size, 0);
}

#[test]
fn reset_deletes_everything() {
    let store = BlobStore::open_in_memory().unwrap();
    store.add_photo(b"x").unwrap();
    store.add_photo(b"y").unwrap();
    store.reset().unwrap();
    assert!(store.ids().unwrap().is_empty());
}

#[test]
fn persists_across_reopen() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("photos.db");

    let id = {
        let store = BlobStore::open(&path).unwrap();
        store.add_photo(b"kept").unwrap()
    };

    let store = BlobStore::open(&path).unwrap();
    assert_eq!(store.read(&id).unwrap(), b"kept");
}

// ── BlobRepository ──────────────────────────────────────────────

#[test]
fn get_blob_data_missing_is_none() {
    let store = BlobStore::open_in_memory().unwrap();
    assert!(store.get_blob_data(&PhotoId::new("missing")).is_none());
}

#[test]
fn import_is_idempotent() {
    let store = BlobStore::open_in_memory().unwrap();
    let blobs = vec![
        Blob::new(PhotoId::new("p1"), b"one".to_vec()),
        Blob::new(PhotoId::new("p2"), b"two".to_vec()),
    ];

    assert_eq!(store.import_blobs(blobs.clone()), 2);
    assert_eq!(store.import_blobs(blobs), 0);
    assert_eq!(store.get_blob_data(&PhotoId::new("p2")), Some(b"two".to_vec()));
}

#[test]
fn import_does_not_overwrite_existing() {
    let store = BlobStore::open_in_memory().unwrap();
    store.put(&PhotoId::new("p1"), b"local").unwrap();
    store.import_blobs(vec![Blob::new(PhotoId::new("p1"), b"remote".to_vec())]);
    assert_eq!(store.read(&PhotoId::new("p1")).unwrap(), b"local");
}

// ── Wire form ───────────────────────────────────────────────────

#[test]
fn blob_data_is_base64_in_json() {
    let blob = Blob::new(PhotoId::new("p1"), b"hello".to_vec());
    let json = serde_json::to_value(&blob).unwrap();
    assert_eq!(json, serde_json::json!({ "id": "p1", "data": "aGVsbG8=" }));

    let back: Blob = serde_json::from_value(json).unwrap();
    assert_eq!(back, blob);
}

#[test]
fn invalid_base64_is_rejected() {
    let result: Result<Blob, _> = serde_json::from_str(r#"{"id":"p1","data":"!!!"}"#);
    assert!(result.is_err());
}
