//! SQLite-backed photo storage.

use crate::blob::Blob;
use crate::error::{BlobStoreError, BlobStoreResult};
use crate::BlobRepository;
use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, OptionalExtension};
use serde::Serialize;
use std::path::Path;
use std::sync::{Arc, Mutex, MutexGuard};
use tagsync_types::PhotoId;
use tracing::{debug, info, warn};

/// Metadata about a stored photo (without the bytes).
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct BlobMetadata {
    pub id: PhotoId,
    pub size: usize,
    pub created_at: DateTime<Utc>,
}

/// Photo store. Cheap to clone; clones share one connection.
#[derive(Clone)]
pub struct BlobStore {
    conn: Arc<Mutex<Connection>>,
}

impl std::fmt::Debug for BlobStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BlobStore").finish_non_exhaustive()
    }
}

impl BlobStore {
    /// Opens (or creates) a store at the given path.
    pub fn open(path: impl AsRef<Path>) -> BlobStoreResult<Self> {
        let conn = Connection::open(path)?;
        Self::open_with_conn(Arc::new(Mutex::new(conn)))
    }

    /// Opens an in-memory store (for testing).
    pub fn open_in_memory() -> BlobStoreResult<Self> {
        let conn = Connection::open_in_memory()?;
        Self::open_with_conn(Arc::new(Mutex::new(conn)))
    }

    /// Uses an existing connection, creating the table if needed.
    pub fn open_with_conn(conn: Arc<Mutex<Connection>>) -> BlobStoreResult<Self> {
        let store = Self { conn };
        store.init_schema()?;
        Ok(store)
    }

    fn init_schema(&self) -> BlobStoreResult<()> {
        let conn = self.lock()?;
        conn.execute_batch(
            "
            CREATE TABLE IF NOT EXISTS photos (
                id TEXT PRIMARY KEY,
                data BLOB NOT NULL,
                size INTEGER NOT NULL,
                created_at TEXT NOT NULL
            );
            ",
        )?;
        Ok(())
    }

    fn lock(&self) -> BlobStoreResult<MutexGuard<'_, Connection>> {
        self.conn
            .lock()
            .map_err(|_| BlobStoreError::Storage("connection lock poisoned".to_string()))
    }

    // ── Writes ───────────────────────────────────────────────────

    /// Stores a freshly captured photo under a new id.
    pub fn add_photo(&self, data: &[u8]) -> BlobStoreResult<PhotoId> {
        let id = PhotoId::generate();
        self.put(&id, data)?;
        Ok(id)
    }

    /// Stores bytes under `id`, replacing any previous content.
    pub fn put(&self, id: &PhotoId, data: &[u8]) -> BlobStoreResult<()> {
        let conn = self.lock()?;
        conn.execute(
            "INSERT INTO photos (id, data, size, created_at) VALUES (?1, ?2, ?3, ?4)
             ON CONFLICT(id) DO UPDATE SET data = excluded.data, size = excluded.size",
            params![id.as_str(), data, data.len() as i64, Utc::now().to_rfc3339()],
        )?;
        debug!("Stored photo {} ({} bytes)", id, data.len());
        Ok(())
    }

    /// Deletes a photo. Fails with `NotFound` if it does not exist.
    pub fn remove(&self, id: &PhotoId) -> BlobStoreResult<()> {
        let conn = self.lock()?;
        let rows = conn.execute("DELETE FROM photos WHERE id = ?1", params![id.as_str()])?;
        if rows == 0 {
            return Err(BlobStoreError::NotFound(id.to_string()));
        }
        Ok(())
    }

    /// Deletes every photo.
    pub fn reset(&self) -> BlobStoreResult<()> {
        let conn = self.lock()?;
        let rows = conn.execute("DELETE FROM photos", [])?;
        info!("Blob store reset ({} photos deleted)", rows);
        Ok(())
    }

    // ── Reads ────────────────────────────────────────────────────

    /// Reads a photo's bytes. Fails with `NotFound` if it does not exist.
    pub fn read(&self, id: &PhotoId) -> BlobStoreResult<Vec<u8>> {
        let conn = self.lock()?;
        conn.query_row(
            "SELECT data FROM photos WHERE id = ?1",
            params![id.as_str()],
            |row| row.get::<_, Vec<u8>>(0),
        )
        .optional()?
        .ok_or_else(|| BlobStoreError::NotFound(id.to_string()))
    }

    pub fn contains(&self, id: &PhotoId) -> BlobStoreResult<bool> {
        let conn = self.lock()?;
        let found = conn
            .query_row(
                "SELECT 1 FROM photos WHERE id = ?1",
                params![id.as_str()],
                |_| Ok(()),
            )
            .optional()?;
        Ok(found.is_some())
    }

    /// All stored photo ids, ordered.
    pub fn ids(&self) -> BlobStoreResult<Vec<PhotoId>> {
        let conn = self.lock()?;
        let mut stmt = conn.prepare("SELECT id FROM photos ORDER BY id")?;
        let ids = stmt
            .query_map([], |row| row.get::<_, String>(0))?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(ids.into_iter().map(PhotoId::new).collect())
    }

    /// Metadata for every stored photo.
    pub fn list(&self) -> BlobStoreResult<Vec<BlobMetadata>> {
        let conn = self.lock()?;
        let mut stmt = conn.prepare("SELECT id, size, created_at FROM photos ORDER BY id")?;
        let rows = stmt
            .query_map([], |row| {
                Ok((
                    row.get::<_, String>(0)?,
                    row.get::<_, i64>(1)?,
                    row.get::<_, String>(2)?,
                ))
            })?
            .collect::<Result<Vec<_>, _>>()?;

        rows.into_iter()
            .map(|(id, size, created_at)| {
                let created_at = DateTime::parse_from_rfc3339(&created_at)
                    .map_err(|e| BlobStoreError::Storage(format!("bad created_at for {id}: {e}")))?
                    .with_timezone(&Utc);
                Ok(BlobMetadata {
                    id: PhotoId::new(id),
                    size: usize::try_from(size).unwrap_or_default(),
                    created_at,
                })
            })
            .collect()
    }
}

impl BlobRepository for BlobStore {
    fn get_blob_data(&self, id: &PhotoId) -> Option<Vec<u8>> {
        match self.read(id) {
            Ok(data) => Some(data),
            Err(BlobStoreError::NotFound(_)) => None,
            Err(e) => {
                warn!("Failed to read photo {}: {}", id, e);
                None
            }
        }
    }

    fn import_blobs(&self, blobs: Vec<Blob>) -> usize {
        let mut imported = 0;
        for blob in blobs {
            match self.contains(&blob.id) {
                Ok(true) => continue,
                Ok(false) => {}
                Err(e) => {
                    warn!("Failed to check photo {}: {}", blob.id, e);
                    continue;
                }
            }
            match self.put(&blob.id, &blob.data) {
                Ok(()) => imported += 1,
                Err(e) => warn!("Failed to import photo {}: {}", blob.id, e),
            }
        }
        if imported > 0 {
            info!("Imported {} photos", imported);
        }
        imported
    }
}
