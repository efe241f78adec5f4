//! Persistent store for map pins and the photo albums saved against them.

use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, OptionalExtension};
use rusqlite_migration::{Migrations, M};
use std::path::Path;
use std::sync::{Arc, Mutex};
use thiserror::Error;

pub type PinId = i64;
pub type PhotoId = i64;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("Database Error: {0}")]
    DatabaseError(String),
    #[error("Pin {0} not found")]
    PinNotFound(PinId),
    #[error("Photo {0} not found")]
    PhotoNotFound(PhotoId),
    #[error("Other Error: {0}")]
    Other(String),
}

/// A saved map location owning a photo album.
#[derive(Debug, Clone, PartialEq)]
pub struct Pin {
    pub id: PinId,
    pub latitude: f64,
    pub longitude: f64,
    pub created_at: DateTime<Utc>,
}

/// One album entry: a remote URL and, once downloaded, the image bytes.
#[derive(Debug, Clone, PartialEq)]
pub struct Photo {
    pub id: PhotoId,
    pub pin_id: PinId,
    pub remote_url: String,
    pub image_data: Option<Vec<u8>>,
}

impl Photo {
    /// A photo without bytes is still waiting for its download.
    pub fn is_pending(&self) -> bool {
        self.image_data.is_none()
    }
}

#[derive(Clone)]
pub struct PinStore {
    conn: Arc<Mutex<Connection>>,
}

// AUTOINCREMENT keeps photo ids from ever being reused, so a download
// completing for a deleted photo is rejected by identity.
fn apply_migrations(conn: &mut Connection) -> Result<(), StoreError> {
    let migrations = Migrations::new(vec![
        M::up(
            "CREATE TABLE IF NOT EXISTS schema_version (version INTEGER NOT NULL);\
             INSERT INTO schema_version (version) VALUES (1);\
             CREATE TABLE IF NOT EXISTS pins (\
                 id INTEGER PRIMARY KEY AUTOINCREMENT,\
                 latitude REAL NOT NULL,\
                 longitude REAL NOT NULL,\
                 created_at TEXT NOT NULL\
             );\
             CREATE TABLE IF NOT EXISTS photos (\
                 id INTEGER PRIMARY KEY AUTOINCREMENT,\
                 pin_id INTEGER NOT NULL REFERENCES pins(id) ON DELETE CASCADE,\
                 remote_url TEXT NOT NULL,\
                 image_data BLOB\
             );",
        ),
        M::up(
            "CREATE INDEX IF NOT EXISTS idx_photos_pin_id ON photos (pin_id);\
             UPDATE schema_version SET version = 2;",
        ),
    ]);
    migrations
        .to_latest(conn)
        .map_err(|e| StoreError::DatabaseError(format!("Failed to apply migrations: {}", e)))?;
    Ok(())
}

fn read_pin(row: &rusqlite::Row) -> rusqlite::Result<Pin> {
    let created: String = row.get(3)?;
    Ok(Pin {
        id: row.get(0)?,
        latitude: row.get(1)?,
        longitude: row.get(2)?,
        created_at: DateTime::parse_from_rfc3339(&created)
            .map(|dt| dt.with_timezone(&Utc))
            .unwrap_or_else(|_| DateTime::<Utc>::from(std::time::UNIX_EPOCH)),
    })
}

fn read_photo(row: &rusqlite::Row) -> rusqlite::Result<Photo> {
    Ok(Photo {
        id: row.get(0)?,
        pin_id: row.get(1)?,
        remote_url: row.get(2)?,
        image_data: row.get(3)?,
    })
}

fn insert_photo(
    conn: &Connection,
    pin_id: PinId,
    remote_url: &str,
    image_data: Option<&[u8]>,
) -> Result<PhotoId, StoreError> {
    let inserted = conn
        .execute(
            "INSERT INTO photos (pin_id, remote_url, image_data)\
             SELECT ?1, ?2, ?3 WHERE EXISTS (SELECT 1 FROM pins WHERE id = ?1)",
            params![pin_id, remote_url, image_data],
        )
        .map_err(|e| StoreError::DatabaseError(format!("Failed to insert photo: {}", e)))?;
    if inserted == 0 {
        return Err(StoreError::PinNotFound(pin_id));
    }
    Ok(conn.last_insert_rowid())
}

impl PinStore {
    pub fn new(db_path: &Path) -> Result<Self, StoreError> {
        let mut conn = Connection::open(db_path)
            .map_err(|e| StoreError::DatabaseError(format!("Failed to open database: {}", e)))?;
        conn.pragma_update(None, "foreign_keys", true)
            .map_err(|e| StoreError::DatabaseError(format!("Failed to enable foreign keys: {}", e)))?;
        apply_migrations(&mut conn)?;

        Ok(PinStore {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    fn lock_conn(&self) -> Result<std::sync::MutexGuard<'_, Connection>, StoreError> {
        self.conn
            .lock()
            .map_err(|_| StoreError::Other("Poisoned lock".into()))
    }

    pub fn create_pin(&self, latitude: f64, longitude: f64) -> Result<Pin, StoreError> {
        let created_at = Utc::now();
        let conn = self.lock_conn()?;
        conn.execute(
            "INSERT INTO pins (latitude, longitude, created_at) VALUES (?1, ?2, ?3)",
            params![latitude, longitude, created_at.to_rfc3339()],
        )
        .map_err(|e| StoreError::DatabaseError(format!("Failed to insert pin: {}", e)))?;

        Ok(Pin {
            id: conn.last_insert_rowid(),
            latitude,
            longitude,
            created_at,
        })
    }

    /// Exact floating-point match on both coordinates. Callers should carry
    /// the id handed back by [`PinStore::create_pin`]; this lookup only
    /// serves re-opening a pin dropped at a known coordinate.
    pub fn find_pin(&self, latitude: f64, longitude: f64) -> Result<Option<Pin>, StoreError> {
        let conn = self.lock_conn()?;
        conn.query_row(
            "SELECT id, latitude, longitude, created_at FROM pins \
             WHERE latitude = ?1 AND longitude = ?2 LIMIT 1",
            params![latitude, longitude],
            read_pin,
        )
        .optional()
        .map_err(|e| StoreError::DatabaseError(format!("Failed to query pin: {}", e)))
    }

    pub fn get_pin(&self, pin_id: PinId) -> Result<Option<Pin>, StoreError> {
        let conn = self.lock_conn()?;
        conn.query_row(
            "SELECT id, latitude, longitude, created_at FROM pins WHERE id = ?1",
            params![pin_id],
            read_pin,
        )
        .optional()
        .map_err(|e| StoreError::DatabaseError(format!("Failed to query pin: {}", e)))
    }

    pub fn list_pins(&self) -> Result<Vec<Pin>, StoreError> {
        let conn = self.lock_conn()?;
        let mut stmt = conn
            .prepare("SELECT id, latitude, longitude, created_at FROM pins ORDER BY id")
            .map_err(|e| StoreError::DatabaseError(format!("Failed to prepare statement: {}", e)))?;

        let iter = stmt
            .query_map([], read_pin)
            .map_err(|e| StoreError::DatabaseError(format!("Failed to query pins: {}", e)))?;

        let mut pins = Vec::new();
        for pin in iter {
            pins.push(pin.map_err(|e| {
                StoreError::DatabaseError(format!("Failed to read pin row: {}", e))
            })?);
        }
        Ok(pins)
    }

    /// Deleting a pin cascades to its photos.
    pub fn delete_pin(&self, pin_id: PinId) -> Result<(), StoreError> {
        let conn = self.lock_conn()?;
        let changed = conn
            .execute("DELETE FROM pins WHERE id = ?1", params![pin_id])
            .map_err(|e| StoreError::DatabaseError(format!("Failed to delete pin: {}", e)))?;
        if changed == 0 {
            return Err(StoreError::PinNotFound(pin_id));
        }
        Ok(())
    }

    pub fn add_photo(
        &self,
        pin_id: PinId,
        remote_url: &str,
        image_data: Option<&[u8]>,
    ) -> Result<PhotoId, StoreError> {
        let conn = self.lock_conn()?;
        insert_photo(&conn, pin_id, remote_url, image_data)
    }

    /// Insert a freshly fetched album in one transaction, bytes still absent.
    pub fn add_photos(
        &self,
        pin_id: PinId,
        remote_urls: &[String],
    ) -> Result<Vec<PhotoId>, StoreError> {
        let mut conn = self.lock_conn()?;
        let tx = conn
            .transaction()
            .map_err(|e| StoreError::DatabaseError(format!("Failed to begin transaction: {}", e)))?;

        let mut ids = Vec::with_capacity(remote_urls.len());
        for url in remote_urls {
            ids.push(insert_photo(&tx, pin_id, url, None)?);
        }

        tx.commit()
            .map_err(|e| StoreError::DatabaseError(format!("Failed to commit photos: {}", e)))?;
        Ok(ids)
    }

    /// Write the downloaded bytes for a photo. Bytes are written once: a
    /// photo that already has its image keeps it, and a photo deleted while
    /// the download was in flight is reported as [`StoreError::PhotoNotFound`].
    pub fn set_photo_bytes(&self, photo_id: PhotoId, bytes: &[u8]) -> Result<(), StoreError> {
        let conn = self.lock_conn()?;
        let changed = conn
            .execute(
                "UPDATE photos SET image_data = ?2 WHERE id = ?1 AND image_data IS NULL",
                params![photo_id, bytes],
            )
            .map_err(|e| StoreError::DatabaseError(format!("Failed to set photo bytes: {}", e)))?;
        if changed == 1 {
            return Ok(());
        }

        let exists: bool = conn
            .query_row(
                "SELECT EXISTS(SELECT 1 FROM photos WHERE id = ?1)",
                params![photo_id],
                |row| row.get(0),
            )
            .map_err(|e| StoreError::DatabaseError(format!("Failed to check photo: {}", e)))?;
        if exists {
            tracing::debug!(photo = photo_id, "Photo already has image bytes");
            Ok(())
        } else {
            Err(StoreError::PhotoNotFound(photo_id))
        }
    }

    /// Delete the given photos; ids that are already gone are ignored.
    pub fn delete_photos(&self, photo_ids: &[PhotoId]) -> Result<(), StoreError> {
        let mut conn = self.lock_conn()?;
        let tx = conn
            .transaction()
            .map_err(|e| StoreError::DatabaseError(format!("Failed to begin transaction: {}", e)))?;

        for id in photo_ids {
            tx.execute("DELETE FROM photos WHERE id = ?1", params![id])
                .map_err(|e| StoreError::DatabaseError(format!("Failed to delete photo: {}", e)))?;
        }

        tx.commit()
            .map_err(|e| StoreError::DatabaseError(format!("Failed to commit deletion: {}", e)))?;
        Ok(())
    }

    /// Delete every photo of a pin, returning the removed ids.
    pub fn clear_photos(&self, pin_id: PinId) -> Result<Vec<PhotoId>, StoreError> {
        let mut conn = self.lock_conn()?;
        let tx = conn
            .transaction()
            .map_err(|e| StoreError::DatabaseError(format!("Failed to begin transaction: {}", e)))?;

        let ids = {
            let mut stmt = tx
                .prepare("SELECT id FROM photos WHERE pin_id = ?1")
                .map_err(|e| {
                    StoreError::DatabaseError(format!("Failed to prepare statement: {}", e))
                })?;
            let iter = stmt
                .query_map(params![pin_id], |row| row.get(0))
                .map_err(|e| StoreError::DatabaseError(format!("Failed to query photos: {}", e)))?;
            let mut ids = Vec::new();
            for id in iter {
                ids.push(id.map_err(|e| {
                    StoreError::DatabaseError(format!("Failed to read photo row: {}", e))
                })?);
            }
            ids
        };

        tx.execute("DELETE FROM photos WHERE pin_id = ?1", params![pin_id])
            .map_err(|e| StoreError::DatabaseError(format!("Failed to clear photos: {}", e)))?;
        tx.commit()
            .map_err(|e| StoreError::DatabaseError(format!("Failed to commit clear: {}", e)))?;
        Ok(ids)
    }

    /// Snapshot of a pin's album. Order carries no meaning.
    pub fn list_photos(&self, pin_id: PinId) -> Result<Vec<Photo>, StoreError> {
        let conn = self.lock_conn()?;
        let mut stmt = conn
            .prepare("SELECT id, pin_id, remote_url, image_data FROM photos WHERE pin_id = ?1")
            .map_err(|e| StoreError::DatabaseError(format!("Failed to prepare statement: {}", e)))?;

        let iter = stmt
            .query_map(params![pin_id], read_photo)
            .map_err(|e| StoreError::DatabaseError(format!("Failed to query photos: {}", e)))?;

        let mut photos = Vec::new();
        for photo in iter {
            photos.push(photo.map_err(|e| {
                StoreError::DatabaseError(format!("Failed to read photo row: {}", e))
            })?);
        }
        Ok(photos)
    }

    pub fn get_photo(&self, photo_id: PhotoId) -> Result<Option<Photo>, StoreError> {
        let conn = self.lock_conn()?;
        conn.query_row(
            "SELECT id, pin_id, remote_url, image_data FROM photos WHERE id = ?1",
            params![photo_id],
            read_photo,
        )
        .optional()
        .map_err(|e| StoreError::DatabaseError(format!("Failed to query photo: {}", e)))
    }

    pub fn photo_count(&self, pin_id: PinId) -> Result<u32, StoreError> {
        let conn = self.lock_conn()?;
        let count: i64 = conn
            .query_row(
                "SELECT COUNT(*) FROM photos WHERE pin_id = ?1",
                params![pin_id],
                |row| row.get(0),
            )
            .map_err(|e| StoreError::DatabaseError(format!("Failed to count photos: {}", e)))?;
        Ok(count as u32)
    }

    pub async fn create_pin_async(&self, latitude: f64, longitude: f64) -> Result<Pin, StoreError> {
        let this = self.clone();
        tokio::task::spawn_blocking(move || this.create_pin(latitude, longitude))
            .await
            .map_err(|e| StoreError::Other(e.to_string()))?
    }

    pub async fn find_pin_async(
        &self,
        latitude: f64,
        longitude: f64,
    ) -> Result<Option<Pin>, StoreError> {
        let this = self.clone();
        tokio::task::spawn_blocking(move || this.find_pin(latitude, longitude))
            .await
            .map_err(|e| StoreError::Other(e.to_string()))?
    }

    pub async fn get_pin_async(&self, pin_id: PinId) -> Result<Option<Pin>, StoreError> {
        let this = self.clone();
        tokio::task::spawn_blocking(move || this.get_pin(pin_id))
            .await
            .map_err(|e| StoreError::Other(e.to_string()))?
    }

    pub async fn list_pins_async(&self) -> Result<Vec<Pin>, StoreError> {
        let this = self.clone();
        tokio::task::spawn_blocking(move || this.list_pins())
            .await
            .map_err(|e| StoreError::Other(e.to_string()))?
    }

    pub async fn delete_pin_async(&self, pin_id: PinId) -> Result<(), StoreError> {
        let this = self.clone();
        tokio::task::spawn_blocking(move || this.delete_pin(pin_id))
            .await
            .map_err(|e| StoreError::Other(e.to_string()))?
    }

    pub async fn add_photos_async(
        &self,
        pin_id: PinId,
        remote_urls: Vec<String>,
    ) -> Result<Vec<PhotoId>, StoreError> {
        let this = self.clone();
        tokio::task::spawn_blocking(move || this.add_photos(pin_id, &remote_urls))
            .await
            .map_err(|e| StoreError::Other(e.to_string()))?
    }

    pub async fn set_photo_bytes_async(
        &self,
        photo_id: PhotoId,
        bytes: Vec<u8>,
    ) -> Result<(), StoreError> {
        let this = self.clone();
        tokio::task::spawn_blocking(move || this.set_photo_bytes(photo_id, &bytes))
            .await
            .map_err(|e| StoreError::Other(e.to_string()))?
    }

    pub async fn delete_photos_async(&self, photo_ids: Vec<PhotoId>) -> Result<(), StoreError> {
        let this = self.clone();
        tokio::task::spawn_blocking(move || this.delete_photos(&photo_ids))
            .await
            .map_err(|e| StoreError::Other(e.to_string()))?
    }

    pub async fn clear_photos_async(&self, pin_id: PinId) -> Result<Vec<PhotoId>, StoreError> {
        let this = self.clone();
        tokio::task::spawn_blocking(move || this.clear_photos(pin_id))
            .await
            .map_err(|e| StoreError::Other(e.to_string()))?
    }

    pub async fn list_photos_async(&self, pin_id: PinId) -> Result<Vec<Photo>, StoreError> {
        let this = self.clone();
        tokio::task::spawn_blocking(move || this.list_photos(pin_id))
            .await
            .map_err(|e| StoreError::Other(e.to_string()))?
    }

    pub async fn get_photo_async(&self, photo_id: PhotoId) -> Result<Option<Photo>, StoreError> {
        let this = self.clone();
        tokio::task::spawn_blocking(move || this.get_photo(photo_id))
            .await
            .map_err(|e| StoreError::Other(e.to_string()))?
    }

    pub async fn photo_count_async(&self, pin_id: PinId) -> Result<u32, StoreError> {
        let this = self.clone();
        tokio::task::spawn_blocking(move || this.photo_count(pin_id))
            .await
            .map_err(|e| StoreError::Other(e.to_string()))?
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::NamedTempFile;

    fn open_store() -> (NamedTempFile, PinStore) {
        let file = NamedTempFile::new().expect("create temp file");
        let store = PinStore::new(file.path()).expect("create pin store");
        (file, store)
    }

    #[test]
    fn test_new_applies_migrations() {
        let file = NamedTempFile::new().expect("create temp file");
        let _ = PinStore::new(file.path()).expect("create pin store");

        let conn = Connection::open(file.path()).expect("open connection");
        let version: i64 = conn
            .query_row("SELECT version FROM schema_version", [], |row| row.get(0))
            .unwrap();
        assert_eq!(version, 2);
    }

    #[test]
    fn test_create_and_find_pin() {
        let (_file, store) = open_store();
        let pin = store.create_pin(40.0, -73.0).expect("create pin");

        let found = store.find_pin(40.0, -73.0).expect("find pin").unwrap();
        assert_eq!(found.id, pin.id);

        assert!(store.find_pin(40.0, -73.1).expect("find pin").is_none());
        assert_eq!(store.get_pin(pin.id).unwrap().unwrap().latitude, 40.0);
    }

    #[test]
    fn test_duplicate_coordinates_are_allowed() {
        let (_file, store) = open_store();
        let first = store.create_pin(1.5, 2.5).unwrap();
        let second = store.create_pin(1.5, 2.5).unwrap();
        assert_ne!(first.id, second.id);
        assert_eq!(store.list_pins().unwrap().len(), 2);
    }

    #[test]
    fn test_bulk_album_roundtrip_is_pending() {
        let (_file, store) = open_store();
        let pin = store.create_pin(40.0, -73.0).unwrap();

        let urls: Vec<String> = (0..5).map(|i| format!("https://img.example/{}.jpg", i)).collect();
        let ids = store.add_photos(pin.id, &urls).expect("add photos");
        assert_eq!(ids.len(), 5);

        let photos = store.list_photos(pin.id).expect("list photos");
        assert_eq!(photos.len(), 5);
        assert!(photos.iter().all(Photo::is_pending));
    }

    #[test]
    fn test_add_photo_to_missing_pin() {
        let (_file, store) = open_store();
        let result = store.add_photo(99, "https://img.example/1.jpg", None);
        assert!(matches!(result, Err(StoreError::PinNotFound(99))));
    }

    #[test]
    fn test_set_photo_bytes_is_write_once() {
        let (_file, store) = open_store();
        let pin = store.create_pin(40.0, -73.0).unwrap();
        let id = store.add_photo(pin.id, "https://img.example/1.jpg", None).unwrap();

        store.set_photo_bytes(id, &[1, 2, 3]).expect("set bytes");
        // A second write leaves the first bytes in place.
        store.set_photo_bytes(id, &[9, 9, 9]).expect("second set");

        let photo = store.get_photo(id).unwrap().unwrap();
        assert_eq!(photo.image_data.as_deref(), Some(&[1u8, 2, 3][..]));
    }

    #[test]
    fn test_set_photo_bytes_on_deleted_photo() {
        let (_file, store) = open_store();
        let pin = store.create_pin(40.0, -73.0).unwrap();
        let id = store.add_photo(pin.id, "https://img.example/1.jpg", None).unwrap();
        store.delete_photos(&[id]).unwrap();

        let result = store.set_photo_bytes(id, &[1, 2, 3]);
        assert!(matches!(result, Err(StoreError::PhotoNotFound(_))));
    }

    #[test]
    fn test_delete_pin_cascades_to_photos() {
        let (file, store) = open_store();
        let pin = store.create_pin(40.0, -73.0).unwrap();
        store
            .add_photos(pin.id, &["https://img.example/1.jpg".to_string()])
            .unwrap();

        store.delete_pin(pin.id).expect("delete pin");

        let conn = Connection::open(file.path()).expect("open connection");
        conn.pragma_update(None, "foreign_keys", true).unwrap();
        let count: i64 = conn
            .query_row("SELECT COUNT(*) FROM photos", [], |r| r.get(0))
            .unwrap();
        assert_eq!(count, 0);
        assert!(matches!(
            store.delete_pin(pin.id),
            Err(StoreError::PinNotFound(_))
        ));
    }

    #[test]
    fn test_photo_ids_are_never_reused() {
        let (_file, store) = open_store();
        let pin = store.create_pin(40.0, -73.0).unwrap();
        let urls: Vec<String> = (0..3).map(|i| format!("https://img.example/{}.jpg", i)).collect();

        let old_ids = store.add_photos(pin.id, &urls).unwrap();
        store.clear_photos(pin.id).unwrap();
        let new_ids = store.add_photos(pin.id, &urls).unwrap();

        let old_max = old_ids.iter().max().unwrap();
        assert!(new_ids.iter().all(|id| id > old_max));
    }
}
