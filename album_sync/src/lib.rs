//! Album synchronization between the photo search API and the pin store.

use flickr_client::FlickrClient;
use pin_store::{Photo, PhotoId, Pin, PinId, PinStore, StoreError};
use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex};
use thiserror::Error;
use tokio::sync::mpsc;
use tokio::task::JoinSet;

#[derive(Debug, Error)]
pub enum SyncError {
    #[error("Search Error: {0}")]
    SearchError(String),
    #[error("Download Error: {0}")]
    DownloadError(String),
    #[error("Store Error: {0}")]
    StoreError(String),
    #[error("Pin {0} not found")]
    PinNotFound(PinId),
}

/// Album lifecycle of a single pin.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AlbumState {
    Empty,
    Loading,
    Populated,
    Refreshing,
}

/// Change notifications carrying stable ids, for whatever renders the album.
#[derive(Debug, Clone)]
pub enum AlbumEvent {
    PhotosAdded {
        pin_id: PinId,
        photo_ids: Vec<PhotoId>,
    },
    PhotosRemoved {
        pin_id: PinId,
        photo_ids: Vec<PhotoId>,
    },
    PhotoLoaded {
        pin_id: PinId,
        photo_id: PhotoId,
    },
}

#[derive(Clone)]
pub struct AlbumSync {
    client: Arc<FlickrClient>,
    store: PinStore,
    states: Arc<Mutex<HashMap<PinId, AlbumState>>>,
    events: Option<mpsc::UnboundedSender<AlbumEvent>>,
}

impl AlbumSync {
    pub fn new(client: FlickrClient, store: PinStore) -> Self {
        AlbumSync {
            client: Arc::new(client),
            store,
            states: Arc::new(Mutex::new(HashMap::new())),
            events: None,
        }
    }

    /// Like [`AlbumSync::new`], with a channel receiving album change events.
    pub fn with_events(
        client: FlickrClient,
        store: PinStore,
        events: mpsc::UnboundedSender<AlbumEvent>,
    ) -> Self {
        let mut sync = Self::new(client, store);
        sync.events = Some(events);
        sync
    }

    pub fn album_state(&self, pin_id: PinId) -> AlbumState {
        self.states()
            .get(&pin_id)
            .copied()
            .unwrap_or(AlbumState::Empty)
    }

    fn states(&self) -> std::sync::MutexGuard<'_, HashMap<PinId, AlbumState>> {
        self.states.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn set_state(&self, pin_id: PinId, state: AlbumState) {
        self.states().insert(pin_id, state);
    }

    fn emit(&self, event: AlbumEvent) {
        if let Some(tx) = &self.events {
            if let Err(e) = tx.send(event) {
                tracing::warn!("Failed to send album event: {}", e);
            }
        }
    }

    async fn pin(&self, pin_id: PinId) -> Result<Pin, SyncError> {
        self.store
            .get_pin_async(pin_id)
            .await
            .map_err(|e| SyncError::StoreError(format!("Failed to load pin: {}", e)))?
            .ok_or(SyncError::PinNotFound(pin_id))
    }

    /// Open a pin's album: reuse persisted photos when any exist, otherwise
    /// fetch a random album and persist it. Photo bytes stay absent until
    /// [`AlbumSync::ensure_photo`] materializes them.
    #[cfg_attr(feature = "trace-spans", tracing::instrument(skip(self)))]
    pub async fn open_album(&self, pin_id: PinId) -> Result<Vec<Photo>, SyncError> {
        let photos = self
            .store
            .list_photos_async(pin_id)
            .await
            .map_err(|e| SyncError::StoreError(format!("Failed to list photos: {}", e)))?;
        if !photos.is_empty() {
            self.set_state(pin_id, AlbumState::Populated);
            return Ok(photos);
        }

        let pin = self.pin(pin_id).await?;
        self.set_state(pin_id, AlbumState::Loading);
        match self.fetch_album(&pin).await {
            Ok(photos) => {
                self.set_state(pin_id, AlbumState::Populated);
                Ok(photos)
            }
            Err(e) => {
                self.set_state(pin_id, AlbumState::Empty);
                Err(e)
            }
        }
    }

    /// Discard the current album and fetch a fresh random one. The new album
    /// is not guaranteed to differ from the old; randomness is the only
    /// guarantee.
    #[cfg_attr(feature = "trace-spans", tracing::instrument(skip(self)))]
    pub async fn refresh_album(&self, pin_id: PinId) -> Result<Vec<Photo>, SyncError> {
        let pin = self.pin(pin_id).await?;
        let previous = self.album_state(pin_id);
        self.set_state(pin_id, AlbumState::Refreshing);

        let removed = match self.store.clear_photos_async(pin_id).await {
            Ok(ids) => ids,
            Err(e) => {
                self.set_state(pin_id, previous);
                return Err(SyncError::StoreError(format!("Failed to clear album: {}", e)));
            }
        };
        if !removed.is_empty() {
            self.emit(AlbumEvent::PhotosRemoved {
                pin_id,
                photo_ids: removed,
            });
        }

        self.set_state(pin_id, AlbumState::Loading);
        match self.fetch_album(&pin).await {
            Ok(photos) => {
                self.set_state(pin_id, AlbumState::Populated);
                Ok(photos)
            }
            Err(e) => {
                self.set_state(pin_id, AlbumState::Empty);
                Err(e)
            }
        }
    }

    async fn fetch_album(&self, pin: &Pin) -> Result<Vec<Photo>, SyncError> {
        let page = self
            .client
            .random_album(pin.latitude, pin.longitude)
            .await
            .map_err(|e| SyncError::SearchError(format!("Failed to search photos: {}", e)))?;
        tracing::info!(pin = pin.id, photos = page.photo_urls.len(), "Fetched album");

        let photo_ids = self
            .store
            .add_photos_async(pin.id, page.photo_urls)
            .await
            .map_err(|e| SyncError::StoreError(format!("Failed to persist album: {}", e)))?;
        if !photo_ids.is_empty() {
            self.emit(AlbumEvent::PhotosAdded {
                pin_id: pin.id,
                photo_ids,
            });
        }

        self.store
            .list_photos_async(pin.id)
            .await
            .map_err(|e| SyncError::StoreError(format!("Failed to list photos: {}", e)))
    }

    /// Materialize a photo's bytes unless they are already present. Returns
    /// `None` when the photo was deleted in the meantime; that race is
    /// harmless and not surfaced.
    #[cfg_attr(feature = "trace-spans", tracing::instrument(skip(self)))]
    pub async fn ensure_photo(&self, photo_id: PhotoId) -> Result<Option<Photo>, SyncError> {
        let photo = self
            .store
            .get_photo_async(photo_id)
            .await
            .map_err(|e| SyncError::StoreError(format!("Failed to load photo: {}", e)))?;
        let Some(photo) = photo else {
            tracing::debug!(photo = photo_id, "Photo gone before download started");
            return Ok(None);
        };
        if photo.image_data.is_some() {
            return Ok(Some(photo));
        }

        let bytes = self
            .client
            .download_photo(&photo.remote_url)
            .await
            .map_err(|e| SyncError::DownloadError(format!("Failed to download photo: {}", e)))?;

        match self.store.set_photo_bytes_async(photo_id, bytes.clone()).await {
            Ok(()) => {
                self.emit(AlbumEvent::PhotoLoaded {
                    pin_id: photo.pin_id,
                    photo_id,
                });
                Ok(Some(Photo {
                    image_data: Some(bytes),
                    ..photo
                }))
            }
            // The photo was deleted while its download was in flight; the
            // bytes are discarded.
            Err(StoreError::PhotoNotFound(_)) => {
                tracing::debug!(photo = photo_id, "Discarding download for deleted photo");
                Ok(None)
            }
            Err(e) => Err(SyncError::StoreError(format!(
                "Failed to store photo bytes: {}",
                e
            ))),
        }
    }

    /// Delete exactly the given photos. No album state transition.
    #[cfg_attr(feature = "trace-spans", tracing::instrument(skip(self, photo_ids)))]
    pub async fn delete_photos(
        &self,
        pin_id: PinId,
        photo_ids: Vec<PhotoId>,
    ) -> Result<(), SyncError> {
        if photo_ids.is_empty() {
            return Ok(());
        }
        self.store
            .delete_photos_async(photo_ids.clone())
            .await
            .map_err(|e| SyncError::StoreError(format!("Failed to delete photos: {}", e)))?;
        self.emit(AlbumEvent::PhotosRemoved { pin_id, photo_ids });
        Ok(())
    }

    /// Download bytes for every pending photo of a pin, with at most
    /// `concurrency` downloads in flight. Per-photo failures are logged and
    /// counted, never fatal. Returns the number of photos materialized.
    #[cfg_attr(feature = "trace-spans", tracing::instrument(skip(self)))]
    pub async fn preload_album(&self, pin_id: PinId, concurrency: usize) -> Result<u64, SyncError> {
        let photos = self
            .store
            .list_photos_async(pin_id)
            .await
            .map_err(|e| SyncError::StoreError(format!("Failed to list photos: {}", e)))?;
        let pending: Vec<PhotoId> = photos
            .iter()
            .filter(|p| p.is_pending())
            .map(|p| p.id)
            .collect();

        let concurrency = concurrency.max(1);
        let mut queue = pending.into_iter();
        let mut in_flight = JoinSet::new();
        let mut loaded = 0u64;
        let mut failed = 0u64;
        loop {
            while in_flight.len() < concurrency {
                let Some(photo_id) = queue.next() else { break };
                let sync = self.clone();
                in_flight.spawn(async move { (photo_id, sync.ensure_photo(photo_id).await) });
            }
            let Some(joined) = in_flight.join_next().await else { break };
            match joined {
                Ok((_, Ok(Some(_)))) => loaded += 1,
                Ok((_, Ok(None))) => {}
                Ok((photo_id, Err(e))) => {
                    failed += 1;
                    tracing::warn!(photo = photo_id, "Preload failed: {}", e);
                }
                Err(e) => {
                    failed += 1;
                    tracing::warn!("Preload task failed to run: {}", e);
                }
            }
        }
        tracing::info!(pin = pin_id, loaded, failed, "Preload finished");
        Ok(loaded)
    }
}

/// View-local selection of album entries; never touches the store.
#[derive(Debug, Clone, Default)]
pub struct Selection {
    ids: HashSet<PhotoId>,
}

impl Selection {
    pub fn new() -> Self {
        Self::default()
    }

    /// Toggle a photo in and out of the selection, returning whether it is
    /// selected afterwards.
    pub fn toggle(&mut self, photo_id: PhotoId) -> bool {
        if self.ids.remove(&photo_id) {
            false
        } else {
            self.ids.insert(photo_id);
            true
        }
    }

    pub fn contains(&self, photo_id: PhotoId) -> bool {
        self.ids.contains(&photo_id)
    }

    pub fn is_empty(&self) -> bool {
        self.ids.is_empty()
    }

    pub fn len(&self) -> usize {
        self.ids.len()
    }

    pub fn clear(&mut self) {
        self.ids.clear();
    }

    /// Snapshot of the selected ids.
    pub fn ids(&self) -> Vec<PhotoId> {
        self.ids.iter().copied().collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::NamedTempFile;

    #[test]
    fn test_selection_toggles_and_clears() {
        let mut selection = Selection::new();
        assert!(selection.is_empty());

        assert!(selection.toggle(1));
        assert!(selection.toggle(2));
        assert!(!selection.toggle(1));

        assert!(selection.contains(2));
        assert_eq!(selection.len(), 1);
        assert_eq!(selection.ids(), vec![2]);

        selection.clear();
        assert!(selection.is_empty());
    }

    #[test]
    fn test_album_state_defaults_to_empty() {
        let file = NamedTempFile::new().expect("create temp file");
        let store = PinStore::new(file.path()).expect("create pin store");
        let sync = AlbumSync::new(FlickrClient::new("key".into()), store);
        assert_eq!(sync.album_state(42), AlbumState::Empty);
    }
}
