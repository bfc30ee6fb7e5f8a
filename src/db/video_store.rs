use crate::db::error::StoreError;
use crate::models::{VideoPatch, VideoRecord};
use async_trait::async_trait;
use std::sync::Arc;
use uuid::Uuid;

/// Shared handle every component mutates records through
pub type SharedStore = Arc<dyn VideoStore>;

/// VideoStore trait defining the interface for the durable per-video record store.
///
/// The store is the sole owner of the record; all mutations go through
/// `update` or the atomic `try_acquire_for_processing` guard.
#[async_trait]
pub trait VideoStore: Send + Sync + 'static {
    /// Insert a new record. Fails if the id already exists.
    async fn create(&self, record: VideoRecord) -> Result<(), StoreError>;

    /// Fetch a record by id.
    async fn get(&self, id: Uuid) -> Result<Option<VideoRecord>, StoreError>;

    /// Apply a partial update under the row lock and return the new record.
    /// A patch carrying `status = completed` also stamps `completed_at`.
    async fn update(&self, id: Uuid, patch: VideoPatch) -> Result<VideoRecord, StoreError>;

    /// All records, newest first, for the admin listing view.
    async fn list_all(&self) -> Result<Vec<VideoRecord>, StoreError>;

    /// Completed records with a callback URL still pending delivery and
    /// attempts left, oldest first.
    async fn list_pending_callbacks(
        &self,
        max_attempts: i32,
    ) -> Result<Vec<VideoRecord>, StoreError>;

    /// The atomic guard. In one statement, attempt the transition
    ///
    ///   status in {uploading, failed}
    ///   or (status = processing and progress <= 10)
    ///     =>  status := processing, progress := 10
    ///
    /// Returns whether the transition was won, plus the current record.
    /// A worker that died before meaningful progress can be re-driven by
    /// the next delivery; one that died after substantial progress cannot.
    async fn try_acquire_for_processing(
        &self,
        id: Uuid,
    ) -> Result<(bool, Option<VideoRecord>), StoreError>;
}

/// Implementation of VideoStore for Arc<T> so components can share one
/// store instance without caring about the concrete type.
#[async_trait]
impl<T: VideoStore + ?Sized> VideoStore for Arc<T> {
    async fn create(&self, record: VideoRecord) -> Result<(), StoreError> {
        (**self).create(record).await
    }

    async fn get(&self, id: Uuid) -> Result<Option<VideoRecord>, StoreError> {
        (**self).get(id).await
    }

    async fn update(&self, id: Uuid, patch: VideoPatch) -> Result<VideoRecord, StoreError> {
        (**self).update(id, patch).await
    }

    async fn list_all(&self) -> Result<Vec<VideoRecord>, StoreError> {
        (**self).list_all().await
    }

    async fn list_pending_callbacks(
        &self,
        max_attempts: i32,
    ) -> Result<Vec<VideoRecord>, StoreError> {
        (**self).list_pending_callbacks(max_attempts).await
    }

    async fn try_acquire_for_processing(
        &self,
        id: Uuid,
    ) -> Result<(bool, Option<VideoRecord>), StoreError> {
        (**self).try_acquire_for_processing(id).await
    }
}
