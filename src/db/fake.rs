use crate::db::error::StoreError;
use crate::db::sqlite::apply_patch;
use crate::db::video_store::VideoStore;
use crate::models::{CallbackStatus, VideoPatch, VideoRecord, VideoStatus};
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::{Arc, RwLock};
use uuid::Uuid;

/// A fake in-memory implementation of the VideoStore trait for testing
#[derive(Default)]
pub struct FakeVideoStore {
    records: Arc<RwLock<HashMap<Uuid, VideoRecord>>>,
}

impl FakeVideoStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Seed a record directly, bypassing the create-only-once check
    pub fn fake_insert(&self, record: VideoRecord) {
        let mut records = self.records.write().unwrap();
        records.insert(record.id, record);
    }
}

#[async_trait]
impl VideoStore for FakeVideoStore {
    async fn create(&self, record: VideoRecord) -> Result<(), StoreError> {
        let mut records = self.records.write().unwrap();
        if records.contains_key(&record.id) {
            return Err(StoreError::AlreadyExists(record.id.to_string()));
        }
        records.insert(record.id, record);
        Ok(())
    }

    async fn get(&self, id: Uuid) -> Result<Option<VideoRecord>, StoreError> {
        let records = self.records.read().unwrap();
        Ok(records.get(&id).cloned())
    }

    async fn update(&self, id: Uuid, patch: VideoPatch) -> Result<VideoRecord, StoreError> {
        let mut records = self.records.write().unwrap();
        let record = records
            .get_mut(&id)
            .ok_or_else(|| StoreError::NotFound(id.to_string()))?;
        apply_patch(record, patch);
        Ok(record.clone())
    }

    async fn list_all(&self) -> Result<Vec<VideoRecord>, StoreError> {
        let records = self.records.read().unwrap();
        let mut all: Vec<VideoRecord> = records.values().cloned().collect();
        all.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(all)
    }

    async fn list_pending_callbacks(
        &self,
        max_attempts: i32,
    ) -> Result<Vec<VideoRecord>, StoreError> {
        let records = self.records.read().unwrap();
        let mut pending: Vec<VideoRecord> = records
            .values()
            .filter(|r| {
                r.callback_url.is_some()
                    && r.callback_status == CallbackStatus::Pending
                    && r.callback_retry_count < max_attempts
                    && r.status == VideoStatus::Completed
            })
            .cloned()
            .collect();
        pending.sort_by(|a, b| a.created_at.cmp(&b.created_at));
        Ok(pending)
    }

    async fn try_acquire_for_processing(
        &self,
        id: Uuid,
    ) -> Result<(bool, Option<VideoRecord>), StoreError> {
        let mut records = self.records.write().unwrap();
        let record = match records.get_mut(&id) {
            Some(r) => r,
            None => return Ok((false, None)),
        };

        let eligible = matches!(record.status, VideoStatus::Uploading | VideoStatus::Failed)
            || (record.status == VideoStatus::Processing && record.progress <= 10);

        if eligible {
            record.status = VideoStatus::Processing;
            record.progress = 10;
        }

        Ok((eligible, Some(record.clone())))
    }
}
