use crate::db::error::StoreError;
use crate::db::video_store::VideoStore;
use crate::models::{CallbackStatus, UploadType, VideoPatch, VideoRecord, VideoStatus};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, OptionalExtension, Row};
use std::fs;
use std::path::Path;
use std::sync::{Arc, Mutex};
use tokio::task;
use tracing::{debug, error, info};
use uuid::Uuid;

const COLUMNS: &str = "id, filename, status, progress, stream_url, thumbnail_url, mp4_url, \
     created_at, completed_at, error, packager, callback_url, callback_status, \
     callback_retry_count, callback_last_attempt, s3_path, upload_to_s3, upload_type";

/// SQLite implementation of the VideoStore trait.
///
/// A single connection behind a mutex; every operation that must be atomic
/// runs its statements while holding the lock, so the conditional UPDATE in
/// `try_acquire_for_processing` is the only synchronization point workers need.
pub struct SqliteVideoStore {
    connection: Arc<Mutex<Connection>>,
}

impl SqliteVideoStore {
    /// Open (or create) the store at the given path
    pub fn open(db_path: &Path) -> Result<Self, StoreError> {
        info!("Opening video record store at {:?}", db_path);

        if let Some(parent) = db_path.parent() {
            if !parent.exists() {
                fs::create_dir_all(parent).map_err(|e| {
                    error!("Failed to create directory {parent:?}: {e}");
                    StoreError::Open(format!("Failed to create directory: {e}"))
                })?;
            }
        }

        let connection = Connection::open(db_path)
            .map_err(|e| StoreError::Open(format!("Failed to open SQLite database: {e}")))?;

        connection
            .execute(
                "CREATE TABLE IF NOT EXISTS videos (
                    id TEXT PRIMARY KEY,
                    filename TEXT NOT NULL,
                    status TEXT NOT NULL,
                    progress INTEGER NOT NULL DEFAULT 0,
                    stream_url TEXT,
                    thumbnail_url TEXT,
                    mp4_url TEXT,
                    created_at TEXT NOT NULL,
                    completed_at TEXT,
                    error TEXT,
                    packager TEXT NOT NULL DEFAULT 'ffmpeg',
                    callback_url TEXT,
                    callback_status TEXT NOT NULL DEFAULT 'pending',
                    callback_retry_count INTEGER NOT NULL DEFAULT 0,
                    callback_last_attempt TEXT,
                    s3_path TEXT,
                    upload_to_s3 INTEGER NOT NULL DEFAULT 0,
                    upload_type TEXT NOT NULL DEFAULT 'resumable'
                )",
                [],
            )
            .map_err(|e| StoreError::Open(format!("Failed to create videos table: {e}")))?;

        connection
            .execute(
                "CREATE INDEX IF NOT EXISTS idx_videos_status ON videos(status)",
                [],
            )
            .map_err(|e| StoreError::Open(format!("Failed to create status index: {e}")))?;

        connection
            .execute(
                "CREATE INDEX IF NOT EXISTS idx_videos_pending_callbacks
                 ON videos(callback_status) WHERE callback_url IS NOT NULL",
                [],
            )
            .map_err(|e| StoreError::Open(format!("Failed to create callback index: {e}")))?;

        Ok(SqliteVideoStore {
            connection: Arc::new(Mutex::new(connection)),
        })
    }

    fn record_from_row(row: &Row<'_>) -> rusqlite::Result<VideoRecord> {
        fn text_err(idx: usize, msg: String) -> rusqlite::Error {
            rusqlite::Error::FromSqlConversionFailure(
                idx,
                rusqlite::types::Type::Text,
                Box::new(std::io::Error::new(std::io::ErrorKind::InvalidData, msg)),
            )
        }

        fn parse_datetime(idx: usize, s: String) -> rusqlite::Result<DateTime<Utc>> {
            DateTime::parse_from_rfc3339(&s)
                .map(|dt| dt.with_timezone(&Utc))
                .map_err(|e| text_err(idx, format!("bad timestamp: {e}")))
        }

        let id_str: String = row.get(0)?;
        let status_str: String = row.get(2)?;
        let created_str: String = row.get(7)?;
        let completed_str: Option<String> = row.get(8)?;
        let callback_status_str: String = row.get(12)?;
        let callback_last_str: Option<String> = row.get(14)?;
        let upload_type_str: String = row.get(17)?;

        Ok(VideoRecord {
            id: Uuid::parse_str(&id_str).map_err(|e| text_err(0, format!("bad uuid: {e}")))?,
            filename: row.get(1)?,
            status: VideoStatus::from_str(&status_str)
                .ok_or_else(|| text_err(2, format!("bad status: {status_str}")))?,
            progress: row.get(3)?,
            stream_url: row.get(4)?,
            thumbnail_url: row.get(5)?,
            mp4_url: row.get(6)?,
            created_at: parse_datetime(7, created_str)?,
            completed_at: completed_str.map(|s| parse_datetime(8, s)).transpose()?,
            error: row.get(9)?,
            packager: row.get(10)?,
            callback_url: row.get(11)?,
            callback_status: CallbackStatus::from_str(&callback_status_str)
                .ok_or_else(|| text_err(12, format!("bad callback status: {callback_status_str}")))?,
            callback_retry_count: row.get(13)?,
            callback_last_attempt: callback_last_str
                .map(|s| parse_datetime(14, s))
                .transpose()?,
            s3_path: row.get(15)?,
            upload_to_s3: row.get::<_, i64>(16)? != 0,
            upload_type: UploadType::from_str(&upload_type_str)
                .ok_or_else(|| text_err(17, format!("bad upload type: {upload_type_str}")))?,
        })
    }

    fn write_row(conn: &Connection, record: &VideoRecord, insert: bool) -> rusqlite::Result<usize> {
        let sql = if insert {
            "INSERT INTO videos (id, filename, status, progress, stream_url, thumbnail_url, \
             mp4_url, created_at, completed_at, error, packager, callback_url, callback_status, \
             callback_retry_count, callback_last_attempt, s3_path, upload_to_s3, upload_type) \
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15, ?16, ?17, ?18)"
        } else {
            "UPDATE videos SET filename = ?2, status = ?3, progress = ?4, stream_url = ?5, \
             thumbnail_url = ?6, mp4_url = ?7, created_at = ?8, completed_at = ?9, error = ?10, \
             packager = ?11, callback_url = ?12, callback_status = ?13, \
             callback_retry_count = ?14, callback_last_attempt = ?15, s3_path = ?16, \
             upload_to_s3 = ?17, upload_type = ?18 WHERE id = ?1"
        };

        conn.execute(
            sql,
            params![
                record.id.to_string(),
                record.filename,
                record.status.as_str(),
                record.progress,
                record.stream_url,
                record.thumbnail_url,
                record.mp4_url,
                record.created_at.to_rfc3339(),
                record.completed_at.map(|dt| dt.to_rfc3339()),
                record.error,
                record.packager,
                record.callback_url,
                record.callback_status.as_str(),
                record.callback_retry_count,
                record.callback_last_attempt.map(|dt| dt.to_rfc3339()),
                record.s3_path,
                record.upload_to_s3 as i64,
                record.upload_type.as_str(),
            ],
        )
    }

    fn lock(
        connection: &Arc<Mutex<Connection>>,
    ) -> Result<std::sync::MutexGuard<'_, Connection>, StoreError> {
        connection.lock().map_err(|_| {
            error!("Failed to acquire record store lock");
            StoreError::Locked
        })
    }
}

/// Apply a patch to a record in memory; shared with the in-memory fake so
/// both implementations agree on patch semantics.
pub(crate) fn apply_patch(record: &mut VideoRecord, patch: VideoPatch) {
    if let Some(status) = patch.status {
        record.status = status;
        if status == VideoStatus::Completed && record.completed_at.is_none() {
            record.completed_at = Some(Utc::now());
        }
    }
    if let Some(progress) = patch.progress {
        record.progress = progress;
    }
    if let Some(url) = patch.stream_url {
        record.stream_url = Some(url);
    }
    if let Some(url) = patch.thumbnail_url {
        record.thumbnail_url = Some(url);
    }
    if let Some(url) = patch.mp4_url {
        record.mp4_url = Some(url);
    }
    if patch.clear_error {
        record.error = None;
    } else if let Some(err) = patch.error {
        record.error = Some(err);
    }
    if let Some(status) = patch.callback_status {
        record.callback_status = status;
    }
    if let Some(count) = patch.callback_retry_count {
        record.callback_retry_count = count;
    }
    if let Some(at) = patch.callback_last_attempt {
        record.callback_last_attempt = Some(at);
    }
}

#[async_trait]
impl VideoStore for SqliteVideoStore {
    async fn create(&self, record: VideoRecord) -> Result<(), StoreError> {
        debug!(id = %record.id, filename = %record.filename, "Creating video record");

        let connection = Arc::clone(&self.connection);
        task::spawn_blocking(move || {
            let conn = Self::lock(&connection)?;
            match Self::write_row(&conn, &record, true) {
                Ok(_) => Ok(()),
                Err(rusqlite::Error::SqliteFailure(e, _))
                    if e.code == rusqlite::ErrorCode::ConstraintViolation =>
                {
                    Err(StoreError::AlreadyExists(record.id.to_string()))
                }
                Err(e) => Err(StoreError::Operation(format!(
                    "Failed to insert record: {e}"
                ))),
            }
        })
        .await
        .map_err(|e| StoreError::Operation(format!("Task panic: {e}")))?
    }

    async fn get(&self, id: Uuid) -> Result<Option<VideoRecord>, StoreError> {
        let connection = Arc::clone(&self.connection);
        let id_str = id.to_string();

        task::spawn_blocking(move || {
            let conn = Self::lock(&connection)?;
            conn.query_row(
                &format!("SELECT {COLUMNS} FROM videos WHERE id = ?1"),
                params![id_str],
                Self::record_from_row,
            )
            .optional()
            .map_err(|e| StoreError::Operation(format!("Failed to fetch record: {e}")))
        })
        .await
        .map_err(|e| StoreError::Operation(format!("Task panic: {e}")))?
    }

    async fn update(&self, id: Uuid, patch: VideoPatch) -> Result<VideoRecord, StoreError> {
        let connection = Arc::clone(&self.connection);
        let id_str = id.to_string();

        task::spawn_blocking(move || {
            // Read-modify-write entirely under the connection lock.
            let conn = Self::lock(&connection)?;
            let mut record = conn
                .query_row(
                    &format!("SELECT {COLUMNS} FROM videos WHERE id = ?1"),
                    params![id_str.clone()],
                    Self::record_from_row,
                )
                .optional()
                .map_err(|e| StoreError::Operation(format!("Failed to fetch record: {e}")))?
                .ok_or(StoreError::NotFound(id_str))?;

            apply_patch(&mut record, patch);

            Self::write_row(&conn, &record, false)
                .map_err(|e| StoreError::Operation(format!("Failed to update record: {e}")))?;

            Ok(record)
        })
        .await
        .map_err(|e| StoreError::Operation(format!("Task panic: {e}")))?
    }

    async fn list_all(&self) -> Result<Vec<VideoRecord>, StoreError> {
        let connection = Arc::clone(&self.connection);

        task::spawn_blocking(move || {
            let conn = Self::lock(&connection)?;
            let mut stmt = conn
                .prepare(&format!(
                    "SELECT {COLUMNS} FROM videos ORDER BY created_at DESC"
                ))
                .map_err(|e| StoreError::Operation(format!("Failed to prepare listing: {e}")))?;

            let rows = stmt
                .query_map([], Self::record_from_row)
                .map_err(|e| StoreError::Operation(format!("Failed to list records: {e}")))?;

            rows.collect::<rusqlite::Result<Vec<_>>>()
                .map_err(|e| StoreError::Operation(format!("Failed to read record: {e}")))
        })
        .await
        .map_err(|e| StoreError::Operation(format!("Task panic: {e}")))?
    }

    async fn list_pending_callbacks(
        &self,
        max_attempts: i32,
    ) -> Result<Vec<VideoRecord>, StoreError> {
        let connection = Arc::clone(&self.connection);

        task::spawn_blocking(move || {
            let conn = Self::lock(&connection)?;
            let mut stmt = conn
                .prepare(&format!(
                    "SELECT {COLUMNS} FROM videos \
                     WHERE callback_url IS NOT NULL \
                       AND callback_status = 'pending' \
                       AND callback_retry_count < ?1 \
                       AND status = 'completed' \
                     ORDER BY created_at ASC"
                ))
                .map_err(|e| StoreError::Operation(format!("Failed to prepare sweep: {e}")))?;

            let rows = stmt
                .query_map(params![max_attempts], Self::record_from_row)
                .map_err(|e| StoreError::Operation(format!("Failed to sweep callbacks: {e}")))?;

            rows.collect::<rusqlite::Result<Vec<_>>>()
                .map_err(|e| StoreError::Operation(format!("Failed to read record: {e}")))
        })
        .await
        .map_err(|e| StoreError::Operation(format!("Task panic: {e}")))?
    }

    async fn try_acquire_for_processing(
        &self,
        id: Uuid,
    ) -> Result<(bool, Option<VideoRecord>), StoreError> {
        let connection = Arc::clone(&self.connection);
        let id_str = id.to_string();

        task::spawn_blocking(move || {
            let conn = Self::lock(&connection)?;

            // The guard is a single conditional UPDATE; rows-affected tells
            // us whether this delivery won the transition.
            let acquired = conn
                .execute(
                    "UPDATE videos SET status = 'processing', progress = 10 \
                     WHERE id = ?1 \
                       AND (status IN ('uploading', 'failed') \
                            OR (status = 'processing' AND progress <= 10))",
                    params![id_str.clone()],
                )
                .map_err(|e| StoreError::Operation(format!("Failed to acquire record: {e}")))?;

            let record = conn
                .query_row(
                    &format!("SELECT {COLUMNS} FROM videos WHERE id = ?1"),
                    params![id_str],
                    Self::record_from_row,
                )
                .optional()
                .map_err(|e| StoreError::Operation(format!("Failed to fetch record: {e}")))?;

            Ok((acquired > 0, record))
        })
        .await
        .map_err(|e| StoreError::Operation(format!("Task panic: {e}")))?
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::UploadType;

    fn open_store(dir: &tempfile::TempDir) -> SqliteVideoStore {
        SqliteVideoStore::open(&dir.path().join("videos.db")).unwrap()
    }

    fn new_record(callback: Option<&str>) -> VideoRecord {
        VideoRecord::new(
            Uuid::new_v4(),
            "clip.mp4".to_string(),
            callback.map(|s| s.to_string()),
            None,
            false,
            UploadType::Resumable,
        )
    }

    #[tokio::test]
    async fn test_create_and_get_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let store = open_store(&dir);

        let record = new_record(Some("https://example.com/hook"));
        store.create(record.clone()).await.unwrap();

        let fetched = store.get(record.id).await.unwrap().unwrap();
        assert_eq!(fetched.id, record.id);
        assert_eq!(fetched.filename, "clip.mp4");
        assert_eq!(fetched.status, VideoStatus::Uploading);
        assert_eq!(fetched.callback_status, CallbackStatus::Pending);
        assert_eq!(
            fetched.callback_url.as_deref(),
            Some("https://example.com/hook")
        );

        assert!(store.get(Uuid::new_v4()).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_create_duplicate_fails() {
        let dir = tempfile::tempdir().unwrap();
        let store = open_store(&dir);

        let record = new_record(None);
        store.create(record.clone()).await.unwrap();
        let err = store.create(record).await.unwrap_err();
        assert!(matches!(err, StoreError::AlreadyExists(_)));
    }

    #[tokio::test]
    async fn test_acquire_from_uploading() {
        let dir = tempfile::tempdir().unwrap();
        let store = open_store(&dir);

        let record = new_record(None);
        store.create(record.clone()).await.unwrap();

        let (acquired, current) = store.try_acquire_for_processing(record.id).await.unwrap();
        assert!(acquired);
        let current = current.unwrap();
        assert_eq!(current.status, VideoStatus::Processing);
        assert_eq!(current.progress, 10);
    }

    #[tokio::test]
    async fn test_acquire_skips_in_flight_run() {
        let dir = tempfile::tempdir().unwrap();
        let store = open_store(&dir);

        let record = new_record(None);
        store.create(record.clone()).await.unwrap();
        store
            .try_acquire_for_processing(record.id)
            .await
            .unwrap();
        store
            .update(record.id, VideoPatch::progress(50))
            .await
            .unwrap();

        // Duplicate delivery after the first run made real progress.
        let (acquired, current) = store.try_acquire_for_processing(record.id).await.unwrap();
        assert!(!acquired);
        let current = current.unwrap();
        assert_eq!(current.status, VideoStatus::Processing);
        assert_eq!(current.progress, 50);
    }

    #[tokio::test]
    async fn test_acquire_redrives_crashed_early_run() {
        let dir = tempfile::tempdir().unwrap();
        let store = open_store(&dir);

        let record = new_record(None);
        store.create(record.clone()).await.unwrap();
        store
            .try_acquire_for_processing(record.id)
            .await
            .unwrap();

        // The first worker died before passing progress 10.
        let (acquired, _) = store.try_acquire_for_processing(record.id).await.unwrap();
        assert!(acquired);
    }

    #[tokio::test]
    async fn test_acquire_from_failed_and_not_from_completed() {
        let dir = tempfile::tempdir().unwrap();
        let store = open_store(&dir);

        let record = new_record(None);
        store.create(record.clone()).await.unwrap();

        let mut patch = VideoPatch::status(VideoStatus::Failed);
        patch.error = Some("ffmpeg exploded".to_string());
        store.update(record.id, patch).await.unwrap();

        let (acquired, _) = store.try_acquire_for_processing(record.id).await.unwrap();
        assert!(acquired, "explicit retry from failed is permitted");

        let mut patch = VideoPatch::status(VideoStatus::Completed);
        patch.progress = Some(100);
        patch.stream_url = Some("http://cdn/x/index.m3u8".to_string());
        store.update(record.id, patch).await.unwrap();

        let (acquired, current) = store.try_acquire_for_processing(record.id).await.unwrap();
        assert!(!acquired, "completed is terminal");
        assert_eq!(current.unwrap().status, VideoStatus::Completed);
    }

    #[tokio::test]
    async fn test_completed_patch_stamps_completed_at() {
        let dir = tempfile::tempdir().unwrap();
        let store = open_store(&dir);

        let record = new_record(None);
        store.create(record.clone()).await.unwrap();
        assert!(record.completed_at.is_none());

        let mut patch = VideoPatch::status(VideoStatus::Completed);
        patch.stream_url = Some("http://cdn/x/index.m3u8".to_string());
        let updated = store.update(record.id, patch).await.unwrap();
        assert!(updated.completed_at.is_some());
        assert!(updated.stream_url.is_some());
    }

    #[tokio::test]
    async fn test_update_missing_record() {
        let dir = tempfile::tempdir().unwrap();
        let store = open_store(&dir);

        let err = store
            .update(Uuid::new_v4(), VideoPatch::progress(50))
            .await
            .unwrap_err();
        assert!(matches!(err, StoreError::NotFound(_)));
    }

    #[tokio::test]
    async fn test_list_pending_callbacks_filters_and_orders() {
        let dir = tempfile::tempdir().unwrap();
        let store = open_store(&dir);

        // Oldest completed-with-callback record.
        let mut first = new_record(Some("https://example.com/a"));
        first.created_at = Utc::now() - chrono::Duration::minutes(10);
        store.create(first.clone()).await.unwrap();
        store
            .update(first.id, VideoPatch::status(VideoStatus::Completed))
            .await
            .unwrap();

        let second = new_record(Some("https://example.com/b"));
        store.create(second.clone()).await.unwrap();
        store
            .update(second.id, VideoPatch::status(VideoStatus::Completed))
            .await
            .unwrap();

        // Excluded: no callback url.
        let no_callback = new_record(None);
        store.create(no_callback.clone()).await.unwrap();
        store
            .update(no_callback.id, VideoPatch::status(VideoStatus::Completed))
            .await
            .unwrap();

        // Excluded: still processing.
        let processing = new_record(Some("https://example.com/c"));
        store.create(processing.clone()).await.unwrap();
        store
            .update(processing.id, VideoPatch::status(VideoStatus::Processing))
            .await
            .unwrap();

        // Excluded: retries exhausted.
        let exhausted = new_record(Some("https://example.com/d"));
        store.create(exhausted.clone()).await.unwrap();
        let mut patch = VideoPatch::status(VideoStatus::Completed);
        patch.callback_retry_count = Some(4);
        store.update(exhausted.id, patch).await.unwrap();

        let pending = store.list_pending_callbacks(4).await.unwrap();
        let ids: Vec<Uuid> = pending.iter().map(|r| r.id).collect();
        assert_eq!(ids, vec![first.id, second.id]);
    }

    #[tokio::test]
    async fn test_store_survives_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("videos.db");

        let record = new_record(None);
        {
            let store = SqliteVideoStore::open(&path).unwrap();
            store.create(record.clone()).await.unwrap();
        }

        let store = SqliteVideoStore::open(&path).unwrap();
        let fetched = store.get(record.id).await.unwrap().unwrap();
        assert_eq!(fetched.filename, record.filename);
    }
}
