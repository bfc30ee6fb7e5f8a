/// Data models for vellum-media
///
/// This module defines structures for:
/// - VideoRecord: the sole persistent entity, keyed by upload id
/// - TranscodeJob: the queue message driving a worker run
/// - Request/response DTOs for the HTTP surface
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

// ========================================
// Status enums
// ========================================

/// Video status in the pipeline lifecycle
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum VideoStatus {
    Uploading,
    Processing,
    Completed,
    Failed,
}

impl VideoStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Uploading => "uploading",
            Self::Processing => "processing",
            Self::Completed => "completed",
            Self::Failed => "failed",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "uploading" => Some(Self::Uploading),
            "processing" => Some(Self::Processing),
            "completed" => Some(Self::Completed),
            "failed" => Some(Self::Failed),
            _ => None,
        }
    }
}

/// Webhook delivery outcome for a record
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CallbackStatus {
    Pending,
    Completed,
    Failed,
}

impl CallbackStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Completed => "completed",
            Self::Failed => "failed",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "pending" => Some(Self::Pending),
            "completed" => Some(Self::Completed),
            "failed" => Some(Self::Failed),
            _ => None,
        }
    }
}

/// How the bytes arrive. Routing hint only.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum UploadType {
    Resumable,
    Direct,
}

impl UploadType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Resumable => "resumable",
            Self::Direct => "direct",
        }
    }

    /// Accepts the wire spellings clients use ("tus" is the resumable endpoint name).
    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "resumable" | "tus" => Some(Self::Resumable),
            "direct" => Some(Self::Direct),
            _ => None,
        }
    }
}

// ========================================
// VideoRecord
// ========================================

/// The persistent per-video record
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VideoRecord {
    pub id: Uuid,
    pub filename: String,
    pub status: VideoStatus,
    pub progress: i32,
    pub stream_url: Option<String>,
    pub thumbnail_url: Option<String>,
    pub mp4_url: Option<String>,
    pub created_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
    pub error: Option<String>,
    pub packager: String,
    pub callback_url: Option<String>,
    pub callback_status: CallbackStatus,
    pub callback_retry_count: i32,
    pub callback_last_attempt: Option<DateTime<Utc>>,
    pub s3_path: Option<String>,
    pub upload_to_s3: bool,
    pub upload_type: UploadType,
}

impl VideoRecord {
    /// Fresh record at session creation time
    pub fn new(
        id: Uuid,
        filename: String,
        callback_url: Option<String>,
        s3_path: Option<String>,
        upload_to_s3: bool,
        upload_type: UploadType,
    ) -> Self {
        Self {
            id,
            filename,
            status: VideoStatus::Uploading,
            progress: 0,
            stream_url: None,
            thumbnail_url: None,
            mp4_url: None,
            created_at: Utc::now(),
            completed_at: None,
            error: None,
            packager: "ffmpeg".to_string(),
            callback_url,
            callback_status: CallbackStatus::Pending,
            callback_retry_count: 0,
            callback_last_attempt: None,
            s3_path,
            upload_to_s3,
            upload_type,
        }
    }

    /// Object-store key prefix all of this video's artifacts live under
    pub fn key_prefix(&self) -> String {
        match self.s3_path.as_deref() {
            Some(path) if !path.is_empty() => format!("{}/{}", path, self.id),
            _ => self.id.to_string(),
        }
    }
}

/// Typed partial update applied through the store's row lock
#[derive(Debug, Clone, Default)]
pub struct VideoPatch {
    pub status: Option<VideoStatus>,
    pub progress: Option<i32>,
    pub stream_url: Option<String>,
    pub thumbnail_url: Option<String>,
    pub mp4_url: Option<String>,
    pub error: Option<String>,
    /// Clears a previous failure reason (retry path)
    pub clear_error: bool,
    pub callback_status: Option<CallbackStatus>,
    pub callback_retry_count: Option<i32>,
    pub callback_last_attempt: Option<DateTime<Utc>>,
}

impl VideoPatch {
    pub fn status(status: VideoStatus) -> Self {
        Self {
            status: Some(status),
            ..Default::default()
        }
    }

    pub fn progress(progress: i32) -> Self {
        Self {
            progress: Some(progress),
            ..Default::default()
        }
    }
}

// ========================================
// Queue message
// ========================================

/// Job payload published when an upload finishes
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TranscodeJob {
    pub upload_id: Uuid,
    pub file_path: String,
    pub filename: String,
    pub packager: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub callback_url: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub s3_path: Option<String>,
    #[serde(default)]
    pub upload_to_s3: bool,
}

// ========================================
// Request / response DTOs
// ========================================

/// POST /api/v1/video/create
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateSessionRequest {
    pub filename: String,
    pub filesize: i64,
    #[serde(default, rename = "type")]
    pub upload_type: Option<String>,
    #[serde(default)]
    pub callback_url: Option<String>,
    #[serde(default)]
    pub s3_path: Option<String>,
    #[serde(default)]
    pub upload_to_s3: Option<bool>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateSessionResponse {
    pub upload_id: Uuid,
    pub upload_url: String,
    pub video_url: String,
    pub expires_in: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub mp4_url: Option<String>,
}

/// POST /api/v1/video/{id}/upload
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DirectUploadResponse {
    pub upload_id: Uuid,
    pub filename: String,
    pub status: VideoStatus,
}

/// GET /api/v1/video/{id}/callback-status
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CallbackStatusResponse {
    pub callback_url: Option<String>,
    pub callback_status: CallbackStatus,
    pub callback_retry_count: i32,
    pub callback_last_attempt: Option<DateTime<Utc>>,
}

impl From<&VideoRecord> for CallbackStatusResponse {
    fn from(record: &VideoRecord) -> Self {
        Self {
            callback_url: record.callback_url.clone(),
            callback_status: record.callback_status,
            callback_retry_count: record.callback_retry_count,
            callback_last_attempt: record.callback_last_attempt,
        }
    }
}

/// Uniform JSON envelope for all API responses
#[derive(Debug, Clone, Serialize)]
pub struct ApiResponse<T: Serialize> {
    pub status: &'static str,
    pub message: String,
    pub data: T,
}

impl<T: Serialize> ApiResponse<T> {
    pub fn success(message: impl Into<String>, data: T) -> Self {
        Self {
            status: "success",
            message: message.into(),
            data,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_round_trip() {
        for status in [
            VideoStatus::Uploading,
            VideoStatus::Processing,
            VideoStatus::Completed,
            VideoStatus::Failed,
        ] {
            assert_eq!(VideoStatus::from_str(status.as_str()), Some(status));
        }
        assert_eq!(VideoStatus::from_str("published"), None);
    }

    #[test]
    fn test_upload_type_accepts_tus_alias() {
        assert_eq!(UploadType::from_str("tus"), Some(UploadType::Resumable));
        assert_eq!(
            UploadType::from_str("resumable"),
            Some(UploadType::Resumable)
        );
        assert_eq!(UploadType::from_str("direct"), Some(UploadType::Direct));
        assert_eq!(UploadType::from_str("ftp"), None);
    }

    #[test]
    fn test_key_prefix() {
        let id = Uuid::new_v4();
        let plain = VideoRecord::new(id, "a.mp4".into(), None, None, false, UploadType::Resumable);
        assert_eq!(plain.key_prefix(), id.to_string());

        let nested = VideoRecord::new(
            id,
            "a.mp4".into(),
            None,
            Some("v2/media".into()),
            false,
            UploadType::Resumable,
        );
        assert_eq!(nested.key_prefix(), format!("v2/media/{}", id));
    }

    #[test]
    fn test_transcode_job_wire_shape() {
        let job = TranscodeJob {
            upload_id: Uuid::new_v4(),
            file_path: "/uploads/x".into(),
            filename: "a.mp4".into(),
            packager: "ffmpeg".into(),
            callback_url: None,
            s3_path: Some("v2/media".into()),
            upload_to_s3: true,
        };

        let value = serde_json::to_value(&job).unwrap();
        assert!(value.get("uploadId").is_some());
        assert!(value.get("filePath").is_some());
        assert!(value.get("s3Path").is_some());
        assert!(value.get("uploadToS3").is_some());
        // Absent optionals are omitted from the wire payload
        assert!(value.get("callbackUrl").is_none());

        let back: TranscodeJob = serde_json::from_value(value).unwrap();
        assert_eq!(back.upload_id, job.upload_id);
        assert_eq!(back.s3_path, job.s3_path);
    }

    #[test]
    fn test_record_serializes_camel_case() {
        let record = VideoRecord::new(
            Uuid::new_v4(),
            "clip.mov".into(),
            Some("https://example.com/hook".into()),
            None,
            false,
            UploadType::Direct,
        );
        let value = serde_json::to_value(&record).unwrap();
        assert_eq!(value["status"], "uploading");
        assert_eq!(value["callbackStatus"], "pending");
        assert!(value.get("streamUrl").is_some());
        assert!(value.get("createdAt").is_some());
    }
}
