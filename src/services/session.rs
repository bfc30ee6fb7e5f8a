/// Upload session creation
///
/// Mints the upload id, inserts the record, and computes the URLs the
/// client will eventually find its artifacts under.
use crate::config::Config;
use crate::db::{SharedStore, StoreError, VideoStore};
use crate::error::AppError;
use crate::models::{
    CreateSessionRequest, CreateSessionResponse, UploadType, VideoRecord,
};
use crate::services::validation::{error_line, validate_upload};
use tracing::info;
use uuid::Uuid;

/// Advisory session lifetime; the core does not actively expire sessions.
pub const SESSION_EXPIRES_IN: u64 = 3600;

/// Trim and check a custom object-store prefix. Only `[A-Za-z0-9/_-]`
/// survives, which also keeps traversal sequences out of key space.
pub fn sanitize_s3_path(raw: &str) -> Result<String, AppError> {
    let trimmed = raw.trim_matches('/');
    if trimmed.is_empty()
        || !trimmed
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '/' || c == '_' || c == '-')
    {
        return Err(AppError::Validation(
            "s3Path may only contain letters, digits, '/', '_' and '-'".to_string(),
        ));
    }
    Ok(trimmed.to_string())
}

pub async fn create_session(
    store: &SharedStore,
    config: &Config,
    req: CreateSessionRequest,
) -> Result<CreateSessionResponse, AppError> {
    let upload_type = match req.upload_type.as_deref() {
        None => UploadType::Resumable,
        Some(raw) => UploadType::from_str(raw).ok_or_else(|| {
            AppError::Validation(format!(
                "type must be one of tus, resumable or direct (got {})",
                raw
            ))
        })?,
    };

    validate_upload(&req.filename, req.filesize, upload_type, &config.upload)
        .map_err(|errors| AppError::Validation(error_line(&errors)))?;

    let s3_path = req
        .s3_path
        .as_deref()
        .map(sanitize_s3_path)
        .transpose()?;

    let upload_to_s3 = req.upload_to_s3.unwrap_or(false);
    let upload_id = Uuid::new_v4();

    let record = VideoRecord::new(
        upload_id,
        req.filename.clone(),
        req.callback_url.clone(),
        s3_path,
        upload_to_s3,
        upload_type,
    );
    let prefix = record.key_prefix();

    store.create(record).await.map_err(|e| match e {
        StoreError::AlreadyExists(id) => {
            AppError::Internal(format!("upload id collision: {}", id))
        }
        other => other.into(),
    })?;

    let upload_url = match upload_type {
        UploadType::Resumable => format!(
            "{}/api/v1/tus/files/{}",
            config.server.public_host, upload_id
        ),
        UploadType::Direct => format!(
            "{}/api/v1/video/{}/upload",
            config.server.public_host, upload_id
        ),
    };

    let video_url = config.s3.object_url(&format!("{}/index.m3u8", prefix));
    let mp4_url = upload_to_s3.then(|| config.s3.object_url(&format!("{}/video.mp4", prefix)));

    info!(
        upload_id = %upload_id,
        filename = %req.filename,
        upload_type = upload_type.as_str(),
        "Upload session created"
    );

    Ok(CreateSessionResponse {
        upload_id,
        upload_url,
        video_url,
        expires_in: SESSION_EXPIRES_IN,
        mp4_url,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{AmqpConfig, AuthConfig, S3Config, ServerConfig, UploadConfig};
    use crate::db::FakeVideoStore;
    use crate::models::VideoStatus;
    use std::path::PathBuf;
    use std::sync::Arc;

    fn config() -> Config {
        Config {
            server: ServerConfig {
                port: 3000,
                public_host: "http://localhost:3000".to_string(),
            },
            upload: UploadConfig {
                upload_path: PathBuf::from("/tmp/uploads"),
                max_file_size: 100 * 1024 * 1024,
                allowed_types: vec!["video/mp4".to_string()],
            },
            s3: S3Config {
                access_key: String::new(),
                secret_key: String::new(),
                endpoint: "s3.example.com".to_string(),
                region: "us-east-1".to_string(),
                bucket: "media".to_string(),
            },
            amqp: AmqpConfig {
                user: "guest".to_string(),
                pass: "guest".to_string(),
                host: "localhost".to_string(),
                port: 5672,
            },
            auth: AuthConfig {
                api_key: "k".to_string(),
            },
        }
    }

    fn shared_store() -> SharedStore {
        Arc::new(FakeVideoStore::new())
    }

    fn request(filename: &str, filesize: i64) -> CreateSessionRequest {
        CreateSessionRequest {
            filename: filename.to_string(),
            filesize,
            upload_type: None,
            callback_url: None,
            s3_path: None,
            upload_to_s3: None,
        }
    }

    #[test]
    fn test_sanitize_s3_path() {
        assert_eq!(sanitize_s3_path("/v2/media/").unwrap(), "v2/media");
        assert_eq!(sanitize_s3_path("a_b-c/d").unwrap(), "a_b-c/d");
        assert!(sanitize_s3_path("../etc").is_err());
        assert!(sanitize_s3_path("a b").is_err());
        assert!(sanitize_s3_path("//").is_err());
    }

    #[tokio::test]
    async fn test_create_session_defaults_to_resumable() {
        let store = shared_store();
        let resp = create_session(&store, &config(), request("a.mp4", 10_485_760))
            .await
            .unwrap();

        assert!(resp
            .upload_url
            .contains(&format!("/api/v1/tus/files/{}", resp.upload_id)));
        assert_eq!(
            resp.video_url,
            format!("media.s3.example.com/{}/index.m3u8", resp.upload_id)
        );
        assert_eq!(resp.expires_in, 3600);
        assert!(resp.mp4_url.is_none());

        let record = store.get(resp.upload_id).await.unwrap().unwrap();
        assert_eq!(record.status, VideoStatus::Uploading);
        assert_eq!(record.progress, 0);
        assert_eq!(record.packager, "ffmpeg");
    }

    #[tokio::test]
    async fn test_create_session_direct_routing_and_mp4_url() {
        let store = shared_store();
        let mut req = request("a.mp4", 1024);
        req.upload_type = Some("direct".to_string());
        req.upload_to_s3 = Some(true);

        let resp = create_session(&store, &config(), req).await.unwrap();
        assert!(resp
            .upload_url
            .ends_with(&format!("/api/v1/video/{}/upload", resp.upload_id)));
        assert_eq!(
            resp.mp4_url.unwrap(),
            format!("media.s3.example.com/{}/video.mp4", resp.upload_id)
        );
    }

    #[tokio::test]
    async fn test_create_session_custom_prefix_round_trip() {
        let store = shared_store();
        let mut req = request("a.mp4", 1024);
        req.s3_path = Some("/v2/media".to_string());

        let resp = create_session(&store, &config(), req).await.unwrap();
        assert_eq!(
            resp.video_url,
            format!("media.s3.example.com/v2/media/{}/index.m3u8", resp.upload_id)
        );

        // The stored record computes the same key prefix the URL advertises.
        let record = store.get(resp.upload_id).await.unwrap().unwrap();
        assert_eq!(record.key_prefix(), format!("v2/media/{}", resp.upload_id));
    }

    #[tokio::test]
    async fn test_create_session_rejects_bad_path_and_type() {
        let store = shared_store();

        let mut req = request("a.mp4", 1024);
        req.s3_path = Some("../etc".to_string());
        let err = create_session(&store, &config(), req).await.unwrap_err();
        assert!(matches!(err, AppError::Validation(_)));

        let mut req = request("a.mp4", 1024);
        req.upload_type = Some("carrier-pigeon".to_string());
        let err = create_session(&store, &config(), req).await.unwrap_err();
        assert!(matches!(err, AppError::Validation(_)));
    }

    #[tokio::test]
    async fn test_create_session_oversize_direct_mentions_limit() {
        let store = shared_store();
        let mut req = request("b.mp4", 262_144_000);
        req.upload_type = Some("direct".to_string());

        let err = create_session(&store, &config(), req).await.unwrap_err();
        match err {
            AppError::Validation(msg) => assert!(msg.contains("200MB")),
            other => panic!("expected validation error, got {other:?}"),
        }
    }
}
