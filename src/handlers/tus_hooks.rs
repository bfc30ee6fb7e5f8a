/// Resumable upload hooks
///
/// The resumable protocol itself is served by an external tus-style server
/// mounted over the upload directory; this endpoint receives its hook
/// callbacks. `pre-create` gates admission on the session record and
/// re-runs validation; `post-finish` marks the bytes arrived and enqueues
/// the transcode job.
use crate::config::Config;
use crate::db::{SharedStore, VideoStore};
use crate::error::{AppError, Result};
use crate::models::{ApiResponse, TranscodeJob, UploadType, VideoPatch, VideoStatus};
use crate::queue::JobQueue;
use crate::services::validation::{error_line, validate_upload};
use actix_web::{web, HttpResponse};
use serde::Deserialize;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{debug, info};
use uuid::Uuid;

#[derive(Debug, Deserialize)]
pub struct HookRequest {
    #[serde(rename = "Type")]
    pub hook_type: String,
    #[serde(rename = "Event")]
    pub event: HookEvent,
}

#[derive(Debug, Deserialize)]
pub struct HookEvent {
    #[serde(rename = "Upload")]
    pub upload: HookUpload,
}

#[derive(Debug, Deserialize, Default)]
pub struct HookUpload {
    #[serde(rename = "ID", default)]
    pub id: String,
    #[serde(rename = "Size", default)]
    pub size: i64,
    #[serde(rename = "MetaData", default)]
    pub metadata: HashMap<String, String>,
    #[serde(rename = "Storage", default)]
    pub storage: Option<HookStorage>,
}

#[derive(Debug, Deserialize, Default)]
pub struct HookStorage {
    #[serde(rename = "Path", default)]
    pub path: String,
}

fn upload_id_from(upload: &HookUpload) -> Result<Uuid> {
    let raw = upload.metadata.get("uploadId").ok_or_else(|| {
        AppError::Validation("uploadId metadata is required".to_string())
    })?;
    Uuid::parse_str(raw).map_err(|_| AppError::Validation("Invalid uploadId metadata".to_string()))
}

/// POST /api/v1/tus/hooks
pub async fn tus_hook(
    store: web::Data<SharedStore>,
    config: web::Data<Config>,
    queue: web::Data<Arc<JobQueue>>,
    req: web::Json<HookRequest>,
) -> Result<HttpResponse> {
    let req = req.into_inner();
    match req.hook_type.as_str() {
        "pre-create" => pre_create(&store, &config, req.event.upload).await,
        "post-finish" => post_finish(&store, &config, &queue, req.event.upload).await,
        other => {
            debug!(hook = other, "Ignoring unhandled hook type");
            Ok(HttpResponse::Ok().json(ApiResponse::success("Hook ignored", ())))
        }
    }
}

/// A non-2xx response here makes the protocol server reject the upload.
async fn pre_create(
    store: &SharedStore,
    config: &Config,
    upload: HookUpload,
) -> Result<HttpResponse> {
    let upload_id = upload_id_from(&upload)?;

    let record = store
        .get(upload_id)
        .await?
        .ok_or_else(|| AppError::NotFound(format!("Video {} not found", upload_id)))?;

    if record.status != VideoStatus::Uploading {
        return Err(AppError::Conflict(format!(
            "Video is {}, expected uploading",
            record.status.as_str()
        )));
    }

    validate_upload(
        &record.filename,
        upload.size,
        UploadType::Resumable,
        &config.upload,
    )
    .map_err(|errors| AppError::Validation(error_line(&errors)))?;

    debug!(upload_id = %upload_id, "Resumable upload admitted");
    Ok(HttpResponse::Ok().json(ApiResponse::success("Upload admitted", ())))
}

async fn post_finish(
    store: &SharedStore,
    config: &Config,
    queue: &Arc<JobQueue>,
    upload: HookUpload,
) -> Result<HttpResponse> {
    let upload_id = upload_id_from(&upload)?;

    let record = store
        .get(upload_id)
        .await?
        .ok_or_else(|| AppError::NotFound(format!("Video {} not found", upload_id)))?;

    // Bytes are all here; progress resets until the worker picks it up.
    store.update(upload_id, VideoPatch::progress(0)).await?;

    let file_path = match upload.storage.as_ref().filter(|s| !s.path.is_empty()) {
        Some(storage) => storage.path.clone(),
        None => {
            let store_id = if upload.id.is_empty() {
                upload_id.to_string()
            } else {
                upload.id.clone()
            };
            config
                .upload
                .upload_path
                .join(store_id)
                .to_string_lossy()
                .into_owned()
        }
    };

    let job = TranscodeJob {
        upload_id,
        file_path,
        filename: record.filename.clone(),
        packager: record.packager.clone(),
        callback_url: record.callback_url.clone(),
        s3_path: record.s3_path.clone(),
        upload_to_s3: record.upload_to_s3,
    };
    queue.publish(&job).await?;

    info!(upload_id = %upload_id, "Resumable upload finished and queued");
    Ok(HttpResponse::Ok().json(ApiResponse::success("Upload queued", ())))
}
