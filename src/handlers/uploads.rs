/// Direct upload ingress
///
/// One-shot multipart path: a single `file` part is streamed to disk under
/// a hard 200 MiB cap, re-validated against the session, renamed so its
/// basename equals the upload id, and handed to the job queue. Any failure
/// removes the temp file.
use crate::config::Config;
use crate::db::{SharedStore, VideoStore};
use crate::error::{AppError, Result};
use crate::models::{ApiResponse, DirectUploadResponse, TranscodeJob, UploadType, VideoStatus};
use crate::queue::JobQueue;
use crate::services::validation::{error_line, validate_upload, DIRECT_MAX_BYTES};
use actix_multipart::Multipart;
use actix_web::{web, HttpResponse};
use futures::StreamExt;
use std::path::Path;
use std::sync::Arc;
use tokio::io::AsyncWriteExt;
use tracing::info;
use uuid::Uuid;

async fn discard_temp(path: &Path) {
    let _ = tokio::fs::remove_file(path).await;
}

/// Receive the file for a session in one shot
/// POST /api/v1/video/{id}/upload
pub async fn direct_upload(
    store: web::Data<SharedStore>,
    config: web::Data<Config>,
    queue: web::Data<Arc<JobQueue>>,
    id: web::Path<String>,
    mut payload: Multipart,
) -> Result<HttpResponse> {
    let upload_id = Uuid::parse_str(&id)
        .map_err(|_| AppError::Validation("Invalid upload ID".to_string()))?;

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

    tokio::fs::create_dir_all(&config.upload.upload_path).await?;
    let temp_path = config
        .upload
        .upload_path
        .join(format!("{}.part", upload_id));

    let mut file = tokio::fs::File::create(&temp_path).await?;
    let mut received: u64 = 0;
    let mut seen_file_part = false;

    while let Some(field) = payload.next().await {
        let mut field = field.map_err(|e| {
            AppError::Validation(format!("Multipart error: {}", e))
        })?;

        if field.name() != "file" {
            continue;
        }
        seen_file_part = true;

        while let Some(chunk) = field.next().await {
            let data = match chunk {
                Ok(data) => data,
                Err(e) => {
                    discard_temp(&temp_path).await;
                    return Err(AppError::Validation(format!("Upload read error: {}", e)));
                }
            };

            received += data.len() as u64;
            if received > DIRECT_MAX_BYTES {
                discard_temp(&temp_path).await;
                return Err(AppError::Validation(
                    "filesize: file exceeds the 200MB limit for direct uploads".to_string(),
                ));
            }

            if let Err(e) = file.write_all(&data).await {
                discard_temp(&temp_path).await;
                return Err(e.into());
            }
        }
    }

    if let Err(e) = file.flush().await {
        discard_temp(&temp_path).await;
        return Err(e.into());
    }
    drop(file);

    if !seen_file_part || received == 0 {
        discard_temp(&temp_path).await;
        return Err(AppError::Validation(
            "multipart field 'file' is required".to_string(),
        ));
    }

    // Second validation pass against the bytes that actually arrived.
    if let Err(errors) = validate_upload(
        &record.filename,
        received as i64,
        UploadType::Direct,
        &config.upload,
    ) {
        discard_temp(&temp_path).await;
        return Err(AppError::Validation(error_line(&errors)));
    }

    // Basename becomes the upload id so every later stage can find the file.
    let final_path = config.upload.upload_path.join(upload_id.to_string());
    if let Err(e) = tokio::fs::rename(&temp_path, &final_path).await {
        discard_temp(&temp_path).await;
        return Err(e.into());
    }

    let job = TranscodeJob {
        upload_id,
        file_path: final_path.to_string_lossy().into_owned(),
        filename: record.filename.clone(),
        packager: record.packager.clone(),
        callback_url: record.callback_url.clone(),
        s3_path: record.s3_path.clone(),
        upload_to_s3: record.upload_to_s3,
    };

    if let Err(e) = queue.publish(&job).await {
        discard_temp(&final_path).await;
        return Err(e);
    }

    info!(
        upload_id = %upload_id,
        bytes = received,
        "Direct upload accepted and queued"
    );

    Ok(HttpResponse::Ok().json(ApiResponse::success(
        "Upload received",
        DirectUploadResponse {
            upload_id,
            filename: record.filename,
            status: VideoStatus::Processing,
        },
    )))
}
