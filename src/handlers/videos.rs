/// Video session endpoints
use crate::config::Config;
use crate::db::{SharedStore, VideoStore};
use crate::error::{AppError, Result};
use crate::models::{ApiResponse, CallbackStatusResponse, CreateSessionRequest};
use crate::services::session;
use actix_web::{web, HttpResponse};
use uuid::Uuid;

fn parse_id(raw: &str) -> Result<Uuid> {
    Uuid::parse_str(raw).map_err(|_| AppError::Validation("Invalid upload ID".to_string()))
}

/// Create an upload session
/// POST /api/v1/video/create
pub async fn create_session(
    store: web::Data<SharedStore>,
    config: web::Data<Config>,
    req: web::Json<CreateSessionRequest>,
) -> Result<HttpResponse> {
    let response =
        session::create_session(store.get_ref(), config.get_ref(), req.into_inner()).await?;
    Ok(HttpResponse::Ok().json(ApiResponse::success("Upload session created", response)))
}

/// Full record for a video
/// GET /api/v1/video/{id}/status
pub async fn get_status(
    store: web::Data<SharedStore>,
    id: web::Path<String>,
) -> Result<HttpResponse> {
    let upload_id = parse_id(&id)?;
    let record = store
        .get(upload_id)
        .await?
        .ok_or_else(|| AppError::NotFound(format!("Video {} not found", upload_id)))?;

    Ok(HttpResponse::Ok().json(ApiResponse::success("Video status", record)))
}

/// Webhook delivery state for a video
/// GET /api/v1/video/{id}/callback-status
pub async fn get_callback_status(
    store: web::Data<SharedStore>,
    id: web::Path<String>,
) -> Result<HttpResponse> {
    let upload_id = parse_id(&id)?;
    let record = store
        .get(upload_id)
        .await?
        .ok_or_else(|| AppError::NotFound(format!("Video {} not found", upload_id)))?;

    Ok(HttpResponse::Ok().json(ApiResponse::success(
        "Callback status",
        CallbackStatusResponse::from(&record),
    )))
}

/// Admin listing of every record
/// GET /api/v1/videos
pub async fn list_videos(store: web::Data<SharedStore>) -> Result<HttpResponse> {
    let records = store.list_all().await?;
    Ok(HttpResponse::Ok().json(ApiResponse::success("Videos", records)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::FakeVideoStore;
    use crate::models::{UploadType, VideoRecord};
    use actix_web::{test, App};
    use std::sync::Arc;

    fn shared_store() -> SharedStore {
        Arc::new(FakeVideoStore::new())
    }

    #[actix_web::test]
    async fn test_get_status_unknown_and_bad_id() {
        let store = shared_store();
        let app = test::init_service(
            App::new()
                .app_data(web::Data::new(store))
                .route("/video/{id}/status", web::get().to(get_status)),
        )
        .await;

        let req = test::TestRequest::get()
            .uri(&format!("/video/{}/status", Uuid::new_v4()))
            .to_request();
        let resp = test::call_service(&app, req).await;
        assert_eq!(resp.status(), 404);

        let req = test::TestRequest::get()
            .uri("/video/not-a-uuid/status")
            .to_request();
        let resp = test::call_service(&app, req).await;
        assert_eq!(resp.status(), 400);
    }

    #[actix_web::test]
    async fn test_get_status_returns_envelope() {
        let store = shared_store();
        let record = VideoRecord::new(
            Uuid::new_v4(),
            "a.mp4".to_string(),
            None,
            None,
            false,
            UploadType::Resumable,
        );
        store.create(record.clone()).await.unwrap();

        let app = test::init_service(
            App::new()
                .app_data(web::Data::new(store))
                .route("/video/{id}/status", web::get().to(get_status)),
        )
        .await;

        let req = test::TestRequest::get()
            .uri(&format!("/video/{}/status", record.id))
            .to_request();
        let body: serde_json::Value = test::call_and_read_body_json(&app, req).await;
        assert_eq!(body["status"], "success");
        assert_eq!(body["data"]["id"], record.id.to_string());
        assert_eq!(body["data"]["status"], "uploading");
        assert_eq!(body["data"]["progress"], 0);
    }

    #[actix_web::test]
    async fn test_callback_status_projection() {
        let store = shared_store();
        let record = VideoRecord::new(
            Uuid::new_v4(),
            "a.mp4".to_string(),
            Some("https://example.com/hook".to_string()),
            None,
            false,
            UploadType::Direct,
        );
        store.create(record.clone()).await.unwrap();

        let app = test::init_service(
            App::new()
                .app_data(web::Data::new(store))
                .route(
                    "/video/{id}/callback-status",
                    web::get().to(get_callback_status),
                ),
        )
        .await;

        let req = test::TestRequest::get()
            .uri(&format!("/video/{}/callback-status", record.id))
            .to_request();
        let body: serde_json::Value = test::call_and_read_body_json(&app, req).await;
        assert_eq!(body["data"]["callbackUrl"], "https://example.com/hook");
        assert_eq!(body["data"]["callbackStatus"], "pending");
        assert_eq!(body["data"]["callbackRetryCount"], 0);
        // The projection does not leak the full record.
        assert!(body["data"].get("streamUrl").is_none());
    }
}
