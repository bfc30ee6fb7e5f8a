/// Vellum Media Service - HTTP server and transcode worker
///
/// Boots the record store, the job queue, the worker and callback sweeper,
/// then serves the upload API until a shutdown signal arrives.
use actix_web::{middleware::Logger, web, App, HttpResponse, HttpServer};
use std::io;
use std::sync::Arc;
use tracing::info;
use vellum_media::db::{SharedStore, SqliteVideoStore};
use vellum_media::handlers;
use vellum_media::middleware::ApiKeyAuth;
use vellum_media::queue::JobQueue;
use vellum_media::services::publisher::ObjectPublisher;
use vellum_media::services::transcoder::Transcoder;
use vellum_media::services::webhooks::WebhookDispatcher;
use vellum_media::worker::Worker;
use vellum_media::Config;

async fn shutdown_signal() {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};

        let mut terminate =
            signal(SignalKind::terminate()).expect("Failed to install SIGTERM handler");

        tokio::select! {
            _ = tokio::signal::ctrl_c() => {},
            _ = terminate.recv() => {},
        }
    }

    #[cfg(not(unix))]
    {
        tokio::signal::ctrl_c()
            .await
            .expect("Failed to install Ctrl+C handler");
    }
}

#[actix_web::main]
async fn main() -> io::Result<()> {
    tracing_subscriber::fmt::init();

    let config = match Config::from_env() {
        Ok(cfg) => cfg,
        Err(e) => {
            tracing::error!("Configuration loading failed: {e}");
            eprintln!("ERROR: Failed to load configuration: {e}");
            std::process::exit(1);
        }
    };

    if config.auth.api_key.is_empty() {
        tracing::warn!("API_KEY not configured; authenticated endpoints will reject all requests");
    }

    if let Err(e) = std::fs::create_dir_all(&config.upload.upload_path) {
        tracing::error!("Failed to create upload directory: {e}");
        std::process::exit(1);
    }

    let store: SharedStore =
        match SqliteVideoStore::open(&config.upload.upload_path.join("videos.db")) {
            Ok(store) => Arc::new(store),
            Err(e) => {
                tracing::error!("Record store unopenable: {e}");
                eprintln!("ERROR: Failed to open record store: {e}");
                std::process::exit(1);
            }
        };

    let queue = match JobQueue::connect(&config.amqp).await {
        Ok(queue) => Arc::new(queue),
        Err(e) => {
            tracing::error!("Queue unreachable: {e}");
            eprintln!("ERROR: Failed to connect to message broker: {e}");
            std::process::exit(1);
        }
    };

    let publisher = Arc::new(ObjectPublisher::connect(&config.s3).await);
    let transcoder = Arc::new(Transcoder::new(
        store.clone(),
        publisher,
        config.s3.clone(),
    ));
    let dispatcher = Arc::new(WebhookDispatcher::new(store.clone()));

    let worker = Arc::new(Worker::new(
        store.clone(),
        transcoder,
        dispatcher.clone(),
        config.upload.upload_path.clone(),
    ));
    worker.spawn(queue.clone());
    dispatcher.spawn_sweeper();

    let bind_address = format!("0.0.0.0:{}", config.server.port);
    info!("Vellum media service starting on {bind_address}");

    let api_key = config.auth.api_key.clone();
    let server = HttpServer::new(move || {
        App::new()
            .app_data(web::Data::new(config.clone()))
            .app_data(web::Data::new(store.clone()))
            .app_data(web::Data::new(queue.clone()))
            .wrap(Logger::default())
            .route(
                "/api/v1/health",
                web::get()
                    .to(|| async { HttpResponse::Ok().json(serde_json::json!({"status": "ok"})) }),
            )
            // Hook callbacks from the resumable-upload server; admission is
            // gated on the session record, not the bearer token.
            .service(
                web::scope("/api/v1/tus")
                    .route("/hooks", web::post().to(handlers::tus_hooks::tus_hook)),
            )
            .service(
                web::scope("/api/v1")
                    .wrap(ApiKeyAuth::new(api_key.clone()))
                    .route(
                        "/video/create",
                        web::post().to(handlers::videos::create_session),
                    )
                    .route(
                        "/video/{id}/upload",
                        web::post().to(handlers::uploads::direct_upload),
                    )
                    .route(
                        "/video/{id}/status",
                        web::get().to(handlers::videos::get_status),
                    )
                    .route(
                        "/video/{id}/callback-status",
                        web::get().to(handlers::videos::get_callback_status),
                    )
                    .route("/videos", web::get().to(handlers::videos::list_videos)),
            )
    })
    .bind(&bind_address)?
    .run();

    let server_handle = server.handle();
    let mut server_task = tokio::spawn(server);

    tokio::select! {
        _ = shutdown_signal() => {
            info!("Shutdown signal received");
            server_handle.stop(true).await;
            let _ = (&mut server_task).await;
        }
        result = &mut server_task => {
            match result {
                Ok(Ok(())) => info!("HTTP server stopped"),
                Ok(Err(e)) => {
                    tracing::error!("HTTP server error: {e}");
                    return Err(e);
                }
                Err(e) => {
                    tracing::error!("HTTP server task failed: {e}");
                    return Err(io::Error::other(e.to_string()));
                }
            }
        }
    }

    info!("Vellum media service shutting down");
    Ok(())
}
