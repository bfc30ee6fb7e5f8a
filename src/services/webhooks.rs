/// Webhook dispatcher
///
/// Delivers job outcomes to the session's callback URL. The first attempt
/// happens inline at job terminal state; a periodic sweeper re-drives
/// pending deliveries until success or the retry budget runs out.
use crate::db::{SharedStore, VideoStore};
use crate::models::{CallbackStatus, VideoPatch, VideoRecord, VideoStatus};
use chrono::Utc;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tracing::{error, info, warn};

/// Retry budget per record, counting every non-200 attempt
pub const MAX_CALLBACK_ATTEMPTS: i32 = 4;

const REQUEST_TIMEOUT: Duration = Duration::from_secs(10);
const SWEEP_INTERVAL: Duration = Duration::from_secs(60);

pub struct WebhookDispatcher {
    store: SharedStore,
    http_client: reqwest::Client,
}

impl WebhookDispatcher {
    pub fn new(store: SharedStore) -> Self {
        Self {
            store,
            http_client: reqwest::Client::builder()
                .timeout(REQUEST_TIMEOUT)
                .build()
                .expect("Failed to create HTTP client"),
        }
    }

    /// Attempt one delivery for the record, applying the outcome rules:
    /// HTTP 200 is terminal success; anything else burns one attempt and
    /// marks the callback failed once the budget is exhausted.
    pub async fn dispatch(&self, record: &VideoRecord) {
        let url = match record.callback_url.as_deref() {
            Some(url) => url,
            None => return,
        };
        if record.callback_status != CallbackStatus::Pending {
            return;
        }
        if record.callback_retry_count >= MAX_CALLBACK_ATTEMPTS {
            return;
        }

        let payload = build_payload(record);
        let outcome = self.http_client.post(url).json(&payload).send().await;

        let mut patch = VideoPatch {
            callback_last_attempt: Some(Utc::now()),
            ..Default::default()
        };

        match outcome {
            Ok(response) if response.status().as_u16() == 200 => {
                patch.callback_status = Some(CallbackStatus::Completed);
                info!(video_id = %record.id, url, "Webhook delivered");
            }
            other => {
                let detail = match other {
                    Ok(response) => format!("status {}", response.status()),
                    Err(e) => e.to_string(),
                };
                let attempts = record.callback_retry_count + 1;
                patch.callback_retry_count = Some(attempts);
                if attempts >= MAX_CALLBACK_ATTEMPTS {
                    patch.callback_status = Some(CallbackStatus::Failed);
                    warn!(
                        video_id = %record.id,
                        url,
                        attempts,
                        "Webhook retries exhausted: {detail}"
                    );
                } else {
                    warn!(
                        video_id = %record.id,
                        url,
                        attempts,
                        "Webhook attempt failed: {detail}"
                    );
                }
            }
        }

        if let Err(e) = self.store.update(record.id, patch).await {
            error!(video_id = %record.id, error = %e, "Failed to record webhook outcome");
        }
    }

    /// Periodic sweeper driving retries for completed records whose
    /// callback is still pending.
    pub fn spawn_sweeper(self: Arc<Self>) -> JoinHandle<()> {
        tokio::spawn(async move {
            info!("Webhook sweeper started");
            loop {
                tokio::time::sleep(SWEEP_INTERVAL).await;

                match self.store.list_pending_callbacks(MAX_CALLBACK_ATTEMPTS).await {
                    Ok(records) => {
                        for record in records {
                            self.dispatch(&record).await;
                        }
                    }
                    Err(e) => error!(error = %e, "Callback sweep failed"),
                }
            }
        })
    }
}

/// Webhook payload for a terminal record
pub fn build_payload(record: &VideoRecord) -> serde_json::Value {
    match record.status {
        VideoStatus::Failed => serde_json::json!({
            "videoId": record.id,
            "filename": record.filename,
            "status": "failed",
            "error": record.error.as_deref().unwrap_or("unknown error"),
        }),
        _ => {
            let mut payload = serde_json::json!({
                "videoId": record.id,
                "filename": record.filename,
                "status": "completed",
                "streamUrl": record.stream_url,
                "thumbnailUrl": record.thumbnail_url,
            });
            if let Some(mp4_url) = &record.mp4_url {
                payload["mp4Url"] = serde_json::json!(mp4_url);
            }
            payload
        }
    }
}
