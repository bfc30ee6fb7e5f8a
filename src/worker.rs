/// Queue worker
///
/// Consumes transcode jobs with prefetch = 1. The record store's atomic
/// guard is the real synchronization point: the delivery is acknowledged
/// immediately after the guard is won, so a duplicate delivery of the same
/// message either finds the record done (skipped) or in flight past early
/// progress (skipped), and only a crashed-early or failed run is re-driven.
/// The trade-off is deliberate: no FFmpeg run ever happens twice.
use crate::db::{SharedStore, VideoStore};
use crate::models::{TranscodeJob, VideoPatch, VideoStatus};
use crate::queue::JobQueue;
use crate::services::cleanup;
use crate::services::transcoder::{TranscodeOutcome, Transcoder};
use crate::services::webhooks::WebhookDispatcher;
use anyhow::bail;
use futures::StreamExt;
use lapin::message::Delivery;
use lapin::options::{BasicAckOptions, BasicNackOptions};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tracing::{error, info, warn};

const CONSUMER_TAG: &str = "vellum-worker";
const RECONNECT_PAUSE: Duration = Duration::from_secs(5);

pub struct Worker {
    store: SharedStore,
    transcoder: Arc<Transcoder>,
    webhooks: Arc<WebhookDispatcher>,
    upload_path: PathBuf,
}

impl Worker {
    pub fn new(
        store: SharedStore,
        transcoder: Arc<Transcoder>,
        webhooks: Arc<WebhookDispatcher>,
        upload_path: PathBuf,
    ) -> Self {
        Self {
            store,
            transcoder,
            webhooks,
            upload_path,
        }
    }

    pub fn spawn(self: Arc<Self>, queue: Arc<JobQueue>) -> JoinHandle<()> {
        tokio::spawn(async move { self.run(queue).await })
    }

    async fn run(&self, queue: Arc<JobQueue>) {
        info!("Transcode worker started");

        loop {
            let mut consumer = match queue.consumer(CONSUMER_TAG).await {
                Ok(consumer) => consumer,
                Err(e) => {
                    error!(error = %e, "Failed to open consumer, retrying");
                    tokio::time::sleep(RECONNECT_PAUSE).await;
                    continue;
                }
            };

            while let Some(delivery) = consumer.next().await {
                match delivery {
                    Ok(delivery) => self.handle_delivery(delivery).await,
                    Err(e) => {
                        error!(error = %e, "Channel error, replacing consumer");
                        break;
                    }
                }
            }

            warn!("Consumer stream ended, reconnecting");
            tokio::time::sleep(Duration::from_secs(1)).await;
        }
    }

    async fn handle_delivery(&self, delivery: Delivery) {
        let job: TranscodeJob = match serde_json::from_slice(&delivery.data) {
            Ok(job) => job,
            Err(e) => {
                error!(error = %e, "Dropping unparseable job message");
                ack(&delivery).await;
                return;
            }
        };

        let (acquired, record) = match self.store.try_acquire_for_processing(job.upload_id).await
        {
            Ok(result) => result,
            Err(e) => {
                // Store unavailable: leave the message with the broker.
                error!(upload_id = %job.upload_id, error = %e, "Record store unavailable");
                if let Err(e) = delivery
                    .nack(BasicNackOptions {
                        requeue: true,
                        ..Default::default()
                    })
                    .await
                {
                    error!(error = %e, "Failed to nack delivery");
                }
                return;
            }
        };

        let current = match record {
            Some(current) => current,
            None => {
                warn!(upload_id = %job.upload_id, "Job references unknown record, dropping");
                ack(&delivery).await;
                return;
            }
        };

        if !acquired {
            info!(
                upload_id = %job.upload_id,
                status = current.status.as_str(),
                progress = current.progress,
                "Skipping delivery, record already handled"
            );
            ack(&delivery).await;
            return;
        }

        // The guard is won and the record is the idempotency key from here
        // on; acknowledge before the long-running work.
        ack(&delivery).await;

        self.execute(&job).await;
    }

    /// Drive an acquired job to a terminal record state, deliver the
    /// webhook inline, and clean up regardless of outcome.
    pub async fn execute(&self, job: &TranscodeJob) {
        info!(upload_id = %job.upload_id, filename = %job.filename, "Processing job");

        let source = PathBuf::from(&job.file_path);
        let work_dir = Transcoder::work_dir_for(job.upload_id)
            .unwrap_or_else(|_| self.upload_path.join(job.upload_id.to_string()));

        match self.run_job(job, &source).await {
            Ok(outcome) => {
                let mut patch = VideoPatch::status(VideoStatus::Completed);
                patch.progress = Some(100);
                patch.stream_url = Some(outcome.stream_url);
                patch.thumbnail_url = outcome.thumbnail_url;
                patch.mp4_url = outcome.mp4_url;

                match self.store.update(job.upload_id, patch).await {
                    Ok(updated) => {
                        info!(upload_id = %job.upload_id, "Job completed");
                        self.webhooks.dispatch(&updated).await;
                    }
                    Err(e) => {
                        error!(upload_id = %job.upload_id, error = %e, "Failed to mark record completed")
                    }
                }
            }
            Err(e) => {
                let reason = format!("{e:#}");
                error!(upload_id = %job.upload_id, error = %reason, "Job failed");

                let mut patch = VideoPatch::status(VideoStatus::Failed);
                patch.error = Some(reason);

                match self.store.update(job.upload_id, patch).await {
                    Ok(updated) => self.webhooks.dispatch(&updated).await,
                    Err(e) => {
                        error!(upload_id = %job.upload_id, error = %e, "Failed to mark record failed")
                    }
                }
            }
        }

        cleanup::cleanup_job(&self.upload_path, job.upload_id, &source, &work_dir).await;
    }

    async fn run_job(&self, job: &TranscodeJob, source: &Path) -> anyhow::Result<TranscodeOutcome> {
        if !source.exists() {
            bail!("uploaded file missing: {}", job.file_path);
        }

        self.transcoder
            .transcode_and_upload(
                source,
                &job.filename,
                job.upload_id,
                job.s3_path.as_deref(),
                job.upload_to_s3,
            )
            .await
    }
}

async fn ack(delivery: &Delivery) {
    if let Err(e) = delivery.ack(BasicAckOptions::default()).await {
        error!(error = %e, "Failed to ack delivery");
    }
}
