/// Durable job queue adapter
///
/// Wraps the AMQP connection and channel behind publish/consume primitives.
/// Messages are persistent JSON; the queue is declared durable; consumers
/// run with prefetch = 1 so a worker holds at most one unacked delivery.
use crate::config::AmqpConfig;
use crate::error::AppError;
use crate::models::TranscodeJob;
use lapin::options::{
    BasicConsumeOptions, BasicPublishOptions, BasicQosOptions, QueueDeclareOptions,
};
use lapin::types::FieldTable;
use lapin::{BasicProperties, Channel, Connection, ConnectionProperties, Consumer};
use std::time::Duration;
use tokio::sync::Mutex;
use tracing::{error, info, warn};

/// Queue all transcode jobs flow through
pub const VIDEO_QUEUE: &str = "video_processing";

/// Bounded startup retry: 1s, 2s, 4s, 8s, 15s
const CONNECT_ATTEMPTS: u32 = 5;
const CONNECT_BACKOFF_CAP: Duration = Duration::from_secs(15);

struct QueueState {
    _connection: Connection,
    channel: Channel,
}

/// AMQP-backed job queue
pub struct JobQueue {
    uri: String,
    state: Mutex<QueueState>,
}

impl JobQueue {
    /// Connect with bounded backoff; irrecoverable after CONNECT_ATTEMPTS.
    pub async fn connect(config: &AmqpConfig) -> Result<Self, AppError> {
        let uri = config.uri();
        let mut backoff = Duration::from_secs(1);

        for attempt in 1..=CONNECT_ATTEMPTS {
            match Self::open(&uri).await {
                Ok(state) => {
                    info!(host = %config.host, "Connected to message broker");
                    return Ok(JobQueue {
                        uri,
                        state: Mutex::new(state),
                    });
                }
                Err(e) if attempt < CONNECT_ATTEMPTS => {
                    warn!(
                        attempt,
                        error = %e,
                        "Broker connection failed, retrying in {:?}",
                        backoff
                    );
                    tokio::time::sleep(backoff).await;
                    backoff = (backoff * 2).min(CONNECT_BACKOFF_CAP);
                }
                Err(e) => {
                    return Err(AppError::Queue(format!(
                        "Broker unreachable after {CONNECT_ATTEMPTS} attempts: {e}"
                    )));
                }
            }
        }

        unreachable!("connect loop returns on last attempt")
    }

    async fn open(uri: &str) -> Result<QueueState, lapin::Error> {
        let connection = Connection::connect(uri, ConnectionProperties::default()).await?;
        let channel = connection.create_channel().await?;

        channel
            .queue_declare(
                VIDEO_QUEUE,
                QueueDeclareOptions {
                    durable: true,
                    ..Default::default()
                },
                FieldTable::default(),
            )
            .await?;

        Ok(QueueState {
            _connection: connection,
            channel,
        })
    }

    /// Replace the channel and connection after a broker-side failure.
    async fn reconnect(&self) -> Result<(), lapin::Error> {
        let mut state = self.state.lock().await;
        *state = Self::open(&self.uri).await?;
        info!("Reconnected to message broker");
        Ok(())
    }

    /// Publish a persistent job message, transparently reconnecting once
    /// if the channel has gone away.
    pub async fn publish(&self, job: &TranscodeJob) -> Result<(), AppError> {
        let payload = serde_json::to_vec(job)
            .map_err(|e| AppError::Queue(format!("Failed to encode job: {e}")))?;

        if let Err(e) = self.try_publish(&payload).await {
            warn!(upload_id = %job.upload_id, error = %e, "Publish failed, reconnecting");
            self.reconnect()
                .await
                .map_err(|e| AppError::Queue(format!("Broker reconnect failed: {e}")))?;
            self.try_publish(&payload)
                .await
                .map_err(|e| AppError::Queue(format!("Publish failed after reconnect: {e}")))?;
        }

        info!(upload_id = %job.upload_id, queue = VIDEO_QUEUE, "Job published");
        Ok(())
    }

    async fn try_publish(&self, payload: &[u8]) -> Result<(), lapin::Error> {
        let state = self.state.lock().await;
        state
            .channel
            .basic_publish(
                "",
                VIDEO_QUEUE,
                BasicPublishOptions::default(),
                payload,
                BasicProperties::default()
                    .with_content_type("application/json".into())
                    // Delivery mode 2 marks the message persistent.
                    .with_delivery_mode(2),
            )
            .await?
            .await?;
        Ok(())
    }

    /// Create a consumer with prefetch = 1. The caller owns the delivery
    /// loop and acknowledgment; channel loss surfaces as a stream error,
    /// after which the caller asks for a fresh consumer.
    pub async fn consumer(&self, tag: &str) -> Result<Consumer, AppError> {
        {
            let state = self.state.lock().await;
            match Self::start_consumer(&state.channel, tag).await {
                Ok(consumer) => return Ok(consumer),
                Err(e) => {
                    error!(error = %e, "Failed to start consumer, reconnecting");
                }
            }
        }

        self.reconnect()
            .await
            .map_err(|e| AppError::Queue(format!("Broker reconnect failed: {e}")))?;

        let state = self.state.lock().await;
        Self::start_consumer(&state.channel, tag)
            .await
            .map_err(|e| AppError::Queue(format!("Failed to start consumer: {e}")))
    }

    async fn start_consumer(channel: &Channel, tag: &str) -> Result<Consumer, lapin::Error> {
        channel.basic_qos(1, BasicQosOptions::default()).await?;
        channel
            .basic_consume(
                VIDEO_QUEUE,
                tag,
                BasicConsumeOptions::default(),
                FieldTable::default(),
            )
            .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use uuid::Uuid;

    #[test]
    fn test_job_payload_round_trip() {
        let job = TranscodeJob {
            upload_id: Uuid::new_v4(),
            file_path: "/uploads/abc".to_string(),
            filename: "movie.mkv".to_string(),
            packager: "ffmpeg".to_string(),
            callback_url: Some("https://example.com/hook".to_string()),
            s3_path: None,
            upload_to_s3: false,
        };

        let bytes = serde_json::to_vec(&job).unwrap();
        let decoded: TranscodeJob = serde_json::from_slice(&bytes).unwrap();
        assert_eq!(decoded.upload_id, job.upload_id);
        assert_eq!(decoded.filename, job.filename);
        assert_eq!(decoded.callback_url, job.callback_url);
    }

    #[test]
    fn test_job_payload_tolerates_missing_optionals() {
        // A payload produced by an older publisher without the optional keys.
        let raw = format!(
            r#"{{"uploadId":"{}","filePath":"/uploads/x","filename":"x.mp4","packager":"ffmpeg"}}"#,
            Uuid::new_v4()
        );
        let job: TranscodeJob = serde_json::from_str(&raw).unwrap();
        assert!(job.callback_url.is_none());
        assert!(job.s3_path.is_none());
        assert!(!job.upload_to_s3);
    }
}
