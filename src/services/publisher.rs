/// Object-store publisher
///
/// Recursively uploads an artifact tree in small concurrent batches, with
/// a short yield between batches so a segment-heavy video does not storm
/// the store with small PUTs.
use crate::config::S3Config;
use crate::db::{SharedStore, VideoStore};
use crate::models::VideoPatch;
use aws_credential_types::Credentials;
use aws_sdk_s3::config::Region;
use aws_sdk_s3::primitives::ByteStream;
use aws_sdk_s3::types::ObjectCannedAcl;
use aws_sdk_s3::Client;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::{debug, info};
use uuid::Uuid;

/// Concurrent PUTs per batch
const BATCH_SIZE: usize = 5;

/// Pause between batches
const BATCH_PAUSE: Duration = Duration::from_millis(100);

/// Progress band the publisher reports within
const PROGRESS_FLOOR: usize = 80;
const PROGRESS_CEIL: usize = 95;

pub struct ObjectPublisher {
    client: Client,
    bucket: String,
}

impl ObjectPublisher {
    /// Build the S3 client from static credentials with an endpoint override.
    pub async fn connect(config: &S3Config) -> Self {
        let credentials = Credentials::new(
            &config.access_key,
            &config.secret_key,
            None,
            None,
            "StaticCredentialsProvider",
        );

        let aws_config = aws_config::defaults(aws_config::BehaviorVersion::latest())
            .region(Region::new(config.region.clone()))
            .credentials_provider(credentials)
            .load()
            .await;

        let s3_config = aws_sdk_s3::config::Builder::from(&aws_config)
            .endpoint_url(config.endpoint_url())
            .build();

        info!(
            bucket = %config.bucket,
            region = %config.region,
            "Object-store publisher ready"
        );

        Self {
            client: Client::from_conf(s3_config),
            bucket: config.bucket.clone(),
        }
    }

    /// Upload one local file under the given key, public-read.
    pub async fn put_file(&self, local: &Path, key: &str) -> anyhow::Result<()> {
        let bytes = tokio::fs::read(local).await?;

        self.client
            .put_object()
            .bucket(&self.bucket)
            .key(key)
            .acl(ObjectCannedAcl::PublicRead)
            .content_type(content_type_for(local))
            .body(ByteStream::from(bytes))
            .send()
            .await
            .map_err(|e| anyhow::anyhow!("put {} failed: {}", key, e))?;

        debug!(key, "Object published");
        Ok(())
    }

    /// Recursively publish `local_dir` under `key_prefix`. When a record id
    /// is given, progress is reported into the 80-95 band as files land.
    pub async fn publish_tree(
        &self,
        local_dir: &Path,
        key_prefix: &str,
        progress: Option<(&SharedStore, Uuid)>,
    ) -> anyhow::Result<usize> {
        let files = collect_files(local_dir)?;
        let total = files.len();
        info!(prefix = key_prefix, total, "Publishing artifact tree");

        let mut uploaded = 0usize;
        for batch in files.chunks(BATCH_SIZE) {
            let puts = batch.iter().map(|file| {
                let rel = file
                    .strip_prefix(local_dir)
                    .unwrap_or(file)
                    .to_string_lossy()
                    .replace('\\', "/");
                let key = format!("{}/{}", key_prefix, rel);
                async move { self.put_file(file, &key).await }
            });
            futures::future::try_join_all(puts).await?;

            uploaded += batch.len();
            if let Some((store, id)) = progress {
                if total > 10 && uploaded % BATCH_SIZE == 0 {
                    store
                        .update(id, VideoPatch::progress(progress_for(uploaded, total)))
                        .await?;
                }
            }

            if uploaded < total {
                tokio::time::sleep(BATCH_PAUSE).await;
            }
        }

        Ok(total)
    }
}

/// Map the publisher's progress into the 80-95 band, clamped at 95.
pub(crate) fn progress_for(uploaded: usize, total: usize) -> i32 {
    if total == 0 {
        return PROGRESS_FLOOR as i32;
    }
    let banded = PROGRESS_FLOOR + uploaded * (PROGRESS_CEIL - PROGRESS_FLOOR) / total;
    banded.min(PROGRESS_CEIL) as i32
}

/// Content types for published artifacts
pub fn content_type_for(path: &Path) -> &'static str {
    let ext = path
        .extension()
        .and_then(|e| e.to_str())
        .map(|e| e.to_ascii_lowercase())
        .unwrap_or_default();

    match ext.as_str() {
        "m3u8" => "application/vnd.apple.mpegurl",
        "ts" => "video/MP2T",
        "m4s" => "video/iso.segment",
        "mp4" => "video/mp4",
        "mpd" => "application/dash+xml",
        "vtt" => "text/vtt",
        "jpg" | "jpeg" => "image/jpeg",
        "png" => "image/png",
        _ => "application/octet-stream",
    }
}

/// Regular files under `dir`, depth-first, sorted for stable ordering.
fn collect_files(dir: &Path) -> anyhow::Result<Vec<PathBuf>> {
    let mut files = Vec::new();
    let mut stack = vec![dir.to_path_buf()];

    while let Some(current) = stack.pop() {
        for entry in std::fs::read_dir(&current)? {
            let path = entry?.path();
            if path.is_dir() {
                stack.push(path);
            } else if path.is_file() {
                files.push(path);
            }
        }
    }

    files.sort();
    Ok(files)
}
