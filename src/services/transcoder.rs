/// FFmpeg-driven HLS packaging
///
/// Single entry point taking an uploaded source to a published HLS tree:
/// probe, strategy-driven packaging with a one-shot re-encode fallback,
/// thumbnail, optional MP4 render, then recursive publication.
use crate::config::S3Config;
use crate::db::{SharedStore, VideoStore};
use crate::models::{VideoPatch, VideoStatus};
use crate::services::probe::{self, ProbeReport, TranscodeStrategy};
use crate::services::publisher::ObjectPublisher;
use anyhow::{bail, Context};
use chrono::Utc;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::process::Command;
use tracing::{info, warn};
use uuid::Uuid;

/// URLs of the artifacts a successful run published
#[derive(Debug, Clone)]
pub struct TranscodeOutcome {
    pub stream_url: String,
    pub thumbnail_url: Option<String>,
    pub mp4_url: Option<String>,
    pub strategy: TranscodeStrategy,
}

pub struct Transcoder {
    store: SharedStore,
    publisher: Arc<ObjectPublisher>,
    s3: S3Config,
}

impl Transcoder {
    pub fn new(store: SharedStore, publisher: Arc<ObjectPublisher>, s3: S3Config) -> Self {
        Self {
            store,
            publisher,
            s3,
        }
    }

    /// Working directory a job's intermediate artifacts live in
    pub fn work_dir_for(upload_id: Uuid) -> std::io::Result<PathBuf> {
        Ok(std::env::current_dir()?
            .join("controllers")
            .join("videos")
            .join(upload_id.to_string()))
    }

    pub async fn transcode_and_upload(
        &self,
        source: &Path,
        filename: &str,
        upload_id: Uuid,
        s3_path: Option<&str>,
        upload_to_s3: bool,
    ) -> anyhow::Result<TranscodeOutcome> {
        let record = self
            .store
            .get(upload_id)
            .await?
            .with_context(|| format!("record {upload_id} disappeared"))?;

        // Another actor already finished this video.
        if record.status == VideoStatus::Completed {
            if let Some(stream_url) = record.stream_url {
                info!(upload_id = %upload_id, "Record already completed, skipping transcode");
                return Ok(TranscodeOutcome {
                    stream_url,
                    thumbnail_url: record.thumbnail_url,
                    mp4_url: record.mp4_url,
                    strategy: TranscodeStrategy::Copy,
                });
            }
        }

        // Redelivery after a failure: wipe the old error and restart the bar.
        if record.status == VideoStatus::Failed {
            let mut patch = VideoPatch::progress(25);
            patch.clear_error = true;
            self.store.update(upload_id, patch).await?;
        }

        let work_dir = Self::work_dir_for(upload_id)?;
        tokio::fs::create_dir_all(&work_dir)
            .await
            .with_context(|| format!("failed to create work dir {}", work_dir.display()))?;

        let report = probe::probe_source(source).await;
        let playlist = work_dir.join("index.m3u8");

        let strategy = self
            .package_hls(source, &playlist, &report)
            .await
            .context("transcoding failed")?;
        self.set_progress(upload_id, 60).await?;

        let thumbnail = work_dir.join("thumbnail.jpg");
        let has_thumbnail = match run_ffmpeg(&thumbnail_args(source, &thumbnail)).await {
            Ok(()) => thumbnail.exists(),
            Err(e) => {
                warn!(upload_id = %upload_id, error = %e, "Thumbnail extraction failed");
                false
            }
        };
        self.set_progress(upload_id, 75).await?;

        if !playlist.exists() {
            bail!("ffmpeg reported success but produced no index.m3u8");
        }

        // Optional MP4 render. Failures here never fail the job.
        let mut mp4_rendered = false;
        if upload_to_s3 {
            match ensure_mp4(source, &report, &work_dir).await {
                Ok(()) => mp4_rendered = true,
                Err(e) => {
                    warn!(upload_id = %upload_id, error = %e, "MP4 render failed, continuing without it")
                }
            }
        }

        // Re-check before the expensive publish: someone may have finished
        // this record while FFmpeg was running.
        if let Some(current) = self.store.get(upload_id).await? {
            if current.status == VideoStatus::Completed {
                if let Some(stream_url) = current.stream_url {
                    info!(upload_id = %upload_id, "Record completed mid-run, skipping publish");
                    return Ok(TranscodeOutcome {
                        stream_url,
                        thumbnail_url: current.thumbnail_url,
                        mp4_url: current.mp4_url,
                        strategy,
                    });
                }
            }
        }

        let pre_publish = if strategy == TranscodeStrategy::Reencode {
            80
        } else {
            85
        };
        self.set_progress(upload_id, pre_publish).await?;

        let prefix = match s3_path {
            Some(path) if !path.is_empty() => format!("{}/{}", path, upload_id),
            _ => upload_id.to_string(),
        };

        self.publisher
            .publish_tree(&work_dir, &prefix, Some((&self.store, upload_id)))
            .await
            .context("artifact publication failed")?;

        let metadata = serde_json::json!({
            "name": filename,
            "packager": "ffmpeg",
            "createdAt": Utc::now().to_rfc3339(),
            "source": filename,
            "hasThumbnail": has_thumbnail,
            "transcodingStrategy": strategy.as_str(),
            "sourceCodecs": {
                "video": report.codecs.video,
                "audio": report.codecs.audio,
                "profile": report.codecs.profile,
            },
            "hlsCompatible": report.hls_compatible,
        });
        let metadata_path = work_dir.join("metadata.json");
        tokio::fs::write(&metadata_path, serde_json::to_vec_pretty(&metadata)?).await?;
        self.publisher
            .put_file(&metadata_path, &format!("{}/metadata.json", prefix))
            .await
            .context("metadata publication failed")?;

        info!(
            upload_id = %upload_id,
            strategy = strategy.as_str(),
            prefix = %prefix,
            "Transcode and publish finished"
        );

        Ok(TranscodeOutcome {
            stream_url: self.s3.object_url(&format!("{}/index.m3u8", prefix)),
            thumbnail_url: has_thumbnail
                .then(|| self.s3.object_url(&format!("{}/thumbnail.jpg", prefix))),
            mp4_url: mp4_rendered.then(|| self.s3.object_url(&format!("{}/video.mp4", prefix))),
            strategy,
        })
    }

    /// Run the strategy-selected packaging, falling back once to a full
    /// re-encode when a copy-based run fails or leaves no playlist behind.
    async fn package_hls(
        &self,
        source: &Path,
        playlist: &Path,
        report: &ProbeReport,
    ) -> anyhow::Result<TranscodeStrategy> {
        let attempt = run_hls(source, playlist, report.strategy).await;

        match attempt {
            Ok(()) => Ok(report.strategy),
            Err(e) if report.strategy != TranscodeStrategy::Reencode => {
                warn!(
                    strategy = report.strategy.as_str(),
                    error = %e,
                    "Stream-copy packaging failed, retrying with full re-encode"
                );
                run_hls(source, playlist, TranscodeStrategy::Reencode)
                    .await
                    .context("fallback re-encode failed")?;
                Ok(TranscodeStrategy::Reencode)
            }
            Err(e) => Err(e),
        }
    }

    async fn set_progress(&self, upload_id: Uuid, progress: i32) -> anyhow::Result<()> {
        self.store
            .update(upload_id, VideoPatch::progress(progress))
            .await?;
        Ok(())
    }
}

async fn run_hls(
    source: &Path,
    playlist: &Path,
    strategy: TranscodeStrategy,
) -> anyhow::Result<()> {
    run_ffmpeg(&hls_args(source, playlist, strategy)).await?;
    if !playlist.exists() {
        bail!("no playlist written by {} run", strategy.as_str());
    }
    Ok(())
}

/// Render (or reuse) an MP4 next to the HLS artifacts. An already-MP4
/// source is copied through untouched.
async fn ensure_mp4(source: &Path, report: &ProbeReport, work_dir: &Path) -> anyhow::Result<()> {
    let target = work_dir.join("video.mp4");

    if probe::is_mp4_container(&report.codecs.container) {
        tokio::fs::copy(source, &target)
            .await
            .context("failed to copy mp4 source")?;
        return Ok(());
    }

    run_ffmpeg(&mp4_args(source, &target)).await?;
    if !target.exists() {
        bail!("mp4 render produced no output");
    }
    Ok(())
}

/// FFmpeg argument vector for the HLS packaging run
pub(crate) fn hls_args(source: &Path, playlist: &Path, strategy: TranscodeStrategy) -> Vec<String> {
    let mut args = vec![
        "-y".to_string(),
        "-i".to_string(),
        source.to_string_lossy().into_owned(),
    ];

    match strategy {
        TranscodeStrategy::Copy => {
            args.extend(["-c", "copy"].map(String::from));
        }
        TranscodeStrategy::Selective => {
            args.extend(["-c:v", "copy", "-c:a", "aac", "-b:a", "128k"].map(String::from));
        }
        TranscodeStrategy::Reencode => {
            args.extend(
                [
                    "-c:v", "libx264", "-preset", "medium", "-crf", "23", "-c:a", "aac", "-b:a",
                    "128k",
                ]
                .map(String::from),
            );
        }
    }

    args.extend(
        [
            "-start_number",
            "0",
            "-hls_time",
            "3",
            "-hls_list_size",
            "0",
            "-f",
            "hls",
        ]
        .map(String::from),
    );
    args.push(playlist.to_string_lossy().into_owned());
    args
}

/// One frame at second one
pub(crate) fn thumbnail_args(source: &Path, out: &Path) -> Vec<String> {
    vec![
        "-y".to_string(),
        "-ss".to_string(),
        "00:00:01.000".to_string(),
        "-i".to_string(),
        source.to_string_lossy().into_owned(),
        "-vframes".to_string(),
        "1".to_string(),
        out.to_string_lossy().into_owned(),
    ]
}

/// Progressive MP4 render for the optional side artifact
pub(crate) fn mp4_args(source: &Path, out: &Path) -> Vec<String> {
    let mut args = vec![
        "-y".to_string(),
        "-i".to_string(),
        source.to_string_lossy().into_owned(),
    ];
    args.extend(
        [
            "-c:v", "libx264", "-preset", "medium", "-crf", "23", "-c:a", "aac", "-b:a", "128k",
            "-movflags", "+faststart",
        ]
        .map(String::from),
    );
    args.push(out.to_string_lossy().into_owned());
    args
}

async fn run_ffmpeg(args: &[String]) -> anyhow::Result<()> {
    let output = Command::new("ffmpeg")
        .args(args)
        .output()
        .await
        .context("failed to spawn ffmpeg")?;

    if !output.status.success() {
        let stderr = String::from_utf8_lossy(&output.stderr);
        let tail: String = stderr
            .lines()
            .rev()
            .take(5)
            .collect::<Vec<_>>()
            .into_iter()
            .rev()
            .collect::<Vec<_>>()
            .join("\n");
        bail!("ffmpeg exited with {}: {}", output.status, tail);
    }

    Ok(())
}
