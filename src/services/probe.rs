/// Codec probing and transcoding strategy selection
///
/// Runs ffprobe on the source and decides whether the HLS packaging can
/// stream-copy, copy video only, or must re-encode everything.
use serde_json::Value;
use std::path::Path;
use tokio::process::Command;
use tracing::{debug, warn};

/// How the packaging run treats the source streams
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TranscodeStrategy {
    /// Both streams are already HLS-compatible; remux only.
    Copy,
    /// Copy video, re-encode audio to AAC.
    Selective,
    /// Full re-encode fallback.
    Reencode,
}

impl TranscodeStrategy {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Copy => "copy",
            Self::Selective => "selective",
            Self::Reencode => "reencode",
        }
    }
}

/// Codec facts extracted from the source container
#[derive(Debug, Clone)]
pub struct SourceCodecs {
    pub video: String,
    pub audio: String,
    pub profile: String,
    pub level: i64,
    pub container: String,
}

#[derive(Debug, Clone)]
pub struct ProbeReport {
    pub codecs: SourceCodecs,
    pub hls_compatible: bool,
    pub strategy: TranscodeStrategy,
}

impl ProbeReport {
    /// Fallback when probing fails: codecs unknown, full re-encode.
    fn unknown() -> Self {
        ProbeReport {
            codecs: SourceCodecs {
                video: "unknown".to_string(),
                audio: "unknown".to_string(),
                profile: "unknown".to_string(),
                level: 0,
                container: "unknown".to_string(),
            },
            hls_compatible: false,
            strategy: TranscodeStrategy::Reencode,
        }
    }
}

/// H.264 profiles browsers play inside HLS without re-encoding
const COMPATIBLE_PROFILES: [&str; 4] = ["baseline", "main", "high", "constrained baseline"];

fn video_is_compatible(codec: &str, profile: &str) -> bool {
    codec.eq_ignore_ascii_case("h264")
        && COMPATIBLE_PROFILES
            .iter()
            .any(|p| profile.eq_ignore_ascii_case(p))
}

fn audio_is_compatible(codec: &str) -> bool {
    codec.eq_ignore_ascii_case("aac")
}

/// Whether the container is already MP4 (ffprobe reports a comma list).
pub fn is_mp4_container(container: &str) -> bool {
    container.split(',').any(|c| c.trim() == "mp4")
}

/// Probe the source file. Never fails: an unreadable source degrades to
/// the re-encode strategy with codecs reported as unknown.
pub async fn probe_source(path: &Path) -> ProbeReport {
    let output = Command::new("ffprobe")
        .args([
            "-v",
            "error",
            "-show_format",
            "-show_streams",
            "-of",
            "json",
        ])
        .arg(path)
        .output()
        .await;

    let report = match output {
        Ok(out) if out.status.success() => match serde_json::from_slice::<Value>(&out.stdout) {
            Ok(probe) => derive_report(&probe),
            Err(e) => {
                warn!(path = %path.display(), error = %e, "Failed to parse ffprobe output");
                ProbeReport::unknown()
            }
        },
        Ok(out) => {
            warn!(
                path = %path.display(),
                stderr = %String::from_utf8_lossy(&out.stderr),
                "ffprobe exited non-zero"
            );
            ProbeReport::unknown()
        }
        Err(e) => {
            warn!(path = %path.display(), error = %e, "Failed to spawn ffprobe");
            ProbeReport::unknown()
        }
    };

    debug!(
        video = %report.codecs.video,
        audio = %report.codecs.audio,
        profile = %report.codecs.profile,
        strategy = report.strategy.as_str(),
        "Source probed"
    );

    report
}

fn derive_report(probe: &Value) -> ProbeReport {
    let mut codecs = SourceCodecs {
        video: "unknown".to_string(),
        audio: "unknown".to_string(),
        profile: "unknown".to_string(),
        level: 0,
        container: "unknown".to_string(),
    };

    if let Some(streams) = probe["streams"].as_array() {
        for stream in streams {
            match stream["codec_type"].as_str() {
                Some("video") if codecs.video == "unknown" => {
                    if let Some(name) = stream["codec_name"].as_str() {
                        codecs.video = name.to_string();
                    }
                    if let Some(profile) = stream["profile"].as_str() {
                        codecs.profile = profile.to_string();
                    }
                    codecs.level = stream["level"].as_i64().unwrap_or(0);
                }
                Some("audio") if codecs.audio == "unknown" => {
                    if let Some(name) = stream["codec_name"].as_str() {
                        codecs.audio = name.to_string();
                    }
                }
                _ => {}
            }
        }
    }

    if let Some(format_name) = probe["format"]["format_name"].as_str() {
        codecs.container = format_name.to_string();
    }

    let video_ok = video_is_compatible(&codecs.video, &codecs.profile);
    let audio_ok = audio_is_compatible(&codecs.audio);

    let strategy = if video_ok && audio_ok {
        TranscodeStrategy::Copy
    } else if video_ok {
        TranscodeStrategy::Selective
    } else {
        TranscodeStrategy::Reencode
    };

    ProbeReport {
        hls_compatible: video_ok && audio_ok,
        codecs,
        strategy,
    }
}
