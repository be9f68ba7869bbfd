//! # Media Probe Module
//!
//! Estrae i metadati tecnici di un file (durata, risoluzione, bitrate, codec,
//! container) e li restituisce come `MediaDescriptor` immutabile.
//!
//! ## Responsabilità:
//! - Definisce la capability `MediaProber` usata dal controller e dallo scorer
//! - `FfprobeProber`: ffprobe in JSON per i video, header sniffing con `image` per le immagini
//! - Classifica gli errori: illeggibile, corrotto, container non riconosciuto, timeout
//!
//! Operazione di sola lettura e idempotente: probe ripetuti dello stesso file
//! producono descrittori uguali.

use crate::error::ProbeError;
use crate::file_manager::FileManager;
use crate::platform::PlatformCommands;
use crate::types::{MediaDescriptor, MediaKind};
use async_trait::async_trait;
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::Duration;
use tokio::process::Command;
use tracing::debug;

/// Capability: inspect a media file without modifying it
#[async_trait]
pub trait MediaProber: Send + Sync {
    async fn probe(&self, path: &Path) -> Result<MediaDescriptor, ProbeError>;
}

/// Prober backed by ffprobe (videos) and the `image` crate (still images)
pub struct FfprobeProber {
    timeout: Duration,
}

impl FfprobeProber {
    pub fn new(timeout: Duration) -> Self {
        Self { timeout }
    }

    async fn probe_image(&self, path: &Path, file_size: u64) -> Result<MediaDescriptor, ProbeError> {
        let owned = path.to_path_buf();
        let sniffed = tokio::task::spawn_blocking(move || -> Result<_, String> {
            let reader = image::io::Reader::open(&owned)
                .map_err(|e| e.to_string())?
                .with_guessed_format()
                .map_err(|e| e.to_string())?;
            let format = reader
                .format()
                .ok_or_else(|| "unrecognized image header".to_string())?;
            let (width, height) = reader.into_dimensions().map_err(|e| e.to_string())?;
            Ok((format, width, height))
        })
        .await
        .map_err(|e| ProbeError::Corrupt {
            path: path.to_path_buf(),
            details: e.to_string(),
        })?;

        let (format, width, height) = sniffed.map_err(|details| ProbeError::Corrupt {
            path: path.to_path_buf(),
            details,
        })?;
        let name = format!("{:?}", format).to_lowercase();

        Ok(MediaDescriptor {
            path: path.to_path_buf(),
            kind: MediaKind::Image,
            container: name.clone(),
            codec: name,
            duration_secs: 0.0,
            width,
            height,
            bitrate: 0,
            frame_rate: 0.0,
            file_size,
        })
    }

    async fn probe_video(&self, path: &Path, file_size: u64) -> Result<MediaDescriptor, ProbeError> {
        let ffprobe = PlatformCommands::instance().get_command("ffprobe");

        let child = Command::new(ffprobe)
            .args(["-v", "quiet", "-print_format", "json", "-show_format", "-show_streams"])
            .arg(path)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|source| ProbeError::Unreadable {
                path: path.to_path_buf(),
                source,
            })?;

        let output = tokio::time::timeout(self.timeout, child.wait_with_output())
            .await
            .map_err(|_| ProbeError::Timeout {
                path: path.to_path_buf(),
                secs: self.timeout.as_secs(),
            })?
            .map_err(|source| ProbeError::Unreadable {
                path: path.to_path_buf(),
                source,
            })?;

        if !output.status.success() {
            return Err(ProbeError::Corrupt {
                path: path.to_path_buf(),
                details: format!(
                    "ffprobe exited with {}: {}",
                    output.status,
                    String::from_utf8_lossy(&output.stderr).trim()
                ),
            });
        }

        parse_ffprobe_output(path, file_size, &String::from_utf8_lossy(&output.stdout))
    }
}

#[async_trait]
impl MediaProber for FfprobeProber {
    async fn probe(&self, path: &Path) -> Result<MediaDescriptor, ProbeError> {
        let metadata = tokio::fs::metadata(path)
            .await
            .map_err(|source| ProbeError::Unreadable {
                path: path.to_path_buf(),
                source,
            })?;

        if metadata.len() == 0 {
            return Err(ProbeError::Corrupt {
                path: path.to_path_buf(),
                details: "empty file".to_string(),
            });
        }

        debug!("Probing {}", path.display());
        if FileManager::is_image(path) {
            self.probe_image(path, metadata.len()).await
        } else {
            self.probe_video(path, metadata.len()).await
        }
    }
}

#[derive(Debug, Deserialize)]
struct FfprobeOutput {
    #[serde(default)]
    streams: Vec<FfprobeStream>,
    format: Option<FfprobeFormat>,
}

#[derive(Debug, Deserialize)]
struct FfprobeStream {
    codec_type: Option<String>,
    codec_name: Option<String>,
    width: Option<u32>,
    height: Option<u32>,
    avg_frame_rate: Option<String>,
    duration: Option<String>,
    bit_rate: Option<String>,
}

#[derive(Debug, Deserialize)]
struct FfprobeFormat {
    format_name: Option<String>,
    duration: Option<String>,
    bit_rate: Option<String>,
}

/// Frame rate from ffprobe's `num/den` notation
fn parse_frame_rate(raw: &str) -> f64 {
    match raw.split_once('/') {
        Some((num, den)) => {
            let num: f64 = num.parse().unwrap_or(0.0);
            let den: f64 = den.parse().unwrap_or(0.0);
            if den > 0.0 {
                num / den
            } else {
                0.0
            }
        }
        None => raw.parse().unwrap_or(0.0),
    }
}

fn parse_number<T: std::str::FromStr>(raw: Option<&String>) -> Option<T> {
    raw.and_then(|s| s.trim().parse().ok())
}

/// Builds a descriptor from ffprobe's `-print_format json` output
pub fn parse_ffprobe_output(
    path: &Path,
    file_size: u64,
    json: &str,
) -> Result<MediaDescriptor, ProbeError> {
    let corrupt = |details: String| ProbeError::Corrupt {
        path: PathBuf::from(path),
        details,
    };

    let parsed: FfprobeOutput =
        serde_json::from_str(json).map_err(|e| corrupt(format!("invalid ffprobe output: {}", e)))?;

    let format = parsed
        .format
        .ok_or_else(|| ProbeError::UnsupportedContainer(path.to_path_buf()))?;
    let container = format
        .format_name
        .clone()
        .filter(|name| !name.is_empty())
        .ok_or_else(|| ProbeError::UnsupportedContainer(path.to_path_buf()))?;

    let video = parsed
        .streams
        .iter()
        .find(|s| s.codec_type.as_deref() == Some("video"))
        .ok_or_else(|| ProbeError::UnsupportedContainer(path.to_path_buf()))?;

    let kind = if container.contains("image2") || container.ends_with("_pipe") {
        MediaKind::Image
    } else {
        MediaKind::Video
    };

    let duration_secs = parse_number::<f64>(format.duration.as_ref())
        .filter(|d| *d > 0.0)
        .or_else(|| parse_number::<f64>(video.duration.as_ref()))
        .unwrap_or(0.0);

    if kind == MediaKind::Video && duration_secs <= 0.0 {
        return Err(corrupt("could not determine duration".to_string()));
    }

    let width = video.width.unwrap_or(0);
    let height = video.height.unwrap_or(0);
    if width == 0 || height == 0 {
        return Err(corrupt("video stream has no resolution".to_string()));
    }

    let bitrate = parse_number::<u64>(format.bit_rate.as_ref())
        .or_else(|| parse_number::<u64>(video.bit_rate.as_ref()))
        .unwrap_or_else(|| {
            if duration_secs > 0.0 {
                ((file_size as f64 * 8.0) / duration_secs) as u64
            } else {
                0
            }
        });

    Ok(MediaDescriptor {
        path: path.to_path_buf(),
        kind,
        container,
        codec: video.codec_name.clone().unwrap_or_else(|| "unknown".to_string()),
        duration_secs,
        width,
        height,
        bitrate,
        frame_rate: video
            .avg_frame_rate
            .as_deref()
            .map(parse_frame_rate)
            .unwrap_or(0.0),
        file_size,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    const SAMPLE: &str = r#"{
        "streams": [
            { "codec_type": "audio", "codec_name": "aac" },
            { "codec_type": "video", "codec_name": "h264", "width": 1920, "height": 1080,
              "avg_frame_rate": "24000/1001", "duration": "120.5" }
        ],
        "format": { "format_name": "mov,mp4,m4a,3gp,3g2,mj2", "duration": "120.500000", "bit_rate": "8000000" }
    }"#;

    #[test]
    fn test_parse_video_descriptor() {
        let d = parse_ffprobe_output(Path::new("clip.mp4"), 1000, SAMPLE).unwrap();
        assert_eq!(d.kind, MediaKind::Video);
        assert_eq!(d.codec, "h264");
        assert_eq!((d.width, d.height), (1920, 1080));
        assert_eq!(d.bitrate, 8_000_000);
        assert!((d.duration_secs - 120.5).abs() < 1e-9);
        assert!((d.frame_rate - 23.976).abs() < 0.001);
    }

    #[test]
    fn test_parse_is_idempotent() {
        let a = parse_ffprobe_output(Path::new("clip.mp4"), 1000, SAMPLE).unwrap();
        let b = parse_ffprobe_output(Path::new("clip.mp4"), 1000, SAMPLE).unwrap();
        assert_eq!(a, b);
    }

    #[test]
    fn test_missing_format_is_unsupported() {
        let json = r#"{ "streams": [] }"#;
        let err = parse_ffprobe_output(Path::new("x.bin"), 10, json).unwrap_err();
        assert!(matches!(err, ProbeError::UnsupportedContainer(_)));
    }

    #[test]
    fn test_audio_only_is_unsupported() {
        let json = r#"{ "streams": [{ "codec_type": "audio" }], "format": { "format_name": "mp3" } }"#;
        let err = parse_ffprobe_output(Path::new("x.mp3"), 10, json).unwrap_err();
        assert!(matches!(err, ProbeError::UnsupportedContainer(_)));
    }

    #[test]
    fn test_garbage_is_corrupt() {
        let err = parse_ffprobe_output(Path::new("x.mp4"), 10, "not json").unwrap_err();
        assert!(matches!(err, ProbeError::Corrupt { .. }));
    }

    #[test]
    fn test_bitrate_estimated_from_size() {
        let json = r#"{
            "streams": [{ "codec_type": "video", "codec_name": "hevc", "width": 640, "height": 360 }],
            "format": { "format_name": "matroska,webm", "duration": "10.0" }
        }"#;
        let d = parse_ffprobe_output(Path::new("x.mkv"), 1_000_000, json).unwrap();
        assert_eq!(d.bitrate, 800_000);
    }

    #[test]
    fn test_frame_rate_parsing() {
        assert_eq!(parse_frame_rate("30/1"), 30.0);
        assert_eq!(parse_frame_rate("0/0"), 0.0);
        assert_eq!(parse_frame_rate("25"), 25.0);
    }

    #[tokio::test]
    async fn test_missing_file_is_unreadable() {
        let dir = TempDir::new().unwrap();
        let prober = FfprobeProber::new(Duration::from_secs(5));
        let err = prober.probe(&dir.path().join("nope.mp4")).await.unwrap_err();
        assert!(matches!(err, ProbeError::Unreadable { .. }));
    }

    #[tokio::test]
    async fn test_corrupt_image_is_rejected() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("broken.jpg");
        std::fs::write(&path, b"definitely not an image").unwrap();

        let prober = FfprobeProber::new(Duration::from_secs(5));
        let err = prober.probe(&path).await.unwrap_err();
        assert!(matches!(err, ProbeError::Corrupt { .. }));
    }
}
