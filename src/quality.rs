//! # Quality Scorer Module
//!
//! Misura la similarità oggettiva tra originale e candidato con ffmpeg.
//!
//! ## Responsabilità:
//! - Definisce la capability `QualityScorer`
//! - Verifica che i due file siano confrontabili (durata e aspect ratio)
//! - Misura una finestra campione del video invece dell'intero file
//! - Catena di fallback VMAF → SSIM → PSNR partendo dalla metrica primaria
//! - Normalizza ogni punteggio in 0.0-1.0
//!
//! ## Finestra campione:
//! - Inizio: min(30s, 10% della durata)
//! - Lunghezza: `sample_duration_secs`, ridotta per clip corte (minimo 10s)
//!
//! ## Normalizzazione:
//! - VMAF: media pooled / 100
//! - SSIM: valore "All" così com'è
//! - PSNR: min(dB / 50, 1.0), quindi 30 dB = 0.60

use crate::error::ScoringError;
use crate::platform::PlatformCommands;
use crate::probe::MediaProber;
use crate::types::{MediaDescriptor, MediaKind, QualityMetric, QualityScore};
use async_trait::async_trait;
use serde::Deserialize;
use std::ffi::OsString;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::sync::Arc;
use std::time::Duration;
use tokio::process::Command;
use tracing::{debug, info, warn};

const ASPECT_TOLERANCE: f64 = 0.02;
const MAX_SAMPLE_START_SECS: f64 = 30.0;
const PSNR_CEILING_DB: f64 = 50.0;

/// Capability: compare a candidate against its original
#[async_trait]
pub trait QualityScorer: Send + Sync {
    async fn score(&self, original: &Path, candidate: &Path) -> Result<QualityScore, ScoringError>;
}

/// Portion of the timeline that gets measured
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SampleWindow {
    pub start_secs: f64,
    pub duration_secs: f64,
}

impl SampleWindow {
    pub fn for_duration(media_duration: f64, sample_duration: f64) -> Self {
        let start_secs = MAX_SAMPLE_START_SECS.min(media_duration * 0.1);
        let mut duration_secs = sample_duration;
        if start_secs + duration_secs > media_duration {
            // start is at most 10% in, so the remainder is the longest window
            duration_secs = media_duration - start_secs;
        }
        Self {
            start_secs,
            duration_secs,
        }
    }
}

/// Order in which metrics are attempted: the primary first, then the usual fallbacks
pub fn metric_chain(primary: QualityMetric) -> Vec<QualityMetric> {
    let mut chain = vec![primary];
    for metric in [QualityMetric::Vmaf, QualityMetric::Ssim, QualityMetric::Psnr] {
        if metric != primary {
            chain.push(metric);
        }
    }
    chain
}

#[derive(Debug, Deserialize)]
struct VmafLog {
    pooled_metrics: PooledMetrics,
}

#[derive(Debug, Deserialize)]
struct PooledMetrics {
    vmaf: VmafMean,
}

#[derive(Debug, Deserialize)]
struct VmafMean {
    mean: f64,
}

/// Pooled VMAF mean from a libvmaf JSON log, normalized to 0-1
pub fn parse_vmaf_log(content: &str) -> Option<f64> {
    let log: VmafLog = serde_json::from_str(content).ok()?;
    Some((log.pooled_metrics.vmaf.mean / 100.0).clamp(0.0, 1.0))
}

/// Value following the last occurrence of `key` in ffmpeg's summary output
fn summary_value(stderr: &str, key: &str) -> Option<f64> {
    let pos = stderr.rfind(key)?;
    let token: String = stderr[pos + key.len()..]
        .chars()
        .take_while(|c| !c.is_whitespace())
        .collect();
    token.parse().ok()
}

/// SSIM "All:" value from the ssim filter summary
pub fn parse_ssim_summary(stderr: &str) -> Option<f64> {
    summary_value(stderr, "All:").map(|v| v.clamp(0.0, 1.0))
}

/// PSNR "average:" value in dB from the psnr filter summary (`inf` for identical input)
pub fn parse_psnr_summary(stderr: &str) -> Option<f64> {
    summary_value(stderr, "average:")
}

pub fn normalize_psnr(db: f64) -> f64 {
    (db / PSNR_CEILING_DB).clamp(0.0, 1.0)
}

/// Escapes a path for use inside an ffmpeg filter option
fn escape_filter_path(path: &Path) -> String {
    path.to_string_lossy()
        .replace('\\', "/")
        .replace(':', "\\:")
        .replace('\'', "\\'")
}

/// Scorer running ffmpeg's libvmaf, ssim and psnr filters
pub struct FfmpegQualityScorer {
    prober: Arc<dyn MediaProber>,
    primary: QualityMetric,
    sample_duration_secs: f64,
    duration_tolerance_secs: f64,
    timeout: Duration,
}

impl FfmpegQualityScorer {
    pub fn new(
        prober: Arc<dyn MediaProber>,
        primary: QualityMetric,
        sample_duration_secs: f64,
        duration_tolerance_secs: f64,
        timeout: Duration,
    ) -> Self {
        Self {
            prober,
            primary,
            sample_duration_secs,
            duration_tolerance_secs,
            timeout,
        }
    }

    /// Fails when the two files cannot be meaningfully compared
    pub fn check_comparable(
        &self,
        original: &MediaDescriptor,
        candidate: &MediaDescriptor,
    ) -> Result<(), ScoringError> {
        if original.kind == MediaKind::Video {
            let diff = (original.duration_secs - candidate.duration_secs).abs();
            if diff > self.duration_tolerance_secs {
                return Err(ScoringError::Incomparable(format!(
                    "durations differ by {:.2}s ({:.2}s vs {:.2}s)",
                    diff, original.duration_secs, candidate.duration_secs
                )));
            }
        }

        match (original.aspect_ratio(), candidate.aspect_ratio()) {
            (Some(a), Some(b)) if (a - b).abs() / a <= ASPECT_TOLERANCE => Ok(()),
            (Some(a), Some(b)) => Err(ScoringError::Incomparable(format!(
                "aspect ratios differ ({:.3} vs {:.3})",
                a, b
            ))),
            _ => Err(ScoringError::Incomparable("missing resolution".to_string())),
        }
    }

    fn build_args(
        metric: QualityMetric,
        original: &MediaDescriptor,
        candidate: &MediaDescriptor,
        window: Option<SampleWindow>,
        log_path: &Path,
    ) -> Vec<OsString> {
        let mut args: Vec<OsString> = vec!["-hide_banner".into(), "-nostdin".into(), "-nostats".into()];

        for path in [&candidate.path, &original.path] {
            if let Some(w) = window {
                args.push("-ss".into());
                args.push(format!("{:.3}", w.start_secs).into());
                args.push("-t".into());
                args.push(format!("{:.3}", w.duration_secs).into());
            }
            args.push("-i".into());
            args.push(path.as_os_str().to_owned());
        }

        // Reference is brought to the candidate's resolution so downscaled candidates stay comparable
        let filter = match metric {
            QualityMetric::Vmaf => format!(
                "libvmaf=log_fmt=json:log_path={}",
                escape_filter_path(log_path)
            ),
            QualityMetric::Ssim => "ssim".to_string(),
            QualityMetric::Psnr => "psnr".to_string(),
        };
        let graph = format!(
            "[0:v]setpts=PTS-STARTPTS[dist];[1:v]scale={}:{}:flags=bicubic,setpts=PTS-STARTPTS[ref];[dist][ref]{}",
            candidate.width, candidate.height, filter
        );

        args.push("-filter_complex".into());
        args.push(graph.into());
        args.push("-f".into());
        args.push("null".into());
        args.push("-".into());
        args
    }

    async fn run_metric(
        &self,
        metric: QualityMetric,
        original: &MediaDescriptor,
        candidate: &MediaDescriptor,
        window: Option<SampleWindow>,
    ) -> Result<f64, MetricError> {
        let log_path = candidate.path.with_extension("vmaf.json");
        let ffmpeg = PlatformCommands::instance().get_command("ffmpeg");
        let args = Self::build_args(metric, original, candidate, window, &log_path);

        let child = Command::new(ffmpeg)
            .args(&args)
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| MetricError::Failed(format!("cannot start ffmpeg: {}", e)))?;

        let output = tokio::time::timeout(self.timeout, child.wait_with_output())
            .await
            .map_err(|_| MetricError::TimedOut)?
            .map_err(|e| MetricError::Failed(e.to_string()))?;

        let stderr = String::from_utf8_lossy(&output.stderr);
        let value = match metric {
            QualityMetric::Vmaf => {
                let content = tokio::fs::read_to_string(&log_path).await.unwrap_or_default();
                let _ = tokio::fs::remove_file(&log_path).await;
                parse_vmaf_log(&content)
            }
            QualityMetric::Ssim => parse_ssim_summary(&stderr),
            QualityMetric::Psnr => parse_psnr_summary(&stderr).map(normalize_psnr),
        };

        match value {
            Some(v) => Ok(v),
            None if !output.status.success() => Err(MetricError::Failed(format!(
                "ffmpeg exited with {}: {}",
                output.status,
                crate::utils::tail_lines(&stderr, 3)
            ))),
            None => Err(MetricError::Failed("no score in ffmpeg output".to_string())),
        }
    }
}

enum MetricError {
    TimedOut,
    Failed(String),
}

#[async_trait]
impl QualityScorer for FfmpegQualityScorer {
    async fn score(&self, original: &Path, candidate: &Path) -> Result<QualityScore, ScoringError> {
        let undecodable = |path: &Path, e: crate::error::ProbeError| ScoringError::Undecodable {
            path: PathBuf::from(path),
            details: e.to_string(),
        };
        let original_info = self
            .prober
            .probe(original)
            .await
            .map_err(|e| undecodable(original, e))?;
        let candidate_info = self
            .prober
            .probe(candidate)
            .await
            .map_err(|e| undecodable(candidate, e))?;

        self.check_comparable(&original_info, &candidate_info)?;

        let window = match original_info.kind {
            MediaKind::Video => Some(SampleWindow::for_duration(
                original_info.duration_secs.min(candidate_info.duration_secs),
                self.sample_duration_secs,
            )),
            MediaKind::Image => None,
        };

        let mut failures = Vec::new();
        for metric in metric_chain(self.primary) {
            debug!("Measuring {} for {}", metric, candidate.display());
            match self
                .run_metric(metric, &original_info, &candidate_info, window)
                .await
            {
                Ok(value) => {
                    let score = QualityScore::new(value, metric);
                    info!("Quality {} for {}", score, candidate.display());
                    return Ok(score);
                }
                Err(MetricError::TimedOut) => {
                    return Err(ScoringError::Timeout(self.timeout.as_secs()));
                }
                Err(MetricError::Failed(reason)) => {
                    warn!("{} measurement failed: {}", metric, reason);
                    failures.push(format!("{}: {}", metric, reason));
                }
            }
        }

        Err(ScoringError::AllMetricsFailed(failures.join("; ")))
    }
}
