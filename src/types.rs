//! # Data Model Module
//!
//! Tipi valore condivisi da tutti i componenti della pipeline di compressione.
//!
//! ## Strutture dati:
//! - `MediaDescriptor`: snapshot immutabile delle proprietà tecniche di un file
//! - `EncodeParameters`: un tentativo di encoding (codec, rate control, scala, preset, flag)
//! - `EncodeAttempt`: esito di un tentativo, accumulato in ordine cronologico
//! - `QualityScore` / `QualityThreshold`: punteggio normalizzato 0.0-1.0 e target per metrica
//! - `CompressionDecision`: esito terminale, esattamente uno per file
//! - `BatchResult`: decisioni per file + contatori aggregati
//!
//! ## Invarianti:
//! - Il punteggio di un tentativo ha senso solo se il tentativo è riuscito
//! - Punteggi di metriche diverse non vengono mai confrontati (`QualityScore::compare`)
//! - `Accepted` referenzia sempre un punteggio che soddisfa il target della sua metrica

use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::collections::BTreeMap;
use std::fmt;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Broad media family of a file
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MediaKind {
    Video,
    Image,
}

/// Technical properties of a media file, produced by the prober
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MediaDescriptor {
    pub path: PathBuf,
    pub kind: MediaKind,
    pub container: String,
    pub codec: String,
    pub duration_secs: f64,
    pub width: u32,
    pub height: u32,
    /// Overall bitrate in bits per second, 0 when unknown
    pub bitrate: u64,
    pub frame_rate: f64,
    pub file_size: u64,
}

impl MediaDescriptor {
    pub fn pixels(&self) -> u64 {
        self.width as u64 * self.height as u64
    }

    pub fn aspect_ratio(&self) -> Option<f64> {
        if self.width == 0 || self.height == 0 {
            None
        } else {
            Some(self.width as f64 / self.height as f64)
        }
    }
}

/// Output codec of a compression attempt
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Codec {
    H264,
    H265,
    Av1,
    Jpeg,
    Webp,
}

impl Codec {
    pub fn name(&self) -> &'static str {
        match self {
            Self::H264 => "h264",
            Self::H265 => "h265",
            Self::Av1 => "av1",
            Self::Jpeg => "jpeg",
            Self::Webp => "webp",
        }
    }

    pub fn is_image(&self) -> bool {
        matches!(self, Self::Jpeg | Self::Webp)
    }

    /// Usable compression levels, higher = smaller output
    ///
    /// Video codecs use the CRF scale directly, JPEG the `-q:v` scale and
    /// WebP the inverse of its 0-100 quality.
    pub fn level_range(&self) -> (u8, u8) {
        match self {
            Self::H264 | Self::H265 => (14, 40),
            Self::Av1 => (18, 55),
            Self::Jpeg => (2, 31),
            Self::Webp => (0, 95),
        }
    }

    pub fn default_level(&self) -> u8 {
        match self {
            Self::H264 => 23,
            Self::H265 => 24,
            Self::Av1 => 32,
            Self::Jpeg => 5,
            Self::Webp => 20,
        }
    }

    /// File extension for a candidate encoded with this codec
    pub fn extension_for(&self, input: &Path) -> String {
        match self {
            Self::Jpeg => "jpg".to_string(),
            Self::Webp => "webp".to_string(),
            _ => {
                let ext = input
                    .extension()
                    .map(|e| e.to_string_lossy().to_lowercase())
                    .unwrap_or_default();
                match ext.as_str() {
                    "mp4" | "mkv" | "mov" | "m4v" => ext,
                    _ => "mkv".to_string(),
                }
            }
        }
    }
}

impl fmt::Display for Codec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Encoder speed tier, from fastest to slowest
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Preset {
    Faster,
    Fast,
    Medium,
    Slow,
    Slower,
}

impl Preset {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Faster => "faster",
            Self::Fast => "fast",
            Self::Medium => "medium",
            Self::Slow => "slow",
            Self::Slower => "slower",
        }
    }

    /// Next faster tier, `None` when already the fastest
    pub fn faster(&self) -> Option<Preset> {
        match self {
            Self::Faster => None,
            Self::Fast => Some(Self::Faster),
            Self::Medium => Some(Self::Fast),
            Self::Slow => Some(Self::Medium),
            Self::Slower => Some(Self::Slow),
        }
    }

    /// SVT-AV1 numeric preset equivalent
    pub fn svt_av1_level(&self) -> u8 {
        match self {
            Self::Faster => 10,
            Self::Fast => 8,
            Self::Medium => 6,
            Self::Slow => 4,
            Self::Slower => 2,
        }
    }
}

impl fmt::Display for Preset {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// How the encoder is asked to spend bits
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum RateControl {
    /// Constant quality (CRF, `-q:v`, or inverted WebP quality)
    Crf(u8),
    /// Average video bitrate in kbit/s
    BitrateKbps(u32),
}

impl fmt::Display for RateControl {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Crf(level) => write!(f, "crf={}", level),
            Self::BitrateKbps(kbps) => write!(f, "vb={}k", kbps),
        }
    }
}

/// Canonical identity of an `EncodeParameters` value
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ParameterFingerprint(String);

impl fmt::Display for ParameterFingerprint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// One compression attempt's parameters. Never mutated: each attempt gets a fresh value.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EncodeParameters {
    pub codec: Codec,
    /// Abstract compression level `rate_control` was derived from (higher = smaller)
    pub level: u8,
    pub rate_control: RateControl,
    /// Output resolution as a percentage of the source
    pub scale_percent: u8,
    pub preset: Preset,
    /// Codec-specific flags, ordered so the fingerprint is canonical
    pub flags: BTreeMap<String, String>,
}

impl EncodeParameters {
    pub fn fingerprint(&self) -> ParameterFingerprint {
        let flags = self
            .flags
            .iter()
            .map(|(k, v)| format!("{}={}", k, v))
            .collect::<Vec<_>>()
            .join(",");
        ParameterFingerprint(format!(
            "{}|{}|scale={}|preset={}|{}",
            self.codec, self.rate_control, self.scale_percent, self.preset, flags
        ))
    }
}

/// Objective quality measurement used to compute a score
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum QualityMetric {
    Vmaf,
    Ssim,
    Psnr,
}

impl QualityMetric {
    pub fn name(&self) -> &'static str {
        match self {
            Self::Vmaf => "vmaf",
            Self::Ssim => "ssim",
            Self::Psnr => "psnr",
        }
    }
}

impl fmt::Display for QualityMetric {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Quality score normalized to 0.0-1.0, tagged with its metric
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct QualityScore {
    pub value: f64,
    pub metric: QualityMetric,
}

impl QualityScore {
    pub fn new(value: f64, metric: QualityMetric) -> Self {
        Self {
            value: value.clamp(0.0, 1.0),
            metric,
        }
    }

    /// Orders two scores, `None` when they come from different metrics
    pub fn compare(&self, other: &QualityScore) -> Option<Ordering> {
        if self.metric != other.metric {
            return None;
        }
        self.value.partial_cmp(&other.value)
    }

    pub fn meets(&self, threshold: &QualityThreshold) -> bool {
        self.value >= threshold.target_for(self.metric)
    }

    /// Signed distance from the target of this score's metric
    pub fn margin(&self, threshold: &QualityThreshold) -> f64 {
        self.value - threshold.target_for(self.metric)
    }
}

impl fmt::Display for QualityScore {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}={:.4}", self.metric, self.value)
    }
}

/// Minimum acceptable quality, resolved per metric
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct QualityThreshold {
    pub primary: QualityMetric,
    pub value: f64,
}

impl QualityThreshold {
    /// Accepts either a 0-1 or a 0-100 value
    pub fn from_config(raw: f64, primary: QualityMetric) -> Self {
        let value = if raw > 1.0 { raw / 100.0 } else { raw };
        Self {
            primary,
            value: value.clamp(0.0, 1.0),
        }
    }

    /// Target for a metric. Fallback metrics use fixed acceptance rules:
    /// SSIM needs max(0.8 × threshold, 0.80), PSNR needs 30 dB (0.60 normalized).
    pub fn target_for(&self, metric: QualityMetric) -> f64 {
        if metric == self.primary {
            return self.value;
        }
        match metric {
            QualityMetric::Vmaf => self.value,
            QualityMetric::Ssim => (self.value * 0.8).max(0.80),
            QualityMetric::Psnr => 0.60,
        }
    }
}

/// What happened during one attempt
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum AttemptOutcome {
    /// Candidate encoded and scored; `size_ok` is false when it was not small enough
    Scored {
        size_bytes: u64,
        score: QualityScore,
        size_ok: bool,
    },
    ToolFailure {
        exit_code: Option<i32>,
        diagnostic: String,
    },
    Timeout,
    ScoringFailed {
        size_bytes: u64,
        reason: String,
    },
}

/// Record of one controller iteration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EncodeAttempt {
    /// 1-based position in the file's history
    pub index: usize,
    pub parameters: EncodeParameters,
    pub outcome: AttemptOutcome,
    pub elapsed: Duration,
}

impl EncodeAttempt {
    pub fn succeeded(&self) -> bool {
        matches!(self.outcome, AttemptOutcome::Scored { .. })
    }

    /// Quality score, only present for successful attempts
    pub fn score(&self) -> Option<QualityScore> {
        match &self.outcome {
            AttemptOutcome::Scored { score, .. } => Some(*score),
            _ => None,
        }
    }

    pub fn size_bytes(&self) -> Option<u64> {
        match &self.outcome {
            AttemptOutcome::Scored { size_bytes, .. }
            | AttemptOutcome::ScoringFailed { size_bytes, .. } => Some(*size_bytes),
            _ => None,
        }
    }

    pub fn is_timeout(&self) -> bool {
        matches!(self.outcome, AttemptOutcome::Timeout)
    }
}

/// Why the original was kept
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FallbackReason {
    QualityUnattainable,
    BudgetExhausted,
    ToolingError,
    Cancelled,
    BelowMinimumSize,
    AlreadyProcessed,
}

impl fmt::Display for FallbackReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let text = match self {
            Self::QualityUnattainable => "quality unattainable",
            Self::BudgetExhausted => "budget exhausted",
            Self::ToolingError => "tooling error: no attempt produced a scorable candidate",
            Self::Cancelled => "cancelled",
            Self::BelowMinimumSize => "below minimum size",
            Self::AlreadyProcessed => "already processed",
        };
        f.write_str(text)
    }
}

/// Why a file could not be processed at all
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "details", rename_all = "snake_case")]
pub enum FailureReason {
    UnreadableInput(String),
    DiskSpace(String),
    DiskWrite(String),
    /// A worker stopped without producing a decision
    Internal(String),
}

impl fmt::Display for FailureReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::UnreadableInput(d) => write!(f, "unreadable input: {}", d),
            Self::DiskSpace(d) => write!(f, "disk space: {}", d),
            Self::DiskWrite(d) => write!(f, "disk write failed: {}", d),
            Self::Internal(d) => write!(f, "internal error: {}", d),
        }
    }
}

/// Terminal outcome for one file
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum CompressionDecision {
    Accepted {
        output: PathBuf,
        original_size: u64,
        final_size: u64,
        score: QualityScore,
        attempts: usize,
    },
    FellBackToOriginal {
        reason: FallbackReason,
        attempts: usize,
    },
    Failed {
        reason: FailureReason,
        attempts: usize,
    },
}

impl CompressionDecision {
    pub fn attempts(&self) -> usize {
        match self {
            Self::Accepted { attempts, .. }
            | Self::FellBackToOriginal { attempts, .. }
            | Self::Failed { attempts, .. } => *attempts,
        }
    }

    pub fn bytes_saved(&self) -> u64 {
        match self {
            Self::Accepted {
                original_size,
                final_size,
                ..
            } => original_size.saturating_sub(*final_size),
            _ => 0,
        }
    }

    pub fn label(&self) -> &'static str {
        match self {
            Self::Accepted { .. } => "accepted",
            Self::FellBackToOriginal { .. } => "fell_back",
            Self::Failed { .. } => "failed",
        }
    }

    pub fn final_size(&self) -> Option<u64> {
        match self {
            Self::Accepted { final_size, .. } => Some(*final_size),
            _ => None,
        }
    }

    pub fn final_score(&self) -> Option<QualityScore> {
        match self {
            Self::Accepted { score, .. } => Some(*score),
            _ => None,
        }
    }

    /// Human-readable reason for non-accepted outcomes
    pub fn reason(&self) -> Option<String> {
        match self {
            Self::Accepted { .. } => None,
            Self::FellBackToOriginal { reason, .. } => Some(reason.to_string()),
            Self::Failed { reason, .. } => Some(reason.to_string()),
        }
    }
}

/// One file's entry in a batch
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BatchEntry {
    pub index: usize,
    pub path: PathBuf,
    pub decision: CompressionDecision,
}

/// Per-file decisions plus aggregate counters, always an exact sum over `entries`
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct BatchResult {
    pub entries: Vec<BatchEntry>,
    pub accepted: usize,
    pub fell_back: usize,
    pub failed: usize,
    pub bytes_saved: u64,
}

impl BatchResult {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record(&mut self, index: usize, path: PathBuf, decision: CompressionDecision) {
        match decision {
            CompressionDecision::Accepted { .. } => self.accepted += 1,
            CompressionDecision::FellBackToOriginal { .. } => self.fell_back += 1,
            CompressionDecision::Failed { .. } => self.failed += 1,
        }
        self.bytes_saved += decision.bytes_saved();
        self.entries.push(BatchEntry {
            index,
            path,
            decision,
        });
    }

    /// Restores input order once every decision has arrived
    pub fn finalize(mut self) -> Self {
        self.entries.sort_by_key(|e| e.index);
        self
    }

    pub fn total(&self) -> usize {
        self.entries.len()
    }

    pub fn decision_for(&self, path: &Path) -> Option<&CompressionDecision> {
        self.entries
            .iter()
            .find(|e| e.path == path)
            .map(|e| &e.decision)
    }
}
