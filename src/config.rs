//! # Configuration Management Module
//!
//! Questo modulo gestisce tutta la configurazione dell'applicazione.
//!
//! ## Responsabilità:
//! - Definisce la struct `Config` con tutti i parametri di compressione
//! - Fornisce validazione robusta dei parametri di input
//! - Supporta caricamento/salvataggio configurazione da/verso file JSON
//! - Fornisce valori di default sensati per tutti i parametri
//!
//! ## Parametri principali:
//! - `quality_threshold`: qualità minima (0-1 oppure 0-100, default: 0.90)
//! - `quality_metric`: metrica primaria (default: vmaf)
//! - `max_attempts`: tentativi massimi per file (default: 5)
//! - `max_file_duration_secs`: budget wall-clock per file (default: 3600)
//! - `workers`: worker paralleli (default: 2, gli encoder sono già multi-thread)
//! - `min_free_space_mb`: margine minimo di spazio libero (default: 1000)
//! - `size_threshold`: il candidato deve essere < originale * threshold (default: 0.8)
//!
//! ## Esempio:
//! ```rust,ignore
//! let config = Config {
//!     quality_threshold: 0.95,
//!     max_attempts: 3,
//!     ..Default::default()
//! };
//! config.validate()?;
//! ```

use crate::error::CompressError;
use crate::types::{Codec, Preset, QualityMetric, QualityThreshold};
use anyhow::Result;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// External tool used to produce candidates
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EncoderTool {
    Ffmpeg,
    Handbrake,
}

/// Rate control family the parameter strategy searches over
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RateMode {
    Crf,
    Bitrate,
}

/// Configuration for quality-validated compression
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Minimum quality, accepted on a 0-1 or 0-100 scale
    pub quality_threshold: f64,
    /// Primary quality metric
    pub quality_metric: QualityMetric,
    /// Maximum encode attempts per file
    pub max_attempts: usize,
    /// Wall-clock budget per file, in seconds
    pub max_file_duration_secs: u64,
    /// Timeout of a single encoder run
    pub encoder_timeout_secs: u64,
    /// Timeout of a single quality measurement
    pub scorer_timeout_secs: u64,
    /// Timeout of a single probe
    pub probe_timeout_secs: u64,
    /// Number of files processed concurrently
    pub workers: usize,
    /// Free space that must remain after writing a candidate
    pub min_free_space_mb: u64,
    /// Encoder tool
    pub encoder: EncoderTool,
    /// Codec for video candidates
    pub video_codec: Codec,
    /// Codec for image candidates
    pub image_codec: Codec,
    /// Rate control searched by the strategy
    pub rate_mode: RateMode,
    /// Starting encoder preset
    pub preset: Preset,
    /// Keep candidate only if new size < original * threshold
    pub size_threshold: f64,
    /// Files smaller than this are left untouched
    pub min_size_mb: u64,
    /// Length of the window measured by the quality scorer
    pub sample_duration_secs: u64,
    /// Maximum duration difference between original and candidate
    pub duration_tolerance_secs: f64,
    /// Allow the strategy to reduce resolution once the level range is exhausted
    pub allow_downscale: bool,
    /// Adjust the starting level to the detected content type
    pub content_aware: bool,
    /// Output directory for accepted files (None = replace in place)
    pub output_path: Option<PathBuf>,
    /// Directory holding per-file work directories
    pub temp_dir: PathBuf,
    /// Skip files whose recorded decision is still current
    pub skip_processed: bool,
    /// Output progress and decisions as JSON lines
    pub json_output: bool,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            quality_threshold: 0.90,
            quality_metric: QualityMetric::Vmaf,
            max_attempts: 5,
            max_file_duration_secs: 3600,
            encoder_timeout_secs: 1800,
            scorer_timeout_secs: 600,
            probe_timeout_secs: 60,
            workers: 2,
            min_free_space_mb: 1000,
            encoder: EncoderTool::Ffmpeg,
            video_codec: Codec::H265,
            image_codec: Codec::Webp,
            rate_mode: RateMode::Crf,
            preset: Preset::Slow,
            size_threshold: 0.8,
            min_size_mb: 0,
            sample_duration_secs: 60,
            duration_tolerance_secs: 1.0,
            allow_downscale: false,
            content_aware: true,
            output_path: None,
            temp_dir: std::env::temp_dir().join("media_compression"),
            skip_processed: false,
            json_output: false,
        }
    }
}

impl Config {
    /// Validate configuration parameters
    pub fn validate(&self) -> Result<()> {
        if !(self.quality_threshold > 0.0 && self.quality_threshold <= 100.0) {
            return Err(CompressError::Config(
                "Quality threshold must be in (0, 1] or (1, 100]".to_string(),
            )
            .into());
        }

        if self.max_attempts == 0 {
            return Err(CompressError::Config("max_attempts must be greater than 0".to_string()).into());
        }

        if self.max_file_duration_secs == 0 {
            return Err(CompressError::Config(
                "max_file_duration_secs must be greater than 0".to_string(),
            )
            .into());
        }

        if self.encoder_timeout_secs == 0 || self.scorer_timeout_secs == 0 || self.probe_timeout_secs == 0 {
            return Err(CompressError::Config("Tool timeouts must be greater than 0".to_string()).into());
        }

        if self.workers == 0 {
            return Err(CompressError::Config("Number of workers must be greater than 0".to_string()).into());
        }

        if self.size_threshold <= 0.0 || self.size_threshold > 1.0 {
            return Err(CompressError::Config("Size threshold must be between 0.0 and 1.0".to_string()).into());
        }

        if self.video_codec.is_image() {
            return Err(CompressError::Config(format!(
                "{} is not a video codec",
                self.video_codec
            ))
            .into());
        }

        if !self.image_codec.is_image() {
            return Err(CompressError::Config(format!(
                "{} is not an image codec",
                self.image_codec
            ))
            .into());
        }

        if self.sample_duration_secs == 0 {
            return Err(CompressError::Config("sample_duration_secs must be greater than 0".to_string()).into());
        }

        // Validate output path if specified
        if let Some(ref output_path) = self.output_path {
            if !output_path.exists() {
                return Err(CompressError::Config(format!(
                    "Output path does not exist: {}",
                    output_path.display()
                ))
                .into());
            }
            if !output_path.is_dir() {
                return Err(CompressError::Config(format!(
                    "Output path is not a directory: {}",
                    output_path.display()
                ))
                .into());
            }
        }

        Ok(())
    }

    /// Quality threshold resolved for the configured primary metric
    pub fn threshold(&self) -> QualityThreshold {
        QualityThreshold::from_config(self.quality_threshold, self.quality_metric)
    }

    pub fn file_budget(&self) -> Duration {
        Duration::from_secs(self.max_file_duration_secs)
    }

    pub fn encoder_timeout(&self) -> Duration {
        Duration::from_secs(self.encoder_timeout_secs)
    }

    pub fn scorer_timeout(&self) -> Duration {
        Duration::from_secs(self.scorer_timeout_secs)
    }

    pub fn probe_timeout(&self) -> Duration {
        Duration::from_secs(self.probe_timeout_secs)
    }

    pub fn min_size_bytes(&self) -> u64 {
        self.min_size_mb * 1024 * 1024
    }

    pub fn min_free_space_bytes(&self) -> u64 {
        self.min_free_space_mb * 1024 * 1024
    }

    /// Load configuration from file
    pub async fn from_file(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Ok(Self::default());
        }

        let content = tokio::fs::read_to_string(path).await?;
        let config: Config = serde_json::from_str(&content)?;
        config.validate()?;
        Ok(config)
    }

    /// Save configuration to file
    pub async fn save_to_file(&self, path: &Path) -> Result<()> {
        let content = serde_json::to_string_pretty(self)?;
        tokio::fs::write(path, content).await?;
        Ok(())
    }
}
