//! # JSON Output Module
//!
//! Output strutturato (una riga JSON per evento su stdout) per l'integrazione
//! con altri processi.
//!
//! ## Tipi di messaggi:
//! - `start`: inizio batch con la configurazione effettiva
//! - `file_start`: un worker ha preso in carico un file
//! - `file_decision`: decisione finale per un file
//! - `progress`: contatori aggiornati
//! - `complete`: fine batch con statistiche finali e storiche
//! - `error`: errore a livello di batch

use crate::config::{Config, EncoderTool, RateMode};
use crate::types::{Codec, CompressionDecision, QualityMetric};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

#[derive(Debug, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum JsonMessage {
    Start {
        input: PathBuf,
        output_dir: Option<PathBuf>,
        total_files: usize,
        config: JsonConfig,
    },

    FileStart {
        path: PathBuf,
        index: usize,
        total: usize,
    },

    FileDecision {
        path: PathBuf,
        outcome: String,
        output: Option<PathBuf>,
        original_size: u64,
        final_size: Option<u64>,
        score: Option<f64>,
        metric: Option<QualityMetric>,
        attempts: usize,
        reason: Option<String>,
    },

    Progress {
        current: usize,
        total: usize,
        percentage: f64,
        accepted: usize,
        fell_back: usize,
        failed: usize,
        bytes_saved: u64,
    },

    Complete {
        total: usize,
        accepted: usize,
        fell_back: usize,
        failed: usize,
        bytes_saved: u64,
        duration_seconds: f64,
        historical_stats: HistoricalStats,
    },

    Error {
        message: String,
        details: Option<String>,
    },
}

/// Effective settings reported at start
#[derive(Debug, Serialize, Deserialize, PartialEq)]
pub struct JsonConfig {
    pub quality_threshold: f64,
    pub quality_metric: QualityMetric,
    pub max_attempts: usize,
    pub max_file_duration_secs: u64,
    pub workers: usize,
    pub encoder: EncoderTool,
    pub video_codec: Codec,
    pub image_codec: Codec,
    pub rate_mode: RateMode,
}

#[derive(Debug, Default, Serialize, Deserialize, PartialEq)]
pub struct HistoricalStats {
    pub total_files_recorded: usize,
    pub total_bytes_saved_historically: u64,
    pub total_accepted_historically: usize,
}

impl JsonMessage {
    /// Writes the message as one line on stdout
    pub fn emit(&self) {
        if let Ok(json) = serde_json::to_string(self) {
            println!("{}", json);
        }
    }

    pub fn file_decision(path: PathBuf, decision: &CompressionDecision, original_size: u64) -> Self {
        let score = decision.final_score();
        let output = match decision {
            CompressionDecision::Accepted { output, .. } => Some(output.clone()),
            _ => None,
        };
        Self::FileDecision {
            path,
            outcome: decision.label().to_string(),
            output,
            original_size,
            final_size: decision.final_size(),
            score: score.map(|s| s.value),
            metric: score.map(|s| s.metric),
            attempts: decision.attempts(),
            reason: decision.reason(),
        }
    }

    pub fn progress(
        current: usize,
        total: usize,
        accepted: usize,
        fell_back: usize,
        failed: usize,
        bytes_saved: u64,
    ) -> Self {
        let percentage = if total > 0 {
            (current as f64 / total as f64) * 100.0
        } else {
            0.0
        };

        Self::Progress {
            current,
            total,
            percentage,
            accepted,
            fell_back,
            failed,
            bytes_saved,
        }
    }

    pub fn error(message: String, details: Option<String>) -> Self {
        Self::Error { message, details }
    }
}

impl From<&Config> for JsonConfig {
    fn from(config: &Config) -> Self {
        Self {
            quality_threshold: config.threshold().value,
            quality_metric: config.quality_metric,
            max_attempts: config.max_attempts,
            max_file_duration_secs: config.max_file_duration_secs,
            workers: config.workers,
            encoder: config.encoder,
            video_codec: config.video_codec,
            image_codec: config.image_codec,
            rate_mode: config.rate_mode,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{FallbackReason, QualityScore};

    #[test]
    fn test_file_decision_serialization() {
        let decision = CompressionDecision::Accepted {
            output: PathBuf::from("/m/clip.mkv"),
            original_size: 1000,
            final_size: 500,
            score: QualityScore::new(0.951, QualityMetric::Vmaf),
            attempts: 2,
        };
        let json = serde_json::to_value(JsonMessage::file_decision("/m/clip.avi".into(), &decision, 1000)).unwrap();

        assert_eq!(json["type"], "file_decision");
        assert_eq!(json["outcome"], "accepted");
        assert_eq!(json["final_size"], 500);
        assert_eq!(json["metric"], "vmaf");
        assert_eq!(json["reason"], serde_json::Value::Null);
    }

    #[test]
    fn test_fallback_carries_reason() {
        let decision = CompressionDecision::FellBackToOriginal {
            reason: FallbackReason::BudgetExhausted,
            attempts: 3,
        };
        let json = serde_json::to_value(JsonMessage::file_decision("a.mp4".into(), &decision, 10)).unwrap();
        assert_eq!(json["outcome"], "fell_back");
        assert_eq!(json["reason"], "budget exhausted");
        assert_eq!(json["attempts"], 3);
    }

    #[test]
    fn test_progress_percentage() {
        match JsonMessage::progress(1, 4, 1, 0, 0, 10) {
            JsonMessage::Progress { percentage, .. } => assert_eq!(percentage, 25.0),
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn test_start_reports_effective_config() {
        let mut config = Config::default();
        config.quality_threshold = 93.0;
        let message = JsonMessage::Start {
            input: "/media".into(),
            output_dir: None,
            total_files: 3,
            config: JsonConfig::from(&config),
        };
        let json = serde_json::to_value(&message).unwrap();
        assert_eq!(json["type"], "start");
        assert_eq!(json["total_files"], 3);
        assert_eq!(json["config"]["quality_threshold"], 0.93);
    }
}
