//! # State Management Module
//!
//! Persiste un riepilogo della decisione presa per ogni file, così che un
//! batch successivo possa saltare i file già trattati e non modificati.
//!
//! ## Responsabilità:
//! - Riepilogo per file: esito, dimensione finale, punteggio, tentativi, motivo
//! - Persistenza JSON per directory media (hash del path)
//! - Skip basato sul modification time
//! - Statistiche storiche e cleanup delle entry di file non più esistenti
//!
//! ## Strategia di persistence:
//! - Un file JSON per directory media
//! - Salvataggio in `~/.media-compressor/decisions_<hash>.json`
//!
//! ## Esempio struttura state file:
//! ```json
//! {
//!   "decisions": {
//!     "/media/clip.mkv": {
//!       "path": "/media/clip.mkv",
//!       "outcome": "accepted",
//!       "original_size": 104857600,
//!       "final_size": 52428800,
//!       "final_score": 0.953,
//!       "metric": "vmaf",
//!       "attempts": 2,
//!       "reason": null,
//!       "modified_time": 1642680000,
//!       "processed_at": 1642680000
//!     }
//!   }
//! }
//! ```

use crate::types::{CompressionDecision, FallbackReason, QualityMetric};
use anyhow::Result;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::time::SystemTime;
use tokio::fs;

/// Persisted outcome of one file
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct DecisionSummary {
    pub path: PathBuf,
    pub outcome: String,
    pub original_size: u64,
    pub final_size: Option<u64>,
    pub final_score: Option<f64>,
    pub metric: Option<QualityMetric>,
    pub attempts: usize,
    pub reason: Option<String>,
    pub modified_time: u64,
    pub processed_at: u64,
    /// Whether a later run should leave this file alone while it is unchanged
    #[serde(default)]
    pub settled: bool,
}

impl DecisionSummary {
    pub fn new(path: PathBuf, decision: &CompressionDecision, original_size: u64, modified_time: u64) -> Self {
        let score = decision.final_score();
        let settled = match decision {
            CompressionDecision::Accepted { .. } => true,
            CompressionDecision::FellBackToOriginal { reason, .. } => matches!(
                reason,
                FallbackReason::QualityUnattainable
                    | FallbackReason::BelowMinimumSize
                    | FallbackReason::AlreadyProcessed
            ),
            CompressionDecision::Failed { .. } => false,
        };

        Self {
            path,
            outcome: decision.label().to_string(),
            original_size,
            final_size: decision.final_size(),
            final_score: score.map(|s| s.value),
            metric: score.map(|s| s.metric),
            attempts: decision.attempts(),
            reason: decision.reason(),
            modified_time,
            processed_at: SystemTime::now()
                .duration_since(SystemTime::UNIX_EPOCH)
                .map(|d| d.as_secs())
                .unwrap_or(0),
            settled,
        }
    }

    pub fn bytes_saved(&self) -> u64 {
        self.final_size
            .map(|size| self.original_size.saturating_sub(size))
            .unwrap_or(0)
    }
}

/// State file for one media directory
#[derive(Debug, Serialize, Deserialize, Default)]
pub struct StateFile {
    pub decisions: HashMap<String, DecisionSummary>,
}

/// Reads and writes the decision history of a media directory
pub struct StateManager {
    state_file_path: PathBuf,
    state: StateFile,
}

impl StateManager {
    /// State manager for a media directory, stored under the home directory
    pub async fn new(media_dir: &Path) -> Result<Self> {
        let state_dir = dirs::home_dir()
            .ok_or_else(|| anyhow::anyhow!("Could not find home directory"))?
            .join(".media-compressor");
        Self::with_state_dir(&state_dir, media_dir).await
    }

    pub async fn with_state_dir(state_dir: &Path, media_dir: &Path) -> Result<Self> {
        fs::create_dir_all(state_dir).await?;

        let mut hasher = Sha256::new();
        hasher.update(media_dir.to_string_lossy().as_bytes());
        let hash = hex::encode(hasher.finalize())[..16].to_string();
        let state_file_path = state_dir.join(format!("decisions_{}.json", hash));

        let state = if state_file_path.exists() {
            let content = fs::read_to_string(&state_file_path).await?;
            serde_json::from_str(&content).unwrap_or_default()
        } else {
            StateFile::default()
        };

        Ok(Self {
            state_file_path,
            state,
        })
    }

    pub async fn save(&self) -> Result<()> {
        let content = serde_json::to_string_pretty(&self.state)?;
        fs::write(&self.state_file_path, content).await?;
        Ok(())
    }

    /// True when a settled decision exists and the file has not changed since
    pub fn is_processed(&self, file_path: &Path, modified_time: u64) -> bool {
        self.get(file_path)
            .map(|d| d.settled && d.modified_time == modified_time)
            .unwrap_or(false)
    }

    pub fn get(&self, file_path: &Path) -> Option<&DecisionSummary> {
        self.state.decisions.get(&file_path.to_string_lossy().to_string())
    }

    pub async fn record(&mut self, summary: DecisionSummary) -> Result<()> {
        self.state
            .decisions
            .insert(summary.path.to_string_lossy().to_string(), summary);
        self.save().await
    }

    /// (files recorded, bytes saved, accepted count)
    pub fn get_stats(&self) -> (usize, u64, usize) {
        let count = self.state.decisions.len();
        let total_saved = self.state.decisions.values().map(DecisionSummary::bytes_saved).sum();
        let accepted = self
            .state
            .decisions
            .values()
            .filter(|d| d.outcome == "accepted")
            .count();
        (count, total_saved, accepted)
    }

    /// Drops entries for files that no longer exist
    pub async fn cleanup(&mut self) -> Result<usize> {
        let before = self.state.decisions.len();
        self.state.decisions.retain(|_, d| d.path.exists());
        let removed = before - self.state.decisions.len();
        if removed > 0 {
            self.save().await?;
        }
        Ok(removed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{FailureReason, QualityScore};
    use tempfile::TempDir;

    fn accepted(path: &Path) -> CompressionDecision {
        CompressionDecision::Accepted {
            output: path.to_path_buf(),
            original_size: 1000,
            final_size: 400,
            score: QualityScore::new(0.96, QualityMetric::Vmaf),
            attempts: 2,
        }
    }

    #[tokio::test]
    async fn test_record_and_reload() {
        let state_dir = TempDir::new().unwrap();
        let media = TempDir::new().unwrap();
        let file = media.path().join("clip.mkv");

        let mut manager = StateManager::with_state_dir(state_dir.path(), media.path()).await.unwrap();
        manager
            .record(DecisionSummary::new(file.clone(), &accepted(&file), 1000, 42))
            .await
            .unwrap();

        let reloaded = StateManager::with_state_dir(state_dir.path(), media.path()).await.unwrap();
        let summary = reloaded.get(&file).unwrap();
        assert_eq!(summary.outcome, "accepted");
        assert_eq!(summary.final_size, Some(400));
        assert_eq!(summary.metric, Some(QualityMetric::Vmaf));
        assert_eq!(summary.attempts, 2);
        assert!(reloaded.is_processed(&file, 42));
        assert!(!reloaded.is_processed(&file, 43));
        assert_eq!(reloaded.get_stats(), (1, 600, 1));
    }

    #[tokio::test]
    async fn test_failures_and_cancellations_are_retried() {
        let state_dir = TempDir::new().unwrap();
        let mut manager = StateManager::with_state_dir(state_dir.path(), Path::new("/media")).await.unwrap();

        let failed = CompressionDecision::Failed {
            reason: FailureReason::UnreadableInput("corrupt".into()),
            attempts: 0,
        };
        let cancelled = CompressionDecision::FellBackToOriginal {
            reason: FallbackReason::Cancelled,
            attempts: 1,
        };
        manager
            .record(DecisionSummary::new("/media/a.mp4".into(), &failed, 10, 1))
            .await
            .unwrap();
        manager
            .record(DecisionSummary::new("/media/b.mp4".into(), &cancelled, 10, 1))
            .await
            .unwrap();

        assert!(!manager.is_processed(Path::new("/media/a.mp4"), 1));
        assert!(!manager.is_processed(Path::new("/media/b.mp4"), 1));
        assert_eq!(
            manager.get(Path::new("/media/a.mp4")).unwrap().reason.as_deref(),
            Some("unreadable input: corrupt")
        );
    }

    #[tokio::test]
    async fn test_cleanup_removes_missing_files() {
        let state_dir = TempDir::new().unwrap();
        let media = TempDir::new().unwrap();
        let kept = media.path().join("kept.mp4");
        std::fs::write(&kept, b"x").unwrap();

        let mut manager = StateManager::with_state_dir(state_dir.path(), media.path()).await.unwrap();
        manager
            .record(DecisionSummary::new(kept.clone(), &accepted(&kept), 1000, 1))
            .await
            .unwrap();
        let gone = media.path().join("gone.mp4");
        manager
            .record(DecisionSummary::new(gone.clone(), &accepted(&gone), 1000, 1))
            .await
            .unwrap();

        assert_eq!(manager.cleanup().await.unwrap(), 1);
        assert!(manager.get(&kept).is_some());
        assert!(manager.get(&gone).is_none());
    }
}
