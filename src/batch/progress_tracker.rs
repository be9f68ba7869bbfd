//! # Progress Tracking Module
//!
//! Tracker posseduto dall'aggregatore: nessun lock, un solo scrittore.
//! Gestisce sia l'output JSON che la progress bar tradizionale.

use crate::file_manager::FileManager;
use crate::json_output::JsonMessage;
use crate::progress::{BatchStats, ProgressManager};
use crate::types::CompressionDecision;
use std::path::Path;

pub struct ProgressTracker {
    total_files: usize,
    json_output: bool,
    stats: BatchStats,
    progress_manager: ProgressManager,
}

impl ProgressTracker {
    /// The bar is drawn only when `show_progress` is set and JSON output is off
    pub fn new(total_files: usize, json_output: bool, show_progress: bool) -> Self {
        let progress_manager = if show_progress && !json_output {
            ProgressManager::new(total_files as u64)
        } else {
            ProgressManager::hidden(total_files as u64)
        };

        Self {
            total_files,
            json_output,
            stats: BatchStats::new(),
            progress_manager,
        }
    }

    pub fn file_started(&self, index: usize, path: &Path) {
        if self.json_output {
            JsonMessage::FileStart {
                path: path.to_path_buf(),
                index,
                total: self.total_files,
            }
            .emit();
        } else {
            self.progress_manager
                .set_message(&format!("[..] {}", file_name(path)));
        }
    }

    /// Counts a decision and reports it
    pub fn file_decided(&mut self, path: &Path, decision: &CompressionDecision, original_size: u64) {
        self.stats.add(decision, original_size);

        if self.json_output {
            JsonMessage::file_decision(path.to_path_buf(), decision, original_size).emit();
            JsonMessage::progress(
                self.stats.files_processed,
                self.total_files,
                self.stats.accepted,
                self.stats.fell_back,
                self.stats.failed,
                self.stats.total_bytes_saved,
            )
            .emit();
        }

        let message = match decision {
            CompressionDecision::Accepted { final_size, score, .. } => format!(
                "[OK] {}: {:.1}% saved ({})",
                file_name(path),
                FileManager::calculate_reduction(original_size, *final_size),
                score
            ),
            CompressionDecision::FellBackToOriginal { reason, .. } => {
                format!("[KEEP] {}: {}", file_name(path), reason)
            }
            CompressionDecision::Failed { reason, .. } => format!("[ERROR] {}: {}", file_name(path), reason),
        };
        self.progress_manager.update(&message);
    }

    pub fn stats(&self) -> &BatchStats {
        &self.stats
    }

    pub fn finish(&self) {
        self.progress_manager.finish(&self.stats.format_summary());
    }
}

fn file_name(path: &Path) -> String {
    path.file_name()
        .unwrap_or_default()
        .to_string_lossy()
        .to_string()
}
