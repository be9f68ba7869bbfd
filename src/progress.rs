//! # Progress Tracking and Statistics Module
//!
//! Progress bar `indicatif` e statistiche cumulative del batch.
//!
//! ## Componenti principali:
//! - `ProgressManager`: barra di progresso principale (nascosta in modalità JSON)
//! - `BatchStats`: contatori per esito e byte risparmiati
//!
//! ## Visual feedback:
//! ```text
//! ⠋ [00:42:15] [========================>---------------] 12/20 (60%) [OK] clip.mkv: 48.2% saved
//! ```

use crate::file_manager::FileManager;
use crate::types::CompressionDecision;
use indicatif::{ProgressBar, ProgressStyle};
use std::time::Duration;

/// Manages progress reporting for a batch
#[derive(Clone)]
pub struct ProgressManager {
    bar: ProgressBar,
}

impl ProgressManager {
    pub fn new(total_files: u64) -> Self {
        let bar = ProgressBar::new(total_files);

        if let Ok(style) = ProgressStyle::default_bar()
            .template("{spinner:.green} [{elapsed_precise}] [{bar:40.cyan/blue}] {pos}/{len} ({percent}%) {msg}")
        {
            bar.set_style(style.progress_chars("=>-"));
        }
        bar.enable_steady_tick(Duration::from_millis(100));

        Self { bar }
    }

    /// A bar that draws nothing, for JSON mode and tests
    pub fn hidden(total_files: u64) -> Self {
        let bar = ProgressBar::hidden();
        bar.set_length(total_files);
        Self { bar }
    }

    /// Advance by one file and show a message
    pub fn update(&self, message: &str) {
        self.bar.inc(1);
        self.bar.set_message(message.to_string());
    }

    pub fn set_message(&self, message: &str) {
        self.bar.set_message(message.to_string());
    }

    pub fn finish(&self, message: &str) {
        self.bar.finish_with_message(message.to_string());
    }

    pub fn position(&self) -> u64 {
        self.bar.position()
    }
}

/// Cumulative counters for the files decided so far
#[derive(Debug, Default, Clone, PartialEq)]
pub struct BatchStats {
    pub files_processed: usize,
    pub accepted: usize,
    pub fell_back: usize,
    pub failed: usize,
    pub total_bytes_saved: u64,
    pub total_original_size: u64,
}

impl BatchStats {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(&mut self, decision: &CompressionDecision, original_size: u64) {
        self.files_processed += 1;
        self.total_original_size += original_size;
        match decision {
            CompressionDecision::Accepted { .. } => self.accepted += 1,
            CompressionDecision::FellBackToOriginal { .. } => self.fell_back += 1,
            CompressionDecision::Failed { .. } => self.failed += 1,
        }
        self.total_bytes_saved += decision.bytes_saved();
    }

    pub fn overall_reduction_percent(&self) -> f64 {
        if self.total_original_size > 0 {
            (self.total_bytes_saved as f64 / self.total_original_size as f64) * 100.0
        } else {
            0.0
        }
    }

    pub fn format_summary(&self) -> String {
        format!(
            "Processed: {} files | Compressed: {} | Kept original: {} | Failed: {} | Total saved: {} ({:.2}%)",
            self.files_processed,
            self.accepted,
            self.fell_back,
            self.failed,
            FileManager::format_size(self.total_bytes_saved),
            self.overall_reduction_percent()
        )
    }
}
