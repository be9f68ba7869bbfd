//! # Result Aggregator
//!
//! Unico task che riceve gli eventi dei worker su un canale e possiede tutto
//! lo stato condiviso del batch: risultato, contatori, progress e state file.
//! I worker non toccano mai direttamente questi dati.

use crate::batch::progress_tracker::ProgressTracker;
use crate::json_output::HistoricalStats;
use crate::progress::BatchStats;
use crate::state::{DecisionSummary, StateManager};
use crate::types::{BatchResult, CompressionDecision};
use std::path::PathBuf;
use tokio::sync::mpsc;
use tracing::warn;

/// Messages sent by workers
#[derive(Debug)]
pub enum BatchEvent {
    Started {
        index: usize,
        path: PathBuf,
    },
    Finished {
        index: usize,
        path: PathBuf,
        decision: CompressionDecision,
        original_size: u64,
        /// Entry to persist, when state tracking is enabled
        summary: Option<DecisionSummary>,
    },
}

/// What the aggregator hands back once every sender is gone
pub struct AggregateReport {
    pub result: BatchResult,
    pub stats: BatchStats,
    pub historical: HistoricalStats,
}

pub struct Aggregator {
    result: BatchResult,
    tracker: ProgressTracker,
    state: Option<StateManager>,
}

impl Aggregator {
    pub fn new(tracker: ProgressTracker, state: Option<StateManager>) -> Self {
        Self {
            result: BatchResult::new(),
            tracker,
            state,
        }
    }

    /// Consumes events until the channel closes
    pub async fn run(mut self, mut rx: mpsc::Receiver<BatchEvent>) -> AggregateReport {
        while let Some(event) = rx.recv().await {
            match event {
                BatchEvent::Started { index, path } => self.tracker.file_started(index, &path),
                BatchEvent::Finished {
                    index,
                    path,
                    decision,
                    original_size,
                    summary,
                } => {
                    self.tracker.file_decided(&path, &decision, original_size);
                    if let (Some(state), Some(summary)) = (self.state.as_mut(), summary) {
                        if let Err(e) = state.record(summary).await {
                            warn!("Failed to save state for {}: {}", path.display(), e);
                        }
                    }
                    self.result.record(index, path, decision);
                }
            }
        }

        self.tracker.finish();

        let historical = match &self.state {
            Some(state) => {
                let (total_files_recorded, total_bytes_saved_historically, total_accepted_historically) =
                    state.get_stats();
                HistoricalStats {
                    total_files_recorded,
                    total_bytes_saved_historically,
                    total_accepted_historically,
                }
            }
            None => HistoricalStats::default(),
        };

        AggregateReport {
            result: self.result.finalize(),
            stats: self.tracker.stats().clone(),
            historical,
        }
    }
}
