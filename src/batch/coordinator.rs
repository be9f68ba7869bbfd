//! # Batch Coordinator
//!
//! Distribuisce i file a un pool limitato di worker e raccoglie le decisioni
//! tramite l'aggregatore.
//!
//! ## Regole:
//! - Al massimo `workers` controller attivi nello stesso momento (semaforo)
//! - Ogni file produce esattamente una decisione, anche se il worker va in panic
//! - Dopo la cancellazione nessun nuovo file viene avviato; quelli non avviati
//!   risultano `FellBackToOriginal(Cancelled)`
//! - I file già trattati e non modificati vengono saltati prima del dispatch

use crate::batch::aggregator::{AggregateReport, Aggregator, BatchEvent};
use crate::batch::progress_tracker::ProgressTracker;
use crate::cancel::CancellationFlag;
use crate::controller::CompressionController;
use crate::file_manager::FileManager;
use crate::state::{DecisionSummary, StateManager};
use crate::types::{CompressionDecision, FailureReason, FallbackReason};
use anyhow::{Context, Result};
use futures::future::join_all;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::sync::{mpsc, Semaphore};
use tokio::task::JoinHandle;
use tracing::{debug, error, info};

const EVENT_BUFFER: usize = 64;

pub struct BatchCoordinator {
    controller: Arc<CompressionController>,
    workers: usize,
    state: Option<StateManager>,
    skip_processed: bool,
    json_output: bool,
    show_progress: bool,
}

struct Dispatched {
    index: usize,
    path: PathBuf,
    original_size: u64,
    handle: JoinHandle<()>,
}

impl BatchCoordinator {
    pub fn new(controller: Arc<CompressionController>, workers: usize) -> Self {
        Self {
            controller,
            workers: workers.max(1),
            state: None,
            skip_processed: false,
            json_output: false,
            show_progress: false,
        }
    }

    /// Persist decisions, and optionally skip files whose decision is still current
    pub fn with_state(mut self, state: StateManager, skip_processed: bool) -> Self {
        self.state = Some(state);
        self.skip_processed = skip_processed;
        self
    }

    pub fn with_output(mut self, json_output: bool, show_progress: bool) -> Self {
        self.json_output = json_output;
        self.show_progress = show_progress;
        self
    }

    /// Processes every path and returns once each one has a decision
    pub async fn run(
        self,
        paths: Vec<PathBuf>,
        input_base_dir: &Path,
        cancel: &CancellationFlag,
    ) -> Result<AggregateReport> {
        let total = paths.len();
        info!("Processing {} files with {} workers", total, self.workers);

        let mut pending = Vec::with_capacity(total);
        let mut skipped = Vec::new();
        for (index, path) in paths.into_iter().enumerate() {
            let (size, modified) = FileManager::get_file_info(&path).await.unwrap_or((0, 0));
            let already_done = self.skip_processed
                && self
                    .state
                    .as_ref()
                    .map(|s| s.is_processed(&path, modified))
                    .unwrap_or(false);
            if already_done {
                debug!("Skipping {}: already processed", path.display());
                skipped.push((index, path, size));
            } else {
                pending.push((index, path, size, modified));
            }
        }

        let track_state = self.state.is_some();
        let tracker = ProgressTracker::new(total, self.json_output, self.show_progress);
        let (tx, rx) = mpsc::channel(EVENT_BUFFER);
        let aggregator = tokio::spawn(Aggregator::new(tracker, self.state).run(rx));

        for (index, path, original_size) in skipped {
            send_decision(
                &tx,
                index,
                path,
                CompressionDecision::FellBackToOriginal {
                    reason: FallbackReason::AlreadyProcessed,
                    attempts: 0,
                },
                original_size,
            )
            .await;
        }

        let semaphore = Arc::new(Semaphore::new(self.workers));
        let base_dir = Arc::new(input_base_dir.to_path_buf());
        let mut dispatched: Vec<Dispatched> = Vec::new();

        for (index, path, original_size, modified) in pending {
            if cancel.is_cancelled() {
                send_decision(&tx, index, path, cancelled(), original_size).await;
                continue;
            }

            let permit = semaphore
                .clone()
                .acquire_owned()
                .await
                .context("worker pool closed")?;

            if cancel.is_cancelled() {
                drop(permit);
                send_decision(&tx, index, path, cancelled(), original_size).await;
                continue;
            }

            let controller = self.controller.clone();
            let base_dir = base_dir.clone();
            let cancel = cancel.clone();
            let tx = tx.clone();
            let task_path = path.clone();

            let handle = tokio::spawn(async move {
                let _permit = permit;
                let _ = tx
                    .send(BatchEvent::Started {
                        index,
                        path: task_path.clone(),
                    })
                    .await;

                let report = controller.process(&task_path, &base_dir, &cancel).await;
                let summary = if track_state {
                    Some(summarize(&task_path, &report.decision, original_size, modified).await)
                } else {
                    None
                };

                let _ = tx
                    .send(BatchEvent::Finished {
                        index,
                        path: task_path,
                        decision: report.decision,
                        original_size,
                        summary,
                    })
                    .await;
            });

            dispatched.push(Dispatched {
                index,
                path,
                original_size,
                handle,
            });
        }

        let (meta, handles): (Vec<_>, Vec<_>) = dispatched
            .into_iter()
            .map(|d| ((d.index, d.path, d.original_size), d.handle))
            .unzip();

        for ((index, path, original_size), joined) in meta.into_iter().zip(join_all(handles).await) {
            if let Err(e) = joined {
                error!("Worker for {} stopped: {}", path.display(), e);
                send_decision(
                    &tx,
                    index,
                    path,
                    CompressionDecision::Failed {
                        reason: FailureReason::Internal(e.to_string()),
                        attempts: 0,
                    },
                    original_size,
                )
                .await;
            }
        }

        drop(tx);
        let report = aggregator.await.context("aggregator task failed")?;
        info!("{}", report.stats.format_summary());
        Ok(report)
    }
}

fn cancelled() -> CompressionDecision {
    CompressionDecision::FellBackToOriginal {
        reason: FallbackReason::Cancelled,
        attempts: 0,
    }
}

async fn send_decision(
    tx: &mpsc::Sender<BatchEvent>,
    index: usize,
    path: PathBuf,
    decision: CompressionDecision,
    original_size: u64,
) {
    let _ = tx
        .send(BatchEvent::Finished {
            index,
            path,
            decision,
            original_size,
            summary: None,
        })
        .await;
}

/// State entry for a decided file. An in-place replacement is keyed by the new
/// file and its new modification time, everything else by the input.
async fn summarize(
    input: &Path,
    decision: &CompressionDecision,
    original_size: u64,
    modified: u64,
) -> DecisionSummary {
    if let CompressionDecision::Accepted { output, .. } = decision {
        if output.parent() == input.parent() {
            if let Ok((_, new_modified)) = FileManager::get_file_info(output).await {
                return DecisionSummary::new(output.clone(), decision, original_size, new_modified);
            }
        }
    }
    DecisionSummary::new(input.to_path_buf(), decision, original_size, modified)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::RateMode;
    use crate::controller::ControllerSettings;
    use crate::strategy::AdaptiveStrategy;
    use crate::test_support::{FakeEncode, FakeEncoder, FakeProber, FakeScorer};
    use crate::types::{Codec, Preset, QualityMetric, QualityThreshold};
    use std::collections::HashMap;
    use std::sync::atomic::Ordering;
    use std::time::Duration;
    use tempfile::TempDir;

    struct Setup {
        root: TempDir,
        files: Vec<PathBuf>,
        prober: Arc<FakeProber>,
        encoder: Arc<FakeEncoder>,
    }

    impl Setup {
        fn new(count: usize, encoder: FakeEncoder) -> Self {
            let root = TempDir::new().unwrap();
            let media = root.path().join("media");
            std::fs::create_dir_all(&media).unwrap();
            let files = (0..count)
                .map(|i| {
                    let path = media.join(format!("clip{}.mp4", i));
                    std::fs::write(&path, b"original").unwrap();
                    path
                })
                .collect();
            Self {
                root,
                files,
                prober: Arc::new(FakeProber::new(10_000)),
                encoder: Arc::new(encoder),
            }
        }

        fn media_dir(&self) -> PathBuf {
            self.root.path().join("media")
        }

        fn controller(&self, scorer: FakeScorer) -> Arc<CompressionController> {
            let settings = ControllerSettings {
                threshold: QualityThreshold::from_config(0.95, QualityMetric::Vmaf),
                max_attempts: 3,
                file_budget: Duration::from_secs(3600),
                encoder_timeout: Duration::from_secs(600),
                size_threshold: 0.8,
                min_size_bytes: 0,
                temp_dir: self.root.path().join("work"),
                output_dir: Some(self.root.path().join("out")),
            };
            let strategy = AdaptiveStrategy {
                video_codec: Codec::H265,
                image_codec: Codec::Webp,
                rate_mode: RateMode::Crf,
                preset: Preset::Medium,
                max_attempts: 3,
                allow_downscale: false,
                content_aware: false,
            };
            Arc::new(CompressionController::new(
                self.prober.clone(),
                self.encoder.clone(),
                Arc::new(scorer),
                Arc::new(strategy),
                settings,
            ))
        }

        fn scores(&self, good: &[usize]) -> FakeScorer {
            let per_file: HashMap<PathBuf, f64> = self
                .files
                .iter()
                .enumerate()
                .map(|(i, path)| (path.clone(), if good.contains(&i) { 0.97 } else { 0.50 }))
                .collect();
            FakeScorer::per_file(per_file)
        }
    }

    #[tokio::test]
    async fn test_counters_match_decisions() {
        let setup = Setup::new(5, FakeEncoder::always(FakeEncode::ok(4_000)));
        let coordinator = BatchCoordinator::new(setup.controller(setup.scores(&[0, 2, 4])), 2);

        let report = coordinator
            .run(setup.files.clone(), &setup.media_dir(), &CancellationFlag::new())
            .await
            .unwrap();
        let result = report.result;

        assert_eq!(result.total(), 5);
        assert_eq!(result.accepted, 3);
        assert_eq!(result.fell_back, 2);
        assert_eq!(result.failed, 0);
        assert_eq!(result.bytes_saved, 3 * 6_000);
        let order: Vec<_> = result.entries.iter().map(|e| e.path.clone()).collect();
        assert_eq!(order, setup.files);
        assert!(matches!(
            result.decision_for(&setup.files[1]),
            Some(CompressionDecision::FellBackToOriginal { .. })
        ));
    }

    #[tokio::test]
    async fn test_one_failure_does_not_affect_others() {
        let mut setup = Setup::new(3, FakeEncoder::always(FakeEncode::ok(4_000)));
        setup.prober = Arc::new(FakeProber::new(10_000).with_corrupt(&setup.files[1]));
        let coordinator = BatchCoordinator::new(setup.controller(setup.scores(&[0, 1, 2])), 3);

        let result = coordinator
            .run(setup.files.clone(), &setup.media_dir(), &CancellationFlag::new())
            .await
            .unwrap()
            .result;

        assert_eq!(result.accepted, 2);
        assert_eq!(result.failed, 1);
        assert!(matches!(
            result.decision_for(&setup.files[1]),
            Some(CompressionDecision::Failed {
                reason: FailureReason::UnreadableInput(_),
                ..
            })
        ));
    }

    #[tokio::test]
    async fn test_cancel_before_dispatch_keeps_everything() {
        let setup = Setup::new(4, FakeEncoder::always(FakeEncode::ok(4_000)));
        let coordinator = BatchCoordinator::new(setup.controller(setup.scores(&[0, 1, 2, 3])), 2);
        let cancel = CancellationFlag::new();
        cancel.cancel();

        let result = coordinator
            .run(setup.files.clone(), &setup.media_dir(), &cancel)
            .await
            .unwrap()
            .result;

        assert_eq!(result.total(), 4);
        assert_eq!(result.fell_back, 4);
        assert!(result.entries.iter().all(|e| e.decision
            == CompressionDecision::FellBackToOriginal {
                reason: FallbackReason::Cancelled,
                attempts: 0
            }));
        assert_eq!(setup.encoder.calls.load(Ordering::SeqCst), 0);
        for file in &setup.files {
            assert_eq!(std::fs::read(file).unwrap(), b"original");
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_worker_limit_is_respected() {
        let encoder = FakeEncoder::always(FakeEncode::Success {
            size: 4_000,
            delay: Duration::from_secs(10),
        });
        let setup = Setup::new(6, encoder);
        let coordinator = BatchCoordinator::new(setup.controller(setup.scores(&[0, 1, 2, 3, 4, 5])), 2);

        let result = coordinator
            .run(setup.files.clone(), &setup.media_dir(), &CancellationFlag::new())
            .await
            .unwrap()
            .result;

        assert_eq!(result.accepted, 6);
        assert_eq!(setup.encoder.peak.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_skips_files_already_processed() {
        let setup = Setup::new(2, FakeEncoder::always(FakeEncode::ok(4_000)));
        let state_dir = TempDir::new().unwrap();
        let mut state = StateManager::with_state_dir(state_dir.path(), &setup.media_dir())
            .await
            .unwrap();

        let (_, modified) = FileManager::get_file_info(&setup.files[0]).await.unwrap();
        let earlier = CompressionDecision::FellBackToOriginal {
            reason: FallbackReason::QualityUnattainable,
            attempts: 5,
        };
        state
            .record(DecisionSummary::new(setup.files[0].clone(), &earlier, 8, modified))
            .await
            .unwrap();

        let coordinator = BatchCoordinator::new(setup.controller(setup.scores(&[0, 1])), 2).with_state(state, true);
        let report = coordinator
            .run(setup.files.clone(), &setup.media_dir(), &CancellationFlag::new())
            .await
            .unwrap();

        assert_eq!(
            report.result.decision_for(&setup.files[0]),
            Some(&CompressionDecision::FellBackToOriginal {
                reason: FallbackReason::AlreadyProcessed,
                attempts: 0
            })
        );
        assert_eq!(report.result.accepted, 1);
        assert_eq!(setup.prober.calls.load(Ordering::SeqCst), 1);
        assert_eq!(report.historical.total_files_recorded, 2);
    }
}
