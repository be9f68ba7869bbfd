//! # Compression Controller Module
//!
//! Macchina a stati per singolo file: probe, tentativi di encoding, misura
//! qualità, decisione finale.
//!
//! ## Stati:
//! `Initializing → Attempting → Evaluating → {Accepted | Retrying | FallingBack | Failed}`
//!
//! ## Regole:
//! - Budget (tentativi e wall-clock) controllato prima di ogni tentativo
//! - Cancellazione controllata prima del probe, di ogni tentativo e di ogni misura
//! - Solo il candidato accettato sopravvive: gli altri vengono rimossi subito,
//!   la work directory per file viene cancellata alla fine in ogni caso
//! - In fallback l'originale non viene mai toccato
//! - Il candidato accettato viene spostato nella directory di output oppure
//!   sostituisce l'originale (con backup)

use crate::batch::path_resolver::PathResolver;
use crate::cancel::CancellationFlag;
use crate::config::Config;
use crate::encoder::{EncodeOutcome, EncoderAdapter};
use crate::error::EncodeError;
use crate::file_manager::FileManager;
use crate::probe::MediaProber;
use crate::quality::QualityScorer;
use crate::strategy::{GiveUpReason, NextAction, ParameterStrategy};
use crate::types::{
    AttemptOutcome, CompressionDecision, EncodeAttempt, EncodeParameters, FailureReason, FallbackReason,
    MediaDescriptor, QualityScore, QualityThreshold,
};
use crate::utils::format_duration;
use anyhow::Result;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tempfile::TempDir;
use tokio::time::Instant;
use tracing::{debug, info, warn};

/// Limits and destinations applied to every file
#[derive(Debug, Clone)]
pub struct ControllerSettings {
    pub threshold: QualityThreshold,
    pub max_attempts: usize,
    pub file_budget: Duration,
    pub encoder_timeout: Duration,
    pub size_threshold: f64,
    pub min_size_bytes: u64,
    pub temp_dir: PathBuf,
    pub output_dir: Option<PathBuf>,
}

impl ControllerSettings {
    pub fn from_config(config: &Config) -> Self {
        Self {
            threshold: config.threshold(),
            max_attempts: config.max_attempts,
            file_budget: config.file_budget(),
            encoder_timeout: config.encoder_timeout(),
            size_threshold: config.size_threshold,
            min_size_bytes: config.min_size_bytes(),
            temp_dir: config.temp_dir.clone(),
            output_dir: config.output_path.clone(),
        }
    }
}

/// Named controller states, recorded in order for each file
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ControllerState {
    Initializing,
    Attempting,
    Evaluating,
    Accepted,
    Retrying,
    FallingBack,
    Failed,
}

/// Everything the controller learned about one file
#[derive(Debug, Clone)]
pub struct FileReport {
    pub decision: CompressionDecision,
    pub history: Vec<EncodeAttempt>,
    pub transitions: Vec<ControllerState>,
}

struct Candidate {
    params: EncodeParameters,
    path: PathBuf,
    size_bytes: u64,
    started: Instant,
}

enum Step {
    Initializing,
    Attempting,
    Evaluating(Candidate),
    Retrying,
    Accepted { path: PathBuf, size_bytes: u64, score: QualityScore },
    FallingBack(FallbackReason),
    Failed(FailureReason),
}

impl Step {
    fn state(&self) -> ControllerState {
        match self {
            Self::Initializing => ControllerState::Initializing,
            Self::Attempting => ControllerState::Attempting,
            Self::Evaluating(_) => ControllerState::Evaluating,
            Self::Retrying => ControllerState::Retrying,
            Self::Accepted { .. } => ControllerState::Accepted,
            Self::FallingBack(_) => ControllerState::FallingBack,
            Self::Failed(_) => ControllerState::Failed,
        }
    }
}

/// Per-file context that only exists once the probe succeeded
struct Session {
    descriptor: MediaDescriptor,
    work_dir: TempDir,
}

pub struct CompressionController {
    prober: Arc<dyn MediaProber>,
    encoder: Arc<dyn EncoderAdapter>,
    scorer: Arc<dyn QualityScorer>,
    strategy: Arc<dyn ParameterStrategy>,
    settings: ControllerSettings,
}

impl CompressionController {
    pub fn new(
        prober: Arc<dyn MediaProber>,
        encoder: Arc<dyn EncoderAdapter>,
        scorer: Arc<dyn QualityScorer>,
        strategy: Arc<dyn ParameterStrategy>,
        settings: ControllerSettings,
    ) -> Self {
        Self {
            prober,
            encoder,
            scorer,
            strategy,
            settings,
        }
    }

    pub fn settings(&self) -> &ControllerSettings {
        &self.settings
    }

    /// Runs one file to a terminal decision. Never returns an error: every
    /// failure becomes part of the decision.
    pub async fn process(&self, input: &Path, input_base_dir: &Path, cancel: &CancellationFlag) -> FileReport {
        let started = Instant::now();
        let mut history: Vec<EncodeAttempt> = Vec::new();
        let mut transitions = Vec::new();
        let mut session: Option<Session> = None;
        let mut step = Step::Initializing;

        let decision = loop {
            transitions.push(step.state());
            step = match step {
                Step::Initializing => self.initialize(input, cancel, &mut session).await,

                Step::Attempting => match session.as_ref() {
                    Some(s) => self.attempt(s, &mut history, started, cancel).await,
                    None => Step::Failed(FailureReason::UnreadableInput("not probed".to_string())),
                },

                Step::Evaluating(candidate) => match session.as_ref() {
                    Some(s) => self.evaluate(input, s, candidate, &mut history, cancel).await,
                    None => Step::Failed(FailureReason::UnreadableInput("not probed".to_string())),
                },

                Step::Retrying => Step::Attempting,

                Step::Accepted { path, size_bytes, score } => {
                    let original_size = session.as_ref().map(|s| s.descriptor.file_size).unwrap_or(0);
                    match self.place(input, input_base_dir, &path).await {
                        Ok(output) => {
                            info!(
                                "Accepted {} -> {} ({} -> {}, {}, {} attempts)",
                                input.display(),
                                output.display(),
                                FileManager::format_size(original_size),
                                FileManager::format_size(size_bytes),
                                score,
                                history.len()
                            );
                            break CompressionDecision::Accepted {
                                output,
                                original_size,
                                final_size: size_bytes,
                                score,
                                attempts: history.len(),
                            };
                        }
                        Err(e) => {
                            warn!("Failed to place {}: {}", input.display(), e);
                            Step::Failed(FailureReason::DiskWrite(e.to_string()))
                        }
                    }
                }

                Step::FallingBack(reason) => {
                    info!(
                        "Keeping original {}: {} after {} attempts in {}",
                        input.display(),
                        reason,
                        history.len(),
                        format_duration(started.elapsed())
                    );
                    break CompressionDecision::FellBackToOriginal {
                        reason,
                        attempts: history.len(),
                    };
                }

                Step::Failed(reason) => {
                    warn!("Failed {}: {}", input.display(), reason);
                    break CompressionDecision::Failed {
                        reason,
                        attempts: history.len(),
                    };
                }
            };
            debug!("{} -> {:?}", input.display(), step.state());
        };

        // Dropping the session removes the work directory with any leftover candidate
        drop(session);

        FileReport {
            decision,
            history,
            transitions,
        }
    }

    async fn initialize(&self, input: &Path, cancel: &CancellationFlag, session: &mut Option<Session>) -> Step {
        if cancel.is_cancelled() {
            return Step::FallingBack(FallbackReason::Cancelled);
        }

        let descriptor = match self.prober.probe(input).await {
            Ok(d) => d,
            Err(e) => return Step::Failed(FailureReason::UnreadableInput(e.to_string())),
        };

        if descriptor.file_size < self.settings.min_size_bytes {
            debug!("{} is below the minimum size", input.display());
            return Step::FallingBack(FallbackReason::BelowMinimumSize);
        }

        let work_dir = match self.create_work_dir().await {
            Ok(dir) => dir,
            Err(e) => return Step::Failed(FailureReason::DiskWrite(e.to_string())),
        };

        *session = Some(Session { descriptor, work_dir });
        Step::Attempting
    }

    async fn create_work_dir(&self) -> Result<TempDir> {
        tokio::fs::create_dir_all(&self.settings.temp_dir).await?;
        Ok(tempfile::Builder::new()
            .prefix("compress-")
            .tempdir_in(&self.settings.temp_dir)?)
    }

    async fn attempt(
        &self,
        session: &Session,
        history: &mut Vec<EncodeAttempt>,
        started: Instant,
        cancel: &CancellationFlag,
    ) -> Step {
        if cancel.is_cancelled() {
            return Step::FallingBack(FallbackReason::Cancelled);
        }

        let elapsed = started.elapsed();
        if history.len() >= self.settings.max_attempts || elapsed >= self.settings.file_budget {
            return Step::FallingBack(budget_reason(history));
        }

        let params = match self
            .strategy
            .next(history, &session.descriptor, &self.settings.threshold)
        {
            NextAction::Try(params) => params,
            NextAction::GiveUp(reason) => return Step::FallingBack(give_up_reason(reason, history)),
        };

        let index = history.len() + 1;
        let extension = params.codec.extension_for(&session.descriptor.path);
        let candidate = session.work_dir.path().join(format!("attempt-{}.{}", index, extension));
        let timeout = self.settings.encoder_timeout.min(self.settings.file_budget - elapsed);

        debug!(
            "Attempt {} for {}: {}",
            index,
            session.descriptor.path.display(),
            params.fingerprint()
        );

        let attempt_started = Instant::now();
        match self
            .encoder
            .encode(&session.descriptor, &params, &candidate, timeout)
            .await
        {
            Ok(EncodeOutcome::Success { size_bytes, .. }) => Step::Evaluating(Candidate {
                params,
                path: candidate,
                size_bytes,
                started: attempt_started,
            }),
            Ok(EncodeOutcome::ToolFailure { exit_code, diagnostic }) => {
                warn!("Encoder failed on attempt {}: {}", index, diagnostic);
                history.push(EncodeAttempt {
                    index,
                    parameters: params,
                    outcome: AttemptOutcome::ToolFailure { exit_code, diagnostic },
                    elapsed: attempt_started.elapsed(),
                });
                Step::Retrying
            }
            Ok(EncodeOutcome::Timeout { .. }) => {
                warn!("Encoder timed out on attempt {}", index);
                history.push(EncodeAttempt {
                    index,
                    parameters: params,
                    outcome: AttemptOutcome::Timeout,
                    elapsed: attempt_started.elapsed(),
                });
                Step::Retrying
            }
            Err(e @ EncodeError::InsufficientDiskSpace { .. }) => {
                Step::Failed(FailureReason::DiskSpace(e.to_string()))
            }
            Err(e) => Step::Failed(FailureReason::DiskWrite(e.to_string())),
        }
    }

    async fn evaluate(
        &self,
        input: &Path,
        session: &Session,
        candidate: Candidate,
        history: &mut Vec<EncodeAttempt>,
        cancel: &CancellationFlag,
    ) -> Step {
        let index = history.len() + 1;

        if cancel.is_cancelled() {
            FileManager::remove_if_exists(&candidate.path).await;
            return Step::FallingBack(FallbackReason::Cancelled);
        }

        let outcome = match self.scorer.score(input, &candidate.path).await {
            Ok(score) => {
                let limit = session.descriptor.file_size as f64 * self.settings.size_threshold;
                AttemptOutcome::Scored {
                    size_bytes: candidate.size_bytes,
                    score,
                    size_ok: (candidate.size_bytes as f64) < limit,
                }
            }
            Err(e) => {
                warn!("Scoring failed on attempt {}: {}", index, e);
                AttemptOutcome::ScoringFailed {
                    size_bytes: candidate.size_bytes,
                    reason: e.to_string(),
                }
            }
        };

        let accepted = match &outcome {
            AttemptOutcome::Scored { score, size_ok, .. } => {
                debug!(
                    "Attempt {}: {} (target {:.4}), {} bytes, size ok: {}",
                    index,
                    score,
                    self.settings.threshold.target_for(score.metric),
                    candidate.size_bytes,
                    size_ok
                );
                (score.meets(&self.settings.threshold) && *size_ok).then_some(*score)
            }
            _ => None,
        };

        history.push(EncodeAttempt {
            index,
            parameters: candidate.params,
            outcome,
            elapsed: candidate.started.elapsed(),
        });

        match accepted {
            Some(score) => Step::Accepted {
                path: candidate.path,
                size_bytes: candidate.size_bytes,
                score,
            },
            None => {
                FileManager::remove_if_exists(&candidate.path).await;
                Step::Retrying
            }
        }
    }

    /// Moves the accepted candidate to its destination
    async fn place(&self, input: &Path, input_base_dir: &Path, candidate: &Path) -> Result<PathBuf> {
        match &self.settings.output_dir {
            Some(output_dir) => {
                let extension = candidate
                    .extension()
                    .map(|e| e.to_string_lossy().to_string())
                    .unwrap_or_default();
                let destination = PathResolver::get_output_path(input, input_base_dir, Some(output_dir), &extension)?;
                FileManager::move_file(candidate, &destination).await?;
                Ok(destination)
            }
            None => FileManager::replace_file(input, candidate).await,
        }
    }
}

fn has_scored(history: &[EncodeAttempt]) -> bool {
    history.iter().any(EncodeAttempt::succeeded)
}

fn budget_reason(history: &[EncodeAttempt]) -> FallbackReason {
    if !history.is_empty() && !has_scored(history) {
        FallbackReason::ToolingError
    } else {
        FallbackReason::BudgetExhausted
    }
}

fn give_up_reason(reason: GiveUpReason, history: &[EncodeAttempt]) -> FallbackReason {
    match reason {
        GiveUpReason::MaxAttempts => budget_reason(history),
        GiveUpReason::Converged | GiveUpReason::Exhausted if !history.is_empty() && !has_scored(history) => {
            FallbackReason::ToolingError
        }
        GiveUpReason::Converged | GiveUpReason::Exhausted => FallbackReason::QualityUnattainable,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::RateMode;
    use crate::strategy::AdaptiveStrategy;
    use crate::test_support::{FakeEncode, FakeEncoder, FakeProber, FakeScorer};
    use crate::types::{Codec, Preset, QualityMetric};
    use std::sync::atomic::Ordering;
    use tempfile::TempDir;

    const ORIGINAL_SIZE: u64 = 10_000;
    const ORIGINAL_BYTES: &[u8] = b"original video bytes";

    struct Fixture {
        _root: TempDir,
        input_dir: PathBuf,
        input: PathBuf,
        work_root: PathBuf,
        prober: Arc<FakeProber>,
        encoder: Arc<FakeEncoder>,
        scorer: Arc<FakeScorer>,
    }

    impl Fixture {
        fn new(encoder: FakeEncoder, scorer: FakeScorer) -> Self {
            let root = TempDir::new().unwrap();
            let input_dir = root.path().join("media");
            std::fs::create_dir_all(&input_dir).unwrap();
            let input = input_dir.join("clip.mp4");
            std::fs::write(&input, ORIGINAL_BYTES).unwrap();
            Self {
                input_dir,
                input,
                work_root: root.path().join("work"),
                prober: Arc::new(FakeProber::new(ORIGINAL_SIZE)),
                encoder: Arc::new(encoder),
                scorer: Arc::new(scorer),
                _root: root,
            }
        }

        fn settings(&self, threshold: f64, max_attempts: usize) -> ControllerSettings {
            ControllerSettings {
                threshold: QualityThreshold::from_config(threshold, QualityMetric::Vmaf),
                max_attempts,
                file_budget: Duration::from_secs(3600),
                encoder_timeout: Duration::from_secs(600),
                size_threshold: 0.8,
                min_size_bytes: 0,
                temp_dir: self.work_root.clone(),
                output_dir: None,
            }
        }

        fn controller(&self, settings: ControllerSettings) -> CompressionController {
            let strategy = AdaptiveStrategy {
                video_codec: Codec::H265,
                image_codec: Codec::Webp,
                rate_mode: RateMode::Crf,
                preset: Preset::Slow,
                max_attempts: settings.max_attempts,
                allow_downscale: false,
                content_aware: false,
            };
            CompressionController::new(
                self.prober.clone(),
                self.encoder.clone(),
                self.scorer.clone(),
                Arc::new(strategy),
                settings,
            )
        }

        async fn run(&self, settings: ControllerSettings) -> FileReport {
            self.controller(settings)
                .process(&self.input, &self.input_dir, &CancellationFlag::new())
                .await
        }

        fn work_dir_is_empty(&self) -> bool {
            std::fs::read_dir(&self.work_root)
                .map(|mut entries| entries.next().is_none())
                .unwrap_or(true)
        }
    }

    #[tokio::test]
    async fn test_first_attempt_meets_threshold() {
        let fx = Fixture::new(FakeEncoder::always(FakeEncode::ok(4_000)), FakeScorer::scores(&[0.97]));
        let report = fx.run(fx.settings(0.95, 5)).await;

        assert_eq!(report.history.len(), 1);
        match &report.decision {
            CompressionDecision::Accepted {
                output,
                final_size,
                attempts,
                score,
                ..
            } => {
                assert_eq!(*attempts, 1);
                assert_eq!(*final_size, 4_000);
                assert!(score.value >= 0.95);
                assert_eq!(output, &fx.input);
                assert_eq!(std::fs::metadata(output).unwrap().len(), 4_000);
            }
            other => panic!("expected Accepted, got {:?}", other),
        }
        assert!(fx.work_dir_is_empty());
    }

    #[tokio::test]
    async fn test_accepted_on_third_attempt() {
        let fx = Fixture::new(
            FakeEncoder::always(FakeEncode::ok(4_000)),
            FakeScorer::scores(&[0.80, 0.90, 0.96]),
        );
        let report = fx.run(fx.settings(0.95, 5)).await;

        assert_eq!(report.history.len(), 3);
        assert_eq!(report.decision.label(), "accepted");
        assert_eq!(report.decision.attempts(), 3);
        assert!(report.history.iter().all(EncodeAttempt::succeeded));
        assert_eq!(
            report.history.iter().map(|a| a.index).collect::<Vec<_>>(),
            vec![1, 2, 3]
        );
        // Each retry after a low score is less compressed
        let levels: Vec<u8> = report.history.iter().map(|a| a.parameters.level).collect();
        assert!(levels[0] > levels[1] && levels[1] > levels[2]);
        assert!(fx.work_dir_is_empty());
    }

    #[tokio::test]
    async fn test_budget_exhausted_keeps_original() {
        let fx = Fixture::new(
            FakeEncoder::always(FakeEncode::ok(4_000)),
            FakeScorer::scores(&[0.80, 0.85, 0.88]),
        );
        let report = fx.run(fx.settings(0.95, 3)).await;

        assert_eq!(
            report.decision,
            CompressionDecision::FellBackToOriginal {
                reason: FallbackReason::BudgetExhausted,
                attempts: 3
            }
        );
        assert_eq!(report.decision.reason().unwrap(), "budget exhausted");
        assert_eq!(report.history.len(), 3);
        assert_eq!(std::fs::read(&fx.input).unwrap(), ORIGINAL_BYTES);
        assert!(fx.work_dir_is_empty());
        assert_eq!(report.transitions.last(), Some(&ControllerState::FallingBack));
    }

    #[tokio::test]
    async fn test_probe_failure_never_invokes_tools() {
        let fx = Fixture::new(FakeEncoder::always(FakeEncode::ok(4_000)), FakeScorer::scores(&[0.99]));
        let prober = Arc::new(FakeProber::new(ORIGINAL_SIZE).with_corrupt(&fx.input));
        let strategy = AdaptiveStrategy::from_config(&Config::default());
        let controller = CompressionController::new(
            prober,
            fx.encoder.clone(),
            fx.scorer.clone(),
            Arc::new(strategy),
            fx.settings(0.95, 5),
        );

        let report = controller
            .process(&fx.input, &fx.input_dir, &CancellationFlag::new())
            .await;

        assert!(matches!(
            report.decision,
            CompressionDecision::Failed {
                reason: FailureReason::UnreadableInput(_),
                attempts: 0
            }
        ));
        assert_eq!(fx.encoder.calls.load(Ordering::SeqCst), 0);
        assert_eq!(fx.scorer.calls.load(Ordering::SeqCst), 0);
        assert_eq!(
            report.transitions,
            vec![ControllerState::Initializing, ControllerState::Failed]
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_timeouts_then_success() {
        let fx = Fixture::new(
            FakeEncoder::new(
                vec![FakeEncode::Timeout, FakeEncode::Timeout],
                FakeEncode::ok(4_000),
            ),
            FakeScorer::scores(&[0.97]),
        );
        let report = fx.run(fx.settings(0.95, 5)).await;

        assert_eq!(report.decision.label(), "accepted");
        assert_eq!(report.history.len(), 3);
        assert!(report.history[0].is_timeout());
        assert!(report.history[1].is_timeout());
        assert!(!matches!(report.history[0].outcome, AttemptOutcome::ToolFailure { .. }));
        assert!(report.history[2].succeeded());
        assert_eq!(fx.scorer.calls.load(Ordering::SeqCst), 1);

        let presets: Vec<Preset> = report.history.iter().map(|a| a.parameters.preset).collect();
        assert_eq!(presets, vec![Preset::Slow, Preset::Medium, Preset::Fast]);
    }

    #[tokio::test]
    async fn test_only_tool_failures_is_tooling_error() {
        let fx = Fixture::new(FakeEncoder::always(FakeEncode::Failure), FakeScorer::scores(&[0.99]));
        let report = fx.run(fx.settings(0.95, 3)).await;

        assert_eq!(
            report.decision,
            CompressionDecision::FellBackToOriginal {
                reason: FallbackReason::ToolingError,
                attempts: 3
            }
        );
        assert_eq!(fx.scorer.calls.load(Ordering::SeqCst), 0);
        assert!(report
            .decision
            .reason()
            .unwrap()
            .starts_with("tooling error"));
    }

    #[tokio::test]
    async fn test_scoring_failure_counts_as_failed_attempt() {
        let fx = Fixture::new(
            FakeEncoder::always(FakeEncode::ok(4_000)),
            FakeScorer::new(vec![None, Some(0.97)]),
        );
        let report = fx.run(fx.settings(0.95, 5)).await;

        assert_eq!(report.decision.label(), "accepted");
        assert!(matches!(
            report.history[0].outcome,
            AttemptOutcome::ScoringFailed { size_bytes: 4_000, .. }
        ));
        assert_eq!(report.history[0].score(), None);
    }

    #[tokio::test]
    async fn test_size_gate_rejects_large_candidates() {
        let fx = Fixture::new(
            FakeEncoder::new(vec![FakeEncode::ok(9_000)], FakeEncode::ok(5_000)),
            FakeScorer::scores(&[0.99, 0.97]),
        );
        let report = fx.run(fx.settings(0.95, 5)).await;

        assert!(matches!(
            report.history[0].outcome,
            AttemptOutcome::Scored { size_ok: false, .. }
        ));
        assert!(report.history[1].parameters.level > report.history[0].parameters.level);
        assert_eq!(report.decision.final_size(), Some(5_000));
        assert_eq!(report.decision.bytes_saved(), ORIGINAL_SIZE - 5_000);
    }

    #[tokio::test]
    async fn test_disk_space_shortage_fails_file() {
        let fx = Fixture::new(FakeEncoder::always(FakeEncode::DiskFull), FakeScorer::scores(&[0.99]));
        let report = fx.run(fx.settings(0.95, 5)).await;

        assert!(matches!(
            report.decision,
            CompressionDecision::Failed {
                reason: FailureReason::DiskSpace(_),
                ..
            }
        ));
        assert_eq!(std::fs::read(&fx.input).unwrap(), ORIGINAL_BYTES);
        assert!(fx.work_dir_is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_wall_clock_budget() {
        let slow = FakeEncode::Success {
            size: 4_000,
            delay: Duration::from_secs(80),
        };
        let fx = Fixture::new(FakeEncoder::always(slow), FakeScorer::scores(&[0.5]));
        let mut settings = fx.settings(0.95, 10);
        settings.file_budget = Duration::from_secs(100);
        let report = fx.run(settings).await;

        assert_eq!(
            report.decision,
            CompressionDecision::FellBackToOriginal {
                reason: FallbackReason::BudgetExhausted,
                attempts: 2
            }
        );
        // Second run only got the 20s left in the budget
        assert!(report.history[1].is_timeout());
    }

    #[tokio::test]
    async fn test_cancelled_before_start() {
        let fx = Fixture::new(FakeEncoder::always(FakeEncode::ok(4_000)), FakeScorer::scores(&[0.99]));
        let cancel = CancellationFlag::new();
        cancel.cancel();

        let report = fx
            .controller(fx.settings(0.95, 5))
            .process(&fx.input, &fx.input_dir, &cancel)
            .await;

        assert_eq!(
            report.decision,
            CompressionDecision::FellBackToOriginal {
                reason: FallbackReason::Cancelled,
                attempts: 0
            }
        );
        assert_eq!(fx.prober.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_below_minimum_size_is_skipped() {
        let fx = Fixture::new(FakeEncoder::always(FakeEncode::ok(4_000)), FakeScorer::scores(&[0.99]));
        let mut settings = fx.settings(0.95, 5);
        settings.min_size_bytes = ORIGINAL_SIZE + 1;
        let report = fx.run(settings).await;

        assert_eq!(
            report.decision,
            CompressionDecision::FellBackToOriginal {
                reason: FallbackReason::BelowMinimumSize,
                attempts: 0
            }
        );
        assert_eq!(fx.encoder.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_output_directory_placement() {
        let fx = Fixture::new(FakeEncoder::always(FakeEncode::ok(4_000)), FakeScorer::scores(&[0.99]));
        let out = TempDir::new().unwrap();
        let mut settings = fx.settings(0.95, 5);
        settings.output_dir = Some(out.path().to_path_buf());
        let report = fx.run(settings).await;

        match report.decision {
            CompressionDecision::Accepted { output, .. } => {
                assert_eq!(output, out.path().join("clip.mp4"));
                assert!(output.exists());
            }
            other => panic!("expected Accepted, got {:?}", other),
        }
        assert_eq!(std::fs::read(&fx.input).unwrap(), ORIGINAL_BYTES);
    }

    #[tokio::test(start_paused = true)]
    async fn test_no_fingerprint_repeats_in_history() {
        let fx = Fixture::new(
            FakeEncoder::new(vec![FakeEncode::Failure, FakeEncode::Timeout], FakeEncode::ok(4_000)),
            FakeScorer::scores(&[0.70, 0.80, 0.85, 0.86]),
        );
        let report = fx.run(fx.settings(0.99, 8)).await;

        let mut seen = std::collections::HashSet::new();
        for attempt in &report.history {
            assert!(seen.insert(attempt.parameters.fingerprint()));
        }
        assert_eq!(report.decision.label(), "fell_back");
        assert!(fx.work_dir_is_empty());
    }
}
