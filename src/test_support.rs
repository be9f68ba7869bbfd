//! Scripted collaborators for controller and batch tests.

use crate::encoder::{EncodeOutcome, EncoderAdapter};
use crate::error::{EncodeError, ProbeError, ScoringError};
use crate::probe::MediaProber;
use crate::quality::QualityScorer;
use crate::types::{EncodeParameters, MediaDescriptor, MediaKind, QualityMetric, QualityScore};
use async_trait::async_trait;
use std::collections::{HashMap, VecDeque};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;
use std::time::Duration;

pub fn video_descriptor(path: &Path, file_size: u64) -> MediaDescriptor {
    MediaDescriptor {
        path: path.to_path_buf(),
        kind: MediaKind::Video,
        container: "mov,mp4,m4a,3gp,3g2,mj2".into(),
        codec: "h264".into(),
        duration_secs: 600.0,
        width: 1920,
        height: 1080,
        bitrate: 8_000_000,
        frame_rate: 25.0,
        file_size,
    }
}

/// Reports a fixed size for every path, except the ones marked corrupt
pub struct FakeProber {
    pub file_size: u64,
    corrupt: Vec<PathBuf>,
    pub calls: AtomicUsize,
}

impl FakeProber {
    pub fn new(file_size: u64) -> Self {
        Self {
            file_size,
            corrupt: Vec::new(),
            calls: AtomicUsize::new(0),
        }
    }

    pub fn with_corrupt(mut self, path: &Path) -> Self {
        self.corrupt.push(path.to_path_buf());
        self
    }
}

#[async_trait]
impl MediaProber for FakeProber {
    async fn probe(&self, path: &Path) -> Result<MediaDescriptor, ProbeError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if self.corrupt.iter().any(|p| p == path) {
            return Err(ProbeError::Corrupt {
                path: path.to_path_buf(),
                details: "moov atom not found".into(),
            });
        }
        Ok(video_descriptor(path, self.file_size))
    }
}

/// One scripted encoder run
#[derive(Debug, Clone)]
pub enum FakeEncode {
    /// Writes a candidate of `size` bytes after `delay`
    Success { size: u64, delay: Duration },
    Failure,
    Timeout,
    DiskFull,
}

impl FakeEncode {
    pub fn ok(size: u64) -> Self {
        Self::Success {
            size,
            delay: Duration::ZERO,
        }
    }
}

/// Plays back a script, then repeats `fallback`
pub struct FakeEncoder {
    script: Mutex<VecDeque<FakeEncode>>,
    fallback: FakeEncode,
    pub calls: AtomicUsize,
    pub seen: Mutex<Vec<EncodeParameters>>,
    in_flight: AtomicUsize,
    /// Highest number of encodes running at the same time
    pub peak: AtomicUsize,
}

impl FakeEncoder {
    pub fn new(script: Vec<FakeEncode>, fallback: FakeEncode) -> Self {
        Self {
            script: Mutex::new(script.into()),
            fallback,
            calls: AtomicUsize::new(0),
            seen: Mutex::new(Vec::new()),
            in_flight: AtomicUsize::new(0),
            peak: AtomicUsize::new(0),
        }
    }

    pub fn always(outcome: FakeEncode) -> Self {
        Self::new(Vec::new(), outcome)
    }
}

#[async_trait]
impl EncoderAdapter for FakeEncoder {
    async fn encode(
        &self,
        input: &MediaDescriptor,
        params: &EncodeParameters,
        output: &Path,
        timeout: Duration,
    ) -> Result<EncodeOutcome, EncodeError> {
        let running = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.peak.fetch_max(running, Ordering::SeqCst);
        let outcome = self.run_step(input, params, output, timeout).await;
        self.in_flight.fetch_sub(1, Ordering::SeqCst);
        outcome
    }
}

impl FakeEncoder {
    async fn run_step(
        &self,
        _input: &MediaDescriptor,
        params: &EncodeParameters,
        output: &Path,
        timeout: Duration,
    ) -> Result<EncodeOutcome, EncodeError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.seen.lock().unwrap().push(params.clone());
        let step = self
            .script
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or_else(|| self.fallback.clone());

        match step {
            FakeEncode::Success { size, delay } => {
                if delay > timeout {
                    tokio::time::sleep(timeout).await;
                    return Ok(EncodeOutcome::Timeout { elapsed: timeout });
                }
                tokio::time::sleep(delay).await;
                std::fs::write(output, vec![0u8; size as usize])?;
                Ok(EncodeOutcome::Success {
                    size_bytes: size,
                    elapsed: delay,
                })
            }
            FakeEncode::Failure => Ok(EncodeOutcome::ToolFailure {
                exit_code: Some(1),
                diagnostic: "Unknown encoder 'libx265'".into(),
            }),
            FakeEncode::Timeout => {
                tokio::time::sleep(timeout).await;
                Ok(EncodeOutcome::Timeout { elapsed: timeout })
            }
            FakeEncode::DiskFull => Err(EncodeError::InsufficientDiskSpace {
                path: output.to_path_buf(),
                available_mb: 10,
                required_mb: 1000,
            }),
        }
    }
}

/// Returns scripted scores (`None` = scoring failure), then repeats the last entry.
/// Scores can also be keyed per original file for batch tests.
pub struct FakeScorer {
    script: Mutex<VecDeque<Option<f64>>>,
    last: Mutex<Option<f64>>,
    per_file: HashMap<PathBuf, f64>,
    metric: QualityMetric,
    pub calls: AtomicUsize,
}

impl FakeScorer {
    pub fn new(script: Vec<Option<f64>>) -> Self {
        Self {
            script: Mutex::new(script.into()),
            last: Mutex::new(None),
            per_file: HashMap::new(),
            metric: QualityMetric::Vmaf,
            calls: AtomicUsize::new(0),
        }
    }

    pub fn scores(values: &[f64]) -> Self {
        Self::new(values.iter().copied().map(Some).collect())
    }

    pub fn per_file(per_file: HashMap<PathBuf, f64>) -> Self {
        Self {
            per_file,
            ..Self::new(Vec::new())
        }
    }
}

#[async_trait]
impl QualityScorer for FakeScorer {
    async fn score(&self, original: &Path, _candidate: &Path) -> Result<QualityScore, ScoringError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if let Some(value) = self.per_file.get(original) {
            return Ok(QualityScore::new(*value, self.metric));
        }

        let next = self.script.lock().unwrap().pop_front();
        let value = match next {
            Some(v) => {
                *self.last.lock().unwrap() = v;
                v
            }
            None => *self.last.lock().unwrap(),
        };

        value
            .map(|v| QualityScore::new(v, self.metric))
            .ok_or_else(|| ScoringError::AllMetricsFailed("vmaf: no score; ssim: no score; psnr: no score".into()))
    }
}
