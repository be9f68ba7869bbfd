//! # Encoder Adapter Module
//!
//! Esegue un tool esterno con un set di parametri e classifica l'esito.
//!
//! ## Responsabilità:
//! - Definisce la capability `EncoderAdapter` e l'esito `EncodeOutcome`
//! - Verifica lo spazio libero prima di scrivere il candidato
//! - Esegue il processo con timeout obbligatorio (`kill_on_drop`)
//! - Rimuove gli output parziali su fallimento o timeout
//!
//! L'adapter non fa mai retry: decide il controller.

pub mod ffmpeg;
pub mod handbrake;

pub use ffmpeg::FfmpegEncoder;
pub use handbrake::HandBrakeEncoder;

use crate::config::{Config, EncoderTool};
use crate::error::EncodeError;
use crate::file_manager::FileManager;
use crate::types::{EncodeParameters, MediaDescriptor};
use crate::utils::tail_lines;
use async_trait::async_trait;
use std::ffi::OsString;
use std::path::Path;
use std::process::Stdio;
use std::sync::Arc;
use std::time::Duration;
use tokio::process::Command;
use tokio::time::Instant;
use tracing::{debug, warn};

const MB: u64 = 1024 * 1024;

/// Classified result of one encoder run
#[derive(Debug, Clone, PartialEq)]
pub enum EncodeOutcome {
    Success { size_bytes: u64, elapsed: Duration },
    ToolFailure { exit_code: Option<i32>, diagnostic: String },
    Timeout { elapsed: Duration },
}

/// Capability: produce one candidate file from a parameter set
#[async_trait]
pub trait EncoderAdapter: Send + Sync {
    async fn encode(
        &self,
        input: &MediaDescriptor,
        params: &EncodeParameters,
        output: &Path,
        timeout: Duration,
    ) -> Result<EncodeOutcome, EncodeError>;
}

/// Builds the adapter selected by the configuration
pub fn from_config(config: &Config) -> Arc<dyn EncoderAdapter> {
    let margin = config.min_free_space_bytes();
    match config.encoder {
        EncoderTool::Ffmpeg => Arc::new(FfmpegEncoder::new(margin)),
        EncoderTool::Handbrake => Arc::new(HandBrakeEncoder::new(margin)),
    }
}

/// Fails when the output location cannot hold a candidate as large as the
/// original plus the configured free-space margin
pub fn ensure_disk_space(output: &Path, expected_bytes: u64, margin_bytes: u64) -> Result<(), EncodeError> {
    let dir = output.parent().unwrap_or_else(|| Path::new("."));
    let Some(available) = FileManager::available_space(dir) else {
        debug!("Free space unknown for {}, skipping check", dir.display());
        return Ok(());
    };

    let required = expected_bytes.saturating_add(margin_bytes);
    if available < required {
        return Err(EncodeError::InsufficientDiskSpace {
            path: dir.to_path_buf(),
            available_mb: available / MB,
            required_mb: required / MB,
        });
    }
    Ok(())
}

/// Runs an encoder process to completion or until `timeout` elapses.
///
/// The child is killed when the wait is abandoned; partial output is removed
/// on every non-success path.
pub async fn run_encoder_process(
    program: OsString,
    args: Vec<OsString>,
    output: &Path,
    timeout: Duration,
) -> Result<EncodeOutcome, EncodeError> {
    let start = Instant::now();
    debug!("Running {:?} {:?}", program, args);

    let child = match Command::new(&program)
        .args(&args)
        .stdin(Stdio::null())
        .stdout(Stdio::null())
        .stderr(Stdio::piped())
        .kill_on_drop(true)
        .spawn()
    {
        Ok(child) => child,
        Err(e) => {
            return Ok(EncodeOutcome::ToolFailure {
                exit_code: None,
                diagnostic: format!("failed to start {}: {}", program.to_string_lossy(), e),
            })
        }
    };

    let result = match tokio::time::timeout(timeout, child.wait_with_output()).await {
        Ok(result) => result,
        Err(_) => {
            warn!("Encoder timed out after {}s", timeout.as_secs());
            FileManager::remove_if_exists(output).await;
            return Ok(EncodeOutcome::Timeout {
                elapsed: start.elapsed(),
            });
        }
    };

    let process_output = match result {
        Ok(output) => output,
        Err(e) => {
            FileManager::remove_if_exists(output).await;
            return Ok(EncodeOutcome::ToolFailure {
                exit_code: None,
                diagnostic: e.to_string(),
            });
        }
    };

    if !process_output.status.success() {
        FileManager::remove_if_exists(output).await;
        return Ok(EncodeOutcome::ToolFailure {
            exit_code: process_output.status.code(),
            diagnostic: tail_lines(&String::from_utf8_lossy(&process_output.stderr), 5),
        });
    }

    let size_bytes = match tokio::fs::metadata(output).await {
        Ok(meta) if meta.len() > 0 => meta.len(),
        _ => {
            FileManager::remove_if_exists(output).await;
            return Ok(EncodeOutcome::ToolFailure {
                exit_code: process_output.status.code(),
                diagnostic: "encoder exited successfully but produced no output".to_string(),
            });
        }
    };

    Ok(EncodeOutcome::Success {
        size_bytes,
        elapsed: start.elapsed(),
    })
}

/// Even output width for a percentage of the source width
pub(crate) fn scaled_width(source_width: u32, scale_percent: u8) -> u32 {
    let width = (source_width as u64 * scale_percent as u64 / 100) as u32;
    (width & !1).max(2)
}
