//! # Media Compressor Library
//!
//! Compressione di immagini e video validata da una metrica di qualità
//! oggettiva (VMAF, con fallback su SSIM e PSNR).
//!
//! ## Responsabilità:
//! - Definisce la struttura modulare dell'applicazione
//! - Espone i tipi e le funzioni principali tramite re-exports
//!
//! ## Architettura dei moduli:
//! - `probe`: lettura metadati (ffprobe, header immagini)
//! - `encoder`: adapter verso ffmpeg e HandBrakeCLI
//! - `quality`: punteggio qualità candidato vs originale
//! - `strategy`: scelta dei parametri del tentativo successivo
//! - `controller`: macchina a stati per singolo file
//! - `batch`: pool di worker, aggregatore, progress
//! - `state`: decisioni persistite tra un'esecuzione e l'altra
//! - `config`, `error`, `types`: configurazione, errori, modello dati
//!
//! ## Utilizzo:
//! ```rust,ignore
//! use media_compressor::{BatchCoordinator, CancellationFlag, CompressionController, Config};
//!
//! let config = Config::default();
//! let controller = Arc::new(CompressionController::new(prober, encoder, scorer, strategy,
//!     ControllerSettings::from_config(&config)));
//! let report = BatchCoordinator::new(controller, config.workers)
//!     .run(files, &root, &CancellationFlag::new())
//!     .await?;
//! ```

pub mod batch;
pub mod cancel;
pub mod config;
pub mod content;
pub mod controller;
pub mod encoder;
pub mod error;
pub mod file_manager;
pub mod json_output;
pub mod platform;
pub mod probe;
pub mod progress;
pub mod quality;
pub mod state;
pub mod strategy;
pub mod tool_resolver;
pub mod types;
pub mod utils;

#[cfg(test)]
mod test_support;

pub use batch::{AggregateReport, BatchCoordinator};
pub use cancel::CancellationFlag;
pub use config::Config;
pub use controller::{CompressionController, ControllerSettings, FileReport};
pub use encoder::EncoderAdapter;
pub use error::{CompressError, EncodeError, ProbeError, ScoringError};
pub use probe::{FfprobeProber, MediaProber};
pub use quality::{FfmpegQualityScorer, QualityScorer};
pub use state::{DecisionSummary, StateManager};
pub use strategy::{AdaptiveStrategy, ParameterStrategy};
pub use types::{BatchResult, CompressionDecision, FailureReason, FallbackReason};
