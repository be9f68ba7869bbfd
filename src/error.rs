//! # Error Types Module
//!
//! Questo modulo definisce tutti i tipi di errore custom dell'applicazione.
//!
//! ## Responsabilità:
//! - Un enum `thiserror` per ogni collaboratore esterno (probe, encoder, scorer)
//! - `CompressError` come errore ombrello per config e operazioni di batch
//! - Classificazione recuperabile / fatale usata dal controller
//!
//! ## Categorie di errori:
//! - `ProbeError`: input illeggibile, corrotto o container non riconosciuto (fatale per il file)
//! - `EncodeError`: spazio disco insufficiente o I/O sull'output (fatale per il file)
//! - `ScoringError`: misura qualità fallita (recuperabile, conta come tentativo fallito)
//! - `CompressError`: configurazione non valida, tool mancanti, stato
//!
//! Gli esiti `ToolFailure` e `Timeout` dell'encoder NON sono errori: sono
//! varianti di `EncodeOutcome` e guidano il retry.

use std::path::PathBuf;

/// Failure while inspecting a media file
#[derive(thiserror::Error, Debug)]
pub enum ProbeError {
    #[error("cannot read {path}: {source}")]
    Unreadable {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("corrupt media {path}: {details}")]
    Corrupt { path: PathBuf, details: String },

    #[error("unsupported container for {0}")]
    UnsupportedContainer(PathBuf),

    #[error("probe timed out after {secs}s for {path}")]
    Timeout { path: PathBuf, secs: u64 },
}

/// Fatal failure of the encoder adapter (recoverable outcomes live in `EncodeOutcome`)
#[derive(thiserror::Error, Debug)]
pub enum EncodeError {
    #[error("insufficient disk space at {path}: {available_mb} MB free, {required_mb} MB required")]
    InsufficientDiskSpace {
        path: PathBuf,
        available_mb: u64,
        required_mb: u64,
    },

    #[error("output I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Failure while measuring quality
#[derive(thiserror::Error, Debug)]
pub enum ScoringError {
    #[error("cannot decode {path}: {details}")]
    Undecodable { path: PathBuf, details: String },

    #[error("files are not comparable: {0}")]
    Incomparable(String),

    #[error("all quality metrics failed: {0}")]
    AllMetricsFailed(String),

    #[error("quality measurement timed out after {0}s")]
    Timeout(u64),
}

/// Custom error types for batch-level operations
#[derive(thiserror::Error, Debug)]
pub enum CompressError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Invalid configuration: {0}")]
    Config(String),

    #[error("State file error: {0}")]
    State(String),

    #[error("Dependency missing: {0}")]
    MissingDependency(String),
}
