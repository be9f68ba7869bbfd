//! # Batch Module
//!
//! Elaborazione di un insieme di file con un pool limitato di worker:
//! - `coordinator`: dispatch dei file e raccolta dei risultati
//! - `aggregator`: unico proprietario dei contatori e dello state file
//! - `progress_tracker`: progress bar ed eventi JSON
//! - `path_resolver`: destinazione dei candidati accettati

pub mod aggregator;
pub mod coordinator;
pub mod path_resolver;
pub mod progress_tracker;

pub use aggregator::{AggregateReport, BatchEvent};
pub use coordinator::BatchCoordinator;
pub use path_resolver::PathResolver;
