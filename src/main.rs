//! # Media Compressor - Main Entry Point
//!
//! Punto di ingresso dell'applicazione.
//!
//! ## Responsabilità:
//! - Parsing degli argomenti della command line con `clap`
//! - Inizializzazione del logging con `tracing` (su stderr, stdout resta per il JSON)
//! - Verifica delle dipendenze esterne (ffmpeg, ffprobe, HandBrakeCLI)
//! - Costruzione della pipeline e avvio del batch
//!
//! ## Flusso di esecuzione:
//! 1. Parsa gli argomenti CLI e li applica sopra la configurazione (file JSON opzionale)
//! 2. Valida la configurazione e crea la directory di output
//! 3. Controlla che i tool necessari siano installati
//! 4. Scopre i file media e li passa al coordinator
//! 5. Ctrl-C ferma l'avvio di nuovi file; quelli in corso terminano in fallback
//!
//! ## Esempio di utilizzo:
//! ```bash
//! media-compressor /path/to/media --threshold 93 --max-attempts 4 --workers 2 --verbose
//! ```

use anyhow::{anyhow, Result};
use clap::Parser;
use serde::de::DeserializeOwned;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{debug, info, warn};

use media_compressor::batch::PathResolver;
use media_compressor::config::{EncoderTool, RateMode};
use media_compressor::file_manager::FileManager;
use media_compressor::json_output::{JsonConfig, JsonMessage};
use media_compressor::platform::PlatformCommands;
use media_compressor::types::{Codec, Preset, QualityMetric};
use media_compressor::utils::format_duration;
use media_compressor::{
    encoder, AdaptiveStrategy, BatchCoordinator, CancellationFlag, CompressionController, Config,
    ControllerSettings, FfmpegQualityScorer, FfprobeProber, MediaProber, StateManager,
};

#[derive(Parser)]
#[command(name = "media-compressor")]
#[command(about = "Compress images and videos, keeping only results that pass an objective quality check")]
struct Args {
    /// File or directory containing media to compress
    media_path: PathBuf,

    /// JSON configuration file; command line flags override it
    #[arg(long)]
    config: Option<PathBuf>,

    /// Minimum quality (0-1 or 0-100)
    #[arg(short, long)]
    threshold: Option<f64>,

    /// Primary quality metric (vmaf, ssim, psnr)
    #[arg(long, value_parser = parse_choice::<QualityMetric>)]
    metric: Option<QualityMetric>,

    /// Maximum encode attempts per file
    #[arg(short = 'a', long)]
    max_attempts: Option<usize>,

    /// Wall-clock budget per file, in seconds
    #[arg(long)]
    max_duration: Option<u64>,

    /// Number of files processed in parallel
    #[arg(short, long)]
    workers: Option<usize>,

    /// Encoder tool (ffmpeg, handbrake)
    #[arg(long, value_parser = parse_choice::<EncoderTool>)]
    encoder: Option<EncoderTool>,

    /// Video codec (h264, h265, av1)
    #[arg(long, value_parser = parse_choice::<Codec>)]
    video_codec: Option<Codec>,

    /// Image codec (jpeg, webp)
    #[arg(long, value_parser = parse_choice::<Codec>)]
    image_codec: Option<Codec>,

    /// Rate control searched by the strategy (crf, bitrate)
    #[arg(long, value_parser = parse_choice::<RateMode>)]
    rate_mode: Option<RateMode>,

    /// Starting encoder preset (faster, fast, medium, slow, slower)
    #[arg(long, value_parser = parse_choice::<Preset>)]
    preset: Option<Preset>,

    /// Keep a candidate only if smaller than original * size threshold
    #[arg(long)]
    size_threshold: Option<f64>,

    /// Leave files smaller than this many MB untouched
    #[arg(long)]
    min_size_mb: Option<u64>,

    /// Allow one downscaled attempt when no level meets the threshold
    #[arg(long)]
    allow_downscale: bool,

    /// Disable filename based content detection
    #[arg(long)]
    no_content_detection: bool,

    /// Output directory for compressed files (if not specified, replace originals in place)
    #[arg(short, long)]
    output: Option<PathBuf>,

    /// Directory for per-file working directories
    #[arg(long)]
    temp_dir: Option<PathBuf>,

    /// Skip files whose previous decision is still current
    #[arg(long)]
    skip_processed: bool,

    /// Output progress and decisions as JSON lines
    #[arg(long)]
    json: bool,

    /// Verbose logging
    #[arg(short, long)]
    verbose: bool,
}

fn parse_choice<T: DeserializeOwned>(value: &str) -> Result<T, String> {
    serde_json::from_value(serde_json::Value::String(value.to_lowercase()))
        .map_err(|_| format!("invalid value '{}'", value))
}

impl Args {
    fn apply(&self, config: &mut Config) {
        if let Some(v) = self.threshold {
            config.quality_threshold = v;
        }
        if let Some(v) = self.metric {
            config.quality_metric = v;
        }
        if let Some(v) = self.max_attempts {
            config.max_attempts = v;
        }
        if let Some(v) = self.max_duration {
            config.max_file_duration_secs = v;
        }
        if let Some(v) = self.workers {
            config.workers = v;
        }
        if let Some(v) = self.encoder {
            config.encoder = v;
        }
        if let Some(v) = self.video_codec {
            config.video_codec = v;
        }
        if let Some(v) = self.image_codec {
            config.image_codec = v;
        }
        if let Some(v) = self.rate_mode {
            config.rate_mode = v;
        }
        if let Some(v) = self.preset {
            config.preset = v;
        }
        if let Some(v) = self.size_threshold {
            config.size_threshold = v;
        }
        if let Some(v) = self.min_size_mb {
            config.min_size_mb = v;
        }
        if let Some(ref v) = self.output {
            config.output_path = Some(v.clone());
        }
        if let Some(ref v) = self.temp_dir {
            config.temp_dir = v.clone();
        }
        config.allow_downscale |= self.allow_downscale;
        config.content_aware &= !self.no_content_detection;
        config.skip_processed |= self.skip_processed;
        config.json_output |= self.json;
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    let subscriber = tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_max_level(if args.verbose {
            tracing::Level::DEBUG
        } else {
            tracing::Level::INFO
        })
        .finish();
    tracing::subscriber::set_global_default(subscriber)?;

    if !args.media_path.exists() {
        return Err(anyhow!("Media path does not exist: {}", args.media_path.display()));
    }

    let mut config = match args.config {
        Some(ref path) => Config::from_file(path).await?,
        None => Config::default(),
    };
    args.apply(&mut config);

    if let Some(ref output_dir) = config.output_path {
        if !output_dir.exists() {
            std::fs::create_dir_all(output_dir)?;
            info!("Created output directory: {}", output_dir.display());
        }
    }
    config.validate()?;

    let mut tools = vec!["ffmpeg", "ffprobe"];
    if config.encoder == EncoderTool::Handbrake {
        tools.push("HandBrakeCLI");
    }
    let platform = PlatformCommands::instance();
    debug!("{}", platform.get_tools_report());
    if let Err(e) = platform.check_dependencies(&tools).await {
        if config.json_output {
            JsonMessage::error("Missing dependency".to_string(), Some(e.to_string())).emit();
        }
        return Err(e.into());
    }

    let files = FileManager::find_media_files(&args.media_path)?;
    let input_base_dir = PathResolver::input_base_dir(&args.media_path);
    info!("Found {} media files under {}", files.len(), args.media_path.display());

    if config.json_output {
        JsonMessage::Start {
            input: args.media_path.clone(),
            output_dir: config.output_path.clone(),
            total_files: files.len(),
            config: JsonConfig::from(&config),
        }
        .emit();
    }

    let prober: Arc<dyn MediaProber> = Arc::new(FfprobeProber::new(config.probe_timeout()));
    let scorer = Arc::new(FfmpegQualityScorer::new(
        prober.clone(),
        config.quality_metric,
        config.sample_duration_secs as f64,
        config.duration_tolerance_secs,
        config.scorer_timeout(),
    ));
    let controller = Arc::new(CompressionController::new(
        prober,
        encoder::from_config(&config),
        scorer,
        Arc::new(AdaptiveStrategy::from_config(&config)),
        ControllerSettings::from_config(&config),
    ));

    let mut coordinator =
        BatchCoordinator::new(controller, config.workers).with_output(config.json_output, !config.json_output);
    match StateManager::new(&input_base_dir).await {
        Ok(mut state) => {
            match state.cleanup().await {
                Ok(0) => {}
                Ok(removed) => info!("Dropped {} stale entries from the decision history", removed),
                Err(e) => warn!("Failed to clean decision history: {}", e),
            }
            coordinator = coordinator.with_state(state, config.skip_processed);
        }
        Err(e) => warn!("Decision history disabled: {}", e),
    }

    let cancel = CancellationFlag::new();
    let signal_flag = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("Interrupted: finishing files in progress, no new files will start");
            signal_flag.cancel();
        }
    });

    let started = std::time::Instant::now();
    let report = coordinator.run(files, &input_base_dir, &cancel).await?;
    let elapsed = started.elapsed();

    if config.json_output {
        JsonMessage::Complete {
            total: report.result.total(),
            accepted: report.result.accepted,
            fell_back: report.result.fell_back,
            failed: report.result.failed,
            bytes_saved: report.result.bytes_saved,
            duration_seconds: elapsed.as_secs_f64(),
            historical_stats: report.historical,
        }
        .emit();
    } else {
        println!("{}", report.stats.format_summary());
        println!("Completed in {}", format_duration(elapsed));
        if report.historical.total_files_recorded > 0 {
            println!(
                "Historical: {} files recorded, {} accepted, {} saved",
                report.historical.total_files_recorded,
                report.historical.total_accepted_historically,
                FileManager::format_size(report.historical.total_bytes_saved_historically)
            );
        }
    }

    Ok(())
}
