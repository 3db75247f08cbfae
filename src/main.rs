//! labelscan CLI - batch OCR for shipping labels
//!
//! Reads label images from disk, runs them through the recognition
//! pipeline, and prints the batch outcome as JSON. Low-confidence results
//! can be retried with stronger preprocessing.

use anyhow::{Context, Result};
use clap::Parser;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{info, warn, Level};
use tracing_subscriber::FmtSubscriber;

use labelscan::pipeline::retry::RetryMode;
use labelscan::{config, EnginePool, EngineProvider, InputImage, OcrPipeline, PipelineConfig};

/// Results below this confidence get a retry pass when --retry is set.
const RETRY_THRESHOLD: f32 = 0.7;

/// labelscan - shipping label OCR
#[derive(Parser, Debug)]
#[command(name = "labelscan")]
#[command(about = "Batch OCR for shipping labels with structured field extraction")]
struct Args {
    /// Label image files to process
    #[arg(required = true)]
    files: Vec<PathBuf>,

    /// Path to a TOML configuration file
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Retry low-confidence results with stronger preprocessing
    #[arg(long)]
    retry: bool,

    /// Print the extracted shipment records instead of the raw outcome
    #[arg(long)]
    records: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize logging
    let subscriber = FmtSubscriber::builder()
        .with_max_level(Level::INFO)
        .finish();
    tracing::subscriber::set_global_default(subscriber)?;

    let args = Args::parse();
    let config = load_or_create_config(args.config.as_deref());

    let provider = engine_provider()?;
    let pool = Arc::new(EnginePool::new(
        provider,
        config.language.clone(),
        config.pool_max_idle,
    ));
    let pipeline = OcrPipeline::new(Arc::clone(&pool), config.clone());

    let files = collect_inputs(&args.files)?;
    info!("processing {} label image(s)", files.len());

    let mut outcome = pipeline
        .process_batch(files.clone())
        .await
        .context("batch processing failed")?;

    if args.retry {
        retry_low_confidence(&pipeline, &files, &mut outcome, config.retry_mode).await;
    }

    if args.records {
        let records: Vec<_> = outcome
            .results
            .iter()
            .map(|r| (r.filename.clone(), r.shipment_record()))
            .collect();
        println!("{}", serde_json::to_string_pretty(&records)?);
    } else {
        println!("{}", serde_json::to_string_pretty(&outcome)?);
    }

    // Tear down the idle engine instances before exiting
    pool.shutdown();

    Ok(())
}

/// Load configuration from an explicit path, the user config directory, or
/// fall back to defaults.
fn load_or_create_config(explicit: Option<&Path>) -> PipelineConfig {
    if let Some(path) = explicit {
        match config::load_config(path) {
            Ok(config) => {
                info!("loaded configuration from {}", path.display());
                return config;
            }
            Err(e) => {
                warn!("could not load {}: {e}; using defaults", path.display());
                return PipelineConfig::default();
            }
        }
    }

    if let Some(proj_dirs) = directories::ProjectDirs::from("com", "cashea", "labelscan") {
        let path = proj_dirs.config_dir().join("config.toml");
        if path.exists() {
            if let Ok(config) = config::load_config(&path) {
                info!("loaded configuration from {}", path.display());
                return config;
            }
        }
    }

    info!("using default configuration");
    PipelineConfig::default()
}

/// Build pipeline inputs from the file arguments.
fn collect_inputs(paths: &[PathBuf]) -> Result<Vec<InputImage>> {
    paths
        .iter()
        .map(|path| {
            let metadata = std::fs::metadata(path)
                .with_context(|| format!("cannot read {}", path.display()))?;
            let mime_type = guess_mime_type(path);
            Ok(InputImage::from_path(path.clone(), mime_type, metadata.len()))
        })
        .collect()
}

/// Map a file extension to its MIME type. Unknown extensions map to a type
/// the pipeline rejects, which surfaces as a per-file validation error.
fn guess_mime_type(path: &Path) -> String {
    let ext = path
        .extension()
        .map(|e| e.to_string_lossy().to_lowercase())
        .unwrap_or_default();
    match ext.as_str() {
        "jpg" | "jpeg" => "image/jpeg",
        "png" => "image/png",
        "webp" => "image/webp",
        "tif" | "tiff" => "image/tiff",
        _ => "application/octet-stream",
    }
    .to_string()
}

/// Re-run low-confidence results through a retry pass, adopting the retry
/// output where the merge decision prefers it.
async fn retry_low_confidence(
    pipeline: &OcrPipeline,
    files: &[InputImage],
    outcome: &mut labelscan::BatchOutcome,
    mode: RetryMode,
) {
    for result in outcome.results.iter_mut() {
        if result.confidence >= RETRY_THRESHOLD {
            continue;
        }
        let Some(file) = files.iter().find(|f| f.filename == result.filename) else {
            continue;
        };

        info!(
            filename = %result.filename,
            confidence = result.confidence,
            "retrying low-confidence result"
        );
        match pipeline.process_retry_mode(file, mode, Some(&*result)).await {
            Ok(retry_outcome) => {
                if retry_outcome.use_retry {
                    info!(
                        filename = %result.filename,
                        improvement = retry_outcome.confidence_improvement,
                        "adopting retry result"
                    );
                    *result = retry_outcome.retry;
                }
            }
            Err(e) => warn!(filename = %result.filename, "retry failed: {e}"),
        }
    }
}

#[cfg(feature = "tesseract")]
fn engine_provider() -> Result<Arc<dyn EngineProvider>> {
    Ok(Arc::new(labelscan::engine::tesseract::TesseractProvider))
}

#[cfg(not(feature = "tesseract"))]
fn engine_provider() -> Result<Arc<dyn EngineProvider>> {
    anyhow::bail!("this build has no OCR engine; rebuild with --features tesseract")
}
