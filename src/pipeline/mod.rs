//! OCR pipeline
//!
//! Orchestrates per-image recognition and batch fan-out. Each image flows
//! through preprocess -> recognize -> normalize strictly in sequence; a
//! batch runs images in groups of at most `max_concurrent` files, with
//! groups processed one after another so peak engine usage stays bounded.
//!
//! The engine pool is the only shared mutable resource; everything else is
//! owned by the task processing one image.

pub mod retry;

use futures_util::future::join_all;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Instant;
use tokio::time::timeout;
use tracing::{debug, info, warn};

use crate::config::PipelineConfig;
use crate::engine::pool::EnginePool;
use crate::engine::{EngineParams, Recognition};
use crate::error::{EngineError, OcrError, ValidationError};
use crate::fields::ShipmentRecord;
use crate::preprocess::{self, PreprocessingOptions};
use crate::roi::BoundingBox;
use crate::text;

/// Where the image bytes come from.
#[derive(Debug, Clone)]
pub enum ImageSource {
    /// Read from disk at processing time.
    Path(PathBuf),
    /// Already in memory (e.g. an upload buffer).
    Bytes(Vec<u8>),
}

/// One image submitted for recognition.
///
/// Filenames are assumed unique within a batch; results are correlated by
/// filename, so duplicates make the correlation ambiguous.
#[derive(Debug, Clone)]
pub struct InputImage {
    pub source: ImageSource,
    pub filename: String,
    pub mime_type: String,
    pub size: u64,
}

impl InputImage {
    /// Build an input from an in-memory buffer.
    pub fn from_bytes(filename: impl Into<String>, mime_type: impl Into<String>, bytes: Vec<u8>) -> Self {
        let size = bytes.len() as u64;
        Self {
            source: ImageSource::Bytes(bytes),
            filename: filename.into(),
            mime_type: mime_type.into(),
            size,
        }
    }

    /// Build an input referencing a file on disk.
    pub fn from_path(path: PathBuf, mime_type: impl Into<String>, size: u64) -> Self {
        let filename = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| path.to_string_lossy().into_owned());
        Self {
            source: ImageSource::Path(path),
            filename,
            mime_type: mime_type.into(),
            size,
        }
    }
}

/// Result of recognizing one image.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OcrResult {
    pub filename: String,
    /// Normalized text.
    pub text: String,
    /// Text as the engine produced it, before normalization.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub raw_text: Option<String>,
    /// Confidence in [0, 1].
    pub confidence: f32,
    pub processing_time_ms: u64,
    /// Per-field results when field-level recognition ran.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub field_results: Option<Vec<FieldResult>>,
}

impl OcrResult {
    /// Structured shipment fields extracted from the normalized text.
    pub fn shipment_record(&self) -> ShipmentRecord {
        ShipmentRecord::from_text(&self.text)
    }
}

/// Result of recognizing one label field.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FieldResult {
    pub field_name: String,
    /// Validated/corrected text.
    pub text: String,
    /// Text as recognized, before validation.
    pub raw_text: String,
    /// Confidence in [0, 1].
    pub confidence: f32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub bounding_box: Option<BoundingBox>,
}

/// A per-file failure inside a batch.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BatchError {
    pub filename: String,
    pub error: String,
}

/// Aggregated outcome of a batch request. Every input file lands in exactly
/// one of `results` or `errors`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BatchOutcome {
    pub results: Vec<OcrResult>,
    pub errors: Vec<BatchError>,
    pub total_processing_time_ms: u64,
}

/// The OCR processing pipeline.
///
/// Owns its configuration; the engine pool is injected so the caller
/// controls engine lifetime and can share the pool across pipelines.
pub struct OcrPipeline {
    pool: Arc<EnginePool>,
    config: PipelineConfig,
    default_params: EngineParams,
}

impl OcrPipeline {
    /// Create a pipeline using the given pool and configuration.
    pub fn new(pool: Arc<EnginePool>, config: PipelineConfig) -> Self {
        Self {
            pool,
            config,
            default_params: EngineParams::label_defaults(),
        }
    }

    /// The pipeline's configuration.
    pub fn config(&self) -> &PipelineConfig {
        &self.config
    }

    /// The injected engine pool.
    pub fn pool(&self) -> &Arc<EnginePool> {
        &self.pool
    }

    /// Recognize one image with the default parameters.
    pub async fn process_image(&self, image: &InputImage) -> Result<OcrResult, OcrError> {
        let started = Instant::now();
        let bytes = self.read_bytes(image).await?;
        // First pass runs without enhancements; the engine's own internal
        // preprocessing handles the common case.
        let bytes = preprocess::preprocess(&bytes, &PreprocessingOptions::default());
        let params = self.default_params.clone();

        let (recognition, elapsed) = self.recognize(&image.filename, bytes, params).await?;
        debug!(
            filename = %image.filename,
            elapsed_ms = elapsed.as_millis() as u64,
            "recognition complete"
        );

        let raw_text = recognition.text;
        let normalized = text::normalize(&raw_text);

        Ok(OcrResult {
            filename: image.filename.clone(),
            text: normalized,
            raw_text: Some(raw_text),
            confidence: (recognition.confidence / 100.0).clamp(0.0, 1.0),
            processing_time_ms: started.elapsed().as_millis() as u64,
            field_results: None,
        })
    }

    /// Recognize a batch of images under the concurrency ceiling and the
    /// request deadline.
    ///
    /// Per-file failures are reported in the outcome's error list; only
    /// request-level validation and the deadline produce an `Err`.
    pub async fn process_batch(&self, files: Vec<InputImage>) -> Result<BatchOutcome, OcrError> {
        if files.len() > self.config.max_files_per_batch {
            return Err(ValidationError::TooManyFiles {
                count: files.len(),
                max_files: self.config.max_files_per_batch,
            }
            .into());
        }

        let started = Instant::now();
        let deadline = self.config.request_timeout();

        let mut outcome = timeout(deadline, self.run_groups(files))
            .await
            .map_err(|_| {
                warn!("batch abandoned after {deadline:?}");
                OcrError::Timeout(deadline)
            })??;

        outcome.total_processing_time_ms = started.elapsed().as_millis() as u64;
        info!(
            results = outcome.results.len(),
            errors = outcome.errors.len(),
            elapsed_ms = outcome.total_processing_time_ms,
            "batch complete"
        );
        Ok(outcome)
    }

    /// Process files in sequential groups of `max_concurrent`; within a
    /// group all files run concurrently.
    ///
    /// Per-file failures become error entries; failing to create an engine
    /// instance at all is a resource-level problem and aborts the batch.
    async fn run_groups(&self, files: Vec<InputImage>) -> Result<BatchOutcome, OcrError> {
        let mut outcome = BatchOutcome::default();
        let group_size = self.config.max_concurrent.max(1);

        for group in files.chunks(group_size) {
            let tasks = group.iter().map(|file| async move {
                let result = match self.validate_file(file) {
                    Ok(()) => self.process_image(file).await,
                    Err(e) => Err(OcrError::Validation(e)),
                };
                (file.filename.clone(), result)
            });

            for (filename, result) in join_all(tasks).await {
                match result {
                    Ok(ocr) => outcome.results.push(ocr),
                    Err(e @ OcrError::Engine(_)) => return Err(e),
                    Err(e) => outcome.errors.push(BatchError {
                        filename,
                        error: e.to_string(),
                    }),
                }
            }
        }

        Ok(outcome)
    }

    /// Reject a file before it reaches the engine.
    fn validate_file(&self, file: &InputImage) -> Result<(), ValidationError> {
        if !self.config.accepts_mime_type(&file.mime_type) {
            return Err(ValidationError::UnsupportedMediaType {
                filename: file.filename.clone(),
                mime_type: file.mime_type.clone(),
            });
        }
        if file.size > self.config.max_file_size {
            return Err(ValidationError::FileTooLarge {
                filename: file.filename.clone(),
                size: file.size,
                max_size: self.config.max_file_size,
            });
        }
        Ok(())
    }

    async fn read_bytes(&self, image: &InputImage) -> Result<Vec<u8>, OcrError> {
        match &image.source {
            ImageSource::Bytes(bytes) => Ok(bytes.clone()),
            ImageSource::Path(path) => {
                tokio::fs::read(path).await.map_err(|e| OcrError::Read {
                    filename: image.filename.clone(),
                    source: e,
                })
            }
        }
    }

    /// Run one recognition on the blocking pool: acquire an instance, apply
    /// parameters, recognize, and release the instance on every path.
    ///
    /// The returned duration brackets only the recognize call, so it
    /// reflects inference cost rather than pool overhead.
    pub(crate) async fn recognize(
        &self,
        filename: &str,
        bytes: Vec<u8>,
        params: EngineParams,
    ) -> Result<(Recognition, std::time::Duration), OcrError> {
        let pool = Arc::clone(&self.pool);
        let filename_owned = filename.to_string();

        let joined = tokio::task::spawn_blocking(move || {
            let mut engine = pool.acquire()?;

            let outcome = (|| {
                engine.apply_params(&params)?;
                let started = Instant::now();
                let recognition = engine.recognize(&bytes)?;
                Ok::<_, EngineError>((recognition, started.elapsed()))
            })();

            pool.release(engine);
            outcome
        })
        .await;

        match joined {
            Ok(Ok(result)) => Ok(result),
            Ok(Err(EngineError::Create(e))) => Err(OcrError::Engine(EngineError::Create(e))),
            Ok(Err(source)) => Err(OcrError::Recognition {
                filename: filename_owned,
                source,
            }),
            Err(e) => Err(OcrError::Recognition {
                filename: filename_owned,
                source: EngineError::Recognize(format!("recognition task failed: {e}")),
            }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::testing::{FakeProvider, SharedCounters, FAIL_MARKER};

    fn pipeline_with(provider: FakeProvider, config: PipelineConfig) -> OcrPipeline {
        let pool = Arc::new(EnginePool::new(
            Arc::new(provider),
            config.language.clone(),
            config.pool_max_idle,
        ));
        OcrPipeline::new(pool, config)
    }

    fn png_input(filename: &str) -> InputImage {
        InputImage::from_bytes(filename, "image/png", b"fake image bytes".to_vec())
    }

    #[tokio::test]
    async fn test_process_image_normalizes_text_and_confidence() {
        let provider = FakeProvider::new("Numero de envio: 1234567 8901", 87.0);
        let pipeline = pipeline_with(provider, PipelineConfig::default());

        let result = pipeline.process_image(&png_input("label.png")).await.unwrap();
        assert_eq!(result.filename, "label.png");
        assert_eq!(result.text, "número de envío: 1234567-8901");
        assert_eq!(result.raw_text.as_deref(), Some("Numero de envio: 1234567 8901"));
        assert!((result.confidence - 0.87).abs() < 1e-6);
    }

    #[tokio::test]
    async fn test_confidence_clamped_to_unit_range() {
        let provider = FakeProvider::new("text", 250.0);
        let pipeline = pipeline_with(provider, PipelineConfig::default());

        let result = pipeline.process_image(&png_input("a.png")).await.unwrap();
        assert!(result.confidence <= 1.0);
    }

    #[tokio::test]
    async fn test_recognition_failure_names_the_file() {
        let provider = FakeProvider::new("ok", 90.0);
        let pipeline = pipeline_with(provider, PipelineConfig::default());
        let image = InputImage::from_bytes("broken.png", "image/png", FAIL_MARKER.to_vec());

        let err = pipeline.process_image(&image).await.unwrap_err();
        match err {
            OcrError::Recognition { filename, .. } => assert_eq!(filename, "broken.png"),
            other => panic!("expected recognition error, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_batch_every_file_lands_exactly_once() {
        let provider = FakeProvider::new("texto", 80.0);
        let pipeline = pipeline_with(provider, PipelineConfig::default());

        let mut files: Vec<InputImage> = (0..7).map(|i| png_input(&format!("f{i}.png"))).collect();
        // Two failures: one engine-level, one validation-level
        files.push(InputImage::from_bytes("bad.png", "image/png", FAIL_MARKER.to_vec()));
        files.push(InputImage::from_bytes("doc.pdf", "application/pdf", vec![1, 2, 3]));

        let total = files.len();
        let outcome = pipeline.process_batch(files).await.unwrap();

        assert_eq!(outcome.results.len() + outcome.errors.len(), total);

        let mut seen: Vec<String> = outcome
            .results
            .iter()
            .map(|r| r.filename.clone())
            .chain(outcome.errors.iter().map(|e| e.filename.clone()))
            .collect();
        seen.sort();
        seen.dedup();
        assert_eq!(seen.len(), total, "a filename appeared in both collections");
    }

    #[tokio::test]
    async fn test_batch_failure_does_not_abort_siblings() {
        let provider = FakeProvider::new("texto", 80.0);
        let pipeline = pipeline_with(provider, PipelineConfig::default());

        let files = vec![
            InputImage::from_bytes("bad.png", "image/png", FAIL_MARKER.to_vec()),
            png_input("good-1.png"),
            png_input("good-2.png"),
        ];

        let outcome = pipeline.process_batch(files).await.unwrap();
        assert_eq!(outcome.results.len(), 2);
        assert_eq!(outcome.errors.len(), 1);
        assert_eq!(outcome.errors[0].filename, "bad.png");
    }

    #[tokio::test]
    async fn test_empty_batch_is_not_an_error() {
        let provider = FakeProvider::new("texto", 80.0);
        let pipeline = pipeline_with(provider, PipelineConfig::default());

        let outcome = pipeline.process_batch(vec![]).await.unwrap();
        assert!(outcome.results.is_empty());
        assert!(outcome.errors.is_empty());
    }

    #[tokio::test]
    async fn test_batch_rejects_too_many_files() {
        let provider = FakeProvider::new("texto", 80.0);
        let mut config = PipelineConfig::default();
        config.max_files_per_batch = 2;
        let pipeline = pipeline_with(provider, config);

        let files = vec![png_input("a.png"), png_input("b.png"), png_input("c.png")];
        let err = pipeline.process_batch(files).await.unwrap_err();
        assert!(matches!(
            err,
            OcrError::Validation(ValidationError::TooManyFiles { count: 3, .. })
        ));
    }

    #[tokio::test]
    async fn test_oversized_file_never_reaches_engine() {
        let counters = SharedCounters::default();
        let provider = FakeProvider::new("texto", 80.0).with_counters(counters.clone());
        let mut config = PipelineConfig::default();
        config.max_file_size = 4;
        let pipeline = pipeline_with(provider, config);

        let outcome = pipeline
            .process_batch(vec![png_input("huge.png")])
            .await
            .unwrap();
        assert_eq!(outcome.errors.len(), 1);
        assert_eq!(counters.created(), 0, "engine was created for a rejected file");
    }

    #[tokio::test]
    async fn test_batch_reuses_pooled_instances() {
        let counters = SharedCounters::default();
        let provider = FakeProvider::new("texto", 80.0).with_counters(counters.clone());
        let pipeline = pipeline_with(provider, PipelineConfig::default());

        let files: Vec<InputImage> = (0..6).map(|i| png_input(&format!("f{i}.png"))).collect();
        pipeline.process_batch(files).await.unwrap();

        // Groups of two run sequentially, so at most two instances are ever
        // needed and later groups reuse them.
        assert!(counters.created() <= 2, "created {} instances", counters.created());
        assert!(pipeline.pool().idle_count() <= 2);
    }

    #[tokio::test]
    async fn test_engine_creation_failure_aborts_batch() {
        let provider = FakeProvider::new("texto", 80.0).failing_create();
        let pipeline = pipeline_with(provider, PipelineConfig::default());

        let err = pipeline
            .process_batch(vec![png_input("a.png")])
            .await
            .unwrap_err();
        assert!(matches!(err, OcrError::Engine(EngineError::Create(_))));
    }

    #[tokio::test]
    async fn test_batch_deadline_produces_timeout_error() {
        let provider = FakeProvider::new("texto", 80.0);
        let mut config = PipelineConfig::default();
        config.request_timeout_ms = 0;
        let pipeline = pipeline_with(provider, config);

        let err = pipeline
            .process_batch(vec![png_input("a.png")])
            .await
            .unwrap_err();
        assert!(matches!(err, OcrError::Timeout(_)));
    }

    #[tokio::test]
    async fn test_missing_path_is_reported_per_file() {
        let provider = FakeProvider::new("texto", 80.0);
        let pipeline = pipeline_with(provider, PipelineConfig::default());

        let file = InputImage::from_path(PathBuf::from("/nonexistent/label.png"), "image/png", 10);
        let outcome = pipeline.process_batch(vec![file]).await.unwrap();
        assert_eq!(outcome.errors.len(), 1);
        assert_eq!(outcome.errors[0].filename, "label.png");
    }
}
