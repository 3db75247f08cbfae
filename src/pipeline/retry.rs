//! Retry pass and result merging
//!
//! A retry runs the same source image through stronger preprocessing, and
//! in advanced mode through per-field label regions with field-specific
//! engine parameters. The retry result is then weighed against the original
//! pass: the caller always gets both results plus the adoption decision,
//! never a silently discarded pass.

use serde::{Deserialize, Serialize};
use std::time::Instant;
use tracing::debug;

use super::{FieldResult, InputImage, OcrPipeline, OcrResult};
use crate::engine::{EngineMode, EngineParams, PageSegMode};
use crate::error::{OcrError, ValidationError};
use crate::fields;
use crate::preprocess::{self, PreprocessingOptions};
use crate::roi::{shipping_label_regions, RegionOfInterest, CANONICAL_LABEL_SIZE};
use crate::text;

/// Source tag for a whole-image retry pass.
const FULL_IMAGE_SOURCE: &str = "full_image";

/// Retry intensity selected by the caller.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RetryMode {
    /// Stronger preprocessing over the whole image.
    #[default]
    Basic,
    /// Full preprocessing plus per-field label regions.
    Advanced,
}

/// Parameters for one retry pass.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct RetryParams {
    /// Preprocessing applied before recognition.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub preprocessing: Option<PreprocessingOptions>,
    /// Call-level engine parameter override.
    #[serde(alias = "tesseractParams", skip_serializing_if = "Option::is_none")]
    pub engine_params: Option<EngineParams>,
    /// Label regions for field-level recognition.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub regions: Option<Vec<RegionOfInterest>>,
}

impl RetryParams {
    /// Preset for [`RetryMode::Basic`].
    pub fn basic() -> Self {
        Self {
            preprocessing: Some(PreprocessingOptions {
                deskew: true,
                adaptive_threshold: true,
                upscale: Some(1.5),
                normalize_contrast: true,
                ..Default::default()
            }),
            engine_params: Some(EngineParams {
                page_seg_mode: Some(PageSegMode::SingleBlock),
                engine_mode: Some(EngineMode::Lstm),
                ..Default::default()
            }),
            regions: None,
        }
    }

    /// Preset for [`RetryMode::Advanced`].
    pub fn advanced() -> Self {
        let (width, height) = CANONICAL_LABEL_SIZE;
        Self {
            preprocessing: Some(PreprocessingOptions {
                deskew: true,
                adaptive_threshold: true,
                upscale: Some(2.0),
                despeckle: true,
                sharpen: true,
                normalize_contrast: true,
                ..Default::default()
            }),
            engine_params: Some(EngineParams {
                page_seg_mode: Some(PageSegMode::SingleBlock),
                engine_mode: Some(EngineMode::Lstm),
                ..Default::default()
            }),
            regions: Some(shipping_label_regions(width, height)),
        }
    }

    /// Preset parameters for a mode.
    pub fn for_mode(mode: RetryMode) -> Self {
        match mode {
            RetryMode::Basic => Self::basic(),
            RetryMode::Advanced => Self::advanced(),
        }
    }

    /// Range-check caller-supplied parameters before any engine work.
    ///
    /// Page-segmentation and engine-mode codes are already validated at
    /// deserialization by their tagged types; this covers the numeric and
    /// geometric constraints.
    pub fn validate(&self) -> Result<(), ValidationError> {
        if let Some(preprocessing) = &self.preprocessing {
            preprocessing.validate()?;
        }

        if let Some(regions) = &self.regions {
            for region in regions {
                if region.name.is_empty() {
                    return Err(ValidationError::InvalidRetryParam {
                        field: "regions.name".to_string(),
                        reason: "region name must not be empty".to_string(),
                    });
                }
                let b = &region.bounding_box;
                if b.width == 0 || b.height == 0 {
                    return Err(ValidationError::InvalidRetryParam {
                        field: format!("regions.{}.boundingBox", region.name),
                        reason: "width and height must be positive".to_string(),
                    });
                }
            }
        }

        Ok(())
    }
}

/// Outcome of weighing a retry pass against the original result.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RetryOutcome {
    /// The first-pass result this retry was compared against, if any.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub original: Option<OcrResult>,
    /// The retry-pass result.
    pub retry: OcrResult,
    /// Whether the retry result should replace the original.
    pub use_retry: bool,
    /// Retry confidence minus original confidence (0 when there is no
    /// original).
    pub confidence_improvement: f32,
    /// Recognition sources that produced the retry text: region names, or
    /// `full_image` for a whole-image pass.
    pub sources: Vec<String>,
}

impl RetryOutcome {
    /// The result the decision rule selected.
    pub fn best(&self) -> &OcrResult {
        if self.use_retry {
            &self.retry
        } else {
            self.original.as_ref().unwrap_or(&self.retry)
        }
    }
}

impl OcrPipeline {
    /// Run a retry pass with the given mode's preset parameters.
    pub async fn process_retry_mode(
        &self,
        image: &InputImage,
        mode: RetryMode,
        original: Option<&OcrResult>,
    ) -> Result<RetryOutcome, OcrError> {
        self.process_retry(image, &RetryParams::for_mode(mode), original)
            .await
    }

    /// Run a retry pass and weigh it against the original result.
    ///
    /// The decision rule adopts the retry when there is no original, or when
    /// the retry's confidence is strictly higher, or when the computed
    /// improvement is positive.
    pub async fn process_retry(
        &self,
        image: &InputImage,
        params: &RetryParams,
        original: Option<&OcrResult>,
    ) -> Result<RetryOutcome, OcrError> {
        params.validate()?;

        let started = Instant::now();
        let bytes = self.read_bytes(image).await?;

        let preprocessing = params.preprocessing.clone().unwrap_or_default();
        let processed = preprocess::preprocess(&bytes, &preprocessing);

        let call_params = match &params.engine_params {
            Some(p) => self.default_params.overlay(p),
            None => self.default_params.clone(),
        };

        let retry = match params.regions.as_deref() {
            Some(regions) if !regions.is_empty() => {
                self.recognize_regions(image, &processed, regions, &call_params, started)
                    .await?
            }
            _ => {
                let (recognition, elapsed) = self
                    .recognize(&image.filename, processed, call_params)
                    .await?;
                debug!(
                    filename = %image.filename,
                    elapsed_ms = elapsed.as_millis() as u64,
                    "retry recognition complete"
                );
                let raw_text = recognition.text;
                OcrResult {
                    filename: image.filename.clone(),
                    text: text::normalize(&raw_text),
                    raw_text: Some(raw_text),
                    confidence: (recognition.confidence / 100.0).clamp(0.0, 1.0),
                    processing_time_ms: started.elapsed().as_millis() as u64,
                    field_results: None,
                }
            }
        };

        let sources = match &retry.field_results {
            Some(fields) => fields.iter().map(|f| f.field_name.clone()).collect(),
            None => vec![FULL_IMAGE_SOURCE.to_string()],
        };

        let confidence_improvement = original
            .map(|o| retry.confidence - o.confidence)
            .unwrap_or(0.0);
        let use_retry = match original {
            None => true,
            Some(o) => retry.confidence > o.confidence || confidence_improvement > 0.0,
        };

        Ok(RetryOutcome {
            original: original.cloned(),
            retry,
            use_retry,
            confidence_improvement,
            sources,
        })
    }

    /// Recognize each label region separately and combine the validated
    /// fields into one result.
    async fn recognize_regions(
        &self,
        image: &InputImage,
        bytes: &[u8],
        regions: &[RegionOfInterest],
        call_params: &EngineParams,
        started: Instant,
    ) -> Result<OcrResult, OcrError> {
        let mut field_results = Vec::with_capacity(regions.len());

        for region in regions {
            let region_bytes = preprocess::extract_roi(bytes, &region.bounding_box);
            let params = match &region.engine_params {
                Some(p) => call_params.overlay(p),
                None => call_params.clone(),
            };

            let (recognition, elapsed) = self
                .recognize(&image.filename, region_bytes, params)
                .await?;
            debug!(
                filename = %image.filename,
                region = %region.name,
                elapsed_ms = elapsed.as_millis() as u64,
                "region recognition complete"
            );

            let raw_text = recognition.text.trim().to_string();
            let validation = fields::validate_field(&raw_text, &region.name);
            let ocr_confidence = (recognition.confidence / 100.0).clamp(0.0, 1.0);
            // Heuristic blend: validated fields average the engine and
            // validator confidences, approximate rather than calibrated.
            let confidence = if validation.is_valid {
                (ocr_confidence + validation.confidence) / 2.0
            } else {
                ocr_confidence
            };

            field_results.push(FieldResult {
                field_name: region.name.clone(),
                text: validation.corrected,
                raw_text,
                confidence,
                bounding_box: Some(region.bounding_box),
            });
        }

        let confidence = if field_results.is_empty() {
            0.0
        } else {
            field_results.iter().map(|f| f.confidence).sum::<f32>() / field_results.len() as f32
        };

        let combined: String = field_results
            .iter()
            .map(|f| format!("{}: {}", f.field_name, f.text))
            .collect::<Vec<_>>()
            .join("\n");

        Ok(OcrResult {
            filename: image.filename.clone(),
            text: text::normalize(&combined),
            raw_text: Some(combined),
            confidence,
            processing_time_ms: started.elapsed().as_millis() as u64,
            field_results: Some(field_results),
        })
    }
}

/// Pick the better of two recognition results: non-empty text wins over
/// empty, then the higher confidence, with the first result winning ties.
pub fn select_best<'a>(first: &'a OcrResult, second: &'a OcrResult) -> &'a OcrResult {
    if first.text.trim().is_empty() && !second.text.trim().is_empty() {
        return second;
    }
    if second.text.trim().is_empty() && !first.text.trim().is_empty() {
        return first;
    }
    if first.confidence >= second.confidence {
        first
    } else {
        second
    }
}
