//! OCR engine abstraction
//!
//! The pipeline depends on a narrow capability interface rather than a
//! concrete OCR backend: an [`EngineProvider`] creates language-bound
//! [`TextEngine`] instances, and each instance serves at most one
//! recognition at a time. Instances are pooled and reused by
//! [`pool::EnginePool`] because creation is expensive (model/language load).

pub mod pool;
#[cfg(feature = "tesseract")]
pub mod tesseract;

#[cfg(test)]
pub mod testing;

use serde::{Deserialize, Serialize};

use crate::error::{EngineError, ValidationError};

/// Raw output of one recognition call.
///
/// Confidence is on the engine's native 0-100 scale; the pipeline
/// normalizes it to [0, 1] at the invoker boundary.
#[derive(Debug, Clone)]
pub struct Recognition {
    /// Recognized text, unprocessed.
    pub text: String,
    /// Mean confidence reported by the engine (0-100).
    pub confidence: f32,
}

/// A stateful, single-concurrent-use handle to the recognition backend.
///
/// Implementations are `Send` but never assumed `Sync`: while checked out of
/// the pool an instance is owned exclusively by one in-flight call.
pub trait TextEngine: Send {
    /// Apply runtime parameters before a recognition call.
    fn apply_params(&mut self, params: &EngineParams) -> Result<(), EngineError>;

    /// Recognize text in encoded image bytes.
    fn recognize(&mut self, image: &[u8]) -> Result<Recognition, EngineError>;

    /// Release backend resources. Called by the pool when an instance is
    /// evicted or during shutdown.
    fn terminate(&mut self) -> Result<(), EngineError>;
}

/// Factory for engine instances, injected into the pool.
pub trait EngineProvider: Send + Sync {
    /// Create a fresh instance bound to the given language code (e.g. "spa").
    fn create(&self, language: &str) -> Result<Box<dyn TextEngine>, EngineError>;
}

/// Page segmentation mode, serialized as its numeric Tesseract code.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "u8", into = "u8")]
pub enum PageSegMode {
    /// Automatic segmentation with orientation and script detection.
    AutoOsd,
    /// Automatic segmentation, no OSD or OCR.
    AutoOnly,
    /// Fully automatic segmentation (engine default).
    Auto,
    /// Single column of text of variable sizes.
    SingleColumn,
    /// Single uniform block of vertically aligned text.
    SingleBlockVertText,
    /// Single uniform block of text.
    SingleBlock,
    /// Single text line.
    SingleLine,
    /// Single word.
    SingleWord,
    /// Single word in a circle.
    CircleWord,
    /// Single character.
    SingleChar,
    /// Sparse text in no particular order.
    SparseText,
    /// Sparse text with orientation and script detection.
    SparseTextOsd,
    /// Raw line, bypassing segmentation hacks.
    RawLine,
}

impl PageSegMode {
    /// Numeric code as understood by the engine.
    pub fn code(self) -> u8 {
        match self {
            PageSegMode::AutoOsd => 1,
            PageSegMode::AutoOnly => 2,
            PageSegMode::Auto => 3,
            PageSegMode::SingleColumn => 4,
            PageSegMode::SingleBlockVertText => 5,
            PageSegMode::SingleBlock => 6,
            PageSegMode::SingleLine => 7,
            PageSegMode::SingleWord => 8,
            PageSegMode::CircleWord => 9,
            PageSegMode::SingleChar => 10,
            PageSegMode::SparseText => 11,
            PageSegMode::SparseTextOsd => 12,
            PageSegMode::RawLine => 13,
        }
    }
}

impl TryFrom<u8> for PageSegMode {
    type Error = ValidationError;

    fn try_from(code: u8) -> Result<Self, Self::Error> {
        match code {
            1 => Ok(PageSegMode::AutoOsd),
            2 => Ok(PageSegMode::AutoOnly),
            3 => Ok(PageSegMode::Auto),
            4 => Ok(PageSegMode::SingleColumn),
            5 => Ok(PageSegMode::SingleBlockVertText),
            6 => Ok(PageSegMode::SingleBlock),
            7 => Ok(PageSegMode::SingleLine),
            8 => Ok(PageSegMode::SingleWord),
            9 => Ok(PageSegMode::CircleWord),
            10 => Ok(PageSegMode::SingleChar),
            11 => Ok(PageSegMode::SparseText),
            12 => Ok(PageSegMode::SparseTextOsd),
            13 => Ok(PageSegMode::RawLine),
            other => Err(ValidationError::InvalidRetryParam {
                field: "psm".to_string(),
                reason: format!("{other} is not a valid page segmentation mode (1-13)"),
            }),
        }
    }
}

impl From<PageSegMode> for u8 {
    fn from(mode: PageSegMode) -> u8 {
        mode.code()
    }
}

/// OCR engine mode, serialized as its numeric code.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "u8", into = "u8")]
pub enum EngineMode {
    /// Legacy engine only.
    Legacy,
    /// Neural-net LSTM engine only.
    Lstm,
    /// Legacy + LSTM combined.
    Combined,
    /// Whatever the installed engine defaults to.
    Default,
}

impl EngineMode {
    /// Numeric code as understood by the engine.
    pub fn code(self) -> u8 {
        match self {
            EngineMode::Legacy => 0,
            EngineMode::Lstm => 1,
            EngineMode::Combined => 2,
            EngineMode::Default => 3,
        }
    }
}

impl TryFrom<u8> for EngineMode {
    type Error = ValidationError;

    fn try_from(code: u8) -> Result<Self, Self::Error> {
        match code {
            0 => Ok(EngineMode::Legacy),
            1 => Ok(EngineMode::Lstm),
            2 => Ok(EngineMode::Combined),
            3 => Ok(EngineMode::Default),
            other => Err(ValidationError::InvalidRetryParam {
                field: "oem".to_string(),
                reason: format!("{other} is not a valid engine mode (0-3)"),
            }),
        }
    }
}

impl From<EngineMode> for u8 {
    fn from(mode: EngineMode) -> u8 {
        mode.code()
    }
}

/// Runtime parameters for one recognition call.
///
/// Unset fields fall through to the next layer: region-specific overrides
/// take precedence over call-level overrides, which take precedence over the
/// pipeline defaults.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct EngineParams {
    /// Page segmentation mode.
    #[serde(rename = "psm", skip_serializing_if = "Option::is_none")]
    pub page_seg_mode: Option<PageSegMode>,
    /// OCR engine mode.
    #[serde(rename = "oem", skip_serializing_if = "Option::is_none")]
    pub engine_mode: Option<EngineMode>,
    /// Restrict recognition to these characters.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub whitelist: Option<String>,
    /// Exclude these characters from recognition.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub blacklist: Option<String>,
    /// Bias classification toward digits.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub numeric_mode: Option<bool>,
    /// Keep original spacing between words.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub preserve_interword_spaces: Option<bool>,
}

/// General character whitelist for Spanish shipping labels: letters with
/// accents, digits, and the punctuation that appears on label fields.
pub const LABEL_WHITELIST: &str =
    "ABCDEFGHIJKLMNOPQRSTUVWXYZabcdefghijklmnopqrstuvwxyz0123456789ÁÉÍÓÚáéíóúÑñ .,:-/";

/// Whitelist for purely numeric identifier fields.
pub const NUMERIC_WHITELIST: &str = "0123456789-";

impl EngineParams {
    /// Baseline parameters for whole-label recognition.
    pub fn label_defaults() -> Self {
        Self {
            page_seg_mode: Some(PageSegMode::Auto),
            engine_mode: None,
            whitelist: Some(LABEL_WHITELIST.to_string()),
            blacklist: None,
            numeric_mode: Some(false),
            preserve_interword_spaces: Some(true),
        }
    }

    /// Overlay `over` on top of `self`: any field set in `over` wins.
    pub fn overlay(&self, over: &EngineParams) -> EngineParams {
        EngineParams {
            page_seg_mode: over.page_seg_mode.or(self.page_seg_mode),
            engine_mode: over.engine_mode.or(self.engine_mode),
            whitelist: over.whitelist.clone().or_else(|| self.whitelist.clone()),
            blacklist: over.blacklist.clone().or_else(|| self.blacklist.clone()),
            numeric_mode: over.numeric_mode.or(self.numeric_mode),
            preserve_interword_spaces: over
                .preserve_interword_spaces
                .or(self.preserve_interword_spaces),
        }
    }
}
