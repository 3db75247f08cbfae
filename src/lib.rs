//! labelscan - shipping-label OCR pipeline
//!
//! Turns scanned shipping-label images into structured shipment data. The
//! pipeline bounds engine concurrency through a reusable instance pool,
//! preprocesses label photos, normalizes the recognized text, validates
//! extracted fields against the label formats, and can run a second
//! recognition pass with stronger preprocessing whose result is weighed
//! against the first.
//!
//! The OCR engine itself is an external capability behind the
//! [`engine::TextEngine`] trait; an optional Tesseract adapter is available
//! behind the `tesseract` feature.

pub mod config;
pub mod engine;
pub mod error;
pub mod fields;
pub mod pipeline;
pub mod preprocess;
pub mod roi;
pub mod text;

pub use config::PipelineConfig;
pub use engine::pool::EnginePool;
pub use engine::{EngineParams, EngineProvider};
pub use error::{EngineError, OcrError, ValidationError};
pub use pipeline::retry::{RetryMode, RetryOutcome, RetryParams};
pub use pipeline::{BatchOutcome, InputImage, OcrPipeline, OcrResult};
