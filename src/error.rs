//! Error types for the label OCR pipeline
//!
//! Errors local to one unit of work (one image, one field) are contained at
//! that unit's boundary and reported as data; only request-level validation,
//! engine acquisition, and timeouts propagate as `Err` values.

use std::time::Duration;
use thiserror::Error;

/// Errors raised by an OCR engine adapter.
#[derive(Debug, Error)]
pub enum EngineError {
    /// Creating a new engine instance failed (model/language load).
    #[error("failed to create engine instance: {0}")]
    Create(String),
    /// Applying runtime parameters to an instance failed.
    #[error("failed to apply engine parameters: {0}")]
    Parameters(String),
    /// The recognition call itself failed.
    #[error("recognition failed: {0}")]
    Recognize(String),
    /// Terminating an instance failed. Always treated as best-effort by the
    /// pool; never propagated past it.
    #[error("failed to terminate engine instance: {0}")]
    Terminate(String),
}

/// Structured request validation failures. These are surfaced before any
/// engine work happens.
#[derive(Debug, Error, PartialEq)]
pub enum ValidationError {
    /// The file's MIME type is not in the allowed set.
    #[error("unsupported media type '{mime_type}' for {filename}")]
    UnsupportedMediaType {
        filename: String,
        mime_type: String,
    },
    /// The file exceeds the configured size limit.
    #[error("{filename} is {size} bytes, exceeding the {max_size} byte limit")]
    FileTooLarge {
        filename: String,
        size: u64,
        max_size: u64,
    },
    /// More files than the per-batch limit.
    #[error("batch of {count} files exceeds the limit of {max_files}")]
    TooManyFiles { count: usize, max_files: usize },
    /// A retry parameter is out of its valid range.
    #[error("invalid retry parameter '{field}': {reason}")]
    InvalidRetryParam { field: String, reason: String },
}

/// Top-level pipeline errors.
#[derive(Debug, Error)]
pub enum OcrError {
    /// Request rejected before reaching the engine.
    #[error("validation failed: {0}")]
    Validation(#[from] ValidationError),

    /// Recognition failed for one image, annotated with the originating
    /// filename. In a batch this is captured per file, not propagated.
    #[error("error processing {filename}: {source}")]
    Recognition {
        filename: String,
        #[source]
        source: EngineError,
    },

    /// Reading source image bytes failed.
    #[error("error reading {filename}: {source}")]
    Read {
        filename: String,
        #[source]
        source: std::io::Error,
    },

    /// The overall request deadline expired. In-flight work is abandoned.
    #[error("request timed out after {0:?}")]
    Timeout(Duration),

    /// Engine-level failure outside the per-image path (e.g. instance
    /// creation during acquire).
    #[error(transparent)]
    Engine(#[from] EngineError),
}
