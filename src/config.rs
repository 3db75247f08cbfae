//! Pipeline configuration
//!
//! Tunables for the OCR pipeline, stored in TOML format. Defaults match the
//! production service settings for Spanish shipping labels.

use anyhow::Result;
use serde::{Deserialize, Serialize};
use std::path::Path;

use crate::pipeline::retry::RetryMode;

/// Pipeline settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    /// Engine language code.
    pub language: String,
    /// Concurrency ceiling for batch recognition.
    pub max_concurrent: usize,
    /// Maximum number of files accepted in one batch.
    pub max_files_per_batch: usize,
    /// Maximum accepted file size in bytes.
    pub max_file_size: u64,
    /// End-to-end deadline for one request, in milliseconds.
    pub request_timeout_ms: u64,
    /// Maximum idle engine instances kept alive by the pool.
    pub pool_max_idle: usize,
    /// Accepted upload MIME types.
    pub allowed_mime_types: Vec<String>,
    /// Default retry mode when the caller does not pick one.
    pub retry_mode: RetryMode,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            language: "spa".to_string(),
            max_concurrent: 2,
            max_files_per_batch: 50,
            max_file_size: 10 * 1024 * 1024,
            request_timeout_ms: 300_000,
            pool_max_idle: 2,
            allowed_mime_types: vec![
                "image/jpeg".to_string(),
                "image/jpg".to_string(),
                "image/png".to_string(),
                "image/webp".to_string(),
                "image/tiff".to_string(),
            ],
            retry_mode: RetryMode::Basic,
        }
    }
}

impl PipelineConfig {
    /// Request deadline as a [`std::time::Duration`].
    pub fn request_timeout(&self) -> std::time::Duration {
        std::time::Duration::from_millis(self.request_timeout_ms)
    }

    /// Whether a MIME type is accepted for recognition.
    pub fn accepts_mime_type(&self, mime_type: &str) -> bool {
        let mime_type = mime_type.to_lowercase();
        self.allowed_mime_types.iter().any(|m| m == &mime_type)
    }
}

/// Load configuration from file
pub fn load_config(path: &Path) -> Result<PipelineConfig> {
    let content = std::fs::read_to_string(path)?;
    let config: PipelineConfig = toml::from_str(&content)?;
    Ok(config)
}

/// Save configuration to file
pub fn save_config(config: &PipelineConfig, path: &Path) -> Result<()> {
    let content = toml::to_string_pretty(config)?;
    std::fs::write(path, content)?;
    Ok(())
}
