//! Tesseract engine adapter
//!
//! Maps the engine capability traits onto the `tesseract` crate. Each
//! adapter instance owns one native Tesseract handle, loaded for a single
//! language. The engine mode is fixed at handle creation, so changing it
//! through [`EngineParams`] re-initializes the handle.

use tesseract::{OcrEngineMode, PageSegMode as TessPageSegMode, Tesseract};
use tracing::debug;

use super::{EngineMode, EngineParams, EngineProvider, PageSegMode, Recognition, TextEngine};
use crate::error::EngineError;

/// Provider creating native Tesseract instances.
#[derive(Debug, Default)]
pub struct TesseractProvider;

impl EngineProvider for TesseractProvider {
    fn create(&self, language: &str) -> Result<Box<dyn TextEngine>, EngineError> {
        debug!("initializing tesseract for language '{language}'");
        let inner = init_handle(language, EngineMode::Default)?;
        Ok(Box::new(TesseractEngine {
            inner: Some(inner),
            language: language.to_string(),
            engine_mode: EngineMode::Default,
        }))
    }
}

/// One native Tesseract handle.
///
/// The `tesseract` crate's builder-style API consumes the handle on several
/// calls, so it lives in an `Option` and is threaded through each operation.
pub struct TesseractEngine {
    inner: Option<Tesseract>,
    language: String,
    engine_mode: EngineMode,
}

impl TextEngine for TesseractEngine {
    fn apply_params(&mut self, params: &EngineParams) -> Result<(), EngineError> {
        if let Some(mode) = params.engine_mode {
            if mode != self.engine_mode {
                self.inner = Some(init_handle(&self.language, mode)?);
                self.engine_mode = mode;
            }
        }

        let mut handle = self.take_handle(EngineError::Parameters)?;

        if let Some(psm) = params.page_seg_mode {
            handle.set_page_seg_mode(map_page_seg_mode(psm));
        }
        if let Some(whitelist) = &params.whitelist {
            handle = set_variable(handle, "tessedit_char_whitelist", whitelist)?;
        }
        if let Some(blacklist) = &params.blacklist {
            handle = set_variable(handle, "tessedit_char_blacklist", blacklist)?;
        }
        if let Some(numeric) = params.numeric_mode {
            handle = set_variable(handle, "classify_bln_numeric_mode", flag(numeric))?;
        }
        if let Some(preserve) = params.preserve_interword_spaces {
            handle = set_variable(handle, "preserve_interword_spaces", flag(preserve))?;
        }

        self.inner = Some(handle);
        Ok(())
    }

    fn recognize(&mut self, image: &[u8]) -> Result<Recognition, EngineError> {
        let handle = self.take_handle(EngineError::Recognize)?;

        let mut handle = match handle.set_image_from_mem(image) {
            Ok(handle) => handle,
            Err(e) => {
                // The handle was consumed; rebuild it so the instance stays
                // usable after it goes back to the pool.
                self.inner = init_handle(&self.language, self.engine_mode).ok();
                return Err(EngineError::Recognize(e.to_string()));
            }
        };

        let text = match handle.get_text() {
            Ok(text) => text,
            Err(e) => {
                self.inner = init_handle(&self.language, self.engine_mode).ok();
                return Err(EngineError::Recognize(e.to_string()));
            }
        };
        let confidence = handle.mean_text_conf() as f32;

        self.inner = Some(handle);
        Ok(Recognition { text, confidence })
    }

    fn terminate(&mut self) -> Result<(), EngineError> {
        // Dropping the handle frees the native resources
        self.inner = None;
        Ok(())
    }
}

impl TesseractEngine {
    fn take_handle(
        &mut self,
        wrap: fn(String) -> EngineError,
    ) -> Result<Tesseract, EngineError> {
        self.inner
            .take()
            .ok_or_else(|| wrap("engine instance already terminated".to_string()))
    }
}

fn init_handle(language: &str, mode: EngineMode) -> Result<Tesseract, EngineError> {
    Tesseract::new_with_oem(None, Some(language), map_engine_mode(mode))
        .map_err(|e| EngineError::Create(e.to_string()))
}

fn set_variable(handle: Tesseract, name: &str, value: &str) -> Result<Tesseract, EngineError> {
    handle
        .set_variable(name, value)
        .map_err(|e| EngineError::Parameters(format!("{name}: {e}")))
}

fn flag(value: bool) -> &'static str {
    if value {
        "1"
    } else {
        "0"
    }
}

fn map_page_seg_mode(mode: PageSegMode) -> TessPageSegMode {
    match mode {
        PageSegMode::AutoOsd => TessPageSegMode::PsmAutoOsd,
        PageSegMode::AutoOnly => TessPageSegMode::PsmAutoOnly,
        PageSegMode::Auto => TessPageSegMode::PsmAuto,
        PageSegMode::SingleColumn => TessPageSegMode::PsmSingleColumn,
        PageSegMode::SingleBlockVertText => TessPageSegMode::PsmSingleBlockVertText,
        PageSegMode::SingleBlock => TessPageSegMode::PsmSingleBlock,
        PageSegMode::SingleLine => TessPageSegMode::PsmSingleLine,
        PageSegMode::SingleWord => TessPageSegMode::PsmSingleWord,
        PageSegMode::CircleWord => TessPageSegMode::PsmCircleWord,
        PageSegMode::SingleChar => TessPageSegMode::PsmSingleChar,
        PageSegMode::SparseText => TessPageSegMode::PsmSparseText,
        PageSegMode::SparseTextOsd => TessPageSegMode::PsmSparseTextOsd,
        PageSegMode::RawLine => TessPageSegMode::PsmRawLine,
    }
}

fn map_engine_mode(mode: EngineMode) -> OcrEngineMode {
    match mode {
        EngineMode::Legacy => OcrEngineMode::TesseractOnly,
        EngineMode::Lstm => OcrEngineMode::LstmOnly,
        EngineMode::Combined => OcrEngineMode::TesseractLstmCombined,
        EngineMode::Default => OcrEngineMode::Default,
    }
}
