//! Scripted fake engine for unit tests
//!
//! Implements the engine capability traits without any OCR backend so the
//! pool, batch orchestrator, and retry engine can be exercised
//! deterministically. Image bytes beginning with the `FAIL` marker make the
//! recognition call fail, which lets a test pick failing files regardless of
//! scheduling order.

use parking_lot::Mutex;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use super::{EngineParams, EngineProvider, Recognition, TextEngine};
use crate::error::EngineError;

/// Marker prefix that makes [`FakeEngine::recognize`] fail.
pub const FAIL_MARKER: &[u8] = b"FAIL";

/// Shared created/terminated counters for pool lifecycle assertions.
#[derive(Clone, Default)]
pub struct SharedCounters {
    inner: Arc<Counters>,
}

#[derive(Default)]
struct Counters {
    created: AtomicUsize,
    terminated: AtomicUsize,
}

impl SharedCounters {
    pub fn created(&self) -> usize {
        self.inner.created.load(Ordering::SeqCst)
    }

    pub fn terminated(&self) -> usize {
        self.inner.terminated.load(Ordering::SeqCst)
    }

    fn note_created(&self) {
        self.inner.created.fetch_add(1, Ordering::SeqCst);
    }

    fn note_terminated(&self) {
        self.inner.terminated.fetch_add(1, Ordering::SeqCst);
    }
}

/// Provider producing [`FakeEngine`] instances.
///
/// A script of `(text, confidence)` outputs can be queued; instances share
/// the queue and fall back to the default output once it drains.
pub struct FakeProvider {
    default_text: String,
    default_confidence: f32,
    script: Arc<Mutex<VecDeque<(String, f32)>>>,
    counters: Option<SharedCounters>,
    fail_create: bool,
    fail_terminate: bool,
}

impl FakeProvider {
    pub fn new(text: impl Into<String>, confidence: f32) -> Self {
        Self {
            default_text: text.into(),
            default_confidence: confidence,
            script: Arc::new(Mutex::new(VecDeque::new())),
            counters: None,
            fail_create: false,
            fail_terminate: false,
        }
    }

    pub fn with_counters(mut self, counters: SharedCounters) -> Self {
        self.counters = Some(counters);
        self
    }

    /// Queue outputs consumed in order by subsequent recognize calls.
    pub fn with_script(self, outputs: Vec<(&str, f32)>) -> Self {
        {
            let mut script = self.script.lock();
            for (text, confidence) in outputs {
                script.push_back((text.to_string(), confidence));
            }
        }
        self
    }

    pub fn failing_create(mut self) -> Self {
        self.fail_create = true;
        self
    }

    pub fn failing_terminate(mut self) -> Self {
        self.fail_terminate = true;
        self
    }
}

impl EngineProvider for FakeProvider {
    fn create(&self, language: &str) -> Result<Box<dyn TextEngine>, EngineError> {
        if self.fail_create {
            return Err(EngineError::Create(format!(
                "no model available for '{language}'"
            )));
        }
        if let Some(counters) = &self.counters {
            counters.note_created();
        }
        Ok(Box::new(FakeEngine {
            default_text: self.default_text.clone(),
            default_confidence: self.default_confidence,
            script: Arc::clone(&self.script),
            counters: self.counters.clone(),
            fail_terminate: self.fail_terminate,
            last_params: None,
        }))
    }
}

/// Fake engine instance. Records the parameters last applied to it.
pub struct FakeEngine {
    default_text: String,
    default_confidence: f32,
    script: Arc<Mutex<VecDeque<(String, f32)>>>,
    counters: Option<SharedCounters>,
    fail_terminate: bool,
    pub last_params: Option<EngineParams>,
}

impl TextEngine for FakeEngine {
    fn apply_params(&mut self, params: &EngineParams) -> Result<(), EngineError> {
        self.last_params = Some(params.clone());
        Ok(())
    }

    fn recognize(&mut self, image: &[u8]) -> Result<Recognition, EngineError> {
        if image.starts_with(FAIL_MARKER) {
            return Err(EngineError::Recognize("scripted failure".to_string()));
        }
        let (text, confidence) = self
            .script
            .lock()
            .pop_front()
            .unwrap_or_else(|| (self.default_text.clone(), self.default_confidence));
        Ok(Recognition { text, confidence })
    }

    fn terminate(&mut self) -> Result<(), EngineError> {
        if self.fail_terminate {
            return Err(EngineError::Terminate("scripted failure".to_string()));
        }
        if let Some(counters) = &self.counters {
            counters.note_terminated();
        }
        Ok(())
    }
}
