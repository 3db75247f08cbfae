//! Bounded pool of reusable engine instances
//!
//! Instance creation is expensive, so released instances are kept on an idle
//! list for reuse. The pool never makes callers wait: an empty idle list
//! means a fresh instance is created, letting the live instance count grow
//! transiently past the idle bound under concurrent load. The caller's own
//! concurrency ceiling is what limits peak engine usage.

use parking_lot::Mutex;
use std::sync::Arc;
use tracing::{debug, warn};

use super::{EngineProvider, TextEngine};
use crate::error::EngineError;

/// Pool of idle engine instances for one language.
///
/// Only the idle list is shared mutable state; the lock covers check-out and
/// check-in, never the recognition call itself. Checked-out instances are
/// not tracked - callers must hand them back via [`EnginePool::release`].
pub struct EnginePool {
    provider: Arc<dyn EngineProvider>,
    language: String,
    idle: Mutex<Vec<Box<dyn TextEngine>>>,
    max_idle: usize,
}

impl EnginePool {
    /// Create a pool that builds instances from `provider` for `language`,
    /// keeping at most `max_idle` idle instances alive.
    pub fn new(provider: Arc<dyn EngineProvider>, language: impl Into<String>, max_idle: usize) -> Self {
        Self {
            provider,
            language: language.into(),
            idle: Mutex::new(Vec::new()),
            max_idle,
        }
    }

    /// Hand out an engine instance, reusing an idle one when available.
    ///
    /// Never blocks waiting for a release; creation failure propagates to
    /// the caller.
    pub fn acquire(&self) -> Result<Box<dyn TextEngine>, EngineError> {
        if let Some(engine) = self.idle.lock().pop() {
            debug!("reusing idle engine instance");
            return Ok(engine);
        }

        debug!(language = %self.language, "creating new engine instance");
        self.provider.create(&self.language)
    }

    /// Return an instance to the pool, terminating it if the idle list is
    /// already at capacity.
    pub fn release(&self, mut engine: Box<dyn TextEngine>) {
        {
            let mut idle = self.idle.lock();
            if idle.len() < self.max_idle {
                idle.push(engine);
                return;
            }
        }

        // Pool full: terminate outside the lock.
        if let Err(e) = engine.terminate() {
            warn!("failed to terminate surplus engine instance: {e}");
        }
    }

    /// Number of idle instances currently held.
    pub fn idle_count(&self) -> usize {
        self.idle.lock().len()
    }

    /// Terminate all idle instances and clear the pool.
    ///
    /// Best-effort: a termination failure is logged and the sweep continues
    /// with the remaining instances.
    pub fn shutdown(&self) {
        let drained: Vec<_> = {
            let mut idle = self.idle.lock();
            idle.drain(..).collect()
        };

        let count = drained.len();
        for mut engine in drained {
            if let Err(e) = engine.terminate() {
                warn!("failed to terminate pooled engine instance: {e}");
            }
        }
        debug!("engine pool shut down, {count} idle instances terminated");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::testing::{FakeProvider, SharedCounters};

    fn pool_with_counters(max_idle: usize) -> (EnginePool, SharedCounters) {
        let counters = SharedCounters::default();
        let provider = Arc::new(FakeProvider::new("ok", 90.0).with_counters(counters.clone()));
        (EnginePool::new(provider, "spa", max_idle), counters)
    }

    #[test]
    fn test_acquire_creates_when_empty() {
        let (pool, counters) = pool_with_counters(2);
        let engine = pool.acquire().unwrap();
        assert_eq!(counters.created(), 1);
        pool.release(engine);
    }

    #[test]
    fn test_release_reuses_idle_instance() {
        let (pool, counters) = pool_with_counters(2);
        let engine = pool.acquire().unwrap();
        pool.release(engine);
        assert_eq!(pool.idle_count(), 1);

        let _engine = pool.acquire().unwrap();
        // Second acquire should reuse, not create
        assert_eq!(counters.created(), 1);
        assert_eq!(pool.idle_count(), 0);
    }

    #[test]
    fn test_idle_count_never_exceeds_max() {
        let (pool, counters) = pool_with_counters(2);

        // Check out more instances than the idle bound allows
        let engines: Vec<_> = (0..5).map(|_| pool.acquire().unwrap()).collect();
        assert_eq!(counters.created(), 5);

        for engine in engines {
            pool.release(engine);
            assert!(pool.idle_count() <= 2);
        }

        // Three surplus instances were terminated on release
        assert_eq!(pool.idle_count(), 2);
        assert_eq!(counters.terminated(), 3);
    }

    #[test]
    fn test_shutdown_terminates_all_idle() {
        let (pool, counters) = pool_with_counters(2);
        let a = pool.acquire().unwrap();
        let b = pool.acquire().unwrap();
        pool.release(a);
        pool.release(b);

        pool.shutdown();
        assert_eq!(pool.idle_count(), 0);
        assert_eq!(counters.terminated(), 2);
    }

    #[test]
    fn test_shutdown_survives_termination_failure() {
        let counters = SharedCounters::default();
        let provider = Arc::new(
            FakeProvider::new("ok", 90.0)
                .with_counters(counters.clone())
                .failing_terminate(),
        );
        let pool = EnginePool::new(provider, "spa", 2);

        let a = pool.acquire().unwrap();
        let b = pool.acquire().unwrap();
        pool.release(a);
        pool.release(b);

        // Both terminations fail; the sweep must still clear the pool
        pool.shutdown();
        assert_eq!(pool.idle_count(), 0);
    }
}
