//! Deferred, exactly-once construction of shared collaborators.
//!
//! # Responsibilities
//! - Hold a factory for an expensive object (tracer client, metrics registry)
//! - Run the factory on first access, never twice concurrently
//! - Surface factory failures to the caller and retry on a later access
//!
//! # Design Decisions
//! - Fast path is a lock-free `ArcSwapOption` load
//! - Slow path takes a mutex and re-checks before constructing (double-checked)
//! - A failed construction leaves the slot empty; nothing poisoned is cached
//! - With a retry backoff, the last failure is replayed until the window
//!   elapses, so a failing factory runs at most once per window

use arc_swap::ArcSwapOption;
use std::fmt;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::{Duration, Instant};

type Factory<T, E> = Box<dyn Fn() -> Result<T, E> + Send + Sync>;

struct Failure<E> {
    at: Instant,
    error: E,
}

/// Lazily constructed singleton.
pub struct LazySingleton<T, E> {
    slot: ArcSwapOption<T>,
    last_failure: Mutex<Option<Failure<E>>>,
    retry_backoff: Duration,
    factory: Factory<T, E>,
}

impl<T, E> LazySingleton<T, E> {
    /// Create an empty singleton that will build its value with `factory`.
    pub fn new<F>(factory: F) -> Self
    where
        F: Fn() -> Result<T, E> + Send + Sync + 'static,
    {
        Self {
            slot: ArcSwapOption::empty(),
            last_failure: Mutex::new(None),
            retry_backoff: Duration::ZERO,
            factory: Box::new(factory),
        }
    }

    /// After a failure, return that failure without calling the factory
    /// until `backoff` has elapsed.
    pub fn with_retry_backoff(mut self, backoff: Duration) -> Self {
        self.retry_backoff = backoff;
        self
    }

    /// Return the instance only if it has already been constructed.
    pub fn get_if_initialized(&self) -> Option<Arc<T>> {
        self.slot.load_full()
    }

    pub fn is_initialized(&self) -> bool {
        self.slot.load().is_some()
    }

    /// Remove the cached instance and hand it back.
    ///
    /// Used at process exit. A later `get` runs the factory again.
    pub fn take(&self) -> Option<Arc<T>> {
        let mut last_failure = self.lock_failure();
        *last_failure = None;
        self.slot.swap(None)
    }

    // The guarded section holds no invariant that a panic could break.
    fn lock_failure(&self) -> std::sync::MutexGuard<'_, Option<Failure<E>>> {
        self.last_failure
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }
}

impl<T, E: Clone> LazySingleton<T, E> {
    /// Get the instance, constructing it on first use.
    pub fn get(&self) -> Result<Arc<T>, E> {
        if let Some(value) = self.slot.load_full() {
            return Ok(value);
        }

        let mut last_failure = self.lock_failure();

        if let Some(value) = self.slot.load_full() {
            return Ok(value);
        }
        if let Some(failure) = last_failure.as_ref() {
            if failure.at.elapsed() < self.retry_backoff {
                return Err(failure.error.clone());
            }
        }

        match (self.factory)() {
            Ok(value) => {
                let value = Arc::new(value);
                self.slot.store(Some(value.clone()));
                *last_failure = None;
                Ok(value)
            }
            Err(error) => {
                *last_failure = Some(Failure {
                    at: Instant::now(),
                    error: error.clone(),
                });
                Err(error)
            }
        }
    }
}

impl<T, E> fmt::Debug for LazySingleton<T, E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LazySingleton")
            .field("initialized", &self.is_initialized())
            .field("retry_backoff", &self.retry_backoff)
            .finish()
    }
}
