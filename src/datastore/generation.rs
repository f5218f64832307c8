//! Generation tracking for deferred reclamation
//!
//! The writer bumps the generation at every commit point readers must not
//! observe torn. Readers pin the generation they started in by holding a
//! [`GenerationGuard`]. Anything freed at generation `G` may only be
//! reclaimed once [`GenerationHandler::oldest_used_generation`] is above `G`.
//!
//! ```text
//! writer:  gen 4 ──free X──► gen 5 ──────────► gen 6 ── reclaim(X)?
//! reader A:      [guard@4 ..................]            no, A pins 4
//! reader B:                  [guard@5]                   yes once A drops
//! ```

use parking_lot::Mutex;
use std::collections::BTreeMap;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

/// Monotonically increasing writer commit counter
pub type Generation = u64;

#[derive(Debug, Default)]
struct Inner {
    current: AtomicU64,
    /// Pinned generation -> number of live guards
    pinned: Mutex<BTreeMap<Generation, usize>>,
}

/// Shared handle to the generation state of one store
///
/// Cheap to clone; reader threads keep a clone and call
/// [`take_guard`](Self::take_guard) before capturing entry references.
#[derive(Clone, Default)]
pub struct GenerationHandler {
    inner: Arc<Inner>,
}

impl GenerationHandler {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn current_generation(&self) -> Generation {
        self.inner.current.load(Ordering::Acquire)
    }

    /// Advance the generation. Writer only.
    pub fn increment_generation(&self) -> Generation {
        self.inner.current.fetch_add(1, Ordering::AcqRel) + 1
    }

    /// Pin the current generation for the lifetime of the returned guard
    pub fn take_guard(&self) -> GenerationGuard {
        let mut pinned = self.inner.pinned.lock();
        // Read under the lock so the writer's oldest-used scan sees this pin
        let generation = self.current_generation();
        *pinned.entry(generation).or_insert(0) += 1;
        GenerationGuard {
            inner: Arc::clone(&self.inner),
            generation,
        }
    }

    /// Lowest generation any reader may still observe
    pub fn oldest_used_generation(&self) -> Generation {
        let pinned = self.inner.pinned.lock();
        let current = self.current_generation();
        pinned
            .keys()
            .next()
            .map_or(current, |&oldest| oldest.min(current))
    }

    /// Number of live guards across all generations
    pub fn guard_count(&self) -> usize {
        self.inner.pinned.lock().values().sum()
    }
}

impl fmt::Debug for GenerationHandler {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("GenerationHandler")
            .field("current", &self.current_generation())
            .field("guards", &self.guard_count())
            .finish()
    }
}

/// A reader's pin on one generation; released on drop
pub struct GenerationGuard {
    inner: Arc<Inner>,
    generation: Generation,
}

impl GenerationGuard {
    pub fn generation(&self) -> Generation {
        self.generation
    }
}

impl Clone for GenerationGuard {
    fn clone(&self) -> Self {
        *self.inner.pinned.lock().entry(self.generation).or_insert(0) += 1;
        Self {
            inner: Arc::clone(&self.inner),
            generation: self.generation,
        }
    }
}

impl Drop for GenerationGuard {
    fn drop(&mut self) {
        let mut pinned = self.inner.pinned.lock();
        if let Some(count) = pinned.get_mut(&self.generation) {
            *count -= 1;
            if *count == 0 {
                pinned.remove(&self.generation);
            }
        }
    }
}

impl fmt::Debug for GenerationGuard {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("GenerationGuard")
            .field("generation", &self.generation)
            .finish()
    }
}
