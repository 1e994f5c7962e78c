//! Monotonic identifier generator for definition ids.

use std::sync::atomic::{AtomicU64, Ordering};

/// Issues process-unique, strictly increasing ids. Id `0` is never issued;
/// it marks top-level definitions' parent.
#[derive(Debug)]
pub struct IdGenerator {
    next: AtomicU64,
}

impl IdGenerator {
    /// Create a generator whose first id is `1`.
    pub fn new() -> Self {
        Self::starting_at(1)
    }

    /// Create a generator whose first id is `first` (clamped to at least `1`).
    pub fn starting_at(first: u64) -> Self {
        Self {
            next: AtomicU64::new(first.max(1)),
        }
    }

    /// Allocate the next id.
    pub fn next(&self) -> u64 {
        self.next.fetch_add(1, Ordering::SeqCst)
    }
}

impl Default for IdGenerator {
    fn default() -> Self {
        Self::new()
    }
}
