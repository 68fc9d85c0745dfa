//! Lamport logical clock: one per `StorageDocument`.

use std::sync::atomic::{AtomicU64, Ordering};

/// Monotonic logical clock. `tick` advances on every locally-generated op;
/// `merge` folds in a remote clock value so the document never regresses.
#[derive(Debug, Default)]
pub struct LamportClock {
    value: AtomicU64,
}

impl LamportClock {
    pub fn new() -> Self {
        Self {
            value: AtomicU64::new(0),
        }
    }

    /// Advance the clock by one and return the new value. Used to stamp a
    /// locally-generated op; no two local ticks can return the same value.
    pub fn tick(&self) -> u64 {
        self.value.fetch_add(1, Ordering::SeqCst) + 1
    }

    /// Fold in a remote clock value: local becomes `max(local, remote)`.
    /// Does not itself tick — callers that also generate a local op should
    /// call `tick` afterwards.
    pub fn merge(&self, remote: u64) {
        self.value.fetch_max(remote, Ordering::SeqCst);
    }

    pub fn current(&self) -> u64 {
        self.value.load(Ordering::SeqCst)
    }
}
