use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

/// Source of unit-of-work sequence numbers.
///
/// Clones share one counter, so a store hands a clone to every component
/// that opens units of work. Numbers start at 1.
#[derive(Clone, Debug)]
pub struct SequenceService {
    next: Arc<AtomicU64>,
}

impl SequenceService {
    pub fn new() -> Self {
        Self {
            next: Arc::new(AtomicU64::new(1)),
        }
    }

    /// Take the next sequence number.
    pub fn next(&self) -> u64 {
        self.next.fetch_add(1, Ordering::Relaxed)
    }

    /// The number the next call to [`next`](Self::next) will return.
    pub fn peek(&self) -> u64 {
        self.next.load(Ordering::Relaxed)
    }

    /// Restart numbering at 1. Only test harnesses should call this.
    pub fn reset(&self) {
        self.next.store(1, Ordering::Relaxed);
    }
}

impl Default for SequenceService {
    fn default() -> Self {
        Self::new()
    }
}
