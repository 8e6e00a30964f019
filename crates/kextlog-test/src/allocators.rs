//! Allocators that count or refuse buffer requests.

use std::sync::atomic::{AtomicUsize, Ordering};

use kextlog_audit::BufferAllocator;
use parking_lot::Mutex;

/// Allocator that always succeeds and remembers every requested size.
#[derive(Debug, Default)]
pub struct CountingAllocator {
    requests: Mutex<Vec<usize>>,
}

impl CountingAllocator {
    /// Creates the allocator.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Sizes requested so far, in order.
    #[must_use]
    pub fn requests(&self) -> Vec<usize> {
        self.requests.lock().clone()
    }
}

impl BufferAllocator for CountingAllocator {
    fn allocate(&self, len: usize) -> Option<Vec<u8>> {
        self.requests.lock().push(len);
        Some(vec![0; len])
    }
}

/// Allocator that grants a fixed number of requests, then refuses the rest.
#[derive(Debug)]
pub struct FailingAllocator {
    remaining: AtomicUsize,
    refused: AtomicUsize,
}

impl FailingAllocator {
    /// Refuses every request.
    #[must_use]
    pub const fn always() -> Self {
        Self::after(0)
    }

    /// Grants the first `grants` requests.
    #[must_use]
    pub const fn after(grants: usize) -> Self {
        Self {
            remaining: AtomicUsize::new(grants),
            refused: AtomicUsize::new(0),
        }
    }

    /// Number of requests refused so far.
    #[must_use]
    pub fn refused(&self) -> usize {
        self.refused.load(Ordering::Relaxed)
    }
}

impl BufferAllocator for FailingAllocator {
    fn allocate(&self, len: usize) -> Option<Vec<u8>> {
        let granted = self
            .remaining
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |n| n.checked_sub(1))
            .is_ok();
        if granted {
            Some(vec![0; len])
        } else {
            self.refused.fetch_add(1, Ordering::Relaxed);
            None
        }
    }
}
