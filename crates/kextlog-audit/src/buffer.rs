//! Fallible buffer allocation seam.

use std::fmt::Debug;

/// Source of per-record and per-path scratch buffers.
///
/// Allocation may fail; callers degrade instead of aborting.
pub trait BufferAllocator: Send + Sync + Debug {
    /// Returns a zeroed buffer of exactly `len` bytes, or `None` if the memory
    /// is not available.
    fn allocate(&self, len: usize) -> Option<Vec<u8>>;
}

/// [`BufferAllocator`] backed by the global allocator via `try_reserve_exact`.
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemAllocator;

impl SystemAllocator {
    /// Creates the allocator.
    #[must_use]
    pub const fn new() -> Self {
        Self
    }
}

impl BufferAllocator for SystemAllocator {
    fn allocate(&self, len: usize) -> Option<Vec<u8>> {
        let mut buf = Vec::new();
        buf.try_reserve_exact(len).ok()?;
        buf.resize(len, 0);
        Some(buf)
    }
}
