//! Even/odd version protocol over a header's atomic counter.

use std::sync::atomic::{AtomicU64, Ordering};

/// View of a segment's version counter.
///
/// Writers move the version to odd before touching the data section and
/// back to even afterwards. Readers sample the version before and after a
/// copy and retry when the two differ or the first sample was odd.
#[derive(Debug, Clone, Copy)]
pub struct VersionCounter<'a> {
    counter: &'a AtomicU64,
}

impl<'a> VersionCounter<'a> {
    /// Wrap an existing counter.
    pub fn new(counter: &'a AtomicU64) -> Self {
        Self { counter }
    }

    /// Current version with acquire ordering.
    pub fn load(&self) -> u64 {
        self.counter.load(Ordering::Acquire)
    }

    /// Begin write operation - increment to odd version.
    pub fn begin_write(&self) -> u64 {
        self.counter.fetch_add(1, Ordering::AcqRel) + 1
    }

    /// Complete write operation - increment to even version.
    pub fn end_write(&self) -> u64 {
        self.counter.fetch_add(1, Ordering::AcqRel) + 1
    }

    /// Check if version is stable (even)
    pub fn is_stable(version: u64) -> bool {
        version % 2 == 0
    }

    /// Check if version indicates write in progress (odd)
    pub fn is_writing(version: u64) -> bool {
        version % 2 == 1
    }
}
