//! SHM (Shared Memory) constants.
//!
//! Single source of truth for segment sizing; the segment crate and the
//! shared-memory transport import from here.

/// Minimum segment size in bytes (one page). Segment sizes are multiples
/// of this value.
pub const SHM_MIN_SIZE: usize = 4096;

/// Maximum segment size in bytes (1 GiB).
pub const SHM_MAX_SIZE: usize = 1_073_741_824;

/// CPU cache line size in bytes.
pub const CACHE_LINE_SIZE: usize = 64;

/// Magic number at the start of every segment header: `"CPL_SHM\0"`.
pub const CPL_SHM_MAGIC: u64 = u64::from_le_bytes(*b"CPL_SHM\0");

/// File name prefix of every coupler segment under `/dev/shm`.
pub const SEGMENT_PREFIX: &str = "cpl_";

/// Round `len` up to the next multiple of [`SHM_MIN_SIZE`] (at least one page).
pub const fn page_aligned(len: usize) -> usize {
    if len <= SHM_MIN_SIZE {
        SHM_MIN_SIZE
    } else {
        len.div_ceil(SHM_MIN_SIZE) * SHM_MIN_SIZE
    }
}
