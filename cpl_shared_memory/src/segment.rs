//! Shared memory segment structures and operations

use crate::error::{ShmError, ShmResult};
use crate::version::VersionCounter;
use cpl_common::shm::consts::{CACHE_LINE_SIZE, CPL_SHM_MAGIC, SHM_MAX_SIZE, SHM_MIN_SIZE};
use memmap2::MmapMut;
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicU32, AtomicU64, Ordering};
use std::time::{SystemTime, UNIX_EPOCH};

/// Segment header with cache-line alignment
#[repr(C, align(64))]
pub struct SegmentHeader {
    /// Magic number for validation
    pub magic: u64,
    /// Version counter for optimistic concurrency
    pub version: AtomicU64,
    /// Writer process ID
    pub writer_pid: AtomicU32,
    /// Active reader count
    pub reader_count: AtomicU32,
    /// Data section size
    pub size: u64,
    /// Creation timestamp (ns since the Unix epoch)
    pub created_ts: u64,
    /// Last write timestamp
    pub last_write_ts: AtomicU64,
    _padding: [u8; 72],
}

impl SegmentHeader {
    /// Create new segment header
    pub fn new(size: usize, writer_pid: u32) -> Self {
        let now = unix_nanos();

        Self {
            magic: CPL_SHM_MAGIC,
            version: AtomicU64::new(0),
            writer_pid: AtomicU32::new(writer_pid),
            reader_count: AtomicU32::new(0),
            size: size as u64,
            created_ts: now,
            last_write_ts: AtomicU64::new(now),
            _padding: [0; 72],
        }
    }

    /// Validate header magic
    pub fn validate(&self, name: &str) -> ShmResult<()> {
        if self.magic != CPL_SHM_MAGIC {
            return Err(ShmError::InvalidHeader {
                name: name.to_string(),
            });
        }
        Ok(())
    }

    /// Version counter view
    pub fn version_counter(&self) -> VersionCounter<'_> {
        VersionCounter::new(&self.version)
    }

    /// Increment reader count
    pub fn add_reader(&self) -> u32 {
        self.reader_count.fetch_add(1, Ordering::AcqRel)
    }

    /// Decrement reader count
    pub fn remove_reader(&self) -> u32 {
        self.reader_count.fetch_sub(1, Ordering::AcqRel)
    }

    /// Get current reader count
    pub fn get_reader_count(&self) -> u32 {
        self.reader_count.load(Ordering::Acquire)
    }
}

/// Discovery record written next to every segment as `<segment>.meta`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SegmentInfo {
    /// Segment name (without prefix or pid suffix)
    pub name: String,
    /// Data section size in bytes
    pub size: usize,
    /// Writer process ID
    pub writer_pid: u32,
    /// Creation time
    pub created_at: SystemTime,
}

/// Core shared memory segment representation
pub struct SharedMemorySegment {
    /// Segment name
    pub name: String,
    /// Total mapped size (including header)
    pub total_size: usize,
    /// Data section size
    pub data_size: usize,
    mmap: MmapMut,
}

impl SharedMemorySegment {
    /// Wrap a mapping whose header has already been initialised.
    pub fn new(name: String, data_size: usize, mmap: MmapMut) -> ShmResult<Self> {
        validate_segment_size(data_size)?;
        validate_memory_alignment(mmap.as_ptr() as usize)?;

        let total_size = data_size + std::mem::size_of::<SegmentHeader>();
        if mmap.len() < total_size {
            return Err(ShmError::InvalidSize { size: mmap.len() });
        }

        Ok(Self {
            name,
            total_size,
            data_size,
            mmap,
        })
    }

    /// Get header reference
    pub fn header(&self) -> &SegmentHeader {
        // SAFETY: the mapping is at least header-sized and 64-byte aligned
        // (checked in `new`); header fields mutated after creation are atomics.
        unsafe { &*(self.mmap.as_ptr() as *const SegmentHeader) }
    }

    /// Get data section pointer
    pub fn data_ptr(&self) -> *const u8 {
        // SAFETY: header size is within the mapping.
        unsafe { self.mmap.as_ptr().add(std::mem::size_of::<SegmentHeader>()) }
    }

    /// Get mutable data section pointer (writer only)
    pub fn data_ptr_mut(&mut self) -> *mut u8 {
        // SAFETY: header size is within the mapping.
        unsafe {
            self.mmap
                .as_mut_ptr()
                .add(std::mem::size_of::<SegmentHeader>())
        }
    }
}

/// Nanoseconds since the Unix epoch, zero if the clock is before it.
pub(crate) fn unix_nanos() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_nanos() as u64)
        .unwrap_or(0)
}

/// Validate segment size constraints
pub fn validate_segment_size(size: usize) -> ShmResult<()> {
    if !(SHM_MIN_SIZE..=SHM_MAX_SIZE).contains(&size) || size % SHM_MIN_SIZE != 0 {
        return Err(ShmError::InvalidSize { size });
    }
    Ok(())
}

/// Validate memory alignment
pub fn validate_memory_alignment(address: usize) -> ShmResult<()> {
    if address % CACHE_LINE_SIZE != 0 {
        return Err(ShmError::AlignmentError {
            address,
            alignment: CACHE_LINE_SIZE,
        });
    }
    Ok(())
}
