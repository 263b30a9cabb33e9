//! Lock-free reader implementation

use crate::error::{ShmError, ShmResult};
use crate::lifecycle::{live_writer, segment_path};
use crate::platform::{attach_segment_mmap, get_current_pid, is_process_alive};
use crate::segment::{SegmentHeader, SharedMemorySegment};
use crate::version::VersionCounter;
use std::sync::atomic::{Ordering, fence};

const MAX_READ_RETRIES: usize = 10;

/// Lock-free reader with conflict detection
pub struct SegmentReader {
    segment: SharedMemorySegment,
    last_seen_version: u64,
    read_buffer: Vec<u8>,
    reader_pid: u32,
    writer_pid: u32,
}

impl SegmentReader {
    /// Attach to the segment published by a live writer.
    ///
    /// The writer is located through the segment's discovery record; a
    /// record left by a dead writer is reported as [`ShmError::NotFound`].
    pub fn attach(name: &str) -> ShmResult<Self> {
        let writer_pid = live_writer(name).ok_or_else(|| ShmError::NotFound {
            name: name.to_string(),
        })?;
        let mmap = attach_segment_mmap(&segment_path(name, writer_pid))?;

        if mmap.len() < std::mem::size_of::<SegmentHeader>() {
            return Err(ShmError::InvalidHeader {
                name: name.to_string(),
            });
        }
        // SAFETY: length checked above; mappings are page aligned.
        let header = unsafe { &*(mmap.as_ptr() as *const SegmentHeader) };
        header.validate(name)?;
        let data_size = header.size as usize;

        let segment = SharedMemorySegment::new(name.to_string(), data_size, mmap)?;
        segment.header().add_reader();

        let reader_pid = get_current_pid();

        let initial_version = segment.header().version.load(Ordering::Acquire);

        Ok(Self {
            segment,
            last_seen_version: initial_version,
            read_buffer: Vec::with_capacity(data_size),
            reader_pid,
            writer_pid,
        })
    }

    /// Read the whole data section with conflict detection
    pub fn read(&mut self) -> ShmResult<&[u8]> {
        self.read_range(0, self.segment.data_size)
    }

    /// Read `len` bytes at `offset` as one consistent snapshot
    pub fn read_range(&mut self, offset: usize, len: usize) -> ShmResult<&[u8]> {
        if offset.checked_add(len).is_none_or(|end| end > self.segment.data_size) {
            return Err(ShmError::InvalidSize {
                size: offset.saturating_add(len),
            });
        }

        if self.read_buffer.len() < len {
            self.read_buffer.resize(len, 0);
        }

        let header = self.segment.header();
        let version = header.version_counter();

        for _attempt in 0..MAX_READ_RETRIES {
            let version_before = version.load();
            if !VersionCounter::is_stable(version_before) {
                std::thread::yield_now();
                continue;
            }

            fence(Ordering::Acquire);
            // SAFETY: `offset..offset+len` lies within the data section and
            // the buffer holds at least `len` bytes.
            unsafe {
                let src_ptr = self.segment.data_ptr().add(offset);
                std::ptr::copy_nonoverlapping(src_ptr, self.read_buffer.as_mut_ptr(), len);
            }
            fence(Ordering::Acquire);

            let version_after = version.load();
            if version_before == version_after {
                self.last_seen_version = version_after;
                return Ok(&self.read_buffer[..len]);
            }

            std::thread::yield_now();
        }

        Err(ShmError::VersionConflict)
    }

    /// Version observed by the last successful read
    pub fn version(&self) -> u64 {
        self.last_seen_version
    }

    /// Check if data has changed since last read
    pub fn has_changed(&self) -> bool {
        let current = self.segment.header().version_counter().load();
        current != self.last_seen_version && VersionCounter::is_stable(current)
    }

    /// Whether the process that created the segment is still running
    pub fn writer_alive(&self) -> bool {
        is_process_alive(self.writer_pid)
    }

    /// Get reader process ID
    pub fn reader_pid(&self) -> u32 {
        self.reader_pid
    }

    /// Get segment name
    pub fn name(&self) -> &str {
        &self.segment.name
    }

    /// Get data size
    pub fn data_size(&self) -> usize {
        self.segment.data_size
    }

    /// Get current reader count
    pub fn reader_count(&self) -> u32 {
        self.segment.header().get_reader_count()
    }
}

impl Drop for SegmentReader {
    fn drop(&mut self) {
        self.segment.header().remove_reader();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::writer::SegmentWriter;
    use cpl_common::shm::consts::SHM_MIN_SIZE;

    fn unique(name: &str) -> String {
        format!("{name}_{}", std::process::id())
    }

    #[test]
    fn test_reader_attachment() {
        let name = unique("reader_attach");
        let mut writer = SegmentWriter::create(&name, SHM_MIN_SIZE).unwrap();
        writer.write(b"Hello, Reader!").unwrap();

        let reader = SegmentReader::attach(&name).unwrap();
        assert_eq!(reader.data_size(), SHM_MIN_SIZE);
        assert_eq!(reader.reader_count(), 1);
        assert_eq!(writer.reader_count(), 1);
        assert!(reader.writer_alive());
    }

    #[test]
    fn test_read_range() {
        let name = unique("reader_range");
        let mut writer = SegmentWriter::create(&name, SHM_MIN_SIZE).unwrap();
        writer
            .write(b"Hello, World! This is a longer message.")
            .unwrap();

        let mut reader = SegmentReader::attach(&name).unwrap();
        let range = reader.read_range(7, 6).unwrap();
        assert_eq!(range, b"World!");
        assert!(reader.read_range(SHM_MIN_SIZE - 1, 2).is_err());
    }

    #[test]
    fn test_version_tracking() {
        let name = unique("reader_version");
        let mut writer = SegmentWriter::create(&name, SHM_MIN_SIZE).unwrap();
        let mut reader = SegmentReader::attach(&name).unwrap();
        assert!(!reader.has_changed());

        writer.write(b"New data").unwrap();
        assert!(reader.has_changed());

        reader.read().unwrap();
        assert_eq!(reader.version(), writer.current_version());
        assert!(!reader.has_changed());
    }

    #[test]
    fn test_reader_drop_decrements_count() {
        let name = unique("reader_drop");
        let writer = SegmentWriter::create(&name, SHM_MIN_SIZE).unwrap();
        let first = SegmentReader::attach(&name).unwrap();
        {
            let _second = SegmentReader::attach(&name).unwrap();
            assert_eq!(writer.reader_count(), 2);
        }
        assert_eq!(first.reader_count(), 1);
    }

    #[test]
    fn test_nonexistent_segment() {
        let reader = SegmentReader::attach("nonexistent_segment");
        assert!(matches!(reader, Err(ShmError::NotFound { .. })));
    }
}
