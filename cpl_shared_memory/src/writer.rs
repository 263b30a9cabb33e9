//! Single writer implementation with exclusive ownership

use crate::error::{ShmError, ShmResult};
use crate::lifecycle::{live_writer, metadata_path, remove_stale_segment, segment_path};
use crate::platform::{MapConfig, create_segment_mmap, get_current_pid};
use crate::segment::{SegmentHeader, SegmentInfo, SharedMemorySegment, unix_nanos, validate_segment_size};
use std::fs::OpenOptions;
use std::io::Write;
use std::os::unix::fs::OpenOptionsExt;
use std::sync::atomic::{Ordering, fence};
use std::time::SystemTime;

/// Single writer with exclusive segment ownership
pub struct SegmentWriter {
    segment: SharedMemorySegment,
    current_version: u64,
    writer_pid: u32,
}

impl SegmentWriter {
    /// Create new writer with exclusive segment ownership.
    ///
    /// A previous segment of the same name whose writer process has died is
    /// removed first; one whose writer is alive yields
    /// [`ShmError::AlreadyExists`].
    pub fn create(name: &str, size: usize) -> ShmResult<Self> {
        Self::create_with(name, size, &MapConfig::default())
    }

    /// [`create`](Self::create) with explicit mapping options.
    pub fn create_with(name: &str, size: usize, config: &MapConfig) -> ShmResult<Self> {
        validate_segment_size(size)?;

        if live_writer(name).is_some() {
            return Err(ShmError::AlreadyExists {
                name: name.to_string(),
            });
        }
        remove_stale_segment(name)?;

        let writer_pid = get_current_pid();
        let path = segment_path(name, writer_pid);
        let total_size = size + std::mem::size_of::<SegmentHeader>();
        let mut mmap = create_segment_mmap(&path, total_size, config).map_err(|e| match e {
            ShmError::AlreadyExists { .. } => ShmError::AlreadyExists {
                name: name.to_string(),
            },
            other => other,
        })?;

        // SAFETY: freshly created mapping, page aligned and larger than the header.
        unsafe {
            std::ptr::write(
                mmap.as_mut_ptr() as *mut SegmentHeader,
                SegmentHeader::new(size, writer_pid),
            );
        }
        fence(Ordering::Release);

        let segment = SharedMemorySegment::new(name.to_string(), size, mmap)?;

        if let Err(e) = Self::create_metadata_file(name, size, writer_pid) {
            let _ = std::fs::remove_file(&path);
            return Err(e);
        }

        tracing::debug!(segment = name, size, "Created shared memory segment");

        Ok(Self {
            segment,
            current_version: 0,
            writer_pid,
        })
    }

    /// Write data at the start of the data section
    pub fn write(&mut self, data: &[u8]) -> ShmResult<()> {
        self.write_at(0, data)
    }

    /// Write data at specific offset as one versioned update
    pub fn write_at(&mut self, offset: usize, data: &[u8]) -> ShmResult<()> {
        let end = offset
            .checked_add(data.len())
            .filter(|&end| end <= self.segment.data_size)
            .ok_or(ShmError::InvalidSize {
                size: offset.saturating_add(data.len()),
            })?;

        let data_ptr = self.segment.data_ptr_mut();
        let header = self.segment.header();
        let version = header.version_counter();

        version.begin_write();
        fence(Ordering::Release);

        // SAFETY: `offset..end` lies within the data section (checked above)
        // and this process is the only writer.
        unsafe {
            std::ptr::copy_nonoverlapping(data.as_ptr(), data_ptr.add(offset), end - offset);
        }

        fence(Ordering::Release);
        self.current_version = version.end_write();

        header.last_write_ts.store(unix_nanos(), Ordering::Release);

        Ok(())
    }

    /// Get current version
    pub fn current_version(&self) -> u64 {
        self.current_version
    }

    /// Get writer process ID
    pub fn writer_pid(&self) -> u32 {
        self.writer_pid
    }

    /// Get segment name
    pub fn name(&self) -> &str {
        &self.segment.name
    }

    /// Get data size
    pub fn data_size(&self) -> usize {
        self.segment.data_size
    }

    /// Number of readers currently attached
    pub fn reader_count(&self) -> u32 {
        self.segment.header().get_reader_count()
    }

    fn create_metadata_file(name: &str, size: usize, writer_pid: u32) -> ShmResult<()> {
        let info = SegmentInfo {
            name: name.to_string(),
            size,
            writer_pid,
            created_at: SystemTime::now(),
        };
        let json = serde_json::to_string_pretty(&info)?;

        let mut file = OpenOptions::new()
            .create_new(true)
            .write(true)
            .mode(0o600)
            .open(metadata_path(name))?;
        file.write_all(json.as_bytes())?;

        Ok(())
    }
}

impl Drop for SegmentWriter {
    fn drop(&mut self) {
        let _ = std::fs::remove_file(segment_path(&self.segment.name, self.writer_pid));
        let _ = std::fs::remove_file(metadata_path(&self.segment.name));
    }
}
