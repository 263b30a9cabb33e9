//! # Coupler Shared Memory Segments
//!
//! Single-writer, multi-reader memory-mapped segments under `/dev/shm`,
//! used by the coupler's cross-process transport as message mailboxes.
//!
//! ## Layout
//!
//! ```text
//! /dev/shm/cpl_<name>_<pid>   [SegmentHeader (128 B) | data section]
//! /dev/shm/cpl_<name>.meta    JSON discovery record (writer pid, size)
//! ```
//!
//! The writer bumps the header version to odd before touching the data
//! section and back to even afterwards; readers copy under a version check
//! and retry on conflict. Readers locate the live writer through the
//! `.meta` record, so segments left behind by a crashed process are never
//! attached and are replaced by the next writer of the same name.
//!
//! ## Usage
//!
//! ```rust,no_run
//! use cpl_shared_memory::{SHM_MIN_SIZE, SegmentReader, SegmentWriter};
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let mut writer = SegmentWriter::create("run1_ack_0_1", SHM_MIN_SIZE)?;
//! writer.write(&7u64.to_le_bytes())?;
//!
//! let mut reader = SegmentReader::attach("run1_ack_0_1")?;
//! let acked = u64::from_le_bytes(reader.read_range(0, 8)?.try_into()?);
//! assert_eq!(acked, 7);
//! # Ok(())
//! # }
//! ```
//!
//! ## Thread Safety
//!
//! - **SegmentWriter**: single writer per segment
//! - **SegmentReader**: one per reading thread; any number per segment

#![deny(missing_docs)]
#![warn(clippy::all)]

pub mod error;
pub mod lifecycle;
pub mod platform;
pub mod reader;
pub mod segment;
pub mod version;
pub mod writer;

pub use cpl_common::shm::consts::{SHM_MAX_SIZE, SHM_MIN_SIZE};
pub use error::{ShmError, ShmResult};
pub use lifecycle::remove_stale_segment;
pub use platform::MapConfig;
pub use reader::SegmentReader;
pub use segment::{SegmentHeader, SegmentInfo, SharedMemorySegment};
pub use version::VersionCounter;
pub use writer::SegmentWriter;
