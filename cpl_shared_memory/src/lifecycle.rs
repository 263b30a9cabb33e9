//! Segment file naming and stale-segment recovery

use crate::error::ShmResult;
use crate::platform::{SHM_ROOT, is_process_alive};
use crate::segment::SegmentInfo;
use cpl_common::shm::consts::SEGMENT_PREFIX;
use std::path::Path;

/// Path of the data file of segment `name` owned by `pid`.
pub fn segment_path(name: &str, pid: u32) -> String {
    format!("{SHM_ROOT}/{SEGMENT_PREFIX}{name}_{pid}")
}

/// Path of the discovery record of segment `name`.
pub fn metadata_path(name: &str) -> String {
    format!("{SHM_ROOT}/{SEGMENT_PREFIX}{name}.meta")
}

/// Remove the files of segment `name` if its recorded writer is dead.
///
/// Returns `Ok(true)` if a stale segment was removed and `Ok(false)` if
/// there was no record or its writer is still running.
pub fn remove_stale_segment(name: &str) -> ShmResult<bool> {
    let meta = metadata_path(name);
    if !Path::new(&meta).exists() {
        return Ok(false);
    }
    let info: Option<SegmentInfo> = std::fs::read_to_string(&meta)
        .ok()
        .and_then(|content| serde_json::from_str(&content).ok());

    if let Some(info) = &info {
        if is_process_alive(info.writer_pid) {
            return Ok(false);
        }
        let data = segment_path(name, info.writer_pid);
        if Path::new(&data).exists() {
            std::fs::remove_file(&data)?;
        }
    }
    std::fs::remove_file(&meta)?;
    tracing::warn!(segment = name, "Removed stale segment left by a dead writer");
    Ok(true)
}

/// Writer pid recorded for `name`, if that writer is still running.
pub fn live_writer(name: &str) -> Option<u32> {
    let content = std::fs::read_to_string(metadata_path(name)).ok()?;
    let info: SegmentInfo = serde_json::from_str(&content).ok()?;
    is_process_alive(info.writer_pid).then_some(info.writer_pid)
}
