//! Linux-specific shared memory operations

use crate::error::{ShmError, ShmResult};
use memmap2::{MmapMut, MmapOptions};
use nix::unistd::getpid;
use std::fs::{File, OpenOptions};
use std::io::ErrorKind;
use std::os::unix::fs::OpenOptionsExt;

/// Root of the tmpfs holding every segment.
pub const SHM_ROOT: &str = "/dev/shm";

/// Memory mapping options for a new segment
#[derive(Debug, Clone, Copy, Default)]
pub struct MapConfig {
    /// Prefault all pages at map time (`MAP_POPULATE`)
    pub populate: bool,
}

fn open_mapped(path: &str, options: &OpenOptions) -> ShmResult<File> {
    options.open(path).map_err(|e| match e.kind() {
        ErrorKind::NotFound => ShmError::NotFound {
            name: path.to_string(),
        },
        ErrorKind::PermissionDenied => ShmError::PermissionDenied {
            name: path.to_string(),
        },
        _ => ShmError::Io { source: e },
    })
}

/// Create a memory-mapped segment file of `size` bytes.
pub fn create_segment_mmap(path: &str, size: usize, config: &MapConfig) -> ShmResult<MmapMut> {
    let file = open_mapped(
        path,
        OpenOptions::new()
            .create_new(true)
            .read(true)
            .write(true)
            .mode(0o600),
    )
    .map_err(|e| match e {
        ShmError::Io { source } if source.kind() == ErrorKind::AlreadyExists => {
            ShmError::AlreadyExists {
                name: path.to_string(),
            }
        }
        other => other,
    })?;

    file.set_len(size as u64)?;

    let mut mmap_options = MmapOptions::new();
    if config.populate {
        mmap_options.populate();
    }

    // SAFETY: the file was created exclusively by this process and sized above.
    let mmap = unsafe { mmap_options.map_mut(&file)? };
    Ok(mmap)
}

/// Attach to existing segment
pub fn attach_segment_mmap(path: &str) -> ShmResult<MmapMut> {
    let file = open_mapped(path, OpenOptions::new().read(true).write(true))?;

    // SAFETY: concurrent mutation is coordinated through the segment header.
    let mmap = unsafe { MmapOptions::new().map_mut(&file)? };
    Ok(mmap)
}

/// Check if process is alive using kill(pid, 0)
pub fn is_process_alive(pid: u32) -> bool {
    use nix::sys::signal::kill;
    use nix::unistd::Pid;

    match kill(Pid::from_raw(pid as i32), None) {
        Ok(_) => true,
        Err(nix::Error::ESRCH) => false,
        Err(nix::Error::EPERM) => true,
        Err(_) => false,
    }
}

/// Get current process ID
pub fn get_current_pid() -> u32 {
    getpid().as_raw() as u32
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn current_process_is_alive() {
        assert!(is_process_alive(get_current_pid()));
        assert_eq!(get_current_pid(), std::process::id());
    }

    #[test]
    fn attach_missing_path_is_not_found() {
        let result = attach_segment_mmap("/dev/shm/cpl_definitely_missing_segment");
        assert!(matches!(result, Err(ShmError::NotFound { .. })));
    }
}
