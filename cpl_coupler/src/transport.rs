//! Point-to-point transport between ranks of the shared world.
//!
//! The coupler only needs tagged, blocking hand-off of byte payloads and a
//! bounded receive. Two implementations are provided:
//!
//! - [`local::LocalFabric`]: ranks are threads of one process
//! - [`shm::ShmCommunicator`]: ranks are processes on one host, connected
//!   through shared-memory mailboxes

use std::time::Duration;

use crate::error::TransportError;

pub mod local;
pub mod shm;

/// Message tags used by the coupler.
pub mod tags {
    /// Segment map exchange while building a router.
    pub const SEGMENT_MAP: u32 = 0x01;
    /// Attribute vector contents of one exchange round.
    pub const FIELDS: u32 = 0x02;
    /// Halo strip travelling east.
    pub const HALO_EAST: u32 = 0x10;
    /// Halo strip travelling west.
    pub const HALO_WEST: u32 = 0x11;
    /// Halo strip travelling north.
    pub const HALO_NORTH: u32 = 0x12;
    /// Halo strip travelling south.
    pub const HALO_SOUTH: u32 = 0x13;
}

/// Tagged point-to-point messaging over a fixed set of ranks.
pub trait Communicator: Send + Sync {
    /// This endpoint's rank.
    fn rank(&self) -> usize;

    /// Number of ranks.
    fn size(&self) -> usize;

    /// Hand `payload` to `dest`. Returns once the message is queued for
    /// delivery; does not wait for the matching receive.
    fn send(&self, dest: usize, tag: u32, payload: &[u8]) -> Result<(), TransportError>;

    /// Next message from `source` with `tag`, waiting at most `timeout`.
    fn recv(&self, source: usize, tag: u32, timeout: Duration) -> Result<Vec<u8>, TransportError>;
}

/// Little-endian encoding of a value strip.
pub fn encode_f64s(values: &[f64]) -> Vec<u8> {
    let mut out = Vec::with_capacity(values.len() * 8);
    for v in values {
        out.extend_from_slice(&v.to_le_bytes());
    }
    out
}

/// Inverse of [`encode_f64s`]; `None` if the length is not a multiple of 8.
pub fn decode_f64s(bytes: &[u8]) -> Option<Vec<f64>> {
    if bytes.len() % 8 != 0 {
        return None;
    }
    Some(
        bytes
            .chunks_exact(8)
            .map(|c| f64::from_le_bytes([c[0], c[1], c[2], c[3], c[4], c[5], c[6], c[7]]))
            .collect(),
    )
}

pub(crate) fn check_rank(rank: usize, size: usize) -> Result<(), TransportError> {
    if rank >= size {
        return Err(TransportError::RankOutOfRange { rank, size });
    }
    Ok(())
}
