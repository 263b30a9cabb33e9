//! Error types of the coupling layer.
//!
//! Three families, matching where a failure originates:
//!
//! - [`DecompositionError`]: malformed tile bounds or layouts
//! - [`TransportError`]: point-to-point delivery (timeouts name rank, peer and tag)
//! - [`CouplingError`]: everything the lifecycle controller reports, wrapping the two above

use cpl_common::config::ConfigError;
use cpl_common::field_code::FieldCode;
use cpl_shared_memory::ShmError;
use thiserror::Error;

/// Invalid grid extents or tile bounds.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DecompositionError {
    /// Interior bounds along one axis are inverted or outside the grid.
    #[error("malformed {axis} bounds: interior {lo}..{hi} outside 1..{extent}")]
    MalformedBounds {
        /// `'i'` or `'j'`.
        axis: char,
        /// First interior index.
        lo: i32,
        /// Last interior index.
        hi: i32,
        /// Global interior extent along the axis.
        extent: i32,
    },

    /// Layout with zero tiles or more tiles than interior cells.
    #[error("{tiles} tiles along {axis} do not fit {cells} interior cells")]
    BadLayout {
        /// `'i'` or `'j'`.
        axis: char,
        /// Requested tile count.
        tiles: usize,
        /// Interior cells along the axis.
        cells: usize,
    },

    /// Tile coordinates outside the layout.
    #[error("tile ({ti}, {tj}) outside {ntile_i}x{ntile_j} layout")]
    TileOutOfRange {
        /// Tile column.
        ti: usize,
        /// Tile row.
        tj: usize,
        /// Tiles along i.
        ntile_i: usize,
        /// Tiles along j.
        ntile_j: usize,
    },

    /// Explicit segment list that is empty, unordered or overlapping.
    #[error("segment at {start} is empty or not above index {floor}")]
    BadSegment {
        /// Start of the offending segment.
        start: usize,
        /// Highest global index already claimed by earlier segments.
        floor: usize,
    },

    /// Segment reaching past the last global index of the grid.
    #[error("segment {start}+{length} exceeds the {points} points of the grid")]
    SegmentOutsideGrid {
        /// Start of the offending segment.
        start: usize,
        /// Its length.
        length: usize,
        /// Global points including the halo ring.
        points: usize,
    },
}

/// Point-to-point delivery failures.
#[derive(Debug, Error)]
pub enum TransportError {
    /// No message arrived within the receive timeout.
    #[error("rank {rank}: no message from rank {peer} with tag {tag:#x} after {waited_ms} ms")]
    Timeout {
        /// Waiting rank.
        rank: usize,
        /// Expected sender.
        peer: usize,
        /// Expected tag.
        tag: u32,
        /// Time waited.
        waited_ms: u64,
    },

    /// The next message on an ordered link carries another tag.
    #[error("rank {rank}: expected tag {expected:#x} from rank {peer}, found {found:#x}")]
    TagMismatch {
        /// Receiving rank.
        rank: usize,
        /// Sender.
        peer: usize,
        /// Tag the receiver asked for.
        expected: u32,
        /// Tag at the head of the link.
        found: u32,
    },

    /// Message sequence numbers skipped on a link.
    #[error("rank {rank}: link from rank {peer} out of sequence (expected {expected}, found {found})")]
    OutOfSequence {
        /// Receiving rank.
        rank: usize,
        /// Sender.
        peer: usize,
        /// Next expected sequence number.
        expected: u64,
        /// Sequence number found.
        found: u64,
    },

    /// Payload exceeds the mailbox capacity.
    #[error("payload of {len} bytes exceeds mailbox capacity of {capacity} bytes")]
    PayloadTooLarge {
        /// Payload size.
        len: usize,
        /// Mailbox capacity.
        capacity: usize,
    },

    /// Rank outside the communicator.
    #[error("rank {rank} outside communicator of size {size}")]
    RankOutOfRange {
        /// Offending rank.
        rank: usize,
        /// Communicator size.
        size: usize,
    },

    /// Shared memory failure.
    #[error(transparent)]
    Shm(#[from] ShmError),
}

/// Errors reported by the coupling lifecycle.
#[derive(Debug, Error)]
pub enum CouplingError {
    /// Configuration rejected.
    #[error(transparent)]
    Config(#[from] ConfigError),

    /// Tile bounds rejected.
    #[error(transparent)]
    Decomposition(#[from] DecompositionError),

    /// Delivery failed.
    #[error(transparent)]
    Transport(#[from] TransportError),

    /// Import or export list names a code absent from the registry.
    #[error("{list} list names unknown field code '{code}'")]
    UnknownField {
        /// Offending code.
        code: String,
        /// `"import"` or `"export"`.
        list: &'static str,
    },

    /// A field's native array does not exist in the model.
    #[error("rank {rank}: field '{code}' has no native array '{array}'")]
    MissingArray {
        /// Rank reporting the problem.
        rank: usize,
        /// Field code.
        code: FieldCode,
        /// Native array name.
        array: String,
    },

    /// A native array does not cover the tile's halo-extended bounds.
    #[error("rank {rank}: native array '{array}' of field '{code}' does not cover the tile")]
    ArrayShape {
        /// Rank reporting the problem.
        rank: usize,
        /// Field code.
        code: FieldCode,
        /// Native array name.
        array: String,
    },

    /// Buffer and router disagree on the number of points or fields.
    #[error("rank {rank}: size mismatch in {what}: expected {expected}, found {found}")]
    SizeMismatch {
        /// Rank reporting the problem.
        rank: usize,
        /// What was measured.
        what: String,
        /// Expected count.
        expected: usize,
        /// Observed count.
        found: usize,
    },

    /// Peer sent a message for another round or field list.
    #[error("rank {rank}: message from rank {peer} rejected: {detail}")]
    HeaderMismatch {
        /// Receiving rank.
        rank: usize,
        /// Sender.
        peer: usize,
        /// What differed.
        detail: String,
    },

    /// Two peer ranks claim the same global point.
    #[error("rank {rank}: global point {global} owned by peer ranks {first} and {second}")]
    OverlappingMaps {
        /// Rank reporting the problem.
        rank: usize,
        /// Global index.
        global: usize,
        /// First owner.
        first: usize,
        /// Second owner.
        second: usize,
    },

    /// Malformed message body.
    #[error("rank {rank}: malformed message from rank {peer}: {detail}")]
    Malformed {
        /// Receiving rank.
        rank: usize,
        /// Sender.
        peer: usize,
        /// What was wrong.
        detail: String,
    },

    /// Operation not allowed in the current lifecycle state.
    #[error("{operation} rejected: {reason}")]
    InvalidState {
        /// Attempted operation.
        operation: &'static str,
        /// Why the state machine refused it.
        reason: &'static str,
    },
}

impl CouplingError {
    /// Whether the coupled run cannot continue after this error.
    ///
    /// Size and header mismatches mean the two sides disagree about the
    /// exchanged data layout. A delivery failure or an unusable native
    /// array stops a round part-way, with messages of that round still
    /// queued in the peers' mailboxes, so no later round can be trusted.
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            Self::SizeMismatch { .. }
                | Self::HeaderMismatch { .. }
                | Self::OverlappingMaps { .. }
                | Self::Malformed { .. }
                | Self::ArrayShape { .. }
                | Self::Transport(_)
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn size_mismatch_is_fatal() {
        let err = CouplingError::SizeMismatch {
            rank: 1,
            what: "outbound vector".to_string(),
            expected: 10,
            found: 9,
        };
        assert!(err.is_fatal());
        assert!(err.to_string().contains("rank 1"));
    }

    #[test]
    fn timeout_is_fatal_and_names_peer() {
        let err = CouplingError::from(TransportError::Timeout {
            rank: 0,
            peer: 3,
            tag: 2,
            waited_ms: 50,
        });
        assert!(err.is_fatal());
        let msg = err.to_string();
        assert!(msg.contains("rank 0") && msg.contains("rank 3"));
    }

    #[test]
    fn unknown_field_names_code() {
        let err = CouplingError::UnknownField {
            code: "XYZ".to_string(),
            list: "import",
        };
        assert_eq!(err.to_string(), "import list names unknown field code 'XYZ'");
        assert!(!err.is_fatal());
    }
}
