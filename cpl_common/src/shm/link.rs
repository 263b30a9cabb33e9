//! Model identifiers and the shared-memory mailbox message header.
//!
//! Every mailbox segment starts with a [`MessageHeader`] (64 bytes,
//! cache-line aligned) followed by the message payload. The header is
//! encoded explicitly at fixed little-endian offsets so both processes agree
//! on the layout regardless of compiler field ordering.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use static_assertions::const_assert_eq;

/// Magic bytes identifying a valid mailbox message: `"CPL_MSG\0"`.
pub const CPL_MSG_MAGIC: [u8; 8] = *b"CPL_MSG\0";

/// Coupled model identity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
#[repr(u8)]
pub enum ModelId {
    /// Ocean circulation model.
    Ocean = 0,
    /// Sea-ice model.
    Ice = 1,
    /// Atmosphere model.
    Atmosphere = 2,
    /// Surface wave model.
    Wave = 3,
}

impl ModelId {
    /// Convert from raw `u8` value. Returns `None` for invalid values.
    #[inline]
    pub const fn from_u8(value: u8) -> Option<Self> {
        match value {
            0 => Some(Self::Ocean),
            1 => Some(Self::Ice),
            2 => Some(Self::Atmosphere),
            3 => Some(Self::Wave),
            _ => None,
        }
    }

    /// Lowercase name as used in configuration files.
    pub const fn name(self) -> &'static str {
        match self {
            Self::Ocean => "ocean",
            Self::Ice => "ice",
            Self::Atmosphere => "atmosphere",
            Self::Wave => "wave",
        }
    }
}

impl fmt::Display for ModelId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for ModelId {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "ocean" => Ok(Self::Ocean),
            "ice" => Ok(Self::Ice),
            "atmosphere" => Ok(Self::Atmosphere),
            "wave" => Ok(Self::Wave),
            other => Err(format!("unknown model '{other}'")),
        }
    }
}

// ─── Header byte offsets ────────────────────────────────────────────
//
//   [0..8]   magic:        [u8; 8]
//   [8..16]  seq:          u64
//   [16..20] tag:          u32
//   [20..24] payload_len:  u32
//   [24..28] source_rank:  u32
//   [28..32] dest_rank:    u32
//   [32..64] _padding:     [u8; 32]

const SEQ_OFFSET: usize = 8;
const TAG_OFFSET: usize = 16;
const LEN_OFFSET: usize = 20;
const SRC_OFFSET: usize = 24;
const DST_OFFSET: usize = 28;

/// Size of an encoded header in bytes.
pub const MESSAGE_HEADER_SIZE: usize = 64;

/// Mailbox message header: 64 bytes, cache-line aligned.
///
/// `seq` starts at 1 for the first message of a link and increases by one
/// per message; a reader waiting for message `n` ignores any other value.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(C, align(64))]
pub struct MessageHeader {
    /// Magic bytes: must be [`CPL_MSG_MAGIC`].
    pub magic: [u8; 8],
    /// Per-link message sequence number.
    pub seq: u64,
    /// Message tag chosen by the sender.
    pub tag: u32,
    /// Number of payload bytes following the header.
    pub payload_len: u32,
    /// Sender rank in the shared world.
    pub source_rank: u32,
    /// Receiver rank in the shared world.
    pub dest_rank: u32,
    /// Padding to fill 64 bytes total.
    pub _padding: [u8; 32],
}

const_assert_eq!(core::mem::size_of::<MessageHeader>(), MESSAGE_HEADER_SIZE);
const_assert_eq!(core::mem::align_of::<MessageHeader>(), 64);

impl MessageHeader {
    /// Create a header for message `seq` of the link `source_rank → dest_rank`.
    pub const fn new(seq: u64, tag: u32, payload_len: u32, source_rank: u32, dest_rank: u32) -> Self {
        Self {
            magic: CPL_MSG_MAGIC,
            seq,
            tag,
            payload_len,
            source_rank,
            dest_rank,
            _padding: [0u8; 32],
        }
    }

    /// Validate the magic bytes.
    #[inline]
    pub fn is_magic_valid(&self) -> bool {
        self.magic == CPL_MSG_MAGIC
    }

    /// Encode into the fixed 64-byte wire layout.
    pub fn encode(&self) -> [u8; MESSAGE_HEADER_SIZE] {
        let mut out = [0u8; MESSAGE_HEADER_SIZE];
        out[..8].copy_from_slice(&self.magic);
        out[SEQ_OFFSET..SEQ_OFFSET + 8].copy_from_slice(&self.seq.to_le_bytes());
        out[TAG_OFFSET..TAG_OFFSET + 4].copy_from_slice(&self.tag.to_le_bytes());
        out[LEN_OFFSET..LEN_OFFSET + 4].copy_from_slice(&self.payload_len.to_le_bytes());
        out[SRC_OFFSET..SRC_OFFSET + 4].copy_from_slice(&self.source_rank.to_le_bytes());
        out[DST_OFFSET..DST_OFFSET + 4].copy_from_slice(&self.dest_rank.to_le_bytes());
        out
    }

    /// Decode from the wire layout. Returns `None` if `bytes` is too short
    /// or the magic is wrong.
    pub fn decode(bytes: &[u8]) -> Option<Self> {
        if bytes.len() < MESSAGE_HEADER_SIZE {
            return None;
        }
        let mut magic = [0u8; 8];
        magic.copy_from_slice(&bytes[..8]);
        let header = Self {
            magic,
            seq: u64::from_le_bytes(bytes[SEQ_OFFSET..SEQ_OFFSET + 8].try_into().ok()?),
            tag: u32::from_le_bytes(bytes[TAG_OFFSET..TAG_OFFSET + 4].try_into().ok()?),
            payload_len: u32::from_le_bytes(bytes[LEN_OFFSET..LEN_OFFSET + 4].try_into().ok()?),
            source_rank: u32::from_le_bytes(bytes[SRC_OFFSET..SRC_OFFSET + 4].try_into().ok()?),
            dest_rank: u32::from_le_bytes(bytes[DST_OFFSET..DST_OFFSET + 4].try_into().ok()?),
            _padding: [0u8; 32],
        };
        header.is_magic_valid().then_some(header)
    }
}
