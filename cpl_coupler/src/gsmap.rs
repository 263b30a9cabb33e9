//! Global segment map: a tile's halo-extended rectangle as runs of the
//! global 1-D index space.
//!
//! Row `j` of a tile contributes one segment starting at
//! `j*(lm+2) + istr_r + 1` with length `iend_r - istr_r + 1`. Over all tiles
//! of a layout the segments partition `1..=(lm+2)*(mm+2)`.
//!
//! Local positions number the tile's halo-extended points row by row, so
//! position order and global index order coincide.
//!
//! A map remembers the interior extents `lm x mm` it was cut from. Global
//! indices only mean the same point on two ranks when those agree.

use crate::error::{CouplingError, DecompositionError};
use crate::grid::{GridDomain, TileBounds};

/// One run of consecutive global indices.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Segment {
    /// First global index (1-based).
    pub start: usize,
    /// Number of indices.
    pub length: usize,
}

impl Segment {
    /// One past the last global index.
    #[inline]
    pub fn end(&self) -> usize {
        self.start + self.length
    }
}

/// Ordered segments of one tile.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GlobalSegMap {
    lm: usize,
    mm: usize,
    segments: Vec<Segment>,
    lsize: usize,
}

impl GlobalSegMap {
    /// Segment map of a tile.
    pub fn from_tile(domain: &GridDomain, bounds: &TileBounds) -> Self {
        let row = domain.lm + 2;
        let length = (bounds.iend_r() - bounds.istr_r() + 1) as usize;
        let segments: Vec<Segment> = (bounds.jstr_r()..=bounds.jend_r())
            .map(|j| Segment {
                start: j as usize * row + bounds.istr_r() as usize + 1,
                length,
            })
            .collect();
        let lsize = segments.len() * length;
        Self {
            lm: domain.lm,
            mm: domain.mm,
            segments,
            lsize,
        }
    }

    /// Build from explicit segments of an `lm x mm` grid. Segments must be
    /// non-empty, ascending, disjoint and inside `1..=(lm+2)*(mm+2)`.
    pub fn from_segments(
        lm: usize,
        mm: usize,
        segments: Vec<Segment>,
    ) -> Result<Self, DecompositionError> {
        let points = (lm + 2) * (mm + 2);
        let mut previous_end = 1;
        for seg in &segments {
            if seg.length == 0 || seg.start < previous_end {
                return Err(DecompositionError::BadSegment {
                    start: seg.start,
                    floor: previous_end - 1,
                });
            }
            if seg.end() > points + 1 {
                return Err(DecompositionError::SegmentOutsideGrid {
                    start: seg.start,
                    length: seg.length,
                    points,
                });
            }
            previous_end = seg.end();
        }
        let lsize = segments.iter().map(|s| s.length).sum();
        Ok(Self {
            lm,
            mm,
            segments,
            lsize,
        })
    }

    /// Interior extents `(lm, mm)` of the grid the map indexes.
    #[inline]
    pub fn extents(&self) -> (usize, usize) {
        (self.lm, self.mm)
    }

    /// Segments in ascending order.
    pub fn segments(&self) -> &[Segment] {
        &self.segments
    }

    /// Number of local points.
    #[inline]
    pub fn lsize(&self) -> usize {
        self.lsize
    }

    /// Global index of every local position, ascending.
    pub fn global_indices(&self) -> impl Iterator<Item = usize> + '_ {
        self.segments.iter().flat_map(|s| s.start..s.end())
    }

    /// Wire form: `lm`, `mm`, segment count, then `(start, length)` pairs,
    /// all little-endian `u64`.
    pub fn encode(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(24 + self.segments.len() * 16);
        out.extend_from_slice(&(self.lm as u64).to_le_bytes());
        out.extend_from_slice(&(self.mm as u64).to_le_bytes());
        out.extend_from_slice(&(self.segments.len() as u64).to_le_bytes());
        for seg in &self.segments {
            out.extend_from_slice(&(seg.start as u64).to_le_bytes());
            out.extend_from_slice(&(seg.length as u64).to_le_bytes());
        }
        out
    }

    /// Inverse of [`encode`](Self::encode).
    pub fn decode(bytes: &[u8], rank: usize, peer: usize) -> Result<Self, CouplingError> {
        let malformed = |detail: String| CouplingError::Malformed { rank, peer, detail };

        let mut words = bytes
            .chunks_exact(8)
            .map(|c| u64::from_le_bytes([c[0], c[1], c[2], c[3], c[4], c[5], c[6], c[7]]) as usize);
        let (Some(lm), Some(mm), Some(count)) = (words.next(), words.next(), words.next()) else {
            return Err(malformed("truncated segment map header".to_string()));
        };
        if count.checked_mul(16).and_then(|n| n.checked_add(24)) != Some(bytes.len()) {
            return Err(malformed(format!(
                "segment map of {count} segments has {} bytes",
                bytes.len()
            )));
        }
        let segments = (0..count)
            .map(|_| {
                let start = words.next().unwrap_or_default();
                let length = words.next().unwrap_or_default();
                Segment { start, length }
            })
            .collect();
        Self::from_segments(lm, mm, segments).map_err(|e| malformed(e.to_string()))
    }
}
