//! Lateral boundary conditions, periodicity and halo reconciliation.
//!
//! [`TileBoundary`] fills a tile's halo from its neighbours in two phases:
//! first along i over the tile's own rows, then along j over the full
//! window, so corner cells receive diagonal neighbours' values. Within a
//! phase every rank first passes its strip one way and then the other
//! way, so with single-slot mailboxes no rank ever waits on a send that
//! its peer cannot consume.

use std::sync::Arc;
use std::time::Duration;

use crate::error::{CouplingError, TransportError};
use crate::grid::{EdgeFlags, Field2d, GridDomain, Neighbours, Staggering, TileBounds};
use crate::transport::{Communicator, decode_f64s, encode_f64s, tags};

/// Boundary primitives the import/export adapter relies on.
pub trait BoundaryServices {
    /// Zero-gradient values on the closed global edges the tile touches.
    fn lateral_bc(&self, field: &mut Field2d, staggering: Staggering);

    /// Wrap values along periodic axes that are not split between tiles.
    fn apply_periodic(&self, field: &mut Field2d);

    /// Fill halo cells from neighbouring tiles, periodic wrap included.
    ///
    /// `field` must cover the tile interior plus the halo width.
    fn exchange_halo(&self, field: &mut Field2d) -> Result<(), CouplingError>;
}

/// Which axis a halo phase runs along.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Axis {
    I,
    J,
}

/// Boundary services of one tile, talking to neighbour tiles through the
/// shared communicator.
pub struct TileBoundary {
    comm: Arc<dyn Communicator>,
    domain: GridDomain,
    bounds: TileBounds,
    neighbours: Neighbours,
    own_tile: usize,
    rank_base: usize,
    halo: i32,
    timeout: Duration,
}

impl TileBoundary {
    /// Boundary services for tile `own_tile` of `domain`, whose ranks start
    /// at `rank_base` in the shared world.
    pub fn new(
        comm: Arc<dyn Communicator>,
        domain: GridDomain,
        own_tile: usize,
        rank_base: usize,
        halo: usize,
        timeout: Duration,
    ) -> Result<Self, CouplingError> {
        let (ti, tj) = domain.tile_coords(own_tile);
        let bounds = domain.tile(ti, tj)?;
        Ok(Self {
            comm,
            domain,
            bounds,
            neighbours: domain.neighbours(ti, tj),
            own_tile,
            rank_base,
            halo: halo as i32,
            timeout,
        })
    }

    /// Bounds of the tile served.
    pub fn bounds(&self) -> &TileBounds {
        &self.bounds
    }

    /// Halo width in cells.
    pub fn halo(&self) -> usize {
        self.halo as usize
    }

    fn strip(field: &Field2d, cols: (i32, i32), rows: (i32, i32)) -> Vec<f64> {
        let mut out = Vec::with_capacity(((cols.1 - cols.0 + 1) * (rows.1 - rows.0 + 1)).max(0) as usize);
        for j in rows.0..=rows.1 {
            for i in cols.0..=cols.1 {
                out.push(field[(i, j)]);
            }
        }
        out
    }

    fn paste(field: &mut Field2d, cols: (i32, i32), rows: (i32, i32), values: &[f64]) {
        let mut it = values.iter();
        for j in rows.0..=rows.1 {
            for i in cols.0..=cols.1 {
                if let Some(&v) = it.next() {
                    field[(i, j)] = v;
                }
            }
        }
    }

    /// Copy `src` window onto `dst` window of the same shape.
    fn copy_local(field: &mut Field2d, src: ((i32, i32), (i32, i32)), dst: ((i32, i32), (i32, i32))) {
        let values = Self::strip(field, src.0, src.1);
        Self::paste(field, dst.0, dst.1, &values);
    }

    fn recv_strip(&self, tile: usize, tag: u32, expected: usize) -> Result<Vec<f64>, CouplingError> {
        let peer = self.rank_base + tile;
        let rank = self.comm.rank();
        let bytes = self.comm.recv(peer, tag, self.timeout)?;
        let values = decode_f64s(&bytes).ok_or_else(|| CouplingError::Malformed {
            rank,
            peer,
            detail: format!("halo strip of {} bytes", bytes.len()),
        })?;
        if values.len() != expected {
            return Err(CouplingError::SizeMismatch {
                rank,
                what: format!("halo strip from rank {peer}"),
                expected,
                found: values.len(),
            });
        }
        Ok(values)
    }

    fn send_strip(&self, tile: usize, tag: u32, values: &[f64]) -> Result<(), TransportError> {
        self.comm.send(self.rank_base + tile, tag, &encode_f64s(values))
    }

    /// One phase of the halo exchange.
    ///
    /// `low`/`high` are the neighbours at the low and high end of `axis`.
    /// Self neighbours (periodic, unsplit axis) are served by local copies.
    fn phase(&self, field: &mut Field2d, axis: Axis, periodic_only: bool) -> Result<(), CouplingError> {
        let w = self.halo;
        let b = &self.bounds;
        let (low, high, lo_edge, hi_edge, to_high, to_low) = match axis {
            Axis::I => (self.neighbours.west, self.neighbours.east, b.istr, b.iend, tags::HALO_EAST, tags::HALO_WEST),
            Axis::J => (self.neighbours.south, self.neighbours.north, b.jstr, b.jend, tags::HALO_NORTH, tags::HALO_SOUTH),
        };
        // Span across the other axis: the tile's own rows (boundary rows
        // included) for the i phase, interior plus both halos for the j
        // phase.
        let across = match axis {
            Axis::I => (b.jstr_r(), b.jend_r()),
            Axis::J => (b.istr - w, b.iend + w),
        };
        let window = |lo: i32, hi: i32| match axis {
            Axis::I => ((lo, hi), across),
            Axis::J => (across, (lo, hi)),
        };

        let high_strip = window(hi_edge - w + 1, hi_edge);
        let low_strip = window(lo_edge, lo_edge + w - 1);
        let low_halo = window(lo_edge - w, lo_edge - 1);
        let high_halo = window(hi_edge + 1, hi_edge + w);
        let strip_len = (w * (across.1 - across.0 + 1)) as usize;

        let is_self = |n: Option<usize>| n == Some(self.own_tile);

        if is_self(low) && is_self(high) {
            Self::copy_local(field, high_strip, low_halo);
            Self::copy_local(field, low_strip, high_halo);
            return Ok(());
        }
        if periodic_only {
            return Ok(());
        }

        // Step 1: strips travel towards the high end.
        if let Some(tile) = high {
            self.send_strip(tile, to_high, &Self::strip(field, high_strip.0, high_strip.1))?;
        }
        if let Some(tile) = low {
            let values = self.recv_strip(tile, to_high, strip_len)?;
            Self::paste(field, low_halo.0, low_halo.1, &values);
        }

        // Step 2: strips travel towards the low end.
        if let Some(tile) = low {
            self.send_strip(tile, to_low, &Self::strip(field, low_strip.0, low_strip.1))?;
        }
        if let Some(tile) = high {
            let values = self.recv_strip(tile, to_low, strip_len)?;
            Self::paste(field, high_halo.0, high_halo.1, &values);
        }
        Ok(())
    }
}

impl BoundaryServices for TileBoundary {
    fn lateral_bc(&self, field: &mut Field2d, staggering: Staggering) {
        let b = &self.bounds;
        let (i_face, j_face) = match staggering {
            Staggering::Rho => (false, false),
            Staggering::U => (true, false),
            Staggering::V => (false, true),
            Staggering::Psi => (true, true),
        };

        if !self.domain.periodic_ew {
            for j in b.jstr..=b.jend {
                if b.edges.contains(EdgeFlags::WESTERN) {
                    if i_face {
                        field[(b.istr, j)] = field[(b.istr + 1, j)];
                    }
                    field[(b.istr - 1, j)] = field[(b.istr, j)];
                }
                if b.edges.contains(EdgeFlags::EASTERN) {
                    field[(b.iend + 1, j)] = field[(b.iend, j)];
                }
            }
        }

        if !self.domain.periodic_ns {
            for i in b.istr_r()..=b.iend_r() {
                if b.edges.contains(EdgeFlags::SOUTHERN) {
                    if j_face {
                        field[(i, b.jstr)] = field[(i, b.jstr + 1)];
                    }
                    field[(i, b.jstr - 1)] = field[(i, b.jstr)];
                }
                if b.edges.contains(EdgeFlags::NORTHERN) {
                    field[(i, b.jend + 1)] = field[(i, b.jend)];
                }
            }
        }
    }

    fn apply_periodic(&self, field: &mut Field2d) {
        // Local copies cannot fail.
        let _ = self.phase(field, Axis::I, true);
        let _ = self.phase(field, Axis::J, true);
    }

    fn exchange_halo(&self, field: &mut Field2d) -> Result<(), CouplingError> {
        self.phase(field, Axis::I, false)?;
        self.phase(field, Axis::J, false)
    }
}
