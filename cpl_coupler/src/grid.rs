//! Structured grid, tile decomposition and native field storage.
//!
//! Index conventions follow the staggered C-grid: interior cells run
//! `1..=lm` along i and `1..=mm` along j; the boundary cells `0` and
//! `lm+1` (resp. `mm+1`) belong to the tiles touching the global edge.
//! A tile's interior is `istr..=iend` × `jstr..=jend`; its halo-extended
//! bounds add the boundary cell on each global edge the tile touches.

use std::ops::{Index, IndexMut, RangeInclusive};

use bitflags::bitflags;
use serde::{Deserialize, Serialize};

use crate::error::DecompositionError;

bitflags! {
    /// Global domain edges a tile touches.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct EdgeFlags: u8 {
        /// Tile touches `i = 0`.
        const WESTERN  = 0b0001;
        /// Tile touches `i = lm + 1`.
        const EASTERN  = 0b0010;
        /// Tile touches `j = 0`.
        const SOUTHERN = 0b0100;
        /// Tile touches `j = mm + 1`.
        const NORTHERN = 0b1000;
    }
}

/// Grid point type of a field.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Staggering {
    /// Cell center.
    #[default]
    Rho,
    /// West face, between `(i-1, j)` and `(i, j)`.
    U,
    /// South face, between `(i, j-1)` and `(i, j)`.
    V,
    /// South-west corner.
    Psi,
}

/// Interior and halo-extended bounds of one tile.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TileBounds {
    /// First interior i.
    pub istr: i32,
    /// Last interior i.
    pub iend: i32,
    /// First interior j.
    pub jstr: i32,
    /// Last interior j.
    pub jend: i32,
    /// Global edges touched by this tile.
    pub edges: EdgeFlags,
}

impl TileBounds {
    /// Build bounds, rejecting inverted ranges or ranges outside `1..=lm`,
    /// `1..=mm`.
    pub fn new(
        domain: &GridDomain,
        (istr, iend): (i32, i32),
        (jstr, jend): (i32, i32),
        edges: EdgeFlags,
    ) -> Result<Self, DecompositionError> {
        check_axis('i', istr, iend, domain.lm as i32)?;
        check_axis('j', jstr, jend, domain.mm as i32)?;
        Ok(Self {
            istr,
            iend,
            jstr,
            jend,
            edges,
        })
    }

    /// `istr - 1` on the western edge, else `istr`.
    #[inline]
    pub fn istr_r(&self) -> i32 {
        self.istr - i32::from(self.edges.contains(EdgeFlags::WESTERN))
    }

    /// `iend + 1` on the eastern edge, else `iend`.
    #[inline]
    pub fn iend_r(&self) -> i32 {
        self.iend + i32::from(self.edges.contains(EdgeFlags::EASTERN))
    }

    /// `jstr - 1` on the southern edge, else `jstr`.
    #[inline]
    pub fn jstr_r(&self) -> i32 {
        self.jstr - i32::from(self.edges.contains(EdgeFlags::SOUTHERN))
    }

    /// `jend + 1` on the northern edge, else `jend`.
    #[inline]
    pub fn jend_r(&self) -> i32 {
        self.jend + i32::from(self.edges.contains(EdgeFlags::NORTHERN))
    }

    /// Number of points in the halo-extended rectangle.
    pub fn extended_points(&self) -> usize {
        ((self.iend_r() - self.istr_r() + 1) * (self.jend_r() - self.jstr_r() + 1)) as usize
    }

    /// Halo-extended points in row-major order (j outer, i inner).
    pub fn extended_points_iter(&self) -> impl Iterator<Item = (i32, i32)> + use<> {
        let (i0, i1) = (self.istr_r(), self.iend_r());
        (self.jstr_r()..=self.jend_r()).flat_map(move |j| (i0..=i1).map(move |i| (i, j)))
    }
}

fn check_axis(axis: char, lo: i32, hi: i32, extent: i32) -> Result<(), DecompositionError> {
    if lo < 1 || hi < lo || hi > extent {
        return Err(DecompositionError::MalformedBounds {
            axis,
            lo,
            hi,
            extent,
        });
    }
    Ok(())
}

/// Tile indices of the four lateral neighbours, `None` at a closed edge.
///
/// A neighbour equal to the tile itself means the axis is periodic and not
/// split.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Neighbours {
    /// Tile to the west.
    pub west: Option<usize>,
    /// Tile to the east.
    pub east: Option<usize>,
    /// Tile to the south.
    pub south: Option<usize>,
    /// Tile to the north.
    pub north: Option<usize>,
}

/// Global grid extents and tile layout.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct GridDomain {
    /// Interior cells along i.
    pub lm: usize,
    /// Interior cells along j.
    pub mm: usize,
    /// Tiles along i.
    pub ntile_i: usize,
    /// Tiles along j.
    pub ntile_j: usize,
    /// East-west periodicity.
    pub periodic_ew: bool,
    /// North-south periodicity.
    pub periodic_ns: bool,
}

impl GridDomain {
    /// Validate the layout against the extents.
    pub fn new(
        lm: usize,
        mm: usize,
        ntile_i: usize,
        ntile_j: usize,
        periodic_ew: bool,
        periodic_ns: bool,
    ) -> Result<Self, DecompositionError> {
        if ntile_i == 0 || ntile_i > lm {
            return Err(DecompositionError::BadLayout {
                axis: 'i',
                tiles: ntile_i,
                cells: lm,
            });
        }
        if ntile_j == 0 || ntile_j > mm {
            return Err(DecompositionError::BadLayout {
                axis: 'j',
                tiles: ntile_j,
                cells: mm,
            });
        }
        Ok(Self {
            lm,
            mm,
            ntile_i,
            ntile_j,
            periodic_ew,
            periodic_ns,
        })
    }

    /// Number of tiles.
    #[inline]
    pub fn tile_count(&self) -> usize {
        self.ntile_i * self.ntile_j
    }

    /// Size of the global index space, `(lm+2)*(mm+2)`.
    #[inline]
    pub fn global_points(&self) -> usize {
        (self.lm + 2) * (self.mm + 2)
    }

    /// Row-major tile index of `(ti, tj)`.
    #[inline]
    pub fn tile_index(&self, ti: usize, tj: usize) -> usize {
        tj * self.ntile_i + ti
    }

    /// Tile coordinates of a row-major tile index.
    #[inline]
    pub fn tile_coords(&self, index: usize) -> (usize, usize) {
        (index % self.ntile_i, index / self.ntile_i)
    }

    /// Bounds of tile `(ti, tj)`.
    ///
    /// Interior cells are split as evenly as possible; the first
    /// `extent % ntile` tiles along an axis receive one extra cell.
    pub fn tile(&self, ti: usize, tj: usize) -> Result<TileBounds, DecompositionError> {
        if ti >= self.ntile_i || tj >= self.ntile_j {
            return Err(DecompositionError::TileOutOfRange {
                ti,
                tj,
                ntile_i: self.ntile_i,
                ntile_j: self.ntile_j,
            });
        }
        let (istr, iend) = split_axis(self.lm, self.ntile_i, ti);
        let (jstr, jend) = split_axis(self.mm, self.ntile_j, tj);

        let mut edges = EdgeFlags::empty();
        edges.set(EdgeFlags::WESTERN, ti == 0);
        edges.set(EdgeFlags::EASTERN, ti == self.ntile_i - 1);
        edges.set(EdgeFlags::SOUTHERN, tj == 0);
        edges.set(EdgeFlags::NORTHERN, tj == self.ntile_j - 1);

        TileBounds::new(self, (istr, iend), (jstr, jend), edges)
    }

    /// Lateral neighbours of tile `(ti, tj)`, wrapping along periodic axes.
    pub fn neighbours(&self, ti: usize, tj: usize) -> Neighbours {
        let wrap = |pos: usize, n: usize, step_back: bool, periodic: bool| -> Option<usize> {
            match (step_back, pos) {
                (true, 0) => periodic.then_some(n - 1),
                (true, p) => Some(p - 1),
                (false, p) if p + 1 == n => periodic.then_some(0),
                (false, p) => Some(p + 1),
            }
        };
        let (nti, ntj) = (self.ntile_i, self.ntile_j);
        Neighbours {
            west: wrap(ti, nti, true, self.periodic_ew).map(|x| self.tile_index(x, tj)),
            east: wrap(ti, nti, false, self.periodic_ew).map(|x| self.tile_index(x, tj)),
            south: wrap(tj, ntj, true, self.periodic_ns).map(|y| self.tile_index(ti, y)),
            north: wrap(tj, ntj, false, self.periodic_ns).map(|y| self.tile_index(ti, y)),
        }
    }
}

fn split_axis(extent: usize, tiles: usize, pos: usize) -> (i32, i32) {
    let base = extent / tiles;
    let rem = extent % tiles;
    let start = 1 + pos * base + pos.min(rem);
    let len = base + usize::from(pos < rem);
    (start as i32, (start + len - 1) as i32)
}

// ─── Native storage ─────────────────────────────────────────────────

/// Two-dimensional field over an inclusive index window.
#[derive(Debug, Clone, PartialEq)]
pub struct Field2d {
    i0: i32,
    j0: i32,
    ni: usize,
    nj: usize,
    data: Vec<f64>,
}

impl Field2d {
    /// Field covering `i_range` × `j_range`, filled with `fill`.
    pub fn new(i_range: RangeInclusive<i32>, j_range: RangeInclusive<i32>, fill: f64) -> Self {
        let ni = (i_range.end() - i_range.start() + 1).max(0) as usize;
        let nj = (j_range.end() - j_range.start() + 1).max(0) as usize;
        Self {
            i0: *i_range.start(),
            j0: *j_range.start(),
            ni,
            nj,
            data: vec![fill; ni * nj],
        }
    }

    /// Zeroed field covering the tile interior plus `halo` cells on each side.
    pub fn for_tile(bounds: &TileBounds, halo: usize) -> Self {
        let h = halo as i32;
        Self::new(
            bounds.istr - h..=bounds.iend + h,
            bounds.jstr - h..=bounds.jend + h,
            0.0,
        )
    }

    /// Covered i indices.
    #[inline]
    pub fn i_range(&self) -> RangeInclusive<i32> {
        self.i0..=self.i0 + self.ni as i32 - 1
    }

    /// Covered j indices.
    #[inline]
    pub fn j_range(&self) -> RangeInclusive<i32> {
        self.j0..=self.j0 + self.nj as i32 - 1
    }

    /// Whether `(i, j)` lies inside the window.
    #[inline]
    pub fn contains(&self, i: i32, j: i32) -> bool {
        self.i_range().contains(&i) && self.j_range().contains(&j)
    }

    /// Whether the window covers the tile's interior plus `halo` cells.
    pub fn covers(&self, bounds: &TileBounds, halo: usize) -> bool {
        let h = halo as i32;
        self.contains(bounds.istr - h, bounds.jstr - h)
            && self.contains(bounds.iend + h, bounds.jend + h)
    }

    /// Value at `(i, j)`, `None` outside the window.
    #[inline]
    pub fn get(&self, i: i32, j: i32) -> Option<f64> {
        self.contains(i, j).then(|| self.data[self.offset(i, j)])
    }

    /// Fill every point with `value`.
    pub fn fill(&mut self, value: f64) {
        self.data.fill(value);
    }

    /// Raw storage, row-major.
    pub fn as_slice(&self) -> &[f64] {
        &self.data
    }

    #[inline]
    fn offset(&self, i: i32, j: i32) -> usize {
        (j - self.j0) as usize * self.ni + (i - self.i0) as usize
    }
}

impl Index<(i32, i32)> for Field2d {
    type Output = f64;

    fn index(&self, (i, j): (i32, i32)) -> &f64 {
        debug_assert!(self.contains(i, j), "({i}, {j}) outside field window");
        &self.data[self.offset(i, j)]
    }
}

impl IndexMut<(i32, i32)> for Field2d {
    fn index_mut(&mut self, (i, j): (i32, i32)) -> &mut f64 {
        debug_assert!(self.contains(i, j), "({i}, {j}) outside field window");
        let offset = self.offset(i, j);
        &mut self.data[offset]
    }
}

/// Three-dimensional field; levels run `1..=nk` from bottom to surface.
#[derive(Debug, Clone, PartialEq)]
pub struct Field3d {
    i0: i32,
    j0: i32,
    ni: usize,
    nj: usize,
    nk: usize,
    data: Vec<f64>,
}

impl Field3d {
    /// Field covering `i_range` × `j_range` × `1..=nk`, filled with `fill`.
    pub fn new(
        i_range: RangeInclusive<i32>,
        j_range: RangeInclusive<i32>,
        nk: usize,
        fill: f64,
    ) -> Self {
        let ni = (i_range.end() - i_range.start() + 1).max(0) as usize;
        let nj = (j_range.end() - j_range.start() + 1).max(0) as usize;
        Self {
            i0: *i_range.start(),
            j0: *j_range.start(),
            ni,
            nj,
            nk,
            data: vec![fill; ni * nj * nk],
        }
    }

    /// Number of levels.
    #[inline]
    pub fn levels(&self) -> usize {
        self.nk
    }

    /// Whether `(i, j)` lies inside the horizontal window.
    #[inline]
    pub fn contains(&self, i: i32, j: i32) -> bool {
        (self.i0..self.i0 + self.ni as i32).contains(&i)
            && (self.j0..self.j0 + self.nj as i32).contains(&j)
    }

    /// Whether the window covers the tile's interior plus `halo` cells.
    pub fn covers(&self, bounds: &TileBounds, halo: usize) -> bool {
        let h = halo as i32;
        self.contains(bounds.istr - h, bounds.jstr - h)
            && self.contains(bounds.iend + h, bounds.jend + h)
    }

    /// Column at `(i, j)` ordered from the surface down.
    pub fn column_surface_down(&self, i: i32, j: i32) -> impl Iterator<Item = f64> + '_ {
        (1..=self.nk).rev().map(move |k| self[(i, j, k)])
    }

    /// Copy of the surface level.
    pub fn surface(&self) -> Field2d {
        let mut out = Field2d::new(
            self.i0..=self.i0 + self.ni as i32 - 1,
            self.j0..=self.j0 + self.nj as i32 - 1,
            0.0,
        );
        if self.nk > 0 {
            let plane = self.ni * self.nj;
            out.data
                .copy_from_slice(&self.data[(self.nk - 1) * plane..self.nk * plane]);
        }
        out
    }

    #[inline]
    fn offset(&self, i: i32, j: i32, k: usize) -> usize {
        ((k - 1) * self.nj + (j - self.j0) as usize) * self.ni + (i - self.i0) as usize
    }
}

impl Index<(i32, i32, usize)> for Field3d {
    type Output = f64;

    fn index(&self, (i, j, k): (i32, i32, usize)) -> &f64 {
        debug_assert!(self.contains(i, j) && (1..=self.nk).contains(&k));
        &self.data[self.offset(i, j, k)]
    }
}

impl IndexMut<(i32, i32, usize)> for Field3d {
    fn index_mut(&mut self, (i, j, k): (i32, i32, usize)) -> &mut f64 {
        debug_assert!(self.contains(i, j) && (1..=self.nk).contains(&k));
        let offset = self.offset(i, j, k);
        &mut self.data[offset]
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn domain(lm: usize, mm: usize, nti: usize, ntj: usize) -> GridDomain {
        GridDomain::new(lm, mm, nti, ntj, false, false).unwrap()
    }

    #[test]
    fn remainder_goes_to_first_tiles() {
        let d = domain(10, 4, 3, 1);
        let spans: Vec<_> = (0..3)
            .map(|ti| {
                let t = d.tile(ti, 0).unwrap();
                (t.istr, t.iend)
            })
            .collect();
        assert_eq!(spans, vec![(1, 4), (5, 7), (8, 10)]);
    }

    #[test]
    fn edge_flags_extend_bounds() {
        let d = domain(10, 6, 2, 2);
        let sw = d.tile(0, 0).unwrap();
        assert_eq!(sw.edges, EdgeFlags::WESTERN | EdgeFlags::SOUTHERN);
        assert_eq!((sw.istr_r(), sw.iend_r()), (0, 5));
        assert_eq!((sw.jstr_r(), sw.jend_r()), (0, 3));

        let ne = d.tile(1, 1).unwrap();
        assert_eq!((ne.istr_r(), ne.iend_r()), (6, 11));
        assert_eq!((ne.jstr_r(), ne.jend_r()), (4, 7));
    }

    #[test]
    fn malformed_bounds_rejected() {
        let d = domain(10, 6, 1, 1);
        let err = TileBounds::new(&d, (5, 4), (1, 6), EdgeFlags::empty()).unwrap_err();
        assert!(matches!(err, DecompositionError::MalformedBounds { axis: 'i', .. }));
        assert!(TileBounds::new(&d, (1, 10), (0, 6), EdgeFlags::empty()).is_err());
        assert!(GridDomain::new(3, 3, 4, 1, false, false).is_err());
        assert!(d.tile(1, 0).is_err());
    }

    #[test]
    fn neighbours_wrap_only_when_periodic() {
        let closed = domain(8, 8, 2, 2);
        let n = closed.neighbours(0, 0);
        assert_eq!((n.west, n.east, n.south, n.north), (None, Some(1), None, Some(2)));

        let periodic = GridDomain::new(8, 8, 2, 1, true, false).unwrap();
        let n = periodic.neighbours(0, 0);
        assert_eq!((n.west, n.east), (Some(1), Some(1)));

        let single = GridDomain::new(8, 8, 1, 1, true, false).unwrap();
        assert_eq!(single.neighbours(0, 0).west, Some(0));
    }

    #[test]
    fn field2d_window_indexing() {
        let d = domain(4, 4, 1, 1);
        let t = d.tile(0, 0).unwrap();
        let mut f = Field2d::for_tile(&t, 2);
        assert_eq!(f.i_range(), -1..=6);
        f[(-1, 6)] = 3.5;
        assert_eq!(f.get(-1, 6), Some(3.5));
        assert_eq!(f.get(7, 0), None);
        assert!(f.covers(&t, 2));
        assert!(!f.covers(&t, 3));
    }

    #[test]
    fn field3d_surface_and_column() {
        let mut f = Field3d::new(0..=1, 0..=1, 3, 0.0);
        for k in 1..=3 {
            f[(1, 1, k)] = k as f64;
        }
        let column: Vec<f64> = f.column_surface_down(1, 1).collect();
        assert_eq!(column, vec![3.0, 2.0, 1.0]);
        assert_eq!(f.surface()[(1, 1)], 3.0);
    }
}
