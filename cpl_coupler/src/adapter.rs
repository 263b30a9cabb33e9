//! Conversion between native arrays and attribute vector columns.
//!
//! Column position `p` of a field is the `p`-th halo-extended point of the
//! tile in row-major order, the same order as the tile's segment map.
//! Values in a column live on the field's exchange staggering (rho unless
//! configured otherwise); imports onto another staggering go through a
//! rho work array whose halo is reconciled before averaging.

use tracing::{debug, warn};

use crate::boundary::BoundaryServices;
use crate::config::VerticalSection;
use crate::error::CouplingError;
use crate::grid::{Field2d, Field3d, Staggering, TileBounds};
use crate::native::NativeModel;
use crate::registry::{Derivation, FieldDescriptor, MinMax};
use crate::thermo::{FreezeMeltAccumulator, ThermoParams};
use crate::vertical::mixed_layer_mean;

/// Rho points averaged onto one point of `staggering`, as `(di, dj)`.
fn stencil(staggering: Staggering) -> &'static [(i32, i32)] {
    match staggering {
        Staggering::Rho => &[(0, 0)],
        Staggering::U => &[(-1, 0), (0, 0)],
        Staggering::V => &[(0, -1), (0, 0)],
        Staggering::Psi => &[(-1, -1), (0, -1), (-1, 0), (0, 0)],
    }
}

fn stencil_mean(staggering: Staggering, mut at: impl FnMut(i32, i32) -> f64, i: i32, j: i32) -> f64 {
    let points = stencil(staggering);
    points.iter().map(|&(di, dj)| at(i + di, j + dj)).sum::<f64>() / points.len() as f64
}

/// Average rho values of `work` onto `target`.
///
/// u points are filled over `istr..=iend_r` × `jstr_r..=jend_r`, v points
/// over `istr_r..=iend_r` × `jstr..=jend_r`, psi points over
/// `istr..=iend_r` × `jstr..=jend_r` and rho points over the whole
/// halo-extended tile.
pub fn interpolate(work: &Field2d, target: &mut Field2d, staggering: Staggering, bounds: &TileBounds) {
    let (i_lo, j_lo) = match staggering {
        Staggering::Rho => (bounds.istr_r(), bounds.jstr_r()),
        Staggering::U => (bounds.istr, bounds.jstr_r()),
        Staggering::V => (bounds.istr_r(), bounds.jstr),
        Staggering::Psi => (bounds.istr, bounds.jstr),
    };
    for j in j_lo..=bounds.jend_r() {
        for i in i_lo..=bounds.iend_r() {
            target[(i, j)] = stencil_mean(staggering, |ii, jj| work[(ii, jj)], i, j);
        }
    }
}

fn covers_extended(contains: impl Fn(i32, i32) -> bool, bounds: &TileBounds) -> bool {
    contains(bounds.istr_r(), bounds.jstr_r()) && contains(bounds.iend_r(), bounds.jend_r())
}

/// Per-tile import/export of registry fields.
#[derive(Debug, Clone)]
pub struct FieldAdapter {
    rank: usize,
    bounds: TileBounds,
    halo: usize,
    points: Vec<(i32, i32)>,
    vertical: VerticalSection,
    thermo: ThermoParams,
    interval_s: f64,
}

impl FieldAdapter {
    /// Adapter for the tile `bounds` with `halo` ghost cells.
    pub fn new(
        rank: usize,
        bounds: TileBounds,
        halo: usize,
        vertical: VerticalSection,
        thermo: ThermoParams,
        interval_s: f64,
    ) -> Self {
        Self {
            rank,
            bounds,
            halo,
            points: bounds.extended_points_iter().collect(),
            vertical,
            thermo,
            interval_s,
        }
    }

    /// Number of column entries, one per halo-extended point.
    pub fn lsize(&self) -> usize {
        self.points.len()
    }

    /// Tile served.
    pub fn bounds(&self) -> &TileBounds {
        &self.bounds
    }

    fn check_column(&self, desc: &FieldDescriptor, len: usize) -> Result<(), CouplingError> {
        if len != self.points.len() {
            return Err(CouplingError::SizeMismatch {
                rank: self.rank,
                what: format!("column of field '{}'", desc.code),
                expected: self.points.len(),
                found: len,
            });
        }
        Ok(())
    }

    fn missing(&self, desc: &FieldDescriptor, array: &str) -> CouplingError {
        CouplingError::MissingArray {
            rank: self.rank,
            code: desc.code.clone(),
            array: array.to_string(),
        }
    }

    fn misshapen(&self, desc: &FieldDescriptor, array: &str) -> CouplingError {
        CouplingError::ArrayShape {
            rank: self.rank,
            code: desc.code.clone(),
            array: array.to_string(),
        }
    }

    fn array3d<'m>(
        &self,
        model: &'m dyn NativeModel,
        desc: &FieldDescriptor,
        name: &str,
        halo: usize,
    ) -> Result<&'m Field3d, CouplingError> {
        let field = model.array3d(name).ok_or_else(|| self.missing(desc, name))?;
        let covered = if halo == 0 {
            covers_extended(|i, j| field.contains(i, j), &self.bounds)
        } else {
            field.covers(&self.bounds, halo)
        };
        if !covered || field.levels() == 0 {
            return Err(self.misshapen(desc, name));
        }
        Ok(field)
    }

    /// Fold the column's extremes into the descriptor and log them.
    fn observe(&self, desc: &mut FieldDescriptor, column: &[f64], direction: &'static str) -> Option<MinMax> {
        let range = MinMax::of(column.iter().copied())?;
        desc.record(range);
        debug!(
            rank = self.rank,
            code = %desc.code,
            direction,
            min = range.min,
            max = range.max,
            "Field exchanged"
        );
        if desc.out_of_range(range) {
            warn!(
                rank = self.rank,
                code = %desc.code,
                min = range.min,
                max = range.max,
                valid_min = ?desc.valid_min,
                valid_max = ?desc.valid_max,
                "Field outside its valid range"
            );
        }
        Some(range)
    }

    /// Write an inbound column into the field's native 2-D array.
    ///
    /// Values are converted with `value * scale + offset`. The target
    /// array ends with periodic and neighbour halos reconciled.
    pub fn import(
        &self,
        desc: &mut FieldDescriptor,
        column: &[f64],
        model: &mut dyn NativeModel,
        boundary: &dyn BoundaryServices,
    ) -> Result<Option<MinMax>, CouplingError> {
        self.check_column(desc, column.len())?;
        let converted: Vec<f64> = column.iter().map(|&v| desc.convert(v)).collect();

        let array = desc.array.clone();
        let target = model.array2d_mut(&array).ok_or_else(|| self.missing(desc, &array))?;
        if !target.covers(&self.bounds, self.halo) {
            return Err(self.misshapen(desc, &array));
        }

        if desc.staggering == desc.exchange_staggering {
            for (&(i, j), &v) in self.points.iter().zip(&converted) {
                target[(i, j)] = v;
            }
        } else {
            let mut work = Field2d::for_tile(&self.bounds, self.halo);
            for (&(i, j), &v) in self.points.iter().zip(&converted) {
                work[(i, j)] = v;
            }
            boundary.apply_periodic(&mut work);
            boundary.exchange_halo(&mut work)?;
            interpolate(&work, target, desc.staggering, &self.bounds);
        }

        boundary.apply_periodic(target);
        boundary.exchange_halo(target)?;
        Ok(self.observe(desc, &converted, "import"))
    }

    /// Fill an outbound column from native arrays.
    ///
    /// The freeze/melt accumulator is reset by every freeze/melt export,
    /// including a failed one.
    pub fn export(
        &self,
        desc: &mut FieldDescriptor,
        column: &mut [f64],
        model: &dyn NativeModel,
        accumulator: &mut FreezeMeltAccumulator,
        boundary: &dyn BoundaryServices,
    ) -> Result<Option<MinMax>, CouplingError> {
        self.check_column(desc, column.len())?;

        match desc.derivation {
            Derivation::Direct => {
                let src = model
                    .array2d(&desc.array)
                    .ok_or_else(|| self.missing(desc, &desc.array))?;
                if !covers_extended(|i, j| src.contains(i, j), &self.bounds) {
                    return Err(self.misshapen(desc, &desc.array));
                }
                self.gather(desc, column, |i, j| src[(i, j)]);
            }
            Derivation::SurfaceSlice => {
                let src = self.array3d(model, desc, &desc.array, 0)?;
                let top = src.levels();
                self.gather(desc, column, |i, j| src[(i, j, top)]);
            }
            Derivation::MixedLayerMean => {
                let mut derived = self.mixed_layer_field(desc, model)?;
                boundary.lateral_bc(&mut derived, desc.staggering);
                boundary.exchange_halo(&mut derived)?;
                self.gather(desc, column, |i, j| derived[(i, j)]);
            }
            Derivation::FreezeMeltPotential => {
                let derived = self.freeze_melt_field(desc, model, accumulator);
                accumulator.reset();
                let mut derived = derived?;
                boundary.lateral_bc(&mut derived, Staggering::Rho);
                boundary.exchange_halo(&mut derived)?;
                self.gather(desc, column, |i, j| derived[(i, j)]);
            }
        }

        Ok(self.observe(desc, column, "export"))
    }

    fn gather(&self, desc: &FieldDescriptor, column: &mut [f64], value: impl Fn(i32, i32) -> f64) {
        for (slot, &(i, j)) in column.iter_mut().zip(&self.points) {
            *slot = desc.convert(value(i, j));
        }
    }

    /// Depth-weighted mixed-layer mean at the interior points of the
    /// field's staggering.
    fn mixed_layer_field(
        &self,
        desc: &FieldDescriptor,
        model: &dyn NativeModel,
    ) -> Result<Field2d, CouplingError> {
        let v = &self.vertical;
        let src = self.array3d(model, desc, &desc.array, 0)?;
        let z = self.array3d(model, desc, &v.depth_array, 1)?;
        let hz = self.array3d(model, desc, &v.thickness_array, 1)?;
        let hbls = if v.use_model_mixed_layer {
            let field = model
                .array2d(&v.mixed_layer_array)
                .ok_or_else(|| self.missing(desc, &v.mixed_layer_array))?;
            if !field.covers(&self.bounds, 1) {
                return Err(self.misshapen(desc, &v.mixed_layer_array));
            }
            Some(field)
        } else {
            None
        };

        let nk = src.levels().min(z.levels()).min(hz.levels());
        let stagger = desc.staggering;
        let b = &self.bounds;
        let mut derived = Field2d::for_tile(b, self.halo);
        let mut values = Vec::with_capacity(nk);
        let mut depths = Vec::with_capacity(nk);
        let mut thickness = Vec::with_capacity(nk);

        for j in b.jstr..=b.jend {
            for i in b.istr..=b.iend {
                values.clear();
                depths.clear();
                thickness.clear();
                for k in (1..=nk).rev() {
                    values.push(src[(i, j, k)]);
                    depths.push(stencil_mean(stagger, |ii, jj| z[(ii, jj, k)], i, j));
                    thickness.push(stencil_mean(stagger, |ii, jj| hz[(ii, jj, k)], i, j));
                }
                let threshold = match hbls {
                    Some(h) => -stencil_mean(stagger, |ii, jj| h[(ii, jj)], i, j),
                    None => v.threshold,
                };
                derived[(i, j)] = mixed_layer_mean(&values, &depths, &thickness, threshold);
            }
        }
        Ok(derived)
    }

    /// Freeze/melt potential at interior rho points.
    fn freeze_melt_field(
        &self,
        desc: &FieldDescriptor,
        model: &dyn NativeModel,
        accumulator: &FreezeMeltAccumulator,
    ) -> Result<Field2d, CouplingError> {
        let temp = self.array3d(model, desc, &self.thermo.temperature_array, 0)?;
        let salt = self.array3d(model, desc, &self.thermo.salinity_array, 0)?;
        let (kt, ks) = (temp.levels(), salt.levels());

        let b = &self.bounds;
        let mut derived = Field2d::for_tile(b, self.halo);
        for j in b.jstr..=b.jend {
            for i in b.istr..=b.iend {
                derived[(i, j)] = accumulator.potential_at(
                    i,
                    j,
                    temp[(i, j, kt)],
                    salt[(i, j, ks)],
                    &self.thermo,
                    self.interval_s,
                );
            }
        }
        Ok(derived)
    }
}
