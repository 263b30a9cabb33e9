//! Freeze/melt potential of the ocean surface layer.
//!
//! Between exchanges the ocean core adds the heat released by frazil ice
//! formation at every sub-step. At export a point with a positive sum
//! reports the sub-step mean; every other point reports the heat that
//! would bring the surface layer to its freezing point over one coupling
//! interval, limited below by the melt-potential floor.

use serde::{Deserialize, Serialize};

use cpl_common::consts::{
    CP_SEAWATER, DEFAULT_MELT_LAYER_THICKNESS, FREEZING_SLOPE, MELT_POTENTIAL_FLOOR, RHO0,
};

use crate::grid::{Field2d, TileBounds};

/// Freezing temperature (°C) of seawater with salinity `salinity`.
#[inline]
pub fn freezing_point(salinity: f64) -> f64 {
    -FREEZING_SLOPE * salinity
}

/// `[thermo]` section.
///
/// # TOML Example
///
/// ```toml
/// [thermo]
/// rho0 = 1025.0
/// cp = 3985.0
/// layer_thickness = 5.0
/// melt_floor = -1000.0
/// temperature_array = "temp"
/// salinity_array = "salt"
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ThermoParams {
    /// Reference density (kg/m³).
    pub rho0: f64,
    /// Specific heat of seawater (J/kg/K).
    pub cp: f64,
    /// Thickness of the surface layer (m).
    pub layer_thickness: f64,
    /// Lower limit of the melt potential (W/m²).
    pub melt_floor: f64,
    /// 3-D temperature array.
    pub temperature_array: String,
    /// 3-D salinity array.
    pub salinity_array: String,
}

impl Default for ThermoParams {
    fn default() -> Self {
        Self {
            rho0: RHO0,
            cp: CP_SEAWATER,
            layer_thickness: DEFAULT_MELT_LAYER_THICKNESS,
            melt_floor: MELT_POTENTIAL_FLOOR,
            temperature_array: "temp".to_string(),
            salinity_array: "salt".to_string(),
        }
    }
}

impl ThermoParams {
    /// Heat flux (W/m²) bringing water at `temperature`/`salinity` to the
    /// freezing point over `interval_s` seconds, limited below by
    /// `melt_floor`.
    pub fn melt_potential(&self, temperature: f64, salinity: f64, interval_s: f64) -> f64 {
        let flux = self.rho0 * self.cp * (freezing_point(salinity) - temperature)
            * self.layer_thickness
            / interval_s;
        flux.max(self.melt_floor)
    }
}

/// Per-point sum of freeze contributions since the last export.
#[derive(Debug, Clone)]
pub struct FreezeMeltAccumulator {
    sum: Field2d,
    substeps: u32,
}

impl FreezeMeltAccumulator {
    /// Zeroed accumulator over the tile, for `substeps` ocean steps per
    /// coupling interval.
    pub fn new(bounds: &TileBounds, halo: usize, substeps: u32) -> Self {
        Self {
            sum: Field2d::for_tile(bounds, halo),
            substeps: substeps.max(1),
        }
    }

    /// Add one sub-step's contribution at every point both fields cover.
    pub fn accumulate(&mut self, contribution: &Field2d) {
        for j in self.sum.j_range() {
            for i in self.sum.i_range() {
                if let Some(v) = contribution.get(i, j) {
                    self.sum[(i, j)] += v;
                }
            }
        }
    }

    /// Accumulated sum at `(i, j)`.
    pub fn sum_at(&self, i: i32, j: i32) -> Option<f64> {
        self.sum.get(i, j)
    }

    /// Export value at `(i, j)`: sub-step mean where freezing occurred,
    /// otherwise the melt potential of the surface water.
    pub fn potential_at(
        &self,
        i: i32,
        j: i32,
        temperature: f64,
        salinity: f64,
        params: &ThermoParams,
        interval_s: f64,
    ) -> f64 {
        let sum = self.sum[(i, j)];
        if sum > 0.0 {
            sum / f64::from(self.substeps)
        } else {
            params.melt_potential(temperature, salinity, interval_s)
        }
    }

    /// Clear every point to exactly zero.
    pub fn reset(&mut self) {
        self.sum.fill(0.0);
    }

    /// Whether every point is exactly zero.
    pub fn is_zero(&self) -> bool {
        self.sum.as_slice().iter().all(|&v| v == 0.0)
    }
}
