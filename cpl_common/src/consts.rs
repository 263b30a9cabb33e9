//! Workspace-wide constants.
//!
//! Single source of truth for protocol limits and the physical reference
//! values used by derived export fields.

/// Maximum length in bytes of a field code (`"SST"`, `"FRZMLT"`, ...).
pub const FIELD_CODE_LEN: usize = 16;

/// Default number of ghost points on each side of a tile.
pub const DEFAULT_HALO_WIDTH: usize = 2;

/// Default upper bound for a blocking receive [ms].
pub const DEFAULT_RECV_TIMEOUT_MS: u64 = 30_000;

/// Default depth threshold of the mixed-layer scan [m, negative downward].
pub const DEFAULT_MIXED_LAYER_THRESHOLD: f64 = -10.0;

/// Reference sea water density [kg/m³].
pub const RHO0: f64 = 1025.0;

/// Specific heat capacity of sea water [J/(kg·K)].
pub const CP_SEAWATER: f64 = 3985.0;

/// Linear freezing point slope: `Tf = -FREEZING_SLOPE * S` [°C/psu].
pub const FREEZING_SLOPE: f64 = 0.054;

/// Default layer thickness assumed by the closed-form melt potential [m].
pub const DEFAULT_MELT_LAYER_THICKNESS: f64 = 5.0;

/// Lower bound of the freeze/melt potential [W/m²].
pub const MELT_POTENTIAL_FLOOR: f64 = -1000.0;
