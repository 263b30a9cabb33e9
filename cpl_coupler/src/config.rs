//! Coupler configuration file.
//!
//! One TOML document per model side. Both sides list the same `[[models]]`
//! layout and the same global grid extents; tiling, fields and lists are
//! per side.
//!
//! # TOML Example
//!
//! ```toml
//! [shared]
//! service_name = "ocean-coupler"
//! run_id = "arctic-2026"
//!
//! [coupling]
//! model = "ocean"
//! peer = "ice"
//! interval_s = 3600.0
//! substeps = 12
//!
//! [grid]
//! lm = 64
//! mm = 48
//! ntile_i = 2
//! ntile_j = 1
//! periodic_ew = true
//!
//! [[models]]
//! name = "ocean"
//! ranks = 2
//!
//! [[models]]
//! name = "ice"
//! ranks = 2
//!
//! [[fields]]
//! code = "SST"
//! array = "temp"
//! derivation = "surface_slice"
//!
//! [lists]
//! export = ["SST"]
//! ```

use std::path::Path;
use std::time::Duration;

use cpl_common::config::{ConfigError, ConfigLoader, SharedConfig};
use cpl_common::consts::{DEFAULT_HALO_WIDTH, DEFAULT_MIXED_LAYER_THRESHOLD, DEFAULT_RECV_TIMEOUT_MS};
use cpl_common::shm::link::ModelId;
use serde::{Deserialize, Serialize};

use crate::grid::GridDomain;
use crate::registry::{ExchangeLists, FieldDescriptor, FieldRegistry};
use crate::thermo::ThermoParams;
use crate::transport::shm::DEFAULT_MAILBOX_BYTES;
use crate::world::{ModelLayout, ModelRegistry};

/// Complete coupler configuration of one model side.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct CouplerConfig {
    /// Service identity and logging.
    pub shared: SharedConfig,
    /// Pairing and timing.
    pub coupling: CouplingSection,
    /// Global extents and this side's tiling.
    pub grid: GridSection,
    /// Rank layout of the shared world.
    pub models: Vec<ModelLayout>,
    /// Mixed-layer scan inputs.
    #[serde(default)]
    pub vertical: VerticalSection,
    /// Freeze/melt potential constants.
    #[serde(default)]
    pub thermo: ThermoParams,
    /// Field descriptors in registration order.
    #[serde(default)]
    pub fields: Vec<FieldDescriptor>,
    /// Import and export lists.
    #[serde(default)]
    pub lists: ExchangeLists,
}

/// `[coupling]` section.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct CouplingSection {
    /// This side.
    pub model: ModelId,
    /// The side exchanged with.
    pub peer: ModelId,
    /// Upper bound of every blocking receive [ms].
    #[serde(default = "default_recv_timeout_ms")]
    pub recv_timeout_ms: u64,
    /// Model steps per coupling interval.
    #[serde(default = "default_substeps")]
    pub substeps: u32,
    /// Coupling interval [s].
    pub interval_s: f64,
    /// Halo cells reconciled after import.
    #[serde(default = "default_halo_width")]
    pub halo_width: usize,
    /// Capacity of each shared-memory mailbox.
    #[serde(default = "default_mailbox_bytes")]
    pub mailbox_bytes: usize,
}

fn default_recv_timeout_ms() -> u64 {
    DEFAULT_RECV_TIMEOUT_MS
}

fn default_substeps() -> u32 {
    1
}

fn default_halo_width() -> usize {
    DEFAULT_HALO_WIDTH
}

fn default_mailbox_bytes() -> usize {
    DEFAULT_MAILBOX_BYTES
}

impl CouplingSection {
    /// Receive timeout as a duration.
    pub fn recv_timeout(&self) -> Duration {
        Duration::from_millis(self.recv_timeout_ms)
    }
}

/// `[grid]` section.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct GridSection {
    /// Interior cells along i.
    pub lm: usize,
    /// Interior cells along j.
    pub mm: usize,
    /// Tiles along i.
    #[serde(default = "one_tile")]
    pub ntile_i: usize,
    /// Tiles along j.
    #[serde(default = "one_tile")]
    pub ntile_j: usize,
    /// East-west periodicity.
    #[serde(default)]
    pub periodic_ew: bool,
    /// North-south periodicity.
    #[serde(default)]
    pub periodic_ns: bool,
}

fn one_tile() -> usize {
    1
}

impl GridSection {
    /// Domain described by this section.
    pub fn domain(&self) -> Result<GridDomain, ConfigError> {
        GridDomain::new(
            self.lm,
            self.mm,
            self.ntile_i,
            self.ntile_j,
            self.periodic_ew,
            self.periodic_ns,
        )
        .map_err(|e| ConfigError::ValidationError(e.to_string()))
    }
}

/// `[vertical]` section.
///
/// Depths are negative downward. With `use_model_mixed_layer` the scan
/// threshold at each point is `-hbls` read from `mixed_layer_array`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct VerticalSection {
    /// 3-D level depths at rho points.
    pub depth_array: String,
    /// 3-D level thicknesses at rho points.
    pub thickness_array: String,
    /// Fixed scan threshold [m].
    pub threshold: f64,
    /// Use the model's boundary layer depth instead of `threshold`.
    pub use_model_mixed_layer: bool,
    /// 2-D boundary layer depth (positive).
    pub mixed_layer_array: String,
}

impl Default for VerticalSection {
    fn default() -> Self {
        Self {
            depth_array: "z_r".to_string(),
            thickness_array: "Hz".to_string(),
            threshold: DEFAULT_MIXED_LAYER_THRESHOLD,
            use_model_mixed_layer: false,
            mixed_layer_array: "hbls".to_string(),
        }
    }
}

impl CouplerConfig {
    /// Load and validate `path`.
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let config = Self::load(path)?;
        config.validate()?;
        Ok(config)
    }

    /// Semantic checks across sections.
    ///
    /// Field codes in `[lists]` are resolved later, by `initialize`.
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.shared.validate()?;

        let c = &self.coupling;
        if c.model == c.peer {
            return Err(ConfigError::ValidationError(format!(
                "model and peer are both '{}'",
                c.model
            )));
        }
        if c.recv_timeout_ms == 0 {
            return Err(ConfigError::ValidationError(
                "recv_timeout_ms must be positive".to_string(),
            ));
        }
        if c.substeps == 0 {
            return Err(ConfigError::ValidationError(
                "substeps must be at least 1".to_string(),
            ));
        }
        if !(c.interval_s.is_finite() && c.interval_s > 0.0) {
            return Err(ConfigError::ValidationError(format!(
                "interval_s {} must be a positive number of seconds",
                c.interval_s
            )));
        }
        if c.mailbox_bytes == 0 {
            return Err(ConfigError::ValidationError(
                "mailbox_bytes must be positive".to_string(),
            ));
        }

        let domain = self.grid.domain()?;
        let narrowest = (domain.lm / domain.ntile_i).min(domain.mm / domain.ntile_j);
        if c.halo_width == 0 || c.halo_width > narrowest {
            return Err(ConfigError::ValidationError(format!(
                "halo_width {} must be in 1..={narrowest} for this tiling",
                c.halo_width
            )));
        }

        let world = ModelRegistry::from_layouts(&self.models)?;
        let own = world.ranks_of(c.model).ok_or_else(|| {
            ConfigError::ValidationError(format!("model '{}' missing from [[models]]", c.model))
        })?;
        if world.ranks_of(c.peer).is_none() {
            return Err(ConfigError::ValidationError(format!(
                "peer '{}' missing from [[models]]",
                c.peer
            )));
        }
        if own.len() != domain.tile_count() {
            return Err(ConfigError::ValidationError(format!(
                "model '{}' runs on {} ranks but the grid has {} tiles",
                c.model,
                own.len(),
                domain.tile_count()
            )));
        }

        if !(self.vertical.threshold.is_finite() && self.vertical.threshold < 0.0) {
            return Err(ConfigError::ValidationError(
                "vertical.threshold must be a negative depth".to_string(),
            ));
        }

        let t = &self.thermo;
        if !(t.rho0 > 0.0 && t.cp > 0.0 && t.layer_thickness > 0.0 && t.melt_floor.is_finite()) {
            return Err(ConfigError::ValidationError(
                "thermo constants must be positive and finite".to_string(),
            ));
        }

        FieldRegistry::new(self.fields.clone())?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const BASE: &str = r#"
[shared]
service_name = "ocean-coupler"

[coupling]
model = "ocean"
peer = "ice"
interval_s = 3600.0
substeps = 4
halo_width = 2

[grid]
lm = 8
mm = 6
ntile_i = 2

[[models]]
name = "ocean"
ranks = 2

[[models]]
name = "ice"
ranks = 1

[[fields]]
code = "SST"
array = "temp"
derivation = "surface_slice"

[lists]
export = ["SST"]
"#;

    #[test]
    fn parses_with_defaults() {
        let cfg = CouplerConfig::from_toml_str(BASE).unwrap();
        cfg.validate().unwrap();
        assert_eq!(cfg.coupling.recv_timeout(), Duration::from_millis(DEFAULT_RECV_TIMEOUT_MS));
        assert_eq!(cfg.grid.ntile_j, 1);
        assert_eq!(cfg.vertical, VerticalSection::default());
        assert_eq!(cfg.thermo, ThermoParams::default());
        assert_eq!(cfg.lists.export[0], "SST");
    }

    #[test]
    fn rank_count_must_match_tiles() {
        let text = BASE.replace("ranks = 2", "ranks = 3");
        let cfg = CouplerConfig::from_toml_str(&text).unwrap();
        assert!(matches!(cfg.validate(), Err(ConfigError::ValidationError(_))));
    }

    #[test]
    fn halo_wider_than_tile_rejected() {
        let text = BASE.replace("halo_width = 2", "halo_width = 5");
        let cfg = CouplerConfig::from_toml_str(&text).unwrap();
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn self_pairing_rejected() {
        let text = BASE.replace("peer = \"ice\"", "peer = \"ocean\"");
        let cfg = CouplerConfig::from_toml_str(&text).unwrap();
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn unknown_keys_rejected() {
        let text = BASE.replace("substeps = 4", "substeps = 4\nsub_steps = 4");
        assert!(matches!(
            CouplerConfig::from_toml_str(&text),
            Err(ConfigError::ParseError(_))
        ));
    }
}
