//! Field registry: what each exchanged code means on this side.
//!
//! Descriptors are read from `[[fields]]`, kept in registration order, and
//! resolved against the `[lists]` section at initialisation. The running
//! min/max of each descriptor is updated on every import and export.

use std::collections::HashMap;

use bitflags::bitflags;
use cpl_common::config::ConfigError;
use cpl_common::field_code::FieldCode;
use serde::{Deserialize, Serialize};

use crate::error::CouplingError;
use crate::grid::Staggering;

/// How an exported value is obtained from native arrays.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Derivation {
    /// A 2-D native array as is.
    #[default]
    Direct,
    /// Surface level of a 3-D native array.
    SurfaceSlice,
    /// Depth-weighted mean of a 3-D array over the surface mixed layer.
    MixedLayerMean,
    /// Freeze/melt potential from the sub-step accumulator.
    FreezeMeltPotential,
}

bitflags! {
    /// Lists a field belongs to.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
    pub struct Direction: u8 {
        /// Received from the peer.
        const IMPORT = 0b01;
        /// Sent to the peer.
        const EXPORT = 0b10;
    }
}

/// Running extremes of a field.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct MinMax {
    /// Smallest value seen.
    pub min: f64,
    /// Largest value seen.
    pub max: f64,
}

impl MinMax {
    /// Extremes of `values`, `None` when empty.
    pub fn of(values: impl IntoIterator<Item = f64>) -> Option<Self> {
        values.into_iter().fold(None, |acc, v| {
            Some(match acc {
                None => MinMax { min: v, max: v },
                Some(m) => MinMax {
                    min: m.min.min(v),
                    max: m.max.max(v),
                },
            })
        })
    }

    /// Widen to include `other`.
    pub fn merge(self, other: MinMax) -> MinMax {
        MinMax {
            min: self.min.min(other.min),
            max: self.max.max(other.max),
        }
    }
}

fn one() -> f64 {
    1.0
}

/// One `[[fields]]` entry plus its runtime state.
///
/// # TOML Example
///
/// ```toml
/// [[fields]]
/// code = "UOCN"
/// array = "u"
/// staggering = "u"
/// derivation = "mixed_layer_mean"
/// valid_min = -3.0
/// valid_max = 3.0
/// ```
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FieldDescriptor {
    /// Exchanged code.
    pub code: FieldCode,
    /// Native array the field is read from or written to.
    pub array: String,
    /// Grid point type of the native array.
    #[serde(default)]
    pub staggering: Staggering,
    /// Grid point type of the values in the transfer buffer.
    #[serde(default)]
    pub exchange_staggering: Staggering,
    /// Multiplier applied as `value * scale + offset`.
    #[serde(default = "one")]
    pub scale: f64,
    /// Additive term applied after `scale`.
    #[serde(default)]
    pub offset: f64,
    /// Lower end of the physically plausible range.
    #[serde(default)]
    pub valid_min: Option<f64>,
    /// Upper end of the physically plausible range.
    #[serde(default)]
    pub valid_max: Option<f64>,
    /// Export derivation.
    #[serde(default)]
    pub derivation: Derivation,
    /// Lists this field belongs to, set when lists are resolved.
    #[serde(skip)]
    pub membership: Direction,
    /// Extremes over every exchange so far.
    #[serde(skip)]
    pub observed: Option<MinMax>,
}

impl FieldDescriptor {
    /// Apply `value * scale + offset`.
    #[inline]
    pub fn convert(&self, value: f64) -> f64 {
        value * self.scale + self.offset
    }

    /// Fold a round's extremes into the running extremes.
    pub fn record(&mut self, round: MinMax) {
        self.observed = Some(self.observed.map_or(round, |seen| seen.merge(round)));
    }

    /// Whether `range` leaves the configured valid range.
    pub fn out_of_range(&self, range: MinMax) -> bool {
        self.valid_min.is_some_and(|lo| range.min < lo)
            || self.valid_max.is_some_and(|hi| range.max > hi)
    }

    /// Static checks on one descriptor.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let fail = |msg: &str| Err(ConfigError::ValidationError(format!("field '{}': {msg}", self.code)));

        if self.array.is_empty() {
            return fail("array name cannot be empty");
        }
        if !self.scale.is_finite() || self.scale == 0.0 {
            return fail("scale must be finite and non-zero");
        }
        if !self.offset.is_finite() {
            return fail("offset must be finite");
        }
        if let (Some(lo), Some(hi)) = (self.valid_min, self.valid_max) {
            if lo > hi {
                return fail("valid_min exceeds valid_max");
            }
        }
        if self.exchange_staggering != Staggering::Rho
            && self.exchange_staggering != self.staggering
        {
            return fail("exchange_staggering must be rho or equal to staggering");
        }
        if self.derivation == Derivation::FreezeMeltPotential && self.staggering != Staggering::Rho {
            return fail("freeze/melt potential lives on rho points");
        }
        Ok(())
    }
}

/// `[lists]` section: codes in transfer order.
///
/// # TOML Example
///
/// ```toml
/// [lists]
/// import = ["UICE", "VICE"]
/// export = ["SST", "SSS", "FRZMLT", "UOCN", "VOCN"]
/// ```
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ExchangeLists {
    /// Codes received from the peer.
    #[serde(default)]
    pub import: Vec<FieldCode>,
    /// Codes sent to the peer.
    #[serde(default)]
    pub export: Vec<FieldCode>,
}

/// Lists resolved to registry positions.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ResolvedLists {
    /// Registry positions of imported fields, in list order.
    pub import: Vec<usize>,
    /// Registry positions of exported fields, in list order.
    pub export: Vec<usize>,
}

/// All field descriptors of this side, in registration order.
#[derive(Debug, Clone, Default)]
pub struct FieldRegistry {
    fields: Vec<FieldDescriptor>,
    by_code: HashMap<FieldCode, usize>,
}

impl FieldRegistry {
    /// Register descriptors, rejecting duplicate codes and invalid entries.
    pub fn new(fields: Vec<FieldDescriptor>) -> Result<Self, ConfigError> {
        let mut by_code = HashMap::with_capacity(fields.len());
        for (index, field) in fields.iter().enumerate() {
            field.validate()?;
            if by_code.insert(field.code.clone(), index).is_some() {
                return Err(ConfigError::ValidationError(format!(
                    "field code '{}' registered twice",
                    field.code
                )));
            }
        }
        Ok(Self { fields, by_code })
    }

    /// Number of registered fields.
    pub fn len(&self) -> usize {
        self.fields.len()
    }

    /// Whether nothing is registered.
    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }

    /// Position of `code`.
    pub fn position(&self, code: &str) -> Option<usize> {
        self.fields.iter().position(|f| f.code == code)
    }

    /// Descriptor of `code`.
    pub fn get(&self, code: &FieldCode) -> Option<&FieldDescriptor> {
        self.by_code.get(code).map(|&i| &self.fields[i])
    }

    /// Descriptor at registry position `index`.
    pub fn at(&self, index: usize) -> &FieldDescriptor {
        &self.fields[index]
    }

    /// Mutable descriptor at registry position `index`.
    pub fn at_mut(&mut self, index: usize) -> &mut FieldDescriptor {
        &mut self.fields[index]
    }

    /// Descriptors in registration order.
    pub fn iter(&self) -> impl Iterator<Item = &FieldDescriptor> {
        self.fields.iter()
    }

    /// Resolve list codes to positions and record list membership.
    ///
    /// Unknown codes are rejected. Imported fields must be plain 2-D
    /// arrays. Exported fields are gathered at their native points, so
    /// their exchange staggering must equal their native staggering.
    pub fn resolve(&mut self, lists: &ExchangeLists) -> Result<ResolvedLists, CouplingError> {
        for field in &mut self.fields {
            field.membership = Direction::empty();
        }

        let mut resolved = ResolvedLists::default();
        for (codes, direction, list, out) in [
            (&lists.import, Direction::IMPORT, "import", &mut resolved.import),
            (&lists.export, Direction::EXPORT, "export", &mut resolved.export),
        ] {
            for code in codes {
                let &index = self.by_code.get(code).ok_or_else(|| CouplingError::UnknownField {
                    code: code.to_string(),
                    list,
                })?;
                if out.contains(&index) {
                    return Err(ConfigError::ValidationError(format!(
                        "{list} list names '{code}' twice"
                    ))
                    .into());
                }
                let field = &mut self.fields[index];
                if direction == Direction::IMPORT && field.derivation != Derivation::Direct {
                    return Err(ConfigError::ValidationError(format!(
                        "imported field '{code}' must use the direct derivation"
                    ))
                    .into());
                }
                if direction == Direction::EXPORT && field.exchange_staggering != field.staggering {
                    return Err(ConfigError::ValidationError(format!(
                        "exported field '{code}' lives on {:?} points but is exchanged on {:?} points",
                        field.staggering, field.exchange_staggering
                    ))
                    .into());
                }
                field.membership |= direction;
                out.push(index);
            }
        }
        Ok(resolved)
    }
}
