//! Rank layout of the shared world.
//!
//! Every coupled model owns a contiguous block of ranks, in the order the
//! `[[models]]` tables appear in the configuration.

use std::ops::Range;

use cpl_common::config::ConfigError;
use cpl_common::shm::link::ModelId;
use serde::{Deserialize, Serialize};

/// One `[[models]]` entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ModelLayout {
    /// Model identity.
    pub name: ModelId,
    /// Number of ranks (tiles) the model runs on.
    pub ranks: usize,
}

/// Model identity → rank range.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ModelRegistry {
    blocks: Vec<(ModelId, Range<usize>)>,
}

impl ModelRegistry {
    /// Assign consecutive rank blocks in layout order.
    pub fn from_layouts(layouts: &[ModelLayout]) -> Result<Self, ConfigError> {
        if layouts.is_empty() {
            return Err(ConfigError::ValidationError(
                "at least one [[models]] entry is required".to_string(),
            ));
        }
        let mut blocks: Vec<(ModelId, Range<usize>)> = Vec::with_capacity(layouts.len());
        let mut next = 0;
        for layout in layouts {
            if layout.ranks == 0 {
                return Err(ConfigError::ValidationError(format!(
                    "model '{}' must run on at least one rank",
                    layout.name
                )));
            }
            if blocks.iter().any(|(id, _)| *id == layout.name) {
                return Err(ConfigError::ValidationError(format!(
                    "model '{}' listed twice",
                    layout.name
                )));
            }
            blocks.push((layout.name, next..next + layout.ranks));
            next += layout.ranks;
        }
        Ok(Self { blocks })
    }

    /// Ranks of `model`.
    pub fn ranks_of(&self, model: ModelId) -> Option<Range<usize>> {
        self.blocks
            .iter()
            .find(|(id, _)| *id == model)
            .map(|(_, r)| r.clone())
    }

    /// Model running on `rank`.
    pub fn model_of(&self, rank: usize) -> Option<ModelId> {
        self.blocks
            .iter()
            .find(|(_, r)| r.contains(&rank))
            .map(|(id, _)| *id)
    }

    /// Total ranks of all models.
    pub fn world_size(&self) -> usize {
        self.blocks.last().map_or(0, |(_, r)| r.end)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn contiguous_blocks_in_order() {
        let reg = ModelRegistry::from_layouts(&[
            ModelLayout { name: ModelId::Ocean, ranks: 2 },
            ModelLayout { name: ModelId::Ice, ranks: 3 },
        ])
        .unwrap();
        assert_eq!(reg.ranks_of(ModelId::Ocean), Some(0..2));
        assert_eq!(reg.ranks_of(ModelId::Ice), Some(2..5));
        assert_eq!(reg.ranks_of(ModelId::Wave), None);
        assert_eq!(reg.model_of(4), Some(ModelId::Ice));
        assert_eq!(reg.model_of(5), None);
        assert_eq!(reg.world_size(), 5);
    }

    #[test]
    fn duplicates_and_empty_blocks_rejected() {
        let dup = [
            ModelLayout { name: ModelId::Ocean, ranks: 1 },
            ModelLayout { name: ModelId::Ocean, ranks: 1 },
        ];
        assert!(ModelRegistry::from_layouts(&dup).is_err());
        assert!(
            ModelRegistry::from_layouts(&[ModelLayout { name: ModelId::Ice, ranks: 0 }]).is_err()
        );
        assert!(ModelRegistry::from_layouts(&[]).is_err());
    }
}
