use mapstream_common::{DimensionId, SubmapPos};

use crate::submap::{Submap, TerrainId};

/// World generation, seen from the streaming layer.
///
/// Called when a submap is needed and no stored copy exists.
pub trait SubmapGenerator {
    fn generate(&mut self, dim: &DimensionId, pos: SubmapPos) -> Submap;
}

/// Generates uniform submaps of a single terrain. Open ground everywhere.
#[derive(Debug, Clone, Copy, Default)]
pub struct FlatGenerator {
    pub terrain: TerrainId,
}

impl FlatGenerator {
    pub fn new(terrain: TerrainId) -> Self {
        Self { terrain }
    }
}

impl SubmapGenerator for FlatGenerator {
    fn generate(&mut self, _dim: &DimensionId, _pos: SubmapPos) -> Submap {
        Submap::uniform(self.terrain)
    }
}

impl<F> SubmapGenerator for F
where
    F: FnMut(&DimensionId, SubmapPos) -> Submap,
{
    fn generate(&mut self, dim: &DimensionId, pos: SubmapPos) -> Submap {
        self(dim, pos)
    }
}
