use mapstream_common::{AreaPos, DimensionId, SubmapPos, TilePos};
use mapstream_kernel::{FurnitureId, PowerPart};
use mapstream_persist::ChunkStoreRegistry;
use std::collections::{BTreeSet, VecDeque};

/// A furniture change requested by a grid update.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FurnitureTransform {
    pub pos: SubmapPos,
    pub tile: TilePos,
    pub furniture: FurnitureId,
}

/// Furniture changes held back until every grid has finished its update.
///
/// Applied first-in-first-out, so the last change queued for a tile wins.
#[derive(Debug, Clone, Default)]
pub struct FurnitureTransformQueue {
    queue: VecDeque<FurnitureTransform>,
}

impl FurnitureTransformQueue {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, transform: FurnitureTransform) {
        self.queue.push_back(transform);
    }

    pub fn len(&self) -> usize {
        self.queue.len()
    }

    pub fn is_empty(&self) -> bool {
        self.queue.is_empty()
    }

    pub fn clear(&mut self) {
        self.queue.clear();
    }

    /// Apply every queued change in `dim` and return the areas touched.
    ///
    /// A consumer that is transformed stops being a consumer. Changes aimed
    /// at submaps that are no longer resident are dropped.
    pub fn flush(&mut self, dim: &DimensionId, registry: &mut ChunkStoreRegistry) -> BTreeSet<AreaPos> {
        let mut touched = BTreeSet::new();
        if self.queue.is_empty() {
            return touched;
        }
        let store = registry.get(dim);
        while let Some(t) = self.queue.pop_front() {
            let Some(submap) = store.lookup_in_memory_mut(t.pos) else {
                tracing::debug!(pos = %t.pos, "transform target no longer resident");
                continue;
            };
            if matches!(submap.power_part_mut(t.tile), Some(PowerPart::Consumer { .. })) {
                submap.remove_power_part(t.tile);
            }
            tracing::trace!(pos = %t.pos, tile = ?t.tile, furniture = %t.furniture.0, "furniture transformed");
            submap.set_furniture(t.tile, t.furniture);
            touched.insert(t.pos.area());
        }
        touched
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use mapstream_kernel::{Submap, TerrainId};
    use mapstream_persist::PersistConfig;

    #[test]
    fn last_queued_wins() {
        let tmp = tempfile::tempdir().unwrap();
        let mut reg = ChunkStoreRegistry::open(&PersistConfig::at(tmp.path())).unwrap();
        let dim = DimensionId::primary();
        let pos = SubmapPos::new(0, 0, 0);
        let tile = TilePos::new(2, 2).unwrap();
        let mut sm = Submap::uniform(TerrainId(1));
        sm.set_power_part(tile, PowerPart::Consumer {
            watts: 10,
            off_state: Some(FurnitureId::new("f_lamp_off")),
        });
        reg.get(&dim).add(pos, Box::new(sm)).unwrap();

        let mut queue = FurnitureTransformQueue::new();
        for furniture in ["f_lamp_off", "f_lamp_broken"] {
            queue.push(FurnitureTransform {
                pos,
                tile,
                furniture: FurnitureId::new(furniture),
            });
        }
        queue.push(FurnitureTransform {
            pos: SubmapPos::new(40, 40, 0),
            tile,
            furniture: FurnitureId::new("f_ghost"),
        });

        let touched = queue.flush(&dim, &mut reg);
        assert!(queue.is_empty());
        assert_eq!(touched.into_iter().collect::<Vec<_>>(), vec![pos.area()]);
        let sm = reg.store(&dim).unwrap().lookup_in_memory(pos).unwrap();
        assert_eq!(sm.furniture(tile), Some(&FurnitureId::new("f_lamp_broken")));
        assert!(!sm.has_power_parts());
    }
}
