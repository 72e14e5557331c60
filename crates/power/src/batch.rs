//! Out-of-bubble catch-up for distribution grids.

use mapstream_common::SubmapPos;
use mapstream_kernel::{BatteryPool, MAX_GRID_CATCHUP_TURNS, catch_up_battery_pool};
use mapstream_persist::ChunkStoreRegistry;

use crate::grid::DistributionGrid;
use crate::tracker::DistributionGridTracker;

/// A grid together with the store holding its batteries.
struct GridPool<'a> {
    grid: &'a mut DistributionGrid,
    registry: &'a mut ChunkStoreRegistry,
}

impl BatteryPool for GridPool<'_> {
    fn net_watts(&self) -> i64 {
        self.grid.net_w()
    }

    fn apply_net_power(&mut self, watt_turns: i64) -> i64 {
        self.grid.apply_net_power(watt_turns, self.registry)
    }
}

pub(crate) fn catch_up_grid_pool(
    grid: &mut DistributionGrid,
    registry: &mut ChunkStoreRegistry,
    turns: i64,
) -> i64 {
    let mut pool = GridPool { grid, registry };
    catch_up_battery_pool(&mut pool, turns, MAX_GRID_CATCHUP_TURNS)
}

/// Apply `turns` of the grid's net power at `pos` as one battery change.
///
/// Returns the signed energy actually applied; 0 when `pos` is in no grid.
pub fn catch_up_grid(
    tracker: &mut DistributionGridTracker,
    pos: SubmapPos,
    registry: &mut ChunkStoreRegistry,
    turns: i64,
) -> i64 {
    let Some(id) = tracker.grid_id_at(pos, registry) else {
        return 0;
    };
    match tracker.grid_mut(id) {
        Some(grid) => catch_up_grid_pool(grid, registry, turns),
        None => 0,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use mapstream_common::{DimensionId, TilePos};
    use mapstream_kernel::{PowerPart, Submap, TerrainId};
    use mapstream_persist::PersistConfig;
    use mapstream_stream::SubmapLoadListener;

    fn setup(parts: &[PowerPart]) -> (tempfile::TempDir, ChunkStoreRegistry, DistributionGridTracker) {
        let tmp = tempfile::tempdir().unwrap();
        let mut reg = ChunkStoreRegistry::open(&PersistConfig::at(tmp.path().join("save"))).unwrap();
        let mut sm = Submap::uniform(TerrainId(1));
        for (i, part) in parts.iter().enumerate() {
            sm.set_power_part(TilePos::new(i as u8, 0).unwrap(), part.clone());
        }
        let primary = DimensionId::primary();
        reg.get(&primary).add(SubmapPos::new(0, 0, 0), Box::new(sm)).unwrap();
        let mut tracker = DistributionGridTracker::new(primary.clone());
        tracker.on_submap_loaded(SubmapPos::new(0, 0, 0), &primary, &reg);
        (tmp, reg, tracker)
    }

    fn stored(reg: &ChunkStoreRegistry) -> Vec<i64> {
        reg.store(&DimensionId::primary())
            .unwrap()
            .lookup_in_memory(SubmapPos::new(0, 0, 0))
            .unwrap()
            .power_parts()
            .filter(|(_, p)| p.is_battery())
            .map(|(_, p)| p.stored())
            .collect()
    }

    #[test]
    fn surplus_fills_batteries_in_order() {
        let (_tmp, mut reg, mut tracker) = setup(&[
            PowerPart::Generator { watts: 30 },
            PowerPart::Battery { capacity: 100, stored: 90 },
            PowerPart::Battery { capacity: 1000, stored: 0 },
        ]);
        let applied = catch_up_grid(&mut tracker, SubmapPos::new(1, 1, 0), &mut reg, 10);
        assert_eq!(applied, 300);
        assert_eq!(stored(&reg), vec![100, 290]);
        assert_eq!(tracker.grid_at(SubmapPos::new(0, 0, 0), &reg).get_resource(), 390);
    }

    #[test]
    fn deficit_drains_and_reports_what_was_available() {
        let (_tmp, mut reg, mut tracker) = setup(&[
            PowerPart::Consumer { watts: 50, off_state: None },
            PowerPart::Battery { capacity: 100, stored: 40 },
            PowerPart::Battery { capacity: 100, stored: 20 },
        ]);
        let applied = catch_up_grid(&mut tracker, SubmapPos::new(0, 0, 0), &mut reg, 4);
        assert_eq!(applied, -60);
        assert_eq!(stored(&reg), vec![0, 0]);
    }

    #[test]
    fn clamping_is_exact() {
        let parts = [
            PowerPart::Generator { watts: 3 },
            PowerPart::Battery { capacity: i64::MAX, stored: 0 },
        ];
        let (_t1, mut reg_cap, mut at_cap) = setup(&parts);
        let (_t2, mut reg_big, mut beyond) = setup(&parts);
        let origin = SubmapPos::new(0, 0, 0);
        let a = catch_up_grid(&mut at_cap, origin, &mut reg_cap, MAX_GRID_CATCHUP_TURNS);
        let b = catch_up_grid(&mut beyond, origin, &mut reg_big, 90_000);
        assert_eq!(a, b);
        assert_eq!(stored(&reg_cap), stored(&reg_big));
    }

    #[test]
    fn non_positive_turns_and_missing_grid_are_no_ops() {
        let (_tmp, mut reg, mut tracker) = setup(&[PowerPart::Generator { watts: 3 }]);
        assert_eq!(catch_up_grid(&mut tracker, SubmapPos::new(0, 0, 0), &mut reg, 0), 0);
        assert_eq!(catch_up_grid(&mut tracker, SubmapPos::new(0, 0, 0), &mut reg, -5), 0);
        assert_eq!(catch_up_grid(&mut tracker, SubmapPos::new(99, 0, 0), &mut reg, 10), 0);
    }
}
