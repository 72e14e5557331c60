use mapstream_common::{AreaPos, DimensionId, SubmapPos, TilePos};
use mapstream_kernel::PowerPart;
use mapstream_persist::ChunkStoreRegistry;
use std::collections::BTreeSet;

/// Identity of one build of a grid. Every rebuild gets a fresh id.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct GridId(pub(crate) u64);

/// Aggregate wattage of a grid.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PowerStat {
    pub gen_w: i64,
    pub use_w: i64,
}

impl PowerStat {
    /// Signed watts: generation minus consumption.
    pub fn net_w(&self) -> i64 {
        self.gen_w.saturating_sub(self.use_w)
    }
}

/// A cached cluster of connected areas sharing one power pool.
///
/// Only valid until the next load, unload or wiring change near it; the
/// tracker drops it then and builds a new one on demand.
#[derive(Debug, Clone)]
pub struct DistributionGrid {
    pub(crate) id: GridId,
    pub(crate) dim: DimensionId,
    pub(crate) members: BTreeSet<AreaPos>,
    pub(crate) submaps: Vec<SubmapPos>,
    /// Every power part tile, in (submap, tile) order.
    pub(crate) contents: Vec<(SubmapPos, TilePos)>,
    pub(crate) stat: PowerStat,
    pub(crate) resource: i64,
    pub(crate) capacity: i64,
    pub(crate) last_updated: u64,
}

impl DistributionGrid {
    pub(crate) fn empty(dim: DimensionId) -> Self {
        Self {
            id: GridId(0),
            dim,
            members: BTreeSet::new(),
            submaps: Vec::new(),
            contents: Vec::new(),
            stat: PowerStat::default(),
            resource: 0,
            capacity: 0,
            last_updated: 0,
        }
    }

    pub fn id(&self) -> GridId {
        self.id
    }

    pub fn is_empty(&self) -> bool {
        self.members.is_empty()
    }

    pub fn members(&self) -> &BTreeSet<AreaPos> {
        &self.members
    }

    pub fn contains(&self, area: AreaPos) -> bool {
        self.members.contains(&area)
    }

    /// Resident submaps the grid was built from.
    pub fn submaps(&self) -> &[SubmapPos] {
        &self.submaps
    }

    pub fn contents(&self) -> &[(SubmapPos, TilePos)] {
        &self.contents
    }

    pub fn get_power_stat(&self) -> PowerStat {
        self.stat
    }

    pub fn net_w(&self) -> i64 {
        self.stat.net_w()
    }

    /// Energy stored across the grid's batteries.
    pub fn get_resource(&self) -> i64 {
        self.resource
    }

    pub fn capacity(&self) -> i64 {
        self.capacity
    }

    pub fn last_updated(&self) -> u64 {
        self.last_updated
    }

    /// Charge (positive) or discharge (negative) the grid's batteries in
    /// content order. Returns the signed amount that did not fit.
    pub fn mod_resource(&mut self, amount: i64, registry: &mut ChunkStoreRegistry) -> i64 {
        if amount == 0 || self.is_empty() {
            return amount;
        }
        let store = registry.get(&self.dim);
        let mut left = amount;
        for (pos, tile) in &self.contents {
            if left == 0 {
                break;
            }
            let Some(submap) = store.lookup_in_memory_mut(*pos) else {
                continue;
            };
            if let Some(PowerPart::Battery { capacity, stored }) = submap.power_part_mut(*tile) {
                if left > 0 {
                    let add = left.min((*capacity - *stored).max(0));
                    *stored += add;
                    left -= add;
                } else {
                    let take = left.saturating_neg().min(*stored);
                    *stored -= take;
                    left += take;
                }
            }
        }
        self.resource += amount - left;
        tracing::trace!(grid = self.id.0, amount, left, stored = self.resource, "grid resource changed");
        left
    }

    /// Apply a watt-turn delta to the batteries. Returns the signed leftover.
    pub fn apply_net_power(&mut self, delta_watt_turns: i64, registry: &mut ChunkStoreRegistry) -> i64 {
        self.mod_resource(delta_watt_turns, registry)
    }
}
