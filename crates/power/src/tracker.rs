use mapstream_common::{AreaPos, DimensionId, Direction, SubmapPos};
use mapstream_kernel::{MAX_GRID_CATCHUP_TURNS, PowerPart, clamp_turns};
use mapstream_persist::{ChunkStoreRegistry, SaveObserver};
use mapstream_stream::SubmapLoadListener;
use std::collections::{BTreeMap, BTreeSet, VecDeque};

use crate::batch::catch_up_grid_pool;
use crate::connections::GridConnections;
use crate::grid::{DistributionGrid, GridId, PowerStat};
use crate::transform::{FurnitureTransform, FurnitureTransformQueue};

/// Outcome of one [`DistributionGridTracker::update`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct GridUpdateReport {
    pub grids: usize,
    /// Signed energy moved into (positive) or out of batteries.
    pub energy_applied: i64,
    pub starved_grids: usize,
    pub transforms_applied: usize,
}

/// Cache of distribution grids over the resident submaps of one dimension.
///
/// Grids are built lazily by a breadth-first walk over wired cardinal
/// neighbors. Any load, unload or wiring change drops the grids of the
/// 5-area neighborhood around it; a dropped grid is never handed out again.
pub struct DistributionGridTracker {
    dim: DimensionId,
    connections: GridConnections,
    tracked: BTreeSet<SubmapPos>,
    grids: BTreeMap<GridId, DistributionGrid>,
    area_grid: BTreeMap<AreaPos, GridId>,
    /// Turn each area's grid last caught up to; survives rebuilds and eviction.
    area_updated: BTreeMap<AreaPos, u64>,
    transforms: FurnitureTransformQueue,
    next_id: u64,
    now: u64,
    empty: DistributionGrid,
}

impl DistributionGridTracker {
    pub fn new(dim: DimensionId) -> Self {
        Self {
            empty: DistributionGrid::empty(dim.clone()),
            dim,
            connections: GridConnections::new(),
            tracked: BTreeSet::new(),
            grids: BTreeMap::new(),
            area_grid: BTreeMap::new(),
            area_updated: BTreeMap::new(),
            transforms: FurnitureTransformQueue::new(),
            next_id: 1,
            now: 0,
        }
    }

    pub fn dimension(&self) -> &DimensionId {
        &self.dim
    }

    /// Rebind to another dimension. Every cache is dropped, wiring included.
    pub fn switch_dimension(&mut self, dim: DimensionId) {
        tracing::debug!(from = %self.dim, to = %dim, "grid tracker switching dimension");
        self.connections.clear();
        self.tracked.clear();
        self.grids.clear();
        self.area_grid.clear();
        self.area_updated.clear();
        self.transforms.clear();
        self.empty = DistributionGrid::empty(dim.clone());
        self.dim = dim;
    }

    pub fn connections(&self) -> &GridConnections {
        &self.connections
    }

    /// Wire `area` to its neighbor in `dir`.
    pub fn connect(&mut self, area: AreaPos, dir: Direction) {
        self.connections.connect(area, dir);
        self.invalidate_neighborhood(area);
        self.invalidate_neighborhood(area.neighbor(dir));
    }

    pub fn disconnect(&mut self, area: AreaPos, dir: Direction) {
        self.connections.disconnect(area, dir);
        self.invalidate_neighborhood(area);
        self.invalidate_neighborhood(area.neighbor(dir));
    }

    pub fn is_tracked(&self, pos: SubmapPos) -> bool {
        self.tracked.contains(&pos)
    }

    pub fn tracked_count(&self) -> usize {
        self.tracked.len()
    }

    pub fn built_grids(&self) -> usize {
        self.grids.len()
    }

    pub fn pending_transforms(&self) -> usize {
        self.transforms.len()
    }

    /// The grid containing `pos`, built now if needed.
    ///
    /// Positions outside every tracked area get an empty grid. Do not hold
    /// the result across a tick; ask again.
    pub fn grid_at(&mut self, pos: SubmapPos, registry: &ChunkStoreRegistry) -> &DistributionGrid {
        match self.grid_id_at(pos, registry) {
            Some(id) => self.grids.get(&id).unwrap_or(&self.empty),
            None => &self.empty,
        }
    }

    pub(crate) fn grid_id_at(&mut self, pos: SubmapPos, registry: &ChunkStoreRegistry) -> Option<GridId> {
        let area = pos.area();
        if let Some(id) = self.area_grid.get(&area) {
            return Some(*id);
        }
        if !self.area_tracked(area) {
            return None;
        }
        Some(self.build(area, registry))
    }

    /// Mutable access to a built grid, e.g. to charge it.
    pub fn grid_mut(&mut self, id: GridId) -> Option<&mut DistributionGrid> {
        self.grids.get_mut(&id)
    }

    /// A submap entered or left memory: drop the neighborhood's grids and,
    /// on load, rebuild them right away.
    pub fn on_changed(&mut self, pos: SubmapPos, registry: Option<&ChunkStoreRegistry>) {
        let area = pos.area();
        self.invalidate_neighborhood(area);
        if let Some(registry) = registry {
            for a in area.neighborhood() {
                if !self.area_grid.contains_key(&a) && self.area_tracked(a) {
                    self.build(a, registry);
                }
            }
        }
    }

    /// Catch every grid up to `now`, then apply the furniture changes the
    /// updates asked for.
    pub fn update(&mut self, now: u64, registry: &mut ChunkStoreRegistry) -> GridUpdateReport {
        let _span = tracing::info_span!("grid_tracker_update", now, dim = %self.dim).entered();
        let areas: BTreeSet<AreaPos> = self.tracked.iter().map(|p| p.area()).collect();
        for area in areas {
            if !self.area_grid.contains_key(&area) {
                self.build(area, registry);
            }
        }

        let mut report = GridUpdateReport::default();
        for grid in self.grids.values_mut() {
            report.grids += 1;
            let elapsed = i64::try_from(now.saturating_sub(grid.last_updated)).unwrap_or(i64::MAX);
            let requested = grid
                .net_w()
                .saturating_mul(clamp_turns(elapsed, MAX_GRID_CATCHUP_TURNS));
            let applied = catch_up_grid_pool(grid, registry, elapsed);
            report.energy_applied = report.energy_applied.saturating_add(applied);

            if requested < 0 && applied > requested {
                report.starved_grids += 1;
                tracing::debug!(grid = ?grid.id, requested, applied, "grid cannot meet demand");
                if let Some(store) = registry.store(&self.dim) {
                    for (pos, tile) in &grid.contents {
                        let off_state = store
                            .lookup_in_memory(*pos)
                            .and_then(|sm| sm.power_parts().find(|(t, _)| t == tile).map(|(_, p)| p));
                        if let Some(PowerPart::Consumer {
                            off_state: Some(furniture),
                            ..
                        }) = off_state
                        {
                            self.transforms.push(FurnitureTransform {
                                pos: *pos,
                                tile: *tile,
                                furniture: furniture.clone(),
                            });
                        }
                    }
                }
            }

            grid.last_updated = now;
            for area in &grid.members {
                self.area_updated.insert(*area, now);
            }
        }
        self.now = now;

        report.transforms_applied = self.transforms.len();
        let touched = self.transforms.flush(&self.dim, registry);
        for area in touched {
            self.invalidate_neighborhood(area);
        }
        tracing::debug!(
            grids = report.grids,
            energy = report.energy_applied,
            starved = report.starved_grids,
            transforms = report.transforms_applied,
            "grid update complete"
        );
        report
    }

    fn area_tracked(&self, area: AreaPos) -> bool {
        area.submaps().iter().any(|p| self.tracked.contains(p))
    }

    fn invalidate_area(&mut self, area: AreaPos) {
        let Some(id) = self.area_grid.remove(&area) else {
            return;
        };
        if let Some(grid) = self.grids.remove(&id) {
            for member in &grid.members {
                self.area_grid.remove(member);
            }
            tracing::trace!(grid = ?id, members = grid.members.len(), "grid invalidated");
        }
    }

    fn invalidate_neighborhood(&mut self, area: AreaPos) {
        for a in area.neighborhood() {
            self.invalidate_area(a);
        }
    }

    fn build(&mut self, start: AreaPos, registry: &ChunkStoreRegistry) -> GridId {
        let _span = tracing::info_span!("grid_rebuild", %start).entered();

        let mut members = BTreeSet::from([start]);
        let mut queue = VecDeque::from([start]);
        while let Some(area) = queue.pop_front() {
            for dir in self.connections.directions(area) {
                let next = area.neighbor(dir);
                if members.contains(&next) || !self.area_tracked(next) {
                    continue;
                }
                members.insert(next);
                queue.push_back(next);
            }
        }
        // a reachable area still owned by another grid means that grid is stale
        for area in &members {
            self.invalidate_area(*area);
        }

        let store = registry.store(&self.dim);
        let mut submaps = Vec::new();
        let mut contents = Vec::new();
        let mut stat = PowerStat::default();
        let mut resource = 0i64;
        let mut capacity = 0i64;
        for area in &members {
            for pos in area.submaps() {
                if !self.tracked.contains(&pos) {
                    continue;
                }
                let Some(submap) = store.and_then(|s| s.lookup_in_memory(pos)) else {
                    continue;
                };
                submaps.push(pos);
                for (tile, part) in submap.power_parts() {
                    contents.push((pos, tile));
                    stat.gen_w = stat.gen_w.saturating_add(part.generation_w());
                    stat.use_w = stat.use_w.saturating_add(part.consumption_w());
                    resource = resource.saturating_add(part.stored());
                    if let PowerPart::Battery { capacity: c, .. } = part {
                        capacity = capacity.saturating_add(*c);
                    }
                }
            }
        }
        // A merged grid resumes from its most recently updated member. Going
        // back to the oldest would re-apply turns the newer members' batteries
        // already received; the older members' backlog is dropped instead.
        let stamps: Vec<u64> = members
            .iter()
            .filter_map(|a| self.area_updated.get(a).copied())
            .collect();
        let last_updated = stamps.iter().copied().max().unwrap_or(self.now);
        if let Some(oldest) = stamps.iter().copied().min() {
            if oldest < last_updated {
                tracing::debug!(
                    %start,
                    dropped_turns = last_updated - oldest,
                    "merged areas with different catch-up times, older backlog dropped"
                );
            }
        }

        let id = GridId(self.next_id);
        self.next_id += 1;
        for area in &members {
            self.area_grid.insert(*area, id);
        }
        tracing::debug!(grid = ?id, members = members.len(), gen_w = stat.gen_w, use_w = stat.use_w, "grid built");
        self.grids.insert(
            id,
            DistributionGrid {
                id,
                dim: self.dim.clone(),
                members,
                submaps,
                contents,
                stat,
                resource,
                capacity,
                last_updated,
            },
        );
        id
    }
}

impl SubmapLoadListener for DistributionGridTracker {
    fn on_submap_loaded(&mut self, pos: SubmapPos, dim: &DimensionId, registry: &ChunkStoreRegistry) {
        if dim != &self.dim {
            return;
        }
        self.tracked.insert(pos);
        self.on_changed(pos, Some(registry));
    }

    fn on_submap_unloaded(&mut self, pos: SubmapPos, dim: &DimensionId) {
        if dim != &self.dim {
            return;
        }
        if self.tracked.remove(&pos) {
            self.on_changed(pos, None);
        }
    }
}

impl SaveObserver for DistributionGridTracker {
    fn on_evicted(&mut self, dim: &DimensionId, pos: SubmapPos) {
        if dim != &self.dim {
            return;
        }
        if self.tracked.remove(&pos) {
            self.on_changed(pos, None);
        }
    }
}
