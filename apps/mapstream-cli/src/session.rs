use mapstream_common::{AreaPos, DimensionId, Direction, SubmapPos};
use mapstream_kernel::{SubmapCatchUp, catch_up_submap};
use mapstream_persist::{ChunkStoreRegistry, PersistConfig, SaveObserver, SaveReport};
use mapstream_power::{DistributionGridTracker, GridUpdateReport};
use mapstream_stream::{
    FireKeepalive, KeepaliveReport, LoadRequestHandle, LoadSource, LoadTracker, SubmapLoadListener,
    TrackerConfig, UpdateReport,
};
use rand::SeedableRng;
use rand::rngs::StdRng;
use std::cell::RefCell;
use std::collections::BTreeMap;
use std::rc::Rc;

use crate::worldgen::SeededGenerator;

/// Remembers which submaps were loaded so they can be caught up before use.
#[derive(Default)]
struct SpliceQueue {
    pending: Vec<(DimensionId, SubmapPos)>,
}

impl SubmapLoadListener for SpliceQueue {
    fn on_submap_loaded(&mut self, pos: SubmapPos, dim: &DimensionId, _registry: &ChunkStoreRegistry) {
        self.pending.push((dim.clone(), pos));
    }

    fn on_submap_unloaded(&mut self, pos: SubmapPos, dim: &DimensionId) {
        self.pending.retain(|(d, p)| !(d == dim && *p == pos));
    }
}

#[derive(Debug, Clone, Default)]
pub struct StepReport {
    pub turn: u64,
    pub tracker: UpdateReport,
    pub caught_up: usize,
    pub catch_up: SubmapCatchUp,
    pub keepalive: KeepaliveReport,
    pub grids: GridUpdateReport,
    pub fired_actions: Vec<String>,
    pub resident: usize,
}

/// The simulated-region owner: one viewport walking the primary dimension.
pub struct Session {
    pub registry: ChunkStoreRegistry,
    pub tracker: LoadTracker,
    pub grids: Rc<RefCell<DistributionGridTracker>>,
    pub keepalive: Rc<RefCell<FireKeepalive>>,
    splice: Rc<RefCell<SpliceQueue>>,
    generator: SeededGenerator,
    rng: StdRng,
    viewport: LoadRequestHandle,
    dim: DimensionId,
    turn: u64,
}

impl Session {
    pub fn open(config: &PersistConfig, seed: u64, radius: i32) -> anyhow::Result<Self> {
        let registry = ChunkStoreRegistry::open(config)?;
        let dim = DimensionId::primary();
        let mut tracker = LoadTracker::new(TrackerConfig::default());
        let grids = Rc::new(RefCell::new(DistributionGridTracker::new(dim.clone())));
        let keepalive = Rc::new(RefCell::new(FireKeepalive::new()));
        let splice = Rc::new(RefCell::new(SpliceQueue::default()));
        tracker.add_listener(grids.clone());
        tracker.add_listener(keepalive.clone());
        tracker.add_listener(splice.clone());
        let viewport = tracker.request_load(
            LoadSource::ActiveViewport,
            &dim,
            SubmapPos::new(0, 0, 0),
            radius,
            0,
            0,
        );
        Ok(Self {
            registry,
            tracker,
            grids,
            keepalive,
            splice,
            generator: SeededGenerator::new(seed),
            rng: StdRng::seed_from_u64(seed),
            viewport,
            dim,
            turn: 0,
        })
    }

    pub fn turn(&self) -> u64 {
        self.turn
    }

    /// Run a power line along `y = 0` from area `x_min` to area `x_max`.
    pub fn wire_row(&mut self, x_min: i32, x_max: i32) {
        let mut grids = self.grids.borrow_mut();
        for x in x_min..x_max {
            grids.connect(AreaPos::new(x, 0, 0), Direction::East);
        }
    }

    /// Advance one turn with the viewport centered on `center`.
    pub fn step(&mut self, center: SubmapPos) -> StepReport {
        self.turn += 1;
        let mut report = StepReport {
            turn: self.turn,
            ..StepReport::default()
        };
        self.generator.now = self.turn;

        self.tracker.update_request(self.viewport, center);
        // before the update, so burning submaps the viewport just left are still known
        report.keepalive = self
            .keepalive
            .borrow_mut()
            .refresh(&mut self.tracker, &self.registry);
        report.tracker = self.tracker.update(&mut self.registry, &mut self.generator);

        // catch up everything that just arrived, once, before simulating it
        let pending = std::mem::take(&mut self.splice.borrow_mut().pending);
        for (dim, pos) in pending {
            if let Some(submap) = self.registry.get(&dim).lookup_in_memory_mut(pos) {
                let turns = submap.turns_since(self.turn);
                let done = catch_up_submap(submap, turns);
                submap.touch(self.turn);
                report.caught_up += 1;
                report.catch_up.fields.decrements += done.fields.decrements;
                report.catch_up.fields.removed += done.fields.removed;
                report.catch_up.items_advanced += done.items_advanced;
                report.catch_up.vehicle_energy += done.vehicle_energy;
            }
        }

        report.fired_actions = self.simulate_viewport();
        report.grids = self.grids.borrow_mut().update(self.turn, &mut self.registry);
        report.resident = self.registry.store(&self.dim).map_or(0, |s| s.len());
        report
    }

    /// Exact per-turn processing for submaps inside the viewport.
    fn simulate_viewport(&mut self) -> Vec<String> {
        let Some(request) = self.tracker.request(self.viewport) else {
            return Vec::new();
        };
        let region = request.region;
        let store = self.registry.get(&self.dim);
        let mut fired = Vec::new();
        for pos in region.submaps() {
            let Some(submap) = store.lookup_in_memory_mut(pos) else {
                continue;
            };
            if submap.is_uniform() {
                continue;
            }
            let rng = &mut self.rng;
            submap.update_fields(|_, entry| {
                entry.decay_turn(rng);
            });
            fired.extend(submap.items_mut().filter_map(|item| item.process_countdown()));
            submap.touch(self.turn);
        }
        fired
    }

    /// Save every dimension; evictions from the primary invalidate grids.
    ///
    /// An evicting save also forgets the desired set, so the next step
    /// loads the viewport again.
    pub fn save(&mut self, delete_after: bool) -> BTreeMap<DimensionId, SaveReport> {
        let reports = {
            let mut grids = self.grids.borrow_mut();
            let observer: &mut dyn SaveObserver = &mut *grids;
            self.registry.save_all(delete_after, Some(observer))
        };
        if delete_after {
            self.tracker.flush_prev_desired();
        }
        reports
    }
}
