use mapstream_common::{AreaPos, DimensionId, SubmapPos};
use mapstream_kernel::SubmapGenerator;
use mapstream_persist::{ChunkStoreRegistry, QuadOutcome};
use std::collections::{BTreeMap, BTreeSet};
use std::time::{Duration, Instant};

use crate::listener::{ListenerId, SharedListener};
use crate::region::Region;

/// Who asked for a region. Diagnostics only; eviction ignores it, except that
/// [`LoadTracker::is_properly_requested`] looks for the viewport.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum LoadSource {
    ActiveViewport,
    PersistentBase,
    ScriptedRegion,
    FireKeepalive,
}

/// Opaque, monotonically increasing request handle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct LoadRequestHandle(u64);

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LoadRequest {
    pub source: LoadSource,
    pub dim: DimensionId,
    pub region: Region,
}

/// Tracker configuration.
#[derive(Debug, Clone)]
pub struct TrackerConfig {
    /// Largest radius a single request may ask for; bigger requests are clamped.
    pub max_radius: i32,
}

impl Default for TrackerConfig {
    fn default() -> Self {
        Self { max_radius: 32 }
    }
}

/// Outcome of one [`LoadTracker::update`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct UpdateReport {
    pub loaded: usize,
    /// Loaded submaps that had no stored data and were generated.
    pub generated: usize,
    pub unloaded: usize,
    pub evicted_quads: usize,
}

/// Statistics from the last update, for instrumentation.
#[derive(Debug, Clone, Default)]
pub struct TrackerStats {
    pub requests: usize,
    pub desired: usize,
    pub last_update: UpdateReport,
    pub update_time: Duration,
}

type DesiredSet = BTreeSet<(DimensionId, SubmapPos)>;

/// Single source of truth for which submaps must be resident.
///
/// Subsystems register radius-bounded requests; every [`update`](Self::update)
/// rebuilds the union of all requests from scratch, diffs it against the
/// previous update, and loads, generates, notifies and evicts accordingly.
pub struct LoadTracker {
    config: TrackerConfig,
    next_handle: u64,
    requests: BTreeMap<LoadRequestHandle, LoadRequest>,
    prev_desired: DesiredSet,
    next_listener: u64,
    listeners: Vec<(ListenerId, SharedListener)>,
    stats: TrackerStats,
}

impl LoadTracker {
    pub fn new(config: TrackerConfig) -> Self {
        Self {
            config,
            next_handle: 1,
            requests: BTreeMap::new(),
            prev_desired: BTreeSet::new(),
            next_listener: 1,
            listeners: Vec::new(),
            stats: TrackerStats::default(),
        }
    }

    pub fn config(&self) -> &TrackerConfig {
        &self.config
    }

    /// Register a request for the cubic region around `center`.
    ///
    /// Takes effect on the next [`update`](Self::update).
    pub fn request_load(
        &mut self,
        source: LoadSource,
        dim: &DimensionId,
        center: SubmapPos,
        radius: i32,
        z_min: i32,
        z_max: i32,
    ) -> LoadRequestHandle {
        let radius = self.clamp_radius(source, radius);
        let handle = LoadRequestHandle(self.next_handle);
        self.next_handle += 1;
        self.requests.insert(
            handle,
            LoadRequest {
                source,
                dim: dim.clone(),
                region: Region::new(center, radius, z_min, z_max),
            },
        );
        tracing::debug!(?handle, ?source, %dim, %center, radius, "load requested");
        handle
    }

    /// Move a request. Unknown or released handles are ignored.
    pub fn update_request(&mut self, handle: LoadRequestHandle, new_center: SubmapPos) {
        if let Some(request) = self.requests.get_mut(&handle) {
            request.region.center = new_center;
        }
    }

    /// Grow or shrink a request in place, clamped like
    /// [`request_load`](Self::request_load). Unknown or released handles are ignored.
    pub fn update_request_radius(&mut self, handle: LoadRequestHandle, radius: i32) {
        let Some(source) = self.requests.get(&handle).map(|r| r.source) else {
            return;
        };
        let radius = self.clamp_radius(source, radius);
        if let Some(request) = self.requests.get_mut(&handle) {
            request.region.radius = radius.max(0);
        }
    }

    fn clamp_radius(&self, source: LoadSource, radius: i32) -> i32 {
        if radius > self.config.max_radius {
            tracing::warn!(?source, radius, max = self.config.max_radius, "load radius clamped");
            self.config.max_radius
        } else {
            radius
        }
    }

    /// Drop a request. Releasing twice is a no-op.
    pub fn release_load(&mut self, handle: LoadRequestHandle) {
        if let Some(request) = self.requests.remove(&handle) {
            tracing::debug!(?handle, source = ?request.source, "load released");
        }
    }

    pub fn request(&self, handle: LoadRequestHandle) -> Option<&LoadRequest> {
        self.requests.get(&handle)
    }

    pub fn request_count(&self) -> usize {
        self.requests.len()
    }

    /// Covered by any active request.
    pub fn is_requested(&self, dim: &DimensionId, pos: SubmapPos) -> bool {
        self.requests
            .values()
            .any(|r| &r.dim == dim && r.region.contains(pos))
    }

    /// Covered by an active viewport request.
    pub fn is_properly_requested(&self, dim: &DimensionId, pos: SubmapPos) -> bool {
        self.requests.values().any(|r| {
            r.source == LoadSource::ActiveViewport && &r.dim == dim && r.region.contains(pos)
        })
    }

    /// The desired set as of the last update.
    pub fn desired_set(&self) -> &BTreeSet<(DimensionId, SubmapPos)> {
        &self.prev_desired
    }

    /// Forget the last desired set without sending unload events.
    ///
    /// Used on a dimension switch so old coordinates are not read as "left view".
    pub fn flush_prev_desired(&mut self) {
        tracing::debug!(flushed = self.prev_desired.len(), "flushed previous desired set");
        self.prev_desired.clear();
    }

    pub fn add_listener(&mut self, listener: SharedListener) -> ListenerId {
        let id = ListenerId(self.next_listener);
        self.next_listener += 1;
        self.listeners.push((id, listener));
        id
    }

    pub fn remove_listener(&mut self, id: ListenerId) -> bool {
        let before = self.listeners.len();
        self.listeners.retain(|(lid, _)| *lid != id);
        self.listeners.len() != before
    }

    pub fn stats(&self) -> &TrackerStats {
        &self.stats
    }

    fn compute_desired(&self) -> DesiredSet {
        let mut desired = BTreeSet::new();
        for request in self.requests.values() {
            desired.extend(
                request
                    .region
                    .submaps()
                    .map(|pos| (request.dim.clone(), pos)),
            );
        }
        desired
    }

    /// Recompute the desired set and apply the difference.
    ///
    /// Every unload notification is sent, and the emptied quads evicted,
    /// before any submap is loaded. A quad is evicted only once none of its
    /// members is desired.
    pub fn update(
        &mut self,
        registry: &mut ChunkStoreRegistry,
        generator: &mut dyn SubmapGenerator,
    ) -> UpdateReport {
        let _span = tracing::info_span!("load_tracker_update", requests = self.requests.len()).entered();
        let start = Instant::now();

        let desired = self.compute_desired();
        let removed: Vec<(DimensionId, SubmapPos)> =
            self.prev_desired.difference(&desired).cloned().collect();
        let added: Vec<(DimensionId, SubmapPos)> =
            desired.difference(&self.prev_desired).cloned().collect();
        let mut report = UpdateReport::default();

        for (dim, pos) in &removed {
            tracing::trace!(%dim, %pos, "submap left desired set");
            for (_, listener) in &self.listeners {
                listener.borrow_mut().on_submap_unloaded(*pos, dim);
            }
        }
        report.unloaded = removed.len();

        let quads: BTreeSet<(DimensionId, AreaPos)> = removed
            .iter()
            .map(|(dim, pos)| (dim.clone(), pos.area()))
            .collect();
        for (dim, area) in quads {
            let still_needed = area
                .submaps()
                .into_iter()
                .any(|pos| desired.contains(&(dim.clone(), pos)));
            if still_needed {
                continue;
            }
            if registry.get(&dim).unload_quad(area) != QuadOutcome::Failed {
                tracing::debug!(%dim, %area, "evicted quad");
                report.evicted_quads += 1;
            }
        }

        for (dim, pos) in &added {
            let store = registry.get(dim);
            if store.lookup(*pos).is_none() {
                let submap = generator.generate(dim, *pos);
                if store.add(*pos, Box::new(submap)).is_ok() {
                    report.generated += 1;
                }
            }
            tracing::trace!(%dim, %pos, "submap entered desired set");
        }
        report.loaded = added.len();

        for (dim, pos) in &added {
            for (_, listener) in &self.listeners {
                listener.borrow_mut().on_submap_loaded(*pos, dim, registry);
            }
        }

        self.prev_desired = desired;
        self.stats = TrackerStats {
            requests: self.requests.len(),
            desired: self.prev_desired.len(),
            last_update: report,
            update_time: start.elapsed(),
        };
        tracing::debug!(
            loaded = report.loaded,
            generated = report.generated,
            unloaded = report.unloaded,
            evicted_quads = report.evicted_quads,
            "load tracker update complete"
        );
        report
    }
}

impl Default for LoadTracker {
    fn default() -> Self {
        Self::new(TrackerConfig::default())
    }
}
