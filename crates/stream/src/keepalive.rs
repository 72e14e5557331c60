use mapstream_common::{DimensionId, SubmapPos};
use mapstream_persist::ChunkStoreRegistry;
use std::collections::{BTreeMap, BTreeSet};

use crate::listener::SubmapLoadListener;
use crate::tracker::{LoadRequestHandle, LoadSource, LoadTracker};

type Key = (DimensionId, SubmapPos);

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct KeepaliveReport {
    pub requested: usize,
    pub released: usize,
}

/// Keeps burning submaps resident after the viewport moves away, so a fire
/// is not frozen mid-spread by eviction.
///
/// Learns about fire from load events and from [`note_fire`](Self::note_fire);
/// [`refresh`](Self::refresh) turns that into radius-0 requests.
#[derive(Debug, Default)]
pub struct FireKeepalive {
    burning: BTreeSet<Key>,
    held: BTreeMap<Key, LoadRequestHandle>,
}

impl FireKeepalive {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record fire started by in-bubble simulation.
    pub fn note_fire(&mut self, dim: &DimensionId, pos: SubmapPos) {
        self.burning.insert((dim.clone(), pos));
    }

    pub fn burning(&self) -> impl Iterator<Item = &(DimensionId, SubmapPos)> {
        self.burning.iter()
    }

    pub fn held_requests(&self) -> usize {
        self.held.len()
    }

    /// Drop submaps whose fire went out, then request every burning submap
    /// the viewport does not cover and release requests no longer needed.
    pub fn refresh(&mut self, tracker: &mut LoadTracker, registry: &ChunkStoreRegistry) -> KeepaliveReport {
        self.burning.retain(|(dim, pos)| {
            registry
                .store(dim)
                .and_then(|s| s.lookup_in_memory(*pos))
                .is_some_and(|sm| sm.has_fire())
        });

        let mut report = KeepaliveReport::default();
        let stale: Vec<Key> = self
            .held
            .keys()
            .filter(|key| !self.burning.contains(*key) || tracker.is_properly_requested(&key.0, key.1))
            .cloned()
            .collect();
        for key in stale {
            if let Some(handle) = self.held.remove(&key) {
                tracker.release_load(handle);
                report.released += 1;
            }
        }

        for (dim, pos) in &self.burning {
            let key = (dim.clone(), *pos);
            if self.held.contains_key(&key) || tracker.is_properly_requested(dim, *pos) {
                continue;
            }
            let handle = tracker.request_load(LoadSource::FireKeepalive, dim, *pos, 0, pos.z, pos.z);
            tracing::debug!(%dim, %pos, "keeping burning submap loaded");
            self.held.insert(key, handle);
            report.requested += 1;
        }
        report
    }
}

impl SubmapLoadListener for FireKeepalive {
    fn on_submap_loaded(&mut self, pos: SubmapPos, dim: &DimensionId, registry: &ChunkStoreRegistry) {
        let burning = registry
            .store(dim)
            .and_then(|s| s.lookup_in_memory(pos))
            .is_some_and(|sm| sm.has_fire());
        if burning {
            self.burning.insert((dim.clone(), pos));
        }
    }

    fn on_submap_unloaded(&mut self, pos: SubmapPos, dim: &DimensionId) {
        self.burning.remove(&(dim.clone(), pos));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use mapstream_common::TilePos;
    use mapstream_kernel::{FieldEntry, FieldTypeId, Submap, TerrainId};
    use mapstream_persist::PersistConfig;
    use std::cell::RefCell;
    use std::rc::Rc;

    const FIRE_AT: SubmapPos = SubmapPos::new(1, 0, 0);

    fn fiery_world(dim: &DimensionId, pos: SubmapPos) -> Submap {
        let mut sm = Submap::uniform(TerrainId(1));
        if dim.is_primary() && pos == FIRE_AT {
            sm.add_field(TilePos::new(5, 5).unwrap(), FieldTypeId::fire(), FieldEntry::new(3, 10));
        }
        sm
    }

    #[test]
    fn burning_submap_outlives_the_viewport() {
        let tmp = tempfile::tempdir().unwrap();
        let mut reg = ChunkStoreRegistry::open(&PersistConfig::at(tmp.path().join("save"))).unwrap();
        let mut tracker = LoadTracker::default();
        let keepalive = Rc::new(RefCell::new(FireKeepalive::new()));
        tracker.add_listener(keepalive.clone());
        let primary = DimensionId::primary();
        let mut generator = fiery_world;

        let view = tracker.request_load(LoadSource::ActiveViewport, &primary, SubmapPos::new(0, 0, 0), 1, 0, 0);
        tracker.update(&mut reg, &mut generator);
        assert_eq!(keepalive.borrow().burning().count(), 1);

        // covered by the viewport: no extra request
        let report = keepalive.borrow_mut().refresh(&mut tracker, &reg);
        assert_eq!(report, KeepaliveReport::default());

        tracker.update_request(view, SubmapPos::new(20, 0, 0));
        let report = keepalive.borrow_mut().refresh(&mut tracker, &reg);
        assert_eq!(report.requested, 1);
        tracker.update(&mut reg, &mut generator);
        assert!(reg.store(&primary).unwrap().contains(FIRE_AT));
        assert!(tracker.is_requested(&primary, FIRE_AT));
        assert!(!tracker.is_properly_requested(&primary, FIRE_AT));

        // fire burns out in place
        reg.get(&primary)
            .lookup_in_memory_mut(FIRE_AT)
            .unwrap()
            .remove_field(TilePos::new(5, 5).unwrap(), &FieldTypeId::fire());
        let report = keepalive.borrow_mut().refresh(&mut tracker, &reg);
        assert_eq!(report.released, 1);
        tracker.update(&mut reg, &mut generator);
        assert!(!reg.store(&primary).unwrap().contains(FIRE_AT));
        assert_eq!(keepalive.borrow().held_requests(), 0);
    }

    #[test]
    fn viewport_returning_releases_keepalive() {
        let mut tracker = LoadTracker::default();
        let mut keepalive = FireKeepalive::new();
        let tmp = tempfile::tempdir().unwrap();
        let mut reg = ChunkStoreRegistry::open(&PersistConfig::at(tmp.path().join("save"))).unwrap();
        let primary = DimensionId::primary();
        reg.get(&primary).add(FIRE_AT, Box::new(fiery_world(&primary, FIRE_AT))).unwrap();
        keepalive.note_fire(&primary, FIRE_AT);

        assert_eq!(keepalive.refresh(&mut tracker, &reg).requested, 1);
        // second refresh holds the same request
        assert_eq!(keepalive.refresh(&mut tracker, &reg), KeepaliveReport::default());

        tracker.request_load(LoadSource::ActiveViewport, &primary, FIRE_AT, 2, 0, 0);
        let report = keepalive.refresh(&mut tracker, &reg);
        assert_eq!(report.released, 1);
        assert_eq!(tracker.request_count(), 1);
    }
}
