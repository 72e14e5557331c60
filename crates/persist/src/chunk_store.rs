//! In-memory submap map with transparent quad-file fallback.
//!
//! # Invariants
//! - Save and eviction never split a quad: the four members are written
//!   together and evicted together.
//! - Writing a partially resident quad keeps the stored copies of the
//!   members that are not in memory.
//! - A quad whose present members are all uniform is never written.
//! - No `StoreError` escapes the public API; failures are logged and treated
//!   as "no data" (reads) or "keep resident, retry next save" (writes).

use mapstream_common::{AreaPos, DimensionId, SubmapPos};
use mapstream_kernel::Submap;
use rayon::prelude::*;
use std::collections::btree_map::Entry;
use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;

use crate::store::{QuadBackend, SUBMAP_FORMAT_VERSION, SubmapRecord};

/// Flags for [`ChunkStore::save`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SaveOptions {
    /// Evict quads from memory once they are safely stored.
    pub delete_after: bool,
    /// Report each evicted submap to the observer.
    pub notify: bool,
    /// Report collection progress to the observer.
    pub show_progress: bool,
    /// Write quads on the rayon pool.
    pub parallel: bool,
}

/// Hooks into a save. Both methods run on the calling thread only.
pub trait SaveObserver {
    fn on_progress(&mut self, _done: usize, _total: usize) {}
    fn on_evicted(&mut self, _dim: &DimensionId, _pos: SubmapPos) {}
}

/// What happened to one quad during a save or unload.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QuadOutcome {
    Written,
    SkippedUniform,
    Failed,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SaveReport {
    pub quads_written: usize,
    pub quads_skipped_uniform: usize,
    pub quads_failed: usize,
    pub evicted: Vec<SubmapPos>,
}

impl SaveReport {
    fn record(&mut self, outcome: QuadOutcome) {
        match outcome {
            QuadOutcome::Written => self.quads_written += 1,
            QuadOutcome::SkippedUniform => self.quads_skipped_uniform += 1,
            QuadOutcome::Failed => self.quads_failed += 1,
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TransferReport {
    pub moved: usize,
    pub collisions: usize,
}

/// Submaps of one dimension, keyed by absolute position.
pub struct ChunkStore {
    dimension: DimensionId,
    backend: Arc<dyn QuadBackend>,
    submaps: BTreeMap<SubmapPos, Box<Submap>>,
}

impl ChunkStore {
    pub fn new(dimension: DimensionId, backend: Arc<dyn QuadBackend>) -> Self {
        Self {
            dimension,
            backend,
            submaps: BTreeMap::new(),
        }
    }

    pub fn dimension(&self) -> &DimensionId {
        &self.dimension
    }

    pub fn len(&self) -> usize {
        self.submaps.len()
    }

    pub fn is_empty(&self) -> bool {
        self.submaps.is_empty()
    }

    pub fn contains(&self, pos: SubmapPos) -> bool {
        self.submaps.contains_key(&pos)
    }

    pub fn positions(&self) -> impl Iterator<Item = SubmapPos> + '_ {
        self.submaps.keys().copied()
    }

    pub fn iter(&self) -> impl Iterator<Item = (SubmapPos, &Submap)> {
        self.submaps.iter().map(|(p, s)| (*p, s.as_ref()))
    }

    /// Insert a submap at an empty coordinate.
    ///
    /// An occupied coordinate is never overwritten: the submap is handed back
    /// in `Err` and the resident one stays.
    pub fn add(&mut self, pos: SubmapPos, submap: Box<Submap>) -> Result<(), Box<Submap>> {
        match self.submaps.entry(pos) {
            Entry::Vacant(slot) => {
                slot.insert(submap);
                Ok(())
            }
            Entry::Occupied(_) => {
                tracing::error!(dim = %self.dimension, %pos, "submap already resident, refusing to overwrite");
                Err(submap)
            }
        }
    }

    /// Resident submap, or read its quad from disk. `None` means the caller
    /// should generate it.
    pub fn lookup(&mut self, pos: SubmapPos) -> Option<&mut Submap> {
        if !self.submaps.contains_key(&pos) {
            self.load_quad(pos.area());
        }
        self.submaps.get_mut(&pos).map(Box::as_mut)
    }

    /// Resident submap only. Never touches disk.
    pub fn lookup_in_memory(&self, pos: SubmapPos) -> Option<&Submap> {
        self.submaps.get(&pos).map(Box::as_ref)
    }

    pub fn lookup_in_memory_mut(&mut self, pos: SubmapPos) -> Option<&mut Submap> {
        self.submaps.get_mut(&pos).map(Box::as_mut)
    }

    /// Write every resident quad, optionally evicting what was stored.
    ///
    /// Runs in three phases: quads are collected serially (driving progress),
    /// written serially or on the rayon pool with read-only access to the
    /// map, then evicted serially.
    pub fn save(
        &mut self,
        opts: SaveOptions,
        mut observer: Option<&mut dyn SaveObserver>,
    ) -> SaveReport {
        let _span = tracing::info_span!("chunk_store_save", dim = %self.dimension).entered();

        // Phase 1: collect quads.
        let total = self.submaps.len();
        let mut quads = BTreeSet::new();
        for (done, pos) in self.submaps.keys().enumerate() {
            quads.insert(pos.area());
            if opts.show_progress {
                if let Some(obs) = observer.as_deref_mut() {
                    obs.on_progress(done + 1, total);
                }
            }
        }
        let quads: Vec<AreaPos> = quads.into_iter().collect();

        // Phase 2: write. Only shared borrows of the map in here.
        let outcomes: Vec<(AreaPos, QuadOutcome)> = {
            let this = &*self;
            if opts.parallel {
                quads
                    .par_iter()
                    .map(|&area| (area, this.save_quad(area)))
                    .collect()
            } else {
                quads
                    .iter()
                    .map(|&area| (area, this.save_quad(area)))
                    .collect()
            }
        };

        // Phase 3: evict.
        let mut report = SaveReport::default();
        for (area, outcome) in outcomes {
            report.record(outcome);
            if opts.delete_after && outcome != QuadOutcome::Failed {
                report.evicted.extend(self.evict_quad(area));
            }
        }
        if opts.notify {
            if let Some(obs) = observer.as_deref_mut() {
                for pos in &report.evicted {
                    obs.on_evicted(&self.dimension, *pos);
                }
            }
        }

        tracing::info!(
            written = report.quads_written,
            skipped_uniform = report.quads_skipped_uniform,
            failed = report.quads_failed,
            evicted = report.evicted.len(),
            "save complete"
        );
        report
    }

    /// Save and evict exactly the four submaps of one quad.
    ///
    /// This is the only way to evict part of a store. If the write fails the
    /// whole quad stays resident.
    pub fn unload_quad(&mut self, area: AreaPos) -> QuadOutcome {
        let outcome = self.save_quad(area);
        if outcome != QuadOutcome::Failed {
            let evicted = self.evict_quad(area);
            tracing::debug!(dim = %self.dimension, %area, ?outcome, evicted = evicted.len(), "unloaded quad");
        }
        outcome
    }

    /// Move every resident submap into `other`, leaving this store empty.
    ///
    /// A coordinate already held by `other` keeps the destination's submap;
    /// the incoming one is logged and dropped.
    pub fn transfer_all_to(&mut self, other: &mut ChunkStore) -> TransferReport {
        let mut report = TransferReport::default();
        for (pos, submap) in std::mem::take(&mut self.submaps) {
            match other.submaps.entry(pos) {
                Entry::Vacant(slot) => {
                    slot.insert(submap);
                    report.moved += 1;
                }
                Entry::Occupied(_) => {
                    tracing::error!(
                        from = %self.dimension,
                        to = %other.dimension,
                        %pos,
                        "transfer collision, keeping destination submap"
                    );
                    report.collisions += 1;
                }
            }
        }
        report
    }

    /// Write one quad from resident members, read-only.
    ///
    /// Members that are not resident keep their stored copy: the existing
    /// file is read and its records for those members are written back, so
    /// a partially resident quad never drops submaps from disk.
    fn save_quad(&self, area: AreaPos) -> QuadOutcome {
        let present: Vec<(SubmapPos, &Submap)> = area
            .submaps()
            .into_iter()
            .filter_map(|pos| self.submaps.get(&pos).map(|sm| (pos, sm.as_ref())))
            .collect();
        let stored = if present.len() < area.submaps().len() {
            self.stored_absent_members(area)
        } else {
            Vec::new()
        };

        if present.iter().all(|(_, sm)| sm.is_uniform()) && stored.iter().all(|r| r.submap.is_uniform()) {
            tracing::trace!(dim = %self.dimension, %area, "uniform quad, not written");
            return QuadOutcome::SkippedUniform;
        }

        let mut records: Vec<SubmapRecord<&Submap>> = present
            .into_iter()
            .map(|(pos, sm)| SubmapRecord::new(pos, sm))
            .collect();
        records.extend(stored.iter().map(|r| SubmapRecord::new(r.pos(), &r.submap)));
        records.sort_by_key(|r| r.pos());
        match self.backend.write_quad(&self.dimension, area, &records) {
            Ok(()) => QuadOutcome::Written,
            Err(e) => {
                tracing::warn!(dim = %self.dimension, %area, error = %e, "quad write failed, keeping it resident");
                QuadOutcome::Failed
            }
        }
    }

    /// Stored records of quad members that are not resident.
    fn stored_absent_members(&self, area: AreaPos) -> Vec<SubmapRecord> {
        let records = match self.backend.read_quad(&self.dimension, area) {
            Ok(Some(records)) => records,
            Ok(None) => return Vec::new(),
            Err(e) => {
                tracing::warn!(dim = %self.dimension, %area, error = %e, "unreadable quad, overwriting with resident members");
                return Vec::new();
            }
        };
        let kept: Vec<SubmapRecord> = records
            .into_iter()
            .filter(|r| {
                r.pos().area() == area
                    && r.version <= SUBMAP_FORMAT_VERSION
                    && !self.submaps.contains_key(&r.pos())
            })
            .collect();
        if !kept.is_empty() {
            tracing::debug!(dim = %self.dimension, %area, merged = kept.len(), "kept stored members of a partial quad");
        }
        kept
    }

    fn evict_quad(&mut self, area: AreaPos) -> Vec<SubmapPos> {
        area.submaps()
            .into_iter()
            .filter(|pos| self.submaps.remove(pos).is_some())
            .collect()
    }

    fn load_quad(&mut self, area: AreaPos) {
        let records = match self.backend.read_quad(&self.dimension, area) {
            Ok(Some(records)) => records,
            Ok(None) => return,
            Err(e) => {
                tracing::warn!(dim = %self.dimension, %area, error = %e, "unreadable quad, regenerating");
                return;
            }
        };
        for record in records {
            let pos = record.pos();
            if pos.area() != area {
                tracing::error!(dim = %self.dimension, %area, %pos, "record outside its quad, skipped");
                continue;
            }
            if record.version > SUBMAP_FORMAT_VERSION {
                tracing::warn!(%pos, version = record.version, "unsupported submap format, skipped");
                continue;
            }
            match self.submaps.entry(pos) {
                Entry::Vacant(slot) => {
                    slot.insert(Box::new(record.submap));
                }
                Entry::Occupied(_) => {
                    tracing::debug!(%pos, "stored copy shadowed by resident submap");
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::PersistConfig;
    use crate::store::{QuadFileStore, StoreError};
    use mapstream_common::TilePos;
    use mapstream_kernel::{Item, TerrainId};

    fn file_store(tmp: &tempfile::TempDir) -> Arc<QuadFileStore> {
        Arc::new(QuadFileStore::open(&PersistConfig::at(tmp.path().join("save"))).unwrap())
    }

    fn store_on(backend: Arc<QuadFileStore>) -> ChunkStore {
        ChunkStore::new(DimensionId::primary(), backend)
    }

    fn busy(tag: &str) -> Box<Submap> {
        let mut sm = Submap::uniform(TerrainId(1));
        sm.add_item(TilePos::new(0, 0).unwrap(), Item::new(tag));
        Box::new(sm)
    }

    fn blank() -> Box<Submap> {
        Box::new(Submap::uniform(TerrainId(0)))
    }

    fn fill_quad(store: &mut ChunkStore, area: AreaPos, make: impl Fn() -> Box<Submap>) {
        for pos in area.submaps() {
            store.add(pos, make()).unwrap();
        }
    }

    struct Recorder {
        progress: Vec<(usize, usize)>,
        evicted: Vec<SubmapPos>,
    }

    impl SaveObserver for Recorder {
        fn on_progress(&mut self, done: usize, total: usize) {
            self.progress.push((done, total));
        }
        fn on_evicted(&mut self, _dim: &DimensionId, pos: SubmapPos) {
            self.evicted.push(pos);
        }
    }

    struct BrokenBackend;

    impl QuadBackend for BrokenBackend {
        fn write_quad(
            &self,
            _dim: &DimensionId,
            _area: AreaPos,
            _records: &[SubmapRecord<&Submap>],
        ) -> Result<(), StoreError> {
            Err(StoreError::Io(std::io::Error::other("disk full")))
        }

        fn read_quad(
            &self,
            _dim: &DimensionId,
            _area: AreaPos,
        ) -> Result<Option<Vec<SubmapRecord>>, StoreError> {
            Err(StoreError::Io(std::io::Error::other("unreadable")))
        }
    }

    #[test]
    fn add_refuses_occupied_coordinate() {
        let tmp = tempfile::tempdir().unwrap();
        let mut store = store_on(file_store(&tmp));
        let pos = SubmapPos::new(0, 0, 0);
        assert!(store.add(pos, busy("first")).is_ok());
        let rejected = store.add(pos, busy("second")).unwrap_err();
        assert_eq!(rejected.items_at(TilePos::new(0, 0).unwrap())[0].kind, "second");
        let kept = store.lookup_in_memory(pos).unwrap();
        assert_eq!(kept.items_at(TilePos::new(0, 0).unwrap())[0].kind, "first");
    }

    #[test]
    fn unload_quad_is_atomic_and_reloads() {
        let tmp = tempfile::tempdir().unwrap();
        let backend = file_store(&tmp);
        let mut store = store_on(backend.clone());
        let area = AreaPos::new(0, 0, 0);
        fill_quad(&mut store, area, || busy("crate"));
        store.add(SubmapPos::new(5, 5, 0), busy("elsewhere")).unwrap();

        assert_eq!(store.unload_quad(area), QuadOutcome::Written);
        for pos in area.submaps() {
            assert!(!store.contains(pos));
        }
        assert_eq!(store.len(), 1);
        assert_eq!(backend.stats().quads_written, 1);

        // one disk read brings back all four members
        assert!(store.lookup(area.submaps()[2]).is_some());
        for pos in area.submaps() {
            assert!(store.contains(pos));
        }
        assert_eq!(backend.stats().quads_read, 1);
    }

    #[test]
    fn mixed_quad_writes_every_present_member() {
        let tmp = tempfile::tempdir().unwrap();
        let backend = file_store(&tmp);
        let mut store = store_on(backend.clone());
        let area = AreaPos::new(2, -1, 0);
        let [a, b, c, _] = area.submaps();
        store.add(a, busy("crate")).unwrap();
        store.add(b, blank()).unwrap();
        store.add(c, blank()).unwrap();

        store.unload_quad(area);
        let records = backend
            .read_quad(&DimensionId::primary(), area)
            .unwrap()
            .unwrap();
        assert_eq!(records.len(), 3);
    }

    #[test]
    fn uniform_quad_is_skipped_but_still_evicted() {
        let tmp = tempfile::tempdir().unwrap();
        let backend = file_store(&tmp);
        let mut store = store_on(backend.clone());
        let area = AreaPos::new(0, 0, 0);
        fill_quad(&mut store, area, blank);

        let report = store.save(
            SaveOptions {
                delete_after: true,
                ..SaveOptions::default()
            },
            None,
        );
        assert_eq!(report.quads_written, 0);
        assert_eq!(report.quads_skipped_uniform, 1);
        assert_eq!(report.evicted.len(), 4);
        assert!(store.is_empty());
        assert_eq!(backend.stats().quads_written, 0);
        assert_eq!(backend.quad_file_count(&DimensionId::primary()).unwrap(), 0);

        // nothing on disk: caller has to regenerate
        assert!(store.lookup(area.submaps()[0]).is_none());
    }

    #[test]
    fn parallel_save_writes_each_quad_once() {
        let tmp = tempfile::tempdir().unwrap();
        let backend = file_store(&tmp);
        let mut store = store_on(backend.clone());
        for x in 0..4 {
            for y in 0..4 {
                fill_quad(&mut store, AreaPos::new(x, y, 0), || busy("crate"));
            }
        }
        fill_quad(&mut store, AreaPos::new(9, 9, 0), blank);

        let report = store.save(
            SaveOptions {
                parallel: true,
                ..SaveOptions::default()
            },
            None,
        );
        assert_eq!(report.quads_written, 16);
        assert_eq!(report.quads_skipped_uniform, 1);
        assert!(report.evicted.is_empty());
        assert_eq!(store.len(), 17 * 4);
        assert_eq!(backend.quad_file_count(&DimensionId::primary()).unwrap(), 16);
    }

    #[test]
    fn save_reports_progress_and_evictions() {
        let tmp = tempfile::tempdir().unwrap();
        let mut store = store_on(file_store(&tmp));
        fill_quad(&mut store, AreaPos::new(0, 0, 0), || busy("crate"));

        let mut rec = Recorder {
            progress: Vec::new(),
            evicted: Vec::new(),
        };
        store.save(
            SaveOptions {
                delete_after: true,
                notify: true,
                show_progress: true,
                parallel: false,
            },
            Some(&mut rec),
        );
        assert_eq!(rec.progress.last(), Some(&(4, 4)));
        assert_eq!(rec.evicted.len(), 4);
    }

    #[test]
    fn failed_write_keeps_quad_resident() {
        let mut store = ChunkStore::new(DimensionId::primary(), Arc::new(BrokenBackend));
        let area = AreaPos::new(0, 0, 0);
        fill_quad(&mut store, area, || busy("crate"));

        assert_eq!(store.unload_quad(area), QuadOutcome::Failed);
        assert_eq!(store.len(), 4);

        let report = store.save(
            SaveOptions {
                delete_after: true,
                ..SaveOptions::default()
            },
            None,
        );
        assert_eq!(report.quads_failed, 1);
        assert!(report.evicted.is_empty());
        assert_eq!(store.len(), 4);
    }

    #[test]
    fn unreadable_quad_reads_as_absent() {
        let mut store = ChunkStore::new(DimensionId::primary(), Arc::new(BrokenBackend));
        assert!(store.lookup(SubmapPos::new(3, 3, 0)).is_none());
        assert!(store.is_empty());
    }

    #[test]
    fn corrupt_file_falls_back_to_regeneration() {
        let tmp = tempfile::tempdir().unwrap();
        let backend = file_store(&tmp);
        let mut store = store_on(backend.clone());
        let area = AreaPos::new(0, 0, 0);
        fill_quad(&mut store, area, || busy("crate"));
        store.unload_quad(area);

        let path = backend.quad_path(&DimensionId::primary(), area);
        std::fs::write(&path, b"MSQ1 definitely not a quad").unwrap();
        assert!(store.lookup(area.submaps()[0]).is_none());
    }

    #[test]
    fn disk_read_keeps_resident_siblings() {
        let tmp = tempfile::tempdir().unwrap();
        let mut store = store_on(file_store(&tmp));
        let area = AreaPos::new(0, 0, 0);
        fill_quad(&mut store, area, || busy("old"));
        store.unload_quad(area);

        let [a, b, ..] = area.submaps();
        store.add(a, busy("new")).unwrap();
        assert!(store.lookup(b).is_some());
        let kept = store.lookup_in_memory(a).unwrap();
        assert_eq!(kept.items_at(TilePos::new(0, 0).unwrap())[0].kind, "new");
    }

    #[test]
    fn transfer_moves_everything_and_keeps_destination_on_collision() {
        let tmp = tempfile::tempdir().unwrap();
        let backend = file_store(&tmp);
        let mut from = ChunkStore::new(DimensionId::new("staging"), backend.clone());
        let mut to = ChunkStore::new(DimensionId::primary(), backend);
        from.add(SubmapPos::new(0, 0, 0), busy("incoming")).unwrap();
        from.add(SubmapPos::new(1, 0, 0), busy("incoming")).unwrap();
        to.add(SubmapPos::new(1, 0, 0), busy("resident")).unwrap();

        let report = from.transfer_all_to(&mut to);
        assert_eq!(report, TransferReport { moved: 1, collisions: 1 });
        assert!(from.is_empty());
        assert_eq!(to.len(), 2);
        let kept = to.lookup_in_memory(SubmapPos::new(1, 0, 0)).unwrap();
        assert_eq!(kept.items_at(TilePos::new(0, 0).unwrap())[0].kind, "resident");
    }

    #[test]
    fn partial_quad_save_keeps_stored_siblings() {
        let tmp = tempfile::tempdir().unwrap();
        let backend = file_store(&tmp);
        let mut store = store_on(backend.clone());
        let area = AreaPos::new(0, 0, 0);
        fill_quad(&mut store, area, || busy("stored"));
        assert_eq!(store.unload_quad(area), QuadOutcome::Written);

        let mut staging = ChunkStore::new(DimensionId::new("staging"), backend.clone());
        staging.add(area.submaps()[1], busy("moved")).unwrap();
        staging.transfer_all_to(&mut store);
        assert_eq!(store.len(), 1);

        assert_eq!(store.unload_quad(area), QuadOutcome::Written);
        let records = backend
            .read_quad(&DimensionId::primary(), area)
            .unwrap()
            .unwrap();
        assert_eq!(records.len(), 4);
        let kind_at = |pos: SubmapPos| {
            let record = records.iter().find(|r| r.pos() == pos).unwrap();
            record.submap.items_at(TilePos::new(0, 0).unwrap())[0].kind.clone()
        };
        let [a, b, c, d] = area.submaps();
        assert_eq!(kind_at(b), "moved");
        for pos in [a, c, d] {
            assert_eq!(kind_at(pos), "stored");
        }
    }

    #[test]
    fn uniform_member_added_over_stored_quad_is_still_written() {
        let tmp = tempfile::tempdir().unwrap();
        let backend = file_store(&tmp);
        let mut store = store_on(backend.clone());
        let area = AreaPos::new(0, 0, 0);
        fill_quad(&mut store, area, || busy("stored"));
        store.unload_quad(area);

        store.add(area.submaps()[0], blank()).unwrap();
        let report = store.save(
            SaveOptions {
                delete_after: true,
                ..SaveOptions::default()
            },
            None,
        );
        assert_eq!(report.quads_written, 1);
        let records = backend
            .read_quad(&DimensionId::primary(), area)
            .unwrap()
            .unwrap();
        assert_eq!(records.len(), 4);
        assert!(records[0].submap.is_uniform());
    }
}
