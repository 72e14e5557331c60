use mapstream_common::DimensionId;
use rayon::prelude::*;
use std::collections::BTreeMap;
use std::sync::Arc;

use crate::chunk_store::{ChunkStore, SaveObserver, SaveOptions, SaveReport, TransferReport};
use crate::config::PersistConfig;
use crate::store::{QuadBackend, QuadFileStore, StoreError};

/// One [`ChunkStore`] per dimension, created on first access.
///
/// Owned by the simulation context and passed to whoever needs submaps.
pub struct ChunkStoreRegistry {
    backend: Arc<dyn QuadBackend>,
    stores: BTreeMap<DimensionId, ChunkStore>,
    parallel_save: bool,
}

impl ChunkStoreRegistry {
    pub fn new(backend: Arc<dyn QuadBackend>, parallel_save: bool) -> Self {
        Self {
            backend,
            stores: BTreeMap::new(),
            parallel_save,
        }
    }

    /// Registry over a [`QuadFileStore`] opened from `config`.
    pub fn open(config: &PersistConfig) -> Result<Self, StoreError> {
        let backend = QuadFileStore::open(config)?;
        Ok(Self::new(Arc::new(backend), config.parallel_save))
    }

    /// Get-or-create the store for `dim`.
    pub fn get(&mut self, dim: &DimensionId) -> &mut ChunkStore {
        self.stores.entry(dim.clone()).or_insert_with(|| {
            tracing::debug!(%dim, "creating chunk store");
            ChunkStore::new(dim.clone(), Arc::clone(&self.backend))
        })
    }

    /// Existing store for `dim`. Never creates one.
    pub fn store(&self, dim: &DimensionId) -> Option<&ChunkStore> {
        self.stores.get(dim)
    }

    pub fn has_any_loaded(&self, dim: &DimensionId) -> bool {
        self.stores.get(dim).is_some_and(|s| !s.is_empty())
    }

    /// Drop a dimension's store and every submap it held, without saving.
    pub fn unload_dimension(&mut self, dim: &DimensionId) -> bool {
        match self.stores.remove(dim) {
            Some(store) => {
                tracing::debug!(%dim, dropped = store.len(), "unloaded dimension");
                true
            }
            None => false,
        }
    }

    pub fn dimensions(&self) -> impl Iterator<Item = &DimensionId> {
        self.stores.keys()
    }

    /// Save every dimension, one task per dimension when parallel saving is on.
    ///
    /// Only evictions from the primary dimension reach `observer`.
    pub fn save_all(
        &mut self,
        delete_after: bool,
        observer: Option<&mut dyn SaveObserver>,
    ) -> BTreeMap<DimensionId, SaveReport> {
        let _span = tracing::info_span!("save_all", dims = self.stores.len()).entered();
        let opts = SaveOptions {
            delete_after,
            notify: false,
            show_progress: false,
            parallel: self.parallel_save,
        };

        let reports: BTreeMap<DimensionId, SaveReport> = if self.parallel_save {
            self.stores
                .par_iter_mut()
                .map(|(dim, store)| (dim.clone(), store.save(opts, None)))
                .collect()
        } else {
            self.stores
                .iter_mut()
                .map(|(dim, store)| (dim.clone(), store.save(opts, None)))
                .collect()
        };

        if let Some(obs) = observer {
            let primary = DimensionId::primary();
            if let Some(report) = reports.get(&primary) {
                for pos in &report.evicted {
                    obs.on_evicted(&primary, *pos);
                }
            }
        }
        reports
    }

    /// Move every submap of `from` into `to`. `from` is left empty.
    pub fn transfer_dimension(&mut self, from: &DimensionId, to: &DimensionId) -> TransferReport {
        if from == to {
            return TransferReport::default();
        }
        let Some(mut source) = self.stores.remove(from) else {
            return TransferReport::default();
        };
        let report = source.transfer_all_to(self.get(to));
        self.stores.insert(from.clone(), source);
        tracing::debug!(%from, %to, moved = report.moved, collisions = report.collisions, "transferred dimension");
        report
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use mapstream_common::{AreaPos, SubmapPos, TilePos};
    use mapstream_kernel::{Item, Submap, TerrainId};

    fn registry(tmp: &tempfile::TempDir, parallel: bool) -> ChunkStoreRegistry {
        let mut config = PersistConfig::at(tmp.path().join("save"));
        config.parallel_save = parallel;
        ChunkStoreRegistry::open(&config).unwrap()
    }

    fn busy() -> Box<Submap> {
        let mut sm = Submap::uniform(TerrainId(1));
        sm.add_item(TilePos::new(3, 3).unwrap(), Item::new("crate"));
        Box::new(sm)
    }

    fn fill_quad(store: &mut ChunkStore, area: AreaPos) {
        for pos in area.submaps() {
            store.add(pos, busy()).unwrap();
        }
    }

    #[derive(Default)]
    struct Evictions(Vec<(DimensionId, SubmapPos)>);

    impl SaveObserver for Evictions {
        fn on_evicted(&mut self, dim: &DimensionId, pos: SubmapPos) {
            self.0.push((dim.clone(), pos));
        }
    }

    #[test]
    fn stores_are_created_lazily() {
        let tmp = tempfile::tempdir().unwrap();
        let mut reg = registry(&tmp, false);
        let cave = DimensionId::new("cave");
        assert!(reg.store(&cave).is_none());
        assert!(!reg.has_any_loaded(&cave));

        assert!(reg.get(&cave).is_empty());
        assert!(reg.store(&cave).is_some());
        assert!(!reg.has_any_loaded(&cave));

        reg.get(&cave).add(SubmapPos::new(0, 0, 0), busy()).unwrap();
        assert!(reg.has_any_loaded(&cave));
        assert!(!reg.has_any_loaded(&DimensionId::primary()));
    }

    #[test]
    fn unload_dimension_drops_without_saving() {
        let tmp = tempfile::tempdir().unwrap();
        let mut reg = registry(&tmp, false);
        let cave = DimensionId::new("cave");
        fill_quad(reg.get(&cave), AreaPos::new(0, 0, 0));

        assert!(reg.unload_dimension(&cave));
        assert!(!reg.unload_dimension(&cave));
        assert!(reg.store(&cave).is_none());
        // nothing was written, so the quad cannot come back
        assert!(reg.get(&cave).lookup(SubmapPos::new(0, 0, 0)).is_none());
    }

    #[test]
    fn save_all_notifies_only_for_primary() {
        for parallel in [false, true] {
            let tmp = tempfile::tempdir().unwrap();
            let mut reg = registry(&tmp, parallel);
            let primary = DimensionId::primary();
            let cave = DimensionId::new("cave");
            fill_quad(reg.get(&primary), AreaPos::new(0, 0, 0));
            fill_quad(reg.get(&cave), AreaPos::new(0, 0, 0));
            fill_quad(reg.get(&cave), AreaPos::new(1, 0, 0));

            let mut seen = Evictions::default();
            let reports = reg.save_all(true, Some(&mut seen));

            assert_eq!(reports[&primary].quads_written, 1);
            assert_eq!(reports[&cave].quads_written, 2);
            assert_eq!(reports[&cave].evicted.len(), 8);
            assert_eq!(seen.0.len(), 4);
            assert!(seen.0.iter().all(|(dim, _)| dim.is_primary()));
            assert!(!reg.has_any_loaded(&primary));
            assert!(!reg.has_any_loaded(&cave));

            // dimensions stay apart on disk
            assert!(reg.get(&cave).lookup(SubmapPos::new(2, 0, 0)).is_some());
            assert!(reg.get(&primary).lookup(SubmapPos::new(2, 0, 0)).is_none());
        }
    }

    #[test]
    fn save_all_without_eviction_keeps_everything() {
        let tmp = tempfile::tempdir().unwrap();
        let mut reg = registry(&tmp, true);
        fill_quad(reg.get(&DimensionId::primary()), AreaPos::new(0, 0, 0));
        let reports = reg.save_all(false, None);
        assert!(reports[&DimensionId::primary()].evicted.is_empty());
        assert!(reg.has_any_loaded(&DimensionId::primary()));
    }

    #[test]
    fn transfer_dimension_drains_source() {
        let tmp = tempfile::tempdir().unwrap();
        let mut reg = registry(&tmp, false);
        let staging = DimensionId::new("staging");
        let primary = DimensionId::primary();
        fill_quad(reg.get(&staging), AreaPos::new(0, 0, 0));
        reg.get(&primary).add(SubmapPos::new(0, 0, 0), busy()).unwrap();

        let report = reg.transfer_dimension(&staging, &primary);
        assert_eq!(report, TransferReport { moved: 3, collisions: 1 });
        assert!(!reg.has_any_loaded(&staging));
        assert_eq!(reg.store(&primary).map(ChunkStore::len), Some(4));

        assert_eq!(
            reg.transfer_dimension(&DimensionId::new("missing"), &primary),
            TransferReport::default()
        );
    }

    #[test]
    fn similar_dimension_names_stay_apart_on_disk() {
        let tmp = tempfile::tempdir().unwrap();
        let mut reg = registry(&tmp, false);
        let slash = DimensionId::new("lab/x");
        let underscore = DimensionId::new("lab_x");
        let area = AreaPos::new(0, 0, 0);
        fill_quad(reg.get(&slash), area);
        reg.get(&slash).unload_quad(area);

        assert!(reg.get(&underscore).lookup(SubmapPos::new(0, 0, 0)).is_none());
        assert!(reg.get(&slash).lookup(SubmapPos::new(0, 0, 0)).is_some());
    }
}
