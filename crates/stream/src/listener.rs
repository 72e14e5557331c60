use mapstream_common::{DimensionId, SubmapPos};
use mapstream_persist::ChunkStoreRegistry;
use std::cell::RefCell;
use std::rc::Rc;

/// Consumer of load/unload events from the [`LoadTracker`](crate::LoadTracker).
///
/// Called synchronously on the thread running `update`, in registration order.
pub trait SubmapLoadListener {
    /// `pos` is resident in `registry` when this is called.
    fn on_submap_loaded(&mut self, pos: SubmapPos, dim: &DimensionId, registry: &ChunkStoreRegistry);

    /// Called before the submap's quad is evicted.
    fn on_submap_unloaded(&mut self, pos: SubmapPos, dim: &DimensionId);
}

/// Listeners are shared with their owner, which keeps using them between ticks.
pub type SharedListener = Rc<RefCell<dyn SubmapLoadListener>>;

/// Handle for [`LoadTracker::remove_listener`](crate::LoadTracker::remove_listener).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ListenerId(pub(crate) u64);
