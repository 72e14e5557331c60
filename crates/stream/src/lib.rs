//! Streaming: which submaps must be resident, and keeping it that way.
//!
//! # Invariants
//! - The desired set is rebuilt from every active request on each update, never patched.
//! - Unload notifications and evictions happen before any load in the same update.
//! - Eviction goes through the quad-atomic unload; a quad with a desired member stays.
//! - Stale request handles are ignored, never an error.

mod keepalive;
mod listener;
mod region;
mod tracker;

pub use keepalive::{FireKeepalive, KeepaliveReport};
pub use listener::{ListenerId, SharedListener, SubmapLoadListener};
pub use region::Region;
pub use tracker::{
    LoadRequest, LoadRequestHandle, LoadSource, LoadTracker, TrackerConfig, TrackerStats,
    UpdateReport,
};
