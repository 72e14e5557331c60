//! Persistence: per-dimension chunk stores over quad files.
//!
//! # Invariants
//! - Save and eviction operate on whole quads (2x2 submaps), never on a single submap.
//! - Uniform quads are never written; they are regenerated on demand.
//! - Disk failures never escape a [`ChunkStore`]: unreadable data reads as absent,
//!   failed writes stay resident until the next save.
//! - Submap coordinates are unique per dimension only.

pub mod chunk_store;
pub mod config;
pub mod registry;
pub mod store;

pub use chunk_store::{
    ChunkStore, QuadOutcome, SaveObserver, SaveOptions, SaveReport, TransferReport,
};
pub use config::PersistConfig;
pub use registry::ChunkStoreRegistry;
pub use store::{
    BackendStats, QUAD_SCHEMA_VERSION, QuadBackend, QuadFileStore, SUBMAP_FORMAT_VERSION,
    StoreError, SubmapRecord, WorldMeta,
};
