//! Distribution grids: power pools over wired clusters of resident submaps.
//!
//! # Invariants
//! - Connectivity is cardinal only and always symmetric.
//! - A grid is rebuilt, with a new id, after any load, unload, eviction or
//!   wiring change in the 5-area neighborhood of one of its members.
//! - Furniture changes caused by a grid update are applied only after every
//!   grid has been updated.

mod batch;
mod connections;
mod grid;
mod tracker;
mod transform;

pub use batch::catch_up_grid;
pub use connections::GridConnections;
pub use grid::{DistributionGrid, GridId, PowerStat};
pub use tracker::{DistributionGridTracker, GridUpdateReport};
pub use transform::{FurnitureTransform, FurnitureTransformQueue};
