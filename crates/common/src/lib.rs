//! Shared coordinate types for the submap streaming layer.
//!
//! # Invariants
//! - Submap coordinates are unique only within a dimension.
//! - A quad is the 2x2 group of submaps sharing one area coordinate (floor division by 2).

pub mod types;

pub use types::{
    AreaPos, DimensionId, Direction, QUAD_SIZE, SUBMAP_SIZE, SubmapPos, TilePos,
};
