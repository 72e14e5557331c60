//! Submap payload and out-of-bubble catch-up.
//!
//! # Invariants
//! - A uniform submap has default content everywhere; any mutation clears the flag.
//! - `field_count` always equals the number of live field entries.
//! - Catch-up never runs deferred actions and is a no-op for non-positive turn counts.

pub mod batch_turns;
pub mod field;
pub mod item;
pub mod mapgen;
pub mod power;
pub mod submap;
pub mod vehicle;

pub use batch_turns::{
    BatteryPool, FieldCatchUp, MAX_CREATURE_CATCHUP_TURNS, MAX_FIELD_CATCHUP_TURNS,
    MAX_GRID_CATCHUP_TURNS, MAX_ITEM_CATCHUP_TURNS, MAX_VEHICLE_CATCHUP_TURNS, SubmapCatchUp,
    catch_up_battery_pool, catch_up_fields, catch_up_items, catch_up_submap, catch_up_vehicle,
    clamp_turns,
};
pub use field::{FieldEntry, FieldMap, FieldTypeId};
pub use item::Item;
pub use mapgen::{FlatGenerator, SubmapGenerator};
pub use power::{FurnitureId, PowerPart};
pub use submap::{Submap, SubmapError, TerrainId};
pub use vehicle::{Vehicle, VehicleBattery};
