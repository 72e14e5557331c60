//! The submap payload: a 12x12 tile grid plus its dynamic content.
//!
//! The streaming layer treats a submap mostly as an opaque value. It only
//! looks at [`Submap::is_uniform`], [`Submap::field_count`] and the narrow
//! accessors used by catch-up and the distribution grid.

use mapstream_common::{SUBMAP_SIZE, TilePos};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use crate::field::{FieldEntry, FieldMap, FieldTypeId};
use crate::item::Item;
use crate::power::{FurnitureId, PowerPart};
use crate::vehicle::Vehicle;

const TILE_COUNT: usize = SUBMAP_SIZE * SUBMAP_SIZE;

/// Terrain type index.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub struct TerrainId(pub u16);

/// Errors from validating a decoded submap.
#[derive(Debug, thiserror::Error)]
pub enum SubmapError {
    #[error("terrain grid has {0} tiles, expected 144")]
    InvalidTerrainLength(usize),
    #[error("tile ({x},{y}) is outside the submap")]
    TileOutOfBounds { x: u8, y: u8 },
    #[error("field count is {cached}, but {actual} entries are present")]
    FieldCountMismatch { cached: usize, actual: usize },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Submap {
    terrain: Vec<TerrainId>,
    furniture: BTreeMap<TilePos, FurnitureId>,
    fields: BTreeMap<TilePos, FieldMap>,
    field_count: usize,
    items: BTreeMap<TilePos, Vec<Item>>,
    vehicles: Vec<Vehicle>,
    power: BTreeMap<TilePos, PowerPart>,
    /// Turn this submap was last simulated or caught up to.
    last_touched: u64,
    uniform: bool,
}

impl Submap {
    /// A submap where every tile is `terrain` and nothing else is present.
    pub fn uniform(terrain: TerrainId) -> Self {
        Self {
            terrain: vec![terrain; TILE_COUNT],
            furniture: BTreeMap::new(),
            fields: BTreeMap::new(),
            field_count: 0,
            items: BTreeMap::new(),
            vehicles: Vec::new(),
            power: BTreeMap::new(),
            last_touched: 0,
            uniform: true,
        }
    }

    /// True when the submap can be regenerated instead of stored.
    pub fn is_uniform(&self) -> bool {
        self.uniform
    }

    /// Number of live field entries across all tiles.
    pub fn field_count(&self) -> usize {
        self.field_count
    }

    pub fn last_touched(&self) -> u64 {
        self.last_touched
    }

    pub fn turns_since(&self, now: u64) -> i64 {
        i64::try_from(now.saturating_sub(self.last_touched)).unwrap_or(i64::MAX)
    }

    pub fn touch(&mut self, now: u64) {
        self.last_touched = now;
    }

    // --- terrain / furniture ---

    /// Terrain at `tile`; the default terrain for an out-of-range tile.
    pub fn terrain(&self, tile: TilePos) -> TerrainId {
        tile.is_valid()
            .then(|| self.terrain.get(tile.index()).copied())
            .flatten()
            .unwrap_or_default()
    }

    /// Out-of-range tiles are ignored and leave the submap untouched.
    pub fn set_terrain(&mut self, tile: TilePos, ter: TerrainId) {
        if !tile.is_valid() {
            return;
        }
        if let Some(slot) = self.terrain.get_mut(tile.index()) {
            *slot = ter;
            self.uniform = false;
        }
    }

    pub fn furniture(&self, tile: TilePos) -> Option<&FurnitureId> {
        self.furniture.get(&tile)
    }

    pub fn set_furniture(&mut self, tile: TilePos, furn: FurnitureId) {
        self.furniture.insert(tile, furn);
        self.uniform = false;
    }

    // --- fields ---

    pub fn fields(&self) -> impl Iterator<Item = (TilePos, &FieldMap)> {
        self.fields.iter().map(|(t, m)| (*t, m))
    }

    pub fn field_at(&self, tile: TilePos) -> Option<&FieldMap> {
        self.fields.get(&tile)
    }

    pub fn add_field(&mut self, tile: TilePos, kind: FieldTypeId, entry: FieldEntry) {
        if self.fields.entry(tile).or_default().insert(kind, entry) {
            self.field_count += 1;
        }
        self.uniform = false;
    }

    pub fn remove_field(&mut self, tile: TilePos, kind: &FieldTypeId) -> Option<FieldEntry> {
        let map = self.fields.get_mut(&tile)?;
        let removed = map.remove(kind);
        if removed.is_some() {
            self.field_count -= 1;
        }
        if map.is_empty() {
            self.fields.remove(&tile);
        }
        removed
    }

    pub fn has_fire(&self) -> bool {
        self.fields.values().any(FieldMap::has_fire)
    }

    /// Apply `f` to every field entry, then drop exhausted entries and keep
    /// the field count in step. Returns the number of entries removed.
    pub fn update_fields(&mut self, mut f: impl FnMut(&FieldTypeId, &mut FieldEntry)) -> usize {
        let mut removed = 0;
        for map in self.fields.values_mut() {
            for (kind, entry) in map.iter_mut() {
                f(kind, entry);
            }
            removed += map.remove_dead();
        }
        self.fields.retain(|_, m| !m.is_empty());
        self.field_count -= removed;
        removed
    }

    // --- items ---

    pub fn items_at(&self, tile: TilePos) -> &[Item] {
        self.items.get(&tile).map(Vec::as_slice).unwrap_or_default()
    }

    pub fn add_item(&mut self, tile: TilePos, item: Item) {
        self.items.entry(tile).or_default().push(item);
        self.uniform = false;
    }

    pub fn items_mut(&mut self) -> impl Iterator<Item = &mut Item> {
        self.items.values_mut().flatten()
    }

    pub fn item_count(&self) -> usize {
        self.items.values().map(Vec::len).sum()
    }

    // --- vehicles ---

    pub fn vehicles(&self) -> &[Vehicle] {
        &self.vehicles
    }

    pub fn vehicles_mut(&mut self) -> &mut [Vehicle] {
        &mut self.vehicles
    }

    pub fn add_vehicle(&mut self, vehicle: Vehicle) {
        self.vehicles.push(vehicle);
        self.uniform = false;
    }

    // --- power ---

    pub fn power_parts(&self) -> impl Iterator<Item = (TilePos, &PowerPart)> {
        self.power.iter().map(|(t, p)| (*t, p))
    }

    pub fn power_part_mut(&mut self, tile: TilePos) -> Option<&mut PowerPart> {
        self.power.get_mut(&tile)
    }

    pub fn set_power_part(&mut self, tile: TilePos, part: PowerPart) {
        self.power.insert(tile, part);
        self.uniform = false;
    }

    pub fn remove_power_part(&mut self, tile: TilePos) -> Option<PowerPart> {
        self.power.remove(&tile)
    }

    pub fn has_power_parts(&self) -> bool {
        !self.power.is_empty()
    }

    /// Check a decoded payload for structural consistency.
    pub fn validate(&self) -> Result<(), SubmapError> {
        if self.terrain.len() != TILE_COUNT {
            return Err(SubmapError::InvalidTerrainLength(self.terrain.len()));
        }
        let tiles = self
            .furniture
            .keys()
            .chain(self.fields.keys())
            .chain(self.items.keys())
            .chain(self.power.keys());
        for tile in tiles {
            if !tile.is_valid() {
                return Err(SubmapError::TileOutOfBounds {
                    x: tile.x,
                    y: tile.y,
                });
            }
        }
        let actual: usize = self.fields.values().map(FieldMap::len).sum();
        if actual != self.field_count {
            return Err(SubmapError::FieldCountMismatch {
                cached: self.field_count,
                actual,
            });
        }
        Ok(())
    }
}
