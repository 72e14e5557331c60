use rand::Rng;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Identifier of a field type (fire, smoke, blood, ...).
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct FieldTypeId(pub String);

impl FieldTypeId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn fire() -> Self {
        Self::new("fd_fire")
    }

    pub fn is_fire(&self) -> bool {
        self.0 == "fd_fire"
    }
}

/// One field effect on one tile.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FieldEntry {
    pub intensity: i32,
    /// Turns since the last intensity decrement.
    pub age: i64,
    /// Turns per expected intensity decrement. Zero means the field never decays.
    pub half_life: i64,
}

impl FieldEntry {
    pub fn new(intensity: i32, half_life: i64) -> Self {
        Self {
            intensity,
            age: 0,
            half_life,
        }
    }

    pub fn is_alive(&self) -> bool {
        self.intensity > 0
    }

    /// Exact in-bubble decay for a single turn.
    ///
    /// Ages the entry by one turn, then with probability `1 / half_life`
    /// drops one intensity level and restarts the age. Returns true when a
    /// level was lost.
    pub fn decay_turn<R: Rng + ?Sized>(&mut self, rng: &mut R) -> bool {
        self.age = self.age.saturating_add(1);
        if self.half_life <= 0 {
            return false;
        }
        let denom = u32::try_from(self.half_life).unwrap_or(u32::MAX);
        if rng.random_ratio(1, denom) {
            self.intensity -= 1;
            self.age = 0;
            return true;
        }
        false
    }
}

/// All field entries present on one tile, keyed by type.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct FieldMap {
    entries: BTreeMap<FieldTypeId, FieldEntry>,
}

impl FieldMap {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn get(&self, kind: &FieldTypeId) -> Option<&FieldEntry> {
        self.entries.get(kind)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&FieldTypeId, &FieldEntry)> {
        self.entries.iter()
    }

    pub fn iter_mut(&mut self) -> impl Iterator<Item = (&FieldTypeId, &mut FieldEntry)> {
        self.entries.iter_mut()
    }

    /// Insert or replace. Returns true if the type was not present before.
    pub(crate) fn insert(&mut self, kind: FieldTypeId, entry: FieldEntry) -> bool {
        self.entries.insert(kind, entry).is_none()
    }

    pub(crate) fn remove(&mut self, kind: &FieldTypeId) -> Option<FieldEntry> {
        self.entries.remove(kind)
    }

    /// Drop every exhausted entry, returning how many were removed.
    pub(crate) fn remove_dead(&mut self) -> usize {
        let before = self.entries.len();
        self.entries.retain(|_, e| e.is_alive());
        before - self.entries.len()
    }

    pub fn has_fire(&self) -> bool {
        self.entries.keys().any(FieldTypeId::is_fire)
    }
}
