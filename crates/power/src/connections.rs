use mapstream_common::{AreaPos, Direction};
use std::collections::BTreeMap;

/// Which areas are wired to which cardinal neighbors.
///
/// Links are stored on both ends; `connect` and `disconnect` keep them symmetric.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct GridConnections {
    links: BTreeMap<AreaPos, u8>,
}

impl GridConnections {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn connect(&mut self, area: AreaPos, dir: Direction) {
        *self.links.entry(area).or_default() |= dir.bit();
        *self.links.entry(area.neighbor(dir)).or_default() |= dir.opposite().bit();
    }

    pub fn disconnect(&mut self, area: AreaPos, dir: Direction) {
        self.clear_bit(area, dir);
        self.clear_bit(area.neighbor(dir), dir.opposite());
    }

    pub fn is_connected(&self, area: AreaPos, dir: Direction) -> bool {
        self.links.get(&area).is_some_and(|m| m & dir.bit() != 0)
    }

    pub fn directions(&self, area: AreaPos) -> impl Iterator<Item = Direction> {
        Direction::from_mask(self.links.get(&area).copied().unwrap_or(0))
    }

    pub fn clear(&mut self) {
        self.links.clear();
    }

    fn clear_bit(&mut self, area: AreaPos, dir: Direction) {
        if let Some(mask) = self.links.get_mut(&area) {
            *mask &= !dir.bit();
            if *mask == 0 {
                self.links.remove(&area);
            }
        }
    }
}
