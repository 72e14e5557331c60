use glam::IVec3;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Tiles per side of a submap.
pub const SUBMAP_SIZE: usize = 12;

/// Submaps per side of a quad (the save/load unit).
pub const QUAD_SIZE: i32 = 2;

/// Absolute submap coordinate, in submap units.
///
/// Ordering is lexicographic on (x, y, z), which gives the store and the load
/// tracker a deterministic iteration order.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default, Serialize, Deserialize,
)]
pub struct SubmapPos {
    pub x: i32,
    pub y: i32,
    pub z: i32,
}

impl SubmapPos {
    pub const fn new(x: i32, y: i32, z: i32) -> Self {
        Self { x, y, z }
    }

    /// The quad this submap belongs to.
    pub fn area(self) -> AreaPos {
        AreaPos {
            x: self.x.div_euclid(QUAD_SIZE),
            y: self.y.div_euclid(QUAD_SIZE),
            z: self.z,
        }
    }

    pub fn offset(self, dx: i32, dy: i32, dz: i32) -> Self {
        Self::from(self.as_ivec3() + IVec3::new(dx, dy, dz))
    }

    /// Chebyshev distance on the horizontal plane.
    pub fn chebyshev_xy(self, other: SubmapPos) -> i32 {
        (self.x - other.x).abs().max((self.y - other.y).abs())
    }

    pub fn as_ivec3(self) -> IVec3 {
        IVec3::new(self.x, self.y, self.z)
    }
}

impl From<IVec3> for SubmapPos {
    fn from(v: IVec3) -> Self {
        Self::new(v.x, v.y, v.z)
    }
}

impl fmt::Display for SubmapPos {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "sm({},{},{})", self.x, self.y, self.z)
    }
}

/// Area coordinate: identifies a quad, and is the unit grid connectivity runs on.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default, Serialize, Deserialize,
)]
pub struct AreaPos {
    pub x: i32,
    pub y: i32,
    pub z: i32,
}

impl AreaPos {
    pub const fn new(x: i32, y: i32, z: i32) -> Self {
        Self { x, y, z }
    }

    /// The four member submaps, row by row.
    pub fn submaps(self) -> [SubmapPos; 4] {
        let base = SubmapPos::new(self.x * QUAD_SIZE, self.y * QUAD_SIZE, self.z);
        [
            base,
            base.offset(1, 0, 0),
            base.offset(0, 1, 0),
            base.offset(1, 1, 0),
        ]
    }

    pub fn neighbor(self, dir: Direction) -> AreaPos {
        let v = IVec3::new(self.x, self.y, self.z) + dir.offset();
        AreaPos::new(v.x, v.y, v.z)
    }

    /// Home area followed by its four cardinal neighbors.
    pub fn neighborhood(self) -> [AreaPos; 5] {
        [
            self,
            self.neighbor(Direction::North),
            self.neighbor(Direction::East),
            self.neighbor(Direction::South),
            self.neighbor(Direction::West),
        ]
    }
}

impl fmt::Display for AreaPos {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "area({},{},{})", self.x, self.y, self.z)
    }
}

/// Cardinal directions. Connectivity never runs diagonally.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum Direction {
    North,
    East,
    South,
    West,
}

impl Direction {
    pub const ALL: [Direction; 4] = [
        Direction::North,
        Direction::East,
        Direction::South,
        Direction::West,
    ];

    /// North is -y.
    pub fn offset(self) -> IVec3 {
        match self {
            Direction::North => IVec3::new(0, -1, 0),
            Direction::East => IVec3::new(1, 0, 0),
            Direction::South => IVec3::new(0, 1, 0),
            Direction::West => IVec3::new(-1, 0, 0),
        }
    }

    pub fn opposite(self) -> Direction {
        match self {
            Direction::North => Direction::South,
            Direction::East => Direction::West,
            Direction::South => Direction::North,
            Direction::West => Direction::East,
        }
    }

    pub fn bit(self) -> u8 {
        1 << (self as u8)
    }

    /// Directions whose bit is set in `mask`.
    pub fn from_mask(mask: u8) -> impl Iterator<Item = Direction> {
        Self::ALL.into_iter().filter(move |d| mask & d.bit() != 0)
    }

    pub fn mask_of(dirs: &[Direction]) -> u8 {
        dirs.iter().fold(0, |m, d| m | d.bit())
    }
}

/// Tile coordinate local to a submap, both axes in `0..SUBMAP_SIZE`.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default, Serialize, Deserialize,
)]
pub struct TilePos {
    pub x: u8,
    pub y: u8,
}

impl TilePos {
    pub fn new(x: u8, y: u8) -> Option<Self> {
        let size = SUBMAP_SIZE as u8;
        (x < size && y < size).then_some(Self { x, y })
    }

    pub fn is_valid(self) -> bool {
        Self::new(self.x, self.y).is_some()
    }

    /// Row-major index into a submap's tile grid.
    pub fn index(self) -> usize {
        self.y as usize * SUBMAP_SIZE + self.x as usize
    }
}

/// Named world partition. The empty string is the primary dimension.
#[derive(
    Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Default, Serialize, Deserialize,
)]
pub struct DimensionId(pub String);

impl DimensionId {
    pub fn primary() -> Self {
        Self(String::new())
    }

    pub fn new(name: impl Into<String>) -> Self {
        Self(name.into())
    }

    pub fn is_primary(&self) -> bool {
        self.0.is_empty()
    }

    /// Filesystem-safe directory name for this dimension.
    ///
    /// Every byte outside `[A-Za-z0-9-]`, `_` included, is written as `_xx`
    /// (lowercase hex), so distinct names never share a directory.
    pub fn dir_name(&self) -> String {
        if self.is_primary() {
            return "primary".to_string();
        }
        let mut safe = String::with_capacity(self.0.len());
        for b in self.0.bytes() {
            if b.is_ascii_alphanumeric() || b == b'-' {
                safe.push(char::from(b));
            } else {
                safe.push_str(&format!("_{b:02x}"));
            }
        }
        format!("dim_{safe}")
    }
}

impl fmt::Display for DimensionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_primary() {
            f.write_str("<primary>")
        } else {
            f.write_str(&self.0)
        }
    }
}
