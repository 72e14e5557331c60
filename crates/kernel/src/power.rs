use serde::{Deserialize, Serialize};

/// Furniture identifier, e.g. `f_fridge_on`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct FurnitureId(pub String);

impl FurnitureId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }
}

/// A grid-connected electrical fixture on a tile.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum PowerPart {
    Generator {
        watts: i64,
    },
    /// `off_state` is the furniture this tile turns into when the grid
    /// cannot feed it.
    Consumer {
        watts: i64,
        off_state: Option<FurnitureId>,
    },
    Battery {
        capacity: i64,
        stored: i64,
    },
}

impl PowerPart {
    pub fn generation_w(&self) -> i64 {
        match self {
            PowerPart::Generator { watts } => *watts,
            _ => 0,
        }
    }

    pub fn consumption_w(&self) -> i64 {
        match self {
            PowerPart::Consumer { watts, .. } => *watts,
            _ => 0,
        }
    }

    pub fn stored(&self) -> i64 {
        match self {
            PowerPart::Battery { stored, .. } => *stored,
            _ => 0,
        }
    }

    pub fn is_battery(&self) -> bool {
        matches!(self, PowerPart::Battery { .. })
    }
}
