use serde::{Deserialize, Serialize};

/// A battery part. Energy is in joules, which at one second per turn is
/// the same as watt-turns.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct VehicleBattery {
    pub capacity: i64,
    pub stored: i64,
}

impl VehicleBattery {
    pub fn new(capacity: i64, stored: i64) -> Self {
        Self {
            capacity,
            stored: stored.clamp(0, capacity),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Vehicle {
    pub name: String,
    pub batteries: Vec<VehicleBattery>,
    /// Current generation from engines, alternators and solar panels.
    pub generation_w: i64,
    /// Current draw from lights, fridges and other accessories.
    pub consumption_w: i64,
}

impl Vehicle {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            batteries: Vec::new(),
            generation_w: 0,
            consumption_w: 0,
        }
    }

    pub fn net_battery_charge_rate(&self) -> i64 {
        self.generation_w - self.consumption_w
    }

    pub fn battery_stored(&self) -> i64 {
        self.batteries.iter().map(|b| b.stored).sum()
    }

    pub fn battery_capacity(&self) -> i64 {
        self.batteries.iter().map(|b| b.capacity).sum()
    }

    /// Fill batteries in order. Returns the energy that did not fit.
    pub fn charge_battery(&mut self, amount: i64) -> i64 {
        let mut left = amount.max(0);
        for bat in &mut self.batteries {
            if left == 0 {
                break;
            }
            let room = bat.capacity - bat.stored;
            let take = room.min(left);
            bat.stored += take;
            left -= take;
        }
        left
    }

    /// Drain batteries in order. Returns the energy that could not be supplied.
    pub fn discharge_battery(&mut self, amount: i64) -> i64 {
        let mut left = amount.max(0);
        for bat in &mut self.batteries {
            if left == 0 {
                break;
            }
            let take = bat.stored.min(left);
            bat.stored -= take;
            left -= take;
        }
        left
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn van() -> Vehicle {
        let mut v = Vehicle::new("van");
        v.batteries.push(VehicleBattery::new(100, 50));
        v.batteries.push(VehicleBattery::new(100, 0));
        v
    }

    #[test]
    fn charge_spills_into_next_battery() {
        let mut v = van();
        assert_eq!(v.charge_battery(120), 0);
        assert_eq!(v.batteries[0].stored, 100);
        assert_eq!(v.batteries[1].stored, 70);
        assert_eq!(v.charge_battery(100), 70);
    }

    #[test]
    fn discharge_reports_unmet_demand() {
        let mut v = van();
        assert_eq!(v.discharge_battery(80), 30);
        assert_eq!(v.battery_stored(), 0);
    }

    #[test]
    fn battery_new_clamps_stored() {
        assert_eq!(VehicleBattery::new(10, 50).stored, 10);
        assert_eq!(VehicleBattery::new(10, -5).stored, 0);
    }
}
