use mapstream_common::{DimensionId, SubmapPos, TilePos};
use mapstream_kernel::{
    FieldEntry, FieldTypeId, FurnitureId, Item, PowerPart, Submap, SubmapGenerator, TerrainId,
    Vehicle, VehicleBattery,
};

/// Deterministic scatter of content over open ground.
///
/// About half the submaps come out uniform. The rest get a fire, a timed item, some
/// power parts or a parked vehicle, picked from a per-position hash.
pub struct SeededGenerator {
    seed: u64,
    /// Turn stamped on generated submaps so catch-up starts from now.
    pub now: u64,
}

impl SeededGenerator {
    pub fn new(seed: u64) -> Self {
        Self { seed, now: 0 }
    }

    fn hash(&self, dim: &DimensionId, pos: SubmapPos) -> u64 {
        let mut h = splitmix64(self.seed);
        for byte in dim.0.bytes() {
            h = splitmix64(h ^ u64::from(byte));
        }
        for v in [pos.x, pos.y, pos.z] {
            h = splitmix64(h ^ u64::from(v as u32));
        }
        h
    }
}

impl SubmapGenerator for SeededGenerator {
    fn generate(&mut self, dim: &DimensionId, pos: SubmapPos) -> Submap {
        let h = self.hash(dim, pos);
        let mut sm = Submap::uniform(TerrainId(1));
        sm.touch(self.now);
        let tile = |shift: u32| {
            let bits = (h >> shift) as u8;
            TilePos::new(bits % 12, (bits / 12) % 12).unwrap_or_default()
        };

        if h % 13 == 0 {
            sm.add_field(tile(8), FieldTypeId::fire(), FieldEntry::new(3, 40));
            sm.add_field(tile(16), FieldTypeId::new("fd_smoke"), FieldEntry::new(2, 10));
        }
        if h % 7 == 0 {
            sm.add_item(tile(24), Item::with_countdown("alarm_clock", 600, "ring"));
        }
        if h % 5 == 0 {
            sm.set_power_part(tile(32), PowerPart::Generator { watts: 40 });
            sm.set_power_part(tile(40), PowerPart::Battery {
                capacity: 50_000,
                stored: 10_000,
            });
        }
        if h % 6 == 0 {
            sm.set_furniture(tile(48), FurnitureId::new("f_fridge_on"));
            sm.set_power_part(tile(48), PowerPart::Consumer {
                watts: 60,
                off_state: Some(FurnitureId::new("f_fridge_off")),
            });
        }
        if h % 17 == 0 {
            let mut car = Vehicle::new("hatchback");
            car.batteries.push(VehicleBattery::new(20_000, 5_000));
            car.consumption_w = 15;
            sm.add_vehicle(car);
        }
        sm
    }
}

/// One splitmix64 step: a fast, well-mixed deterministic hash.
pub fn splitmix64(mut state: u64) -> u64 {
    state = state.wrapping_add(0x9e37_79b9_7f4a_7c15);
    let mut z = state;
    z = (z ^ (z >> 30)).wrapping_mul(0xbf58_476d_1ce4_e5b9);
    z = (z ^ (z >> 27)).wrapping_mul(0x94d0_49bb_1331_11eb);
    z ^ (z >> 31)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn same_seed_same_world() {
        let dim = DimensionId::primary();
        let mut a = SeededGenerator::new(42);
        let mut b = SeededGenerator::new(42);
        for x in -10..10 {
            let pos = SubmapPos::new(x, 3, 0);
            assert_eq!(a.generate(&dim, pos), b.generate(&dim, pos));
        }
    }

    #[test]
    fn mostly_uniform_but_not_entirely() {
        let dim = DimensionId::primary();
        let mut generator = SeededGenerator::new(7);
        let total = 400;
        let uniform = (0..total)
            .filter(|i| generator.generate(&dim, SubmapPos::new(i % 20, i / 20, 0)).is_uniform())
            .count();
        assert!(uniform > 0 && uniform < total as usize);
    }

    #[test]
    fn dimensions_differ() {
        let mut generator = SeededGenerator::new(1);
        let cave = DimensionId::new("cave");
        let differs = (0..50).any(|x| {
            let pos = SubmapPos::new(x, 0, 0);
            generator.generate(&DimensionId::primary(), pos) != generator.generate(&cave, pos)
        });
        assert!(differs);
    }

    #[test]
    fn generated_submaps_validate() {
        let mut generator = SeededGenerator::new(99);
        for x in 0..100 {
            let sm = generator.generate(&DimensionId::primary(), SubmapPos::new(x, -x, 0));
            assert!(sm.validate().is_ok());
        }
    }
}
