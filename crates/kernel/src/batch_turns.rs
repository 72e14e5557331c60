//! Batched catch-up for content that sat outside the simulated region.
//!
//! Each function advances state by N elapsed turns in O(1) or O(submap)
//! time instead of simulating N turns. N is clamped to a per-function cap so
//! a long absence cannot turn into an unbounded load stall; the result for any
//! N above the cap equals the result for N = cap.
//!
//! These are approximations. Field decay is deterministic here while the
//! in-bubble path ([`FieldEntry::decay_turn`](crate::field::FieldEntry::decay_turn))
//! is stochastic; the two agree in expectation only. Power catch-up assumes the
//! net rate stayed constant over the whole interval.

use crate::submap::Submap;
use crate::vehicle::Vehicle;

pub const MAX_FIELD_CATCHUP_TURNS: i64 = 1000;
pub const MAX_ITEM_CATCHUP_TURNS: i64 = 1000;
pub const MAX_VEHICLE_CATCHUP_TURNS: i64 = 100;
/// Cap used by the monster and NPC catch-up owned by other subsystems.
pub const MAX_CREATURE_CATCHUP_TURNS: i64 = 10_000;
pub const MAX_GRID_CATCHUP_TURNS: i64 = 500;

/// Clamp an elapsed turn count into `0..=cap`.
pub fn clamp_turns(turns: i64, cap: i64) -> i64 {
    if turns <= 0 { 0 } else { turns.min(cap) }
}

/// Something with a battery bank and a net generation rate.
pub trait BatteryPool {
    /// Signed watts: generation minus consumption.
    fn net_watts(&self) -> i64;

    /// Charge (positive) or discharge (negative) by `watt_turns`.
    /// Returns the signed part that could not be applied.
    fn apply_net_power(&mut self, watt_turns: i64) -> i64;
}

impl BatteryPool for Vehicle {
    fn net_watts(&self) -> i64 {
        self.net_battery_charge_rate()
    }

    fn apply_net_power(&mut self, watt_turns: i64) -> i64 {
        if watt_turns >= 0 {
            self.charge_battery(watt_turns)
        } else {
            -self.discharge_battery(watt_turns.saturating_neg())
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct FieldCatchUp {
    pub turns: i64,
    pub decrements: i64,
    pub removed: usize,
}

/// Deterministic field decay over `turns`.
///
/// For an entry with half-life H and age A, `(A + N) / H` levels are lost and
/// `(A + N) % H` becomes the new age. Entries without a half-life only age.
pub fn catch_up_fields(submap: &mut Submap, turns: i64) -> FieldCatchUp {
    let turns = clamp_turns(turns, MAX_FIELD_CATCHUP_TURNS);
    if turns == 0 || submap.field_count() == 0 {
        return FieldCatchUp::default();
    }
    let mut decrements = 0;
    let removed = submap.update_fields(|_, entry| {
        let aged = entry.age.saturating_add(turns);
        if entry.half_life > 0 {
            let drops = aged / entry.half_life;
            entry.age = aged % entry.half_life;
            let lost = drops.min(i64::from(entry.intensity.max(0)));
            decrements += lost;
            entry.intensity -= i32::try_from(lost).unwrap_or(i32::MAX);
        } else {
            entry.age = aged;
        }
    });
    FieldCatchUp {
        turns,
        decrements,
        removed,
    }
}

/// Advance running countdown timers. Countdown actions are never run here;
/// a due item fires on its next in-bubble turn.
pub fn catch_up_items(submap: &mut Submap, turns: i64) -> usize {
    let turns = clamp_turns(turns, MAX_ITEM_CATCHUP_TURNS);
    if turns == 0 {
        return 0;
    }
    let mut advanced = 0;
    for item in submap.items_mut() {
        if item.has_running_countdown() {
            item.advance_countdown(turns);
            advanced += 1;
        }
    }
    advanced
}

/// Net power over `turns` applied as one charge or discharge.
/// Returns the signed energy actually applied.
pub fn catch_up_battery_pool<P: BatteryPool + ?Sized>(pool: &mut P, turns: i64, cap: i64) -> i64 {
    let turns = clamp_turns(turns, cap);
    if turns == 0 {
        return 0;
    }
    let requested = pool.net_watts().saturating_mul(turns);
    if requested == 0 {
        return 0;
    }
    let leftover = pool.apply_net_power(requested);
    requested - leftover
}

pub fn catch_up_vehicle(vehicle: &mut Vehicle, turns: i64) -> i64 {
    catch_up_battery_pool(vehicle, turns, MAX_VEHICLE_CATCHUP_TURNS)
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SubmapCatchUp {
    pub fields: FieldCatchUp,
    pub items_advanced: usize,
    pub vehicle_energy: i64,
}

/// Catch up fields, items and every vehicle of one submap.
///
/// Run once, right before the submap joins the simulated region.
pub fn catch_up_submap(submap: &mut Submap, turns: i64) -> SubmapCatchUp {
    if turns <= 0 {
        return SubmapCatchUp::default();
    }
    let _span = tracing::trace_span!("catch_up_submap", turns).entered();
    let fields = catch_up_fields(submap, turns);
    let items_advanced = catch_up_items(submap, turns);
    let vehicle_energy = submap
        .vehicles_mut()
        .iter_mut()
        .map(|v| catch_up_vehicle(v, turns))
        .sum();
    SubmapCatchUp {
        fields,
        items_advanced,
        vehicle_energy,
    }
}
