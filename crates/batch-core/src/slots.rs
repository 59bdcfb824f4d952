//! Time-slot coordinator.
//!
//! A repeating cycle of `cycle_length` ms is cut into `slot_count` equal
//! slots. Independent periodic loops each own a slot and time their
//! wake-ups (and stage completions) into it so they never contend for the
//! same instant.

use crate::config::TimingConfig;
use crate::types::Millis;

/// Deterministic slot arithmetic over a repeating cycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SlotClock {
    cycle_length: Millis,
    slot_count: u32,
    min_wake: Millis,
}

impl SlotClock {
    pub fn new(cycle_length: Millis, slot_count: u32, min_wake: Millis) -> Self {
        Self {
            cycle_length: cycle_length.max(1),
            slot_count: slot_count.max(1),
            min_wake: min_wake.max(0),
        }
    }

    pub fn from_config(config: &TimingConfig) -> Self {
        Self::new(config.cycle_length_ms, config.slot_count, config.min_wake_ms)
    }

    pub fn cycle_length(&self) -> Millis {
        self.cycle_length
    }

    pub fn slot_size(&self) -> Millis {
        (self.cycle_length / Millis::from(self.slot_count)).max(1)
    }

    pub fn min_wake(&self) -> Millis {
        self.min_wake
    }

    /// The slot that `instant` falls into.
    pub fn slot_of(&self, instant: Millis) -> u32 {
        let pos = instant.rem_euclid(self.cycle_length);
        ((pos / self.slot_size()) as u32).min(self.slot_count - 1)
    }

    /// Offset from `now` to the next permissible wake inside `slot_id`.
    ///
    /// With `requested_delay == 0` the result is `0` when `now` is already in
    /// the slot, otherwise the time until the slot's next start. With a
    /// requested delay the result is that delay pulled back onto the start of
    /// the slot, floored at `min_wake`.
    pub fn next_slot_wake(&self, slot_id: u32, requested_delay: Millis, now: Millis) -> Millis {
        let size = self.slot_size();
        let slot_start = Millis::from(slot_id % self.slot_count) * size;
        let pos = (now + requested_delay).rem_euclid(self.cycle_length);
        let in_slot = slot_start <= pos && pos < slot_start + size;

        if requested_delay > 0 {
            if in_slot {
                self.min_wake.max(requested_delay - pos % size)
            } else {
                self.min_wake.max(requested_delay - pos + slot_start)
            }
        } else if in_slot {
            0
        } else {
            (slot_start - pos).rem_euclid(self.cycle_length)
        }
    }
}

impl Default for SlotClock {
    fn default() -> Self {
        Self::from_config(&TimingConfig::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn clock() -> SlotClock {
        SlotClock::new(1000, 5, 20)
    }

    #[test]
    fn slot_size_divides_cycle() {
        assert_eq!(clock().slot_size(), 200);
        assert_eq!(clock().slot_of(1_000_450), 2);
    }

    #[test]
    fn already_in_slot_wakes_immediately() {
        assert_eq!(clock().next_slot_wake(0, 0, 5_000), 0);
        assert_eq!(clock().next_slot_wake(2, 0, 5_450), 0);
    }

    #[test]
    fn slot_zero_waits_for_cycle_boundary() {
        // pos 730 → L - pos.
        assert_eq!(clock().next_slot_wake(0, 0, 12_730), 270);
    }

    #[test]
    fn every_wake_lands_inside_its_slot() {
        let c = clock();
        for slot_id in 0..5 {
            for now in (0..3_000).step_by(7) {
                let d = c.next_slot_wake(slot_id, 0, now);
                assert!(d >= 0);
                let pos = (now + d) % c.cycle_length();
                let start = Millis::from(slot_id) * c.slot_size();
                assert!(
                    start <= pos && pos < start + c.slot_size(),
                    "slot {slot_id}, now {now}: woke at {pos}"
                );
            }
        }
    }

    #[test]
    fn requested_delay_inside_slot_snaps_to_slot_start() {
        // now + 950 = 1950 → pos 950, slot 4 [800, 1000): 950 - 150 = 800.
        assert_eq!(clock().next_slot_wake(4, 950, 1_000), 800);
    }

    #[test]
    fn requested_delay_outside_slot_moves_to_slot_start() {
        // now + 950 = 1950 → pos 950, slot 0: 950 - 950 + 0 = 0 → floored to 20.
        assert_eq!(clock().next_slot_wake(0, 950, 1_000), 20);
        // pos 950, slot 1: 950 - 950 + 200 = 200.
        assert_eq!(clock().next_slot_wake(1, 950, 1_000), 200);
    }

    #[test]
    fn wake_is_idempotent() {
        let c = clock();
        assert_eq!(c.next_slot_wake(3, 1_234, 98_765), c.next_slot_wake(3, 1_234, 98_765));
    }

    #[test]
    fn min_wake_floors_requested_delays() {
        let c = clock();
        for now in (0..2_000).step_by(13) {
            assert!(c.next_slot_wake(1, 5, now) >= 20);
        }
    }
}
