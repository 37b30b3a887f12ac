//! Aggregate decode capacity gate.
//!
//! Usage is counted as `width * height * fps` summed over all active
//! channels and never exceeds the ceiling the hardware can sustain.

use std::sync::{Mutex, PoisonError};

use serde::Serialize;

/// Resolution and frame rate of one stream as charged against the budget.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct Usage {
    pub width: u32,
    pub height: u32,
    pub fps: u32,
}

impl Usage {
    pub const EMPTY: Usage = Usage {
        width: 0,
        height: 0,
        fps: 0,
    };

    pub fn new(width: u32, height: u32, fps: u32) -> Self {
        Self { width, height, fps }
    }

    /// `width * height * fps`, or `None` when the product does not fit.
    pub fn checked_cost(&self) -> Option<u64> {
        (self.width as u64 * self.height as u64).checked_mul(self.fps as u64)
    }

    pub fn cost(&self) -> u64 {
        self.checked_cost().unwrap_or(u64::MAX)
    }

    pub fn is_empty(&self) -> bool {
        self.width == 0 || self.height == 0 || self.fps == 0
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
pub struct CapacitySnapshot {
    pub used: u64,
    pub ceiling: u64,
}

pub struct CapacityGate {
    ceiling: u64,
    used: Mutex<u64>,
}

impl CapacityGate {
    pub fn new(ceiling: u64) -> Self {
        Self {
            ceiling,
            used: Mutex::new(0),
        }
    }

    /// Swaps `old` for `new` in the running total if the result fits.
    ///
    /// Returns `false` and leaves the total untouched when `old` is larger than
    /// what is tracked (the caller's bookkeeping is off) or when the new total
    /// would exceed the ceiling. A total that does not fit in `u64` counts as
    /// exceeding it.
    pub fn admit(&self, old: Usage, new: Usage) -> bool {
        let mut used = self.used.lock().unwrap_or_else(PoisonError::into_inner);
        let Some(remaining) = old.checked_cost().and_then(|c| used.checked_sub(c)) else {
            log::error!(
                "capacity: releasing {} but only {} is tracked, refusing",
                old.cost(),
                *used
            );
            return false;
        };
        let candidate = new
            .checked_cost()
            .and_then(|c| remaining.checked_add(c))
            .filter(|total| *total <= self.ceiling);
        let Some(candidate) = candidate else {
            log::warn!(
                "capacity: {}x{}@{} denied, {} in use of ceiling {}",
                new.width,
                new.height,
                new.fps,
                *used,
                self.ceiling
            );
            return false;
        };
        *used = candidate;
        log::debug!("capacity: in use {}/{}", candidate, self.ceiling);
        true
    }

    pub fn release(&self, usage: Usage) {
        if usage.is_empty() {
            return;
        }
        let mut used = self.used.lock().unwrap_or_else(PoisonError::into_inner);
        *used = used.saturating_sub(usage.cost());
    }

    pub fn used(&self) -> u64 {
        *self.used.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn ceiling(&self) -> u64 {
        self.ceiling
    }

    pub fn snapshot(&self) -> CapacitySnapshot {
        CapacitySnapshot {
            used: self.used(),
            ceiling: self.ceiling,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const FHD30: Usage = Usage {
        width: 1920,
        height: 1080,
        fps: 30,
    };

    #[test]
    fn fifth_stream_is_denied_at_four_stream_ceiling() {
        let gate = CapacityGate::new(FHD30.cost() * 4);
        for _ in 0..4 {
            assert!(gate.admit(Usage::EMPTY, FHD30));
        }
        assert!(!gate.admit(Usage::EMPTY, FHD30));
        assert_eq!(gate.used(), FHD30.cost() * 4);
    }

    #[test]
    fn admit_then_release_restores_total() {
        let gate = CapacityGate::new(u64::MAX);
        let before = gate.used();
        let usage = Usage::new(704, 576, 25);
        assert!(gate.admit(Usage::EMPTY, usage));
        gate.release(usage);
        assert_eq!(gate.used(), before);
    }

    #[test]
    fn replacing_usage_within_ceiling() {
        let gate = CapacityGate::new(FHD30.cost());
        assert!(gate.admit(Usage::EMPTY, FHD30));
        // lower frame rate of the same stream
        assert!(gate.admit(FHD30, Usage::new(1920, 1080, 15)));
        assert_eq!(gate.used(), FHD30.cost() / 2);
        assert!(gate.admit(Usage::new(1920, 1080, 15), FHD30));
    }

    #[test]
    fn old_usage_above_total_is_rejected_without_change() {
        let gate = CapacityGate::new(u64::MAX);
        assert!(gate.admit(Usage::EMPTY, Usage::new(640, 480, 10)));
        let before = gate.used();
        assert!(!gate.admit(FHD30, Usage::new(320, 240, 10)));
        assert_eq!(gate.used(), before);
    }

    #[test]
    fn release_clamps_and_ignores_zero_factors() {
        let gate = CapacityGate::new(u64::MAX);
        assert!(gate.admit(Usage::EMPTY, Usage::new(640, 480, 10)));
        gate.release(Usage::new(1920, 0, 30));
        assert_eq!(gate.used(), 640 * 480 * 10);
        gate.release(FHD30);
        assert_eq!(gate.used(), 0);
    }

    #[test]
    fn oversized_usage_is_denied_not_wrapped() {
        let huge = Usage::new(u32::MAX, u32::MAX, u32::MAX);
        assert_eq!(huge.checked_cost(), None);
        assert_eq!(huge.cost(), u64::MAX);

        let gate = CapacityGate::new(u64::MAX);
        assert!(!gate.admit(Usage::EMPTY, huge));
        assert_eq!(gate.used(), 0);

        assert!(gate.admit(Usage::EMPTY, FHD30));
        assert!(!gate.admit(Usage::EMPTY, Usage::new(u32::MAX, u32::MAX, 2)));
        assert!(!gate.admit(huge, Usage::EMPTY));
        assert_eq!(gate.used(), FHD30.cost());
    }
}
