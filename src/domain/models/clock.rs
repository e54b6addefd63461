//! Cycle arithmetic for the container clock.

use serde::{Deserialize, Serialize};

/// Container-wide discrete clock.
///
/// Cycle `c` spans `[beginning_of_time + c * cycle_millis,
/// beginning_of_time + (c + 1) * cycle_millis)`. When `manual` is set the
/// container is ticked externally (tests, simulations); otherwise a wall-clock
/// ticker drives it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ActorClock {
    /// Epoch of cycle 0, in milliseconds since the Unix epoch.
    pub beginning_of_time: i64,
    /// Length of one cycle in milliseconds.
    pub cycle_millis: u64,
    /// External ticking instead of wall-clock ticking.
    pub manual: bool,
}

impl ActorClock {
    pub fn new(beginning_of_time: i64, cycle_millis: u64, manual: bool) -> Self {
        assert!(cycle_millis > 0, "cycle length must be positive");
        Self {
            beginning_of_time,
            cycle_millis,
            manual,
        }
    }

    /// Cycle containing the given instant. Instants before the beginning of
    /// time map to cycle 0.
    pub fn cycle(&self, millis: i64) -> u64 {
        if millis <= self.beginning_of_time {
            return 0;
        }
        let difference = millis - self.beginning_of_time;
        (difference as u64) / self.cycle_millis
    }

    /// First millisecond of the given cycle.
    pub fn cycle_start_millis(&self, cycle: u64) -> i64 {
        self.beginning_of_time + (cycle * self.cycle_millis) as i64
    }

    /// Last millisecond of the given cycle.
    pub fn cycle_end_millis(&self, cycle: u64) -> i64 {
        self.cycle_start_millis(cycle) + self.cycle_millis as i64 - 1
    }

    /// Number of whole cycles covered by the given duration, rounding up.
    pub fn cycles_in(&self, millis: u64) -> u64 {
        millis.div_ceil(self.cycle_millis)
    }
}

impl Default for ActorClock {
    fn default() -> Self {
        Self {
            beginning_of_time: 0,
            cycle_millis: 1000,
            manual: false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cycle_boundaries() {
        let clock = ActorClock::new(1000, 1000, true);
        assert_eq!(clock.cycle(999), 0);
        assert_eq!(clock.cycle(1000), 0);
        assert_eq!(clock.cycle(1999), 0);
        assert_eq!(clock.cycle(2000), 1);
        assert_eq!(clock.cycle_start_millis(0), 1000);
        assert_eq!(clock.cycle_end_millis(0), 1999);
        assert_eq!(clock.cycle_start_millis(5), 6000);
    }

    #[test]
    fn cycles_in_rounds_up() {
        let clock = ActorClock::new(0, 1000, true);
        assert_eq!(clock.cycles_in(1), 1);
        assert_eq!(clock.cycles_in(1000), 1);
        assert_eq!(clock.cycles_in(1001), 2);
    }
}
