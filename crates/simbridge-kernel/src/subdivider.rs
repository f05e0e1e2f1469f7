//! [`FrequencySubdivider`] – counts slow-clock ticks on a fast clock.
//!
//! The process model runs at its own (higher) frequency.  The subdivider maps
//! each observed [`SimTime`] to a step index at the external system's
//! frequency and reports how many steps elapsed since the previous check.
//!
//! Two corrections keep the count sane:
//!
//! - **Day rollover** – the step index is derived from the time of day, so a
//!   negative delta is corrected by one day's worth of ticks.
//! - **Discontinuity** – a delta above [`MAX_STEP_DELTA`] means the clock
//!   jumped (model reset, manual time change).  The baseline is moved to the
//!   new time and the jump is reported as zero steps.

use simbridge_types::{BridgeError, SimTime};
use tracing::debug;

/// Largest step delta accepted as genuine clock progress.
pub const MAX_STEP_DELTA: i64 = 20;

const MICROS_PER_SECOND: i64 = 1_000_000;
const SECONDS_PER_DAY: i64 = 86_400;

/// Converts a continuous sim clock into step counts at a lower frequency.
#[derive(Debug, Clone)]
pub struct FrequencySubdivider {
    cycle_micros: i64,
    ticks_per_day: i64,
    previous_step: i64,
}

impl FrequencySubdivider {
    /// Create a subdivider for a target frequency of `frequency_hz`.
    ///
    /// The baseline starts at midnight; call [`reset`][Self::reset] once the
    /// first real time is known.
    ///
    /// # Errors
    ///
    /// Returns [`BridgeError::Config`] for a zero frequency or one above
    /// 1 MHz (the cycle would be shorter than a microsecond).
    pub fn new(frequency_hz: u32) -> Result<Self, BridgeError> {
        let hz = i64::from(frequency_hz);
        if hz == 0 || hz > MICROS_PER_SECOND {
            return Err(BridgeError::Config(format!(
                "subdivider frequency must be within 1..=1000000 Hz, got {frequency_hz}"
            )));
        }
        Ok(Self {
            cycle_micros: MICROS_PER_SECOND / hz,
            ticks_per_day: SECONDS_PER_DAY * hz,
            previous_step: 0,
        })
    }

    /// Length of one target cycle in microseconds.
    pub fn cycle_micros(&self) -> i64 {
        self.cycle_micros
    }

    /// Move the baseline to the step containing `time`.
    pub fn reset(&mut self, time: &SimTime) {
        self.previous_step = self.step_of(time);
    }

    /// Number of target-frequency steps elapsed since the previous call (or
    /// reset).  Never negative.
    pub fn step_change(&mut self, time: &SimTime) -> i64 {
        let current = self.step_of(time);
        let mut delta = current - self.previous_step;
        if delta < 0 {
            delta += self.ticks_per_day;
        }
        if delta > MAX_STEP_DELTA {
            debug!(delta, time = %time, "sim clock discontinuity, rebasing subdivider");
            self.reset(time);
            return 0;
        }
        self.previous_step = current;
        delta
    }

    fn step_of(&self, time: &SimTime) -> i64 {
        time.micros_of_day() / self.cycle_micros
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn at(hour: u32, minute: u32, second: u32, millis: u32) -> SimTime {
        SimTime::new(2024, 1, 1, hour, minute, second, millis).unwrap()
    }

    #[test]
    fn rejects_zero_frequency() {
        assert!(matches!(
            FrequencySubdivider::new(0),
            Err(BridgeError::Config(_))
        ));
    }

    #[test]
    fn ten_hz_sequence_from_midnight() {
        let mut sub = FrequencySubdivider::new(10).unwrap();
        sub.reset(&at(0, 0, 0, 0));

        let offsets = [0, 50, 100, 150, 200, 250, 400, 950];
        let steps: Vec<i64> = offsets
            .iter()
            .map(|ms| sub.step_change(&at(0, 0, 0, *ms)))
            .collect();
        assert_eq!(steps, vec![0, 0, 1, 0, 1, 0, 2, 5]);
    }

    #[test]
    fn day_rollover_adds_a_day_of_ticks() {
        let mut sub = FrequencySubdivider::new(10).unwrap();
        sub.reset(&SimTime::new(2024, 1, 1, 23, 59, 59, 0).unwrap());
        let next_day = SimTime::new(2024, 1, 2, 0, 0, 0, 0).unwrap();
        assert_eq!(sub.step_change(&next_day), 10);
    }

    #[test]
    fn discontinuity_rebases_and_reports_zero() {
        let mut sub = FrequencySubdivider::new(10).unwrap();
        sub.reset(&at(12, 0, 0, 0));

        // 5 s jump = 50 steps > MAX_STEP_DELTA.
        assert_eq!(sub.step_change(&at(12, 0, 5, 0)), 0);
        // Measured from the new baseline, not from 12:00:00.
        assert_eq!(sub.step_change(&at(12, 0, 5, 300)), 3);
    }

    #[test]
    fn delta_at_limit_is_accepted() {
        let mut sub = FrequencySubdivider::new(10).unwrap();
        sub.reset(&at(8, 0, 0, 0));
        assert_eq!(sub.step_change(&at(8, 0, 2, 0)), 20);
        assert_eq!(sub.step_change(&at(8, 0, 2, 100)), 1);
    }

    #[test]
    fn backwards_jump_within_day_is_a_discontinuity() {
        let mut sub = FrequencySubdivider::new(10).unwrap();
        sub.reset(&at(8, 0, 0, 0));
        assert_eq!(sub.step_change(&at(7, 59, 59, 0)), 0);
        assert_eq!(sub.step_change(&at(7, 59, 59, 100)), 1);
    }
}
