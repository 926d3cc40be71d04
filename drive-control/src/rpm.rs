//!
//! Wheel speed from hall transition timing.  Transitions are counted into a
//! fixed-size window and the estimate refreshes each time the window fills,
//! so resolution improves at speed instead of degrading.
//!

use defmt::Format;

use crate::config::{RPM_STALL_TIMEOUT_US, RPM_WINDOW_TRANSITIONS, SECTOR_TICKS_PER_REV};

#[derive(Format, Debug, Clone, Copy)]
pub struct RpmEstimator {
    window_transitions: u32,
    window_start_us: u64,
    last_transition_us: u64,
    odometer: u32,
}

impl RpmEstimator {
    pub const fn new() -> Self {
        Self {
            window_transitions: 0,
            window_start_us: 0,
            last_transition_us: 0,
            odometer: 0,
        }
    }

    /// Record one sector transition
    pub fn record_transition(&mut self, now_us: u64) {
        self.window_transitions += 1;
        self.odometer = self.odometer.wrapping_add(1);
        self.last_transition_us = now_us;
    }

    /// Advance the estimator one tick.  Returns a fresh RPM figure when the
    /// window has filled, zero when the stall timeout has expired, and
    /// `None` when the previous estimate still stands.
    pub fn update(&mut self, now_us: u64) -> Option<f32> {
        if self.window_transitions >= RPM_WINDOW_TRANSITIONS {
            let elapsed_us = now_us.saturating_sub(self.window_start_us);
            self.window_transitions = 0;
            self.window_start_us = now_us;
            if elapsed_us == 0 {
                return None;
            }
            let rpm = (RPM_WINDOW_TRANSITIONS as f32 * 60_000_000.0)
                / (elapsed_us as f32 * SECTOR_TICKS_PER_REV as f32);
            return Some(rpm);
        }

        if now_us.saturating_sub(self.last_transition_us) > RPM_STALL_TIMEOUT_US {
            // stalled: throw the partial window away so old transitions
            // can't skew the next estimate
            self.window_transitions = 0;
            self.window_start_us = now_us;
            return Some(0.0);
        }

        None
    }

    /// Lifetime sector transition count.  Keeps counting across stalls, so
    /// it works as a distance odometer.
    pub fn odometer(&self) -> u32 {
        self.odometer
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn test_full_window_produces_estimate() {
        let mut estimator = RpmEstimator::new();
        let mut now = 0u64;
        for _ in 0..10 {
            now += 1_000;
            estimator.record_transition(now);
            if now < 10_000 {
                assert_eq!(estimator.update(now), None);
            }
        }
        // 10 transitions over 10 ms with 138 transitions per rev
        let rpm = estimator.update(10_000).unwrap();
        let expected = 10.0 * 60e6 / (10_000.0 * 138.0);
        assert!((rpm - expected).abs() < 0.01);
    }

    #[test]
    fn test_partial_window_keeps_previous_estimate() {
        let mut estimator = RpmEstimator::new();
        for i in 0..5 {
            estimator.record_transition(i * 1_000);
        }
        assert_eq!(estimator.update(5_000), None);
    }

    #[test]
    fn test_stall_timeout_forces_zero() {
        let mut estimator = RpmEstimator::new();
        for i in 0..7 {
            estimator.record_transition(i * 1_000);
        }
        // 600 ms with no movement is well past the 500 ms timeout
        assert_eq!(estimator.update(6_000 + 600_000), Some(0.0));
    }

    #[test]
    fn test_odometer_survives_stall() {
        let mut estimator = RpmEstimator::new();
        for i in 0..7 {
            estimator.record_transition(i * 1_000);
        }
        estimator.update(6_000 + 600_000);
        assert_eq!(estimator.odometer(), 7);

        // rolling again picks the count back up
        estimator.record_transition(700_000);
        assert_eq!(estimator.odometer(), 8);
    }

    #[test]
    fn test_window_restarts_after_stall() {
        let mut estimator = RpmEstimator::new();
        for i in 0..9 {
            estimator.record_transition(i * 1_000);
        }
        estimator.update(608_000);

        // the stale 9 transitions must not count toward the next window
        for i in 0..9 {
            estimator.record_transition(610_000 + i * 1_000);
        }
        assert_eq!(estimator.update(619_000), None);
    }
}
