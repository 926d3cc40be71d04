//!
//! Cruise control.  Runs as a PID on road speed whose output is a per-tick
//! adjustment to the current target, so the current loop underneath stays in
//! charge of the actual duty.  The integral term works off the time spent
//! away from the target band; whenever speed re-enters the band the
//! reference resets, which keeps the term from winding up.
//!

use defmt::Format;

use crate::config::{
    CRUISE_INCREMENT_MAX_MA, CRUISE_KD, CRUISE_KI, CRUISE_KP, CRUISE_SPEED_TOLERANCE_MPH,
    PHASE_MAX_CURRENT_MA,
};

#[derive(Format, Debug, Clone, Copy)]
pub struct CruiseController {
    /// Last time speed was inside the target band
    at_target_us: u64,
}

impl CruiseController {
    pub const fn new() -> Self {
        Self { at_target_us: 0 }
    }

    /// One cruise adjustment.  Takes the previous tick's current target and
    /// returns the new one, bounded to the phase current range.
    pub fn adjust(
        &mut self,
        target_speed_mph: f32,
        speed_mph: f32,
        prev_speed_mph: f32,
        prev_target_ma: i32,
        now_us: u64,
    ) -> i32 {
        let dt = now_us.saturating_sub(self.at_target_us) as f32 / 1_000_000.0;
        if dt <= 0.0 {
            return prev_target_ma;
        }

        let error = target_speed_mph - speed_mph;
        let increment = CRUISE_KP * error + CRUISE_KI * error * dt
            - CRUISE_KD * (speed_mph - prev_speed_mph) / dt;
        let increment = increment.clamp(-CRUISE_INCREMENT_MAX_MA, CRUISE_INCREMENT_MAX_MA);

        let target = ((prev_target_ma as f32) + increment) as i32;
        let target = target.clamp(0, PHASE_MAX_CURRENT_MA);

        if speed_mph >= target_speed_mph - CRUISE_SPEED_TOLERANCE_MPH
            && speed_mph <= target_speed_mph + CRUISE_SPEED_TOLERANCE_MPH
        {
            self.at_target_us = now_us;
        }

        target
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn test_zero_dt_leaves_target_alone() {
        let mut cruise = CruiseController::new();
        assert_eq!(cruise.adjust(16.0, 4.0, 4.0, 3_000, 0), 3_000);
    }

    #[test]
    fn test_on_target_does_not_accumulate() {
        let mut cruise = CruiseController::new();
        let mut target = 5_000;
        // exactly on target every tick: the at-target reference keeps
        // resetting, so dt stays one tick and nothing integrates
        for tick in 1..=1_000u64 {
            target = cruise.adjust(16.0, 16.0, 16.0, target, tick * 62);
        }
        assert_eq!(target, 5_000);
    }

    #[test]
    fn test_increment_clamped_per_tick() {
        let mut cruise = CruiseController::new();
        // enormous error and a long time away from target
        let target = cruise.adjust(30.0, 2.0, 2.0, 1_000, 10_000_000);
        assert_eq!(target, 1_500);
    }

    #[test]
    fn test_target_bounded_to_phase_range() {
        let mut cruise = CruiseController::new();
        let high = cruise.adjust(30.0, 2.0, 2.0, PHASE_MAX_CURRENT_MA - 100, 10_000_000);
        assert_eq!(high, PHASE_MAX_CURRENT_MA);

        let mut cruise = CruiseController::new();
        let low = cruise.adjust(0.0, 20.0, 20.0, 200, 10_000_000);
        assert_eq!(low, 0);
    }

    #[test]
    fn test_error_direction() {
        let mut cruise = CruiseController::new();
        // below target speed pushes the current target up
        let up = cruise.adjust(16.0, 14.5, 14.5, 5_000, 62);
        assert!(up > 5_000);

        let mut cruise = CruiseController::new();
        // above target speed pulls it down
        let down = cruise.adjust(16.0, 17.5, 17.5, 5_000, 62);
        assert!(down < 5_000);
    }
}
