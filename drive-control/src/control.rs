//!
//! The per-tick control loop.  One tick runs per PWM period: decode the
//! rotor position, refresh the speed estimate, scale the analog readings,
//! let the active mode pick a current target, then nudge the duty cycle so
//! the measured phase current tracks that target.
//!

use defmt::Format;

use crate::config;
use crate::hall::HallCode;
use crate::pwm::{PhaseLevels, drive_levels};
use crate::state::{ControlState, DriveMode};

/// One complete ADC scan: phase current, bus voltage, throttle, in
/// conversion order.
#[derive(Format, Debug, Clone, Copy, PartialEq, Eq)]
pub struct SampleBatch {
    pub current: u16,
    pub voltage: u16,
    pub throttle: u16,
}

impl SampleBatch {
    /// Build a batch from a drained conversion buffer.  Anything other than
    /// exactly three entries means the scan was cut short or overran, and
    /// the whole tick gets dropped rather than fed partial data.
    pub fn from_slice(raw: &[u16]) -> Option<Self> {
        match raw {
            [current, voltage, throttle] => Some(Self {
                current: *current,
                voltage: *voltage,
                throttle: *throttle,
            }),
            _ => None,
        }
    }
}

/// What the mode handler wants done with the duty cycle this tick
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum DutyRequest {
    /// Run the integral update toward the current target
    Regulate,
    /// Pin the duty cycle, bypassing the integral update
    Force(i32),
}

/// Advance the control loop by one PWM period and return the gate levels to
/// apply.  `now_us` comes from the monotonic timer.
pub fn control_tick(
    state: &mut ControlState,
    hall: HallCode,
    batch: SampleBatch,
    now_us: u64,
) -> PhaseLevels {
    // rotor position and transition bookkeeping
    state.hall = hall;
    state.prev_sector = state.sector;
    state.sector = hall.sector();
    if state.sector != state.prev_sector {
        state.rpm_estimator.record_transition(now_us);
    }

    // speed estimate
    if let Some(rpm) = state.rpm_estimator.update(now_us) {
        state.rpm = rpm;
    }
    state.prev_speed_mph = state.speed_mph;
    state.speed_mph = state.rpm * config::RPM_TO_MPH;

    // scale the analog readings
    state.adc_throttle = batch.throttle;
    state.throttle = normalize_throttle(batch.throttle, state.mode);
    state.current_ma =
        (batch.current as i32 - state.adc_bias) * config::CURRENT_SCALING_MA_PER_COUNT;
    state.voltage_mv = batch.voltage as i32 * config::VOLTAGE_SCALING_MV_PER_COUNT;
    state.current_ma_smoothed = (state.current_ma
        + (config::CURRENT_EMA_WINDOW - 1) * state.current_ma_smoothed)
        / config::CURRENT_EMA_WINDOW;

    // the active mode picks the current target
    state.prev_current_target_ma = state.current_target_ma;
    let request = match state.mode {
        DriveMode::Race => race_tick(state, now_us),
        DriveMode::Drive => drive_tick(state),
        DriveMode::Test => test_tick(state),
    };

    // the battery can only supply so much: at partial duty the phase sees a
    // multiple of the battery current, so the allowance scales inversely
    let limit = battery_current_limit(state.duty_cycle);
    if state.current_target_ma > limit {
        state.current_target_ma = limit;
    }

    match request {
        DutyRequest::Regulate => {
            state.duty_cycle +=
                (state.current_target_ma - state.current_ma) / config::CURRENT_LOOP_GAIN;
            state.duty_cycle = state.duty_cycle.clamp(0, config::DUTY_CYCLE_MAX);
        }
        DutyRequest::Force(duty) => state.duty_cycle = duty,
    }

    // a closed throttle always stops the drive and re-arms the synchronous
    // switching delay
    if state.throttle == 0 {
        state.duty_cycle = 0;
        state.throttle_open_ticks = 0;
    } else {
        state.throttle_open_ticks = state.throttle_open_ticks.saturating_add(1);
    }
    state.synchronous = state.throttle_open_ticks > config::SYNCHRONOUS_DELAY_TICKS;

    state.battery_current_ma = ((state.current_ma_smoothed as i64
        * state.duty_cycle as i64
        * config::BATTERY_ESTIMATE_EFFICIENCY_PCT)
        / (config::DUTY_CYCLE_MAX as i64 * 100)) as i32;

    drive_levels(
        state.sector,
        (state.duty_cycle / 256) as u16,
        state.synchronous,
    )
}

fn race_tick(state: &mut ControlState, now_us: u64) -> DutyRequest {
    let throttle_target = throttle_current_target(state.throttle);
    state.cruise = false;
    state.launch = state.rpm < config::LAUNCH_MAX_RPM && state.throttle != 0;

    if state.launch {
        if state.current_ma < config::LAUNCH_EXIT_CURRENT_MA {
            state.current_target_ma = throttle_target;
            return DutyRequest::Force(config::LAUNCH_DUTY_CYCLE);
        }
        // the battery can't hold launch duty: bail out and fall through to
        // normal control this same tick
        state.launch = false;
    }

    if state.adc_throttle as i32 > config::THROTTLE_WIDE_OPEN_RAW {
        state.cruise = true;
        state.current_target_ma = state.cruise_pid.adjust(
            state.target_speed_mph,
            state.speed_mph,
            state.prev_speed_mph,
            state.prev_current_target_ma,
            now_us,
        );
    } else {
        state.current_target_ma = throttle_target;
    }
    DutyRequest::Regulate
}

fn drive_tick(state: &mut ControlState) -> DutyRequest {
    state.cruise = false;
    state.launch = state.rpm < config::LAUNCH_MAX_RPM && state.throttle != 0;
    state.current_target_ma = throttle_current_target(state.throttle);

    if state.launch {
        if state.current_ma < config::LAUNCH_EXIT_CURRENT_MA {
            return DutyRequest::Force(config::LAUNCH_DUTY_CYCLE);
        }
        state.launch = false;
    }
    DutyRequest::Regulate
}

fn test_tick(state: &mut ControlState) -> DutyRequest {
    state.launch = false;
    // the pinned-throttle sentinel doubles as the arm switch on the bench
    let armed = state.adc_throttle as i32 > config::THROTTLE_WIDE_OPEN_RAW;
    state.cruise = armed;

    if armed {
        // the serial side accepts any i32, so bound the target to the
        // phase budget before it reaches the integral update
        state.current_target_ma = state.test_current_ma.clamp(0, config::PHASE_MAX_CURRENT_MA);
        DutyRequest::Regulate
    } else {
        state.current_target_ma = 0;
        DutyRequest::Force(0)
    }
}

/// Map the raw throttle reading onto 0..=255.  Drive mode widens the top of
/// the range so full deflection stays reachable below the cruise sentinel.
fn normalize_throttle(raw: u16, mode: DriveMode) -> u8 {
    let high = match mode {
        DriveMode::Drive => config::THROTTLE_HIGH_DRIVE,
        _ => config::THROTTLE_HIGH,
    };
    let normalized = ((raw as i32 - config::THROTTLE_LOW) * 256) / (high - config::THROTTLE_LOW);
    normalized.clamp(0, 255) as u8
}

/// Phase current allowance implied by the battery budget at a given duty.
/// At zero duty the budget itself applies.
fn battery_current_limit(duty_cycle: i32) -> i32 {
    if duty_cycle == 0 {
        config::BATTERY_MAX_CURRENT_MA
    } else {
        config::BATTERY_MAX_CURRENT_MA * config::DUTY_CYCLE_MAX / duty_cycle
    }
}

fn throttle_current_target(throttle: u8) -> i32 {
    throttle as i32 * config::PHASE_MAX_CURRENT_MA / 256
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::hall::Sector;
    use crate::pwm::PhaseLevels;

    const BIAS: i32 = 2_048;

    fn batch(current: u16, voltage: u16, throttle: u16) -> SampleBatch {
        SampleBatch {
            current,
            voltage,
            throttle,
        }
    }

    #[test]
    fn test_batch_requires_exactly_three_entries() {
        assert_eq!(SampleBatch::from_slice(&[1, 2]), None);
        assert_eq!(SampleBatch::from_slice(&[1, 2, 3, 4]), None);
        assert_eq!(
            SampleBatch::from_slice(&[2_100, 3_000, 1_500]),
            Some(batch(2_100, 3_000, 1_500)),
        );
    }

    #[test]
    fn test_race_standstill_tick() {
        let mut state = ControlState::new(BIAS);
        state.mode = DriveMode::Race;

        let levels = control_tick(&mut state, HallCode::new(3), batch(2_100, 3_000, 1_500), 0);

        assert_eq!(state.sector, Some(Sector::S2));
        assert_eq!(state.throttle, 157);
        assert_eq!(state.current_ma, (2_100 - BIAS) * 80);
        assert_eq!(state.voltage_mv, 3_000 * 18);
        // standstill with open throttle engages launch at fixed duty
        assert!(state.launch);
        assert_eq!(state.duty_cycle, config::LAUNCH_DUTY_CYCLE);
        assert_eq!(levels.c_high, (config::LAUNCH_DUTY_CYCLE / 256) as u8);
        assert_eq!(levels.b_low, 255);
        assert_eq!(state.rpm_estimator.odometer(), 1);
    }

    #[test]
    fn test_launch_exit_falls_through_same_tick() {
        let mut state = ControlState::new(BIAS);
        state.mode = DriveMode::Race;

        // 163 A measured: way past the launch abort threshold
        control_tick(&mut state, HallCode::new(3), batch(4_095, 3_000, 1_500), 0);

        assert!(!state.launch);
        assert_eq!(state.current_target_ma, 157 * config::PHASE_MAX_CURRENT_MA / 256);
        // the integral update ran (and promptly bottomed out on the huge
        // measured current) instead of the launch override
        assert_eq!(state.duty_cycle, 0);
    }

    #[test]
    fn test_integral_update_tracks_target_direction() {
        let mut low = ControlState::new(BIAS);
        low.mode = DriveMode::Test;
        low.test_current_ma = 4_000;
        control_tick(&mut low, HallCode::new(1), batch(2_048, 3_000, 2_500), 0);
        assert_eq!(low.duty_cycle, 4_000 / config::CURRENT_LOOP_GAIN);

        let mut high = ControlState::new(BIAS);
        high.mode = DriveMode::Test;
        high.test_current_ma = 8_000;
        control_tick(&mut high, HallCode::new(1), batch(2_048, 3_000, 2_500), 0);
        assert!(high.duty_cycle > low.duty_cycle);
    }

    #[test]
    fn test_battery_limit_caps_target_at_zero_duty() {
        let mut state = ControlState::new(BIAS);
        state.mode = DriveMode::Test;
        state.test_current_ma = 50_000;

        control_tick(&mut state, HallCode::new(1), batch(2_048, 3_000, 2_500), 0);

        assert_eq!(state.current_target_ma, config::BATTERY_MAX_CURRENT_MA);
    }

    #[test]
    fn test_battery_limit_tightens_with_duty() {
        assert_eq!(battery_current_limit(0), config::BATTERY_MAX_CURRENT_MA);
        assert_eq!(
            battery_current_limit(32_768),
            config::BATTERY_MAX_CURRENT_MA * config::DUTY_CYCLE_MAX / 32_768,
        );
        assert!(battery_current_limit(config::DUTY_CYCLE_MAX) < battery_current_limit(32_768));
    }

    #[test]
    fn test_closed_throttle_stops_everything() {
        let mut state = ControlState::new(BIAS);
        state.duty_cycle = 5_000;
        state.throttle_open_ticks = 9_999;

        let levels = control_tick(&mut state, HallCode::new(3), batch(2_048, 3_000, 700), 0);

        assert_eq!(state.throttle, 0);
        assert_eq!(state.duty_cycle, 0);
        assert_eq!(state.throttle_open_ticks, 0);
        assert_eq!(levels, PhaseLevels::OFF);
    }

    #[test]
    fn test_synchronous_waits_out_the_delay() {
        let mut state = ControlState::new(BIAS);
        state.rpm = 100.0;

        control_tick(&mut state, HallCode::new(3), batch(2_048, 3_000, 1_500), 0);
        assert!(!state.synchronous);

        state.throttle_open_ticks = config::SYNCHRONOUS_DELAY_TICKS;
        control_tick(&mut state, HallCode::new(3), batch(2_048, 3_000, 1_500), 100);
        assert!(state.synchronous);
    }

    #[test]
    fn test_drive_mode_widens_throttle_range() {
        let mut state = ControlState::new(BIAS);
        state.mode = DriveMode::Drive;
        state.rpm = 100.0;

        control_tick(&mut state, HallCode::new(3), batch(2_048, 3_000, 1_500), 0);

        // (1500 - 700) * 256 / (2300 - 700)
        assert_eq!(state.throttle, 128);
        assert!(!state.launch);
    }

    #[test]
    fn test_race_wide_open_hands_over_to_cruise() {
        let mut state = ControlState::new(BIAS);
        state.mode = DriveMode::Race;
        state.rpm = 100.0;
        state.target_speed_mph = 16.0;
        state.rpm_estimator.record_transition(999_000);

        control_tick(
            &mut state,
            HallCode::new(3),
            batch(2_048, 3_000, 2_100),
            1_000_000,
        );

        assert!(state.cruise);
        assert!(!state.launch);
        // one bounded step up from a standing target
        assert!((1..=500).contains(&state.current_target_ma));
    }

    #[test]
    fn test_test_mode_idles_until_armed() {
        let mut state = ControlState::new(BIAS);
        state.mode = DriveMode::Test;
        state.test_current_ma = 6_000;
        state.duty_cycle = 3_000;

        control_tick(&mut state, HallCode::new(1), batch(2_048, 3_000, 1_500), 0);

        assert!(!state.cruise);
        assert_eq!(state.current_target_ma, 0);
        assert_eq!(state.duty_cycle, 0);
    }

    #[test]
    fn test_extreme_test_currents_are_bounded() {
        let mut state = ControlState::new(BIAS);
        state.mode = DriveMode::Test;
        state.test_current_ma = i32::MIN;

        // armed, with one count of positive noise on the shunt
        control_tick(&mut state, HallCode::new(1), batch(2_049, 3_000, 2_500), 0);

        assert_eq!(state.current_target_ma, 0);
        assert_eq!(state.duty_cycle, 0);

        state.test_current_ma = i32::MAX;
        control_tick(&mut state, HallCode::new(1), batch(2_049, 3_000, 2_500), 62);

        assert_eq!(state.current_target_ma, config::PHASE_MAX_CURRENT_MA);
    }

    #[test]
    fn test_invalid_hall_coasts() {
        let mut state = ControlState::new(BIAS);
        state.mode = DriveMode::Test;
        state.test_current_ma = 6_000;
        state.duty_cycle = 25_600;

        let levels = control_tick(&mut state, HallCode::new(7), batch(2_048, 3_000, 2_500), 0);

        assert_eq!(state.sector, None);
        assert_eq!(levels, PhaseLevels::OFF);
    }

    #[test]
    fn test_sector_transitions_feed_the_odometer() {
        let mut state = ControlState::new(BIAS);
        state.mode = DriveMode::Drive;

        control_tick(&mut state, HallCode::new(3), batch(2_048, 3_000, 1_500), 0);
        control_tick(&mut state, HallCode::new(1), batch(2_048, 3_000, 1_500), 62);
        control_tick(&mut state, HallCode::new(1), batch(2_048, 3_000, 1_500), 124);

        assert_eq!(state.prev_sector, Some(Sector::S3));
        assert_eq!(state.sector, Some(Sector::S3));
        assert_eq!(state.rpm_estimator.odometer(), 2);
    }

    #[test]
    fn test_smoothed_current_lags_the_raw_reading() {
        let mut state = ControlState::new(BIAS);
        state.mode = DriveMode::Test;

        for i in 0..50 {
            control_tick(&mut state, HallCode::new(1), batch(2_148, 3_000, 2_500), i * 62);
        }

        assert_eq!(state.current_ma, 100 * 80);
        assert!(state.current_ma_smoothed > 0);
        assert!(state.current_ma_smoothed < state.current_ma);
    }
}
