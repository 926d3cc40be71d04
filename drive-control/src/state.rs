//!
//! The full state of the control loop, owned by the sampling interrupt and
//! threaded through `control_tick` by reference.
//!

use defmt::Format;

use crate::cruise::CruiseController;
use crate::hall::{HallCode, Sector};
use crate::rpm::RpmEstimator;

/// Top-level operating mode, selected over the serial link
#[derive(Format, Debug, Clone, Copy, PartialEq, Eq)]
pub enum DriveMode {
    /// Throttle control with launch assist and wide-open cruise
    Race,
    /// Throttle control with launch assist and a widened throttle range
    Drive,
    /// Fixed current target for bench work, armed by pinning the throttle
    Test,
}

impl DriveMode {
    pub const fn to_wire(self) -> u8 {
        match self {
            DriveMode::Race => 0,
            DriveMode::Drive => 1,
            DriveMode::Test => 2,
        }
    }

    /// Decode a mode byte from the serial link.  Anything unrecognized falls
    /// back to drive, the least surprising mode.
    pub const fn from_wire(wire: u8) -> Self {
        match wire {
            0 => DriveMode::Race,
            2 => DriveMode::Test,
            _ => DriveMode::Drive,
        }
    }
}

impl Default for DriveMode {
    fn default() -> Self {
        Self::Drive
    }
}

#[derive(Format, Debug)]
pub struct ControlState {
    /// Sector currently energized, if the hall code is valid
    pub sector: Option<Sector>,
    pub prev_sector: Option<Sector>,
    /// Last majority-voted hall reading
    pub hall: HallCode,

    /// Integral duty command, 0..=DUTY_CYCLE_MAX
    pub duty_cycle: i32,
    /// Bias-corrected phase current from the last sample (mA)
    pub current_ma: i32,
    /// Slow average of the phase current (mA)
    pub current_ma_smoothed: i32,
    /// Estimated battery-side current (mA)
    pub battery_current_ma: i32,
    /// Where the integral loop is pushing the phase current (mA)
    pub current_target_ma: i32,
    pub prev_current_target_ma: i32,
    /// Bus voltage (mV)
    pub voltage_mv: i32,

    pub rpm: f32,
    pub speed_mph: f32,
    pub prev_speed_mph: f32,

    /// Throttle normalized to 0..=255
    pub throttle: u8,
    /// Raw throttle conversion, kept for the wide-open sentinel
    pub adc_throttle: u16,
    /// Zero-current ADC reading measured at boot
    pub adc_bias: i32,

    pub mode: DriveMode,
    pub launch: bool,
    pub cruise: bool,
    /// Synchronous switching allowed this tick
    pub synchronous: bool,
    /// Consecutive ticks with the throttle open
    pub throttle_open_ticks: u32,

    /// Cruise speed setpoint from the serial link (mph)
    pub target_speed_mph: f32,
    /// Test mode current setpoint from the serial link (mA)
    pub test_current_ma: i32,

    pub rpm_estimator: RpmEstimator,
    pub cruise_pid: CruiseController,
}

impl ControlState {
    pub fn new(adc_bias: i32) -> Self {
        Self {
            sector: None,
            prev_sector: None,
            hall: HallCode::new(0),
            duty_cycle: 0,
            current_ma: 0,
            current_ma_smoothed: 0,
            battery_current_ma: 0,
            current_target_ma: 0,
            prev_current_target_ma: 0,
            voltage_mv: 0,
            rpm: 0.0,
            speed_mph: 0.0,
            prev_speed_mph: 0.0,
            throttle: 0,
            adc_throttle: 0,
            adc_bias,
            mode: DriveMode::default(),
            launch: false,
            cruise: false,
            synchronous: false,
            throttle_open_ticks: 0,
            target_speed_mph: 0.0,
            test_current_ma: 0,
            rpm_estimator: RpmEstimator::new(),
            cruise_pid: CruiseController::new(),
        }
    }
}
