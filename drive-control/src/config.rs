//!
//! Fixed application parameters for the traction drive.  Everything the
//! control loop tunes against lives here; none of it is runtime
//! configurable.
//!

/// PWM carrier frequency.  This is also the control loop rate because one
/// tick runs per carrier period.
pub const PWM_FREQUENCY_HZ: u32 = 16_000;

/// Reads per hall line when forming a majority-voted code
pub const HALL_OVERSAMPLE: u8 = 8;

/// Internal duty cycle range.  Only the top byte reaches the PWM compare
/// logic; the low byte is headroom for the integral controller.
pub const DUTY_CYCLE_MAX: i32 = 65_535;

/// Duty held while launch control owns the motor (about 10%)
pub const LAUNCH_DUTY_CYCLE: i32 = 6_553;

/// Phase current ceiling for the throttle-to-target mapping (mA)
pub const PHASE_MAX_CURRENT_MA: i32 = 15_000;

/// Battery-side current budget behind the inverse-duty limit (mA)
pub const BATTERY_MAX_CURRENT_MA: i32 = 15_000;

/// Measured phase current that aborts launch on the spot (mA)
pub const LAUNCH_EXIT_CURRENT_MA: i32 = 80_000;

/// Launch control only engages below this wheel speed
pub const LAUNCH_MAX_RPM: f32 = 30.0;

/// Raw throttle ADC reading with the lever at rest
pub const THROTTLE_LOW: i32 = 700;

/// Raw throttle ADC reading at full deflection
pub const THROTTLE_HIGH: i32 = 2_000;

/// Widened full-deflection reading used while in drive mode, so the top of
/// the lever travel is reserved for the cruise sentinel
pub const THROTTLE_HIGH_DRIVE: i32 = 2_300;

/// Raw throttle past this counts as pinned.  Race mode hands control to
/// cruise here; test mode uses it as the arm switch.
pub const THROTTLE_WIDE_OPEN_RAW: i32 = 2_000;

/// Divisor for the integral duty update: duty += error_ma / gain per tick
pub const CURRENT_LOOP_GAIN: i32 = 200;

/// Window of the slow phase-current average, in ticks
pub const CURRENT_EMA_WINDOW: i32 = 200;

/// Ticks the throttle must stay open before synchronous switching is
/// allowed, about a second at the tick rate.  Keeps regen braking from
/// engaging right off the line.
pub const SYNCHRONOUS_DELAY_TICKS: u32 = 16_000;

/// ADC counts to milliamps for the shunt amplifier (0.5 mOhm, 20 V/V)
pub const CURRENT_SCALING_MA_PER_COUNT: i32 = 80;

/// ADC counts to millivolts for the bus voltage divider (47k / 2.2k)
pub const VOLTAGE_SCALING_MV_PER_COUNT: i32 = 18;

/// Single conversions averaged into the zero-current bias at boot
pub const ADC_BIAS_OVERSAMPLE: u32 = 1_000;

/// Drivetrain efficiency assumed by the battery-side current estimate (%)
pub const BATTERY_ESTIMATE_EFFICIENCY_PCT: i64 = 60;

/// Sector transitions per wheel revolution: 23 electrical revolutions per
/// wheel revolution times 6 sectors each
pub const SECTOR_TICKS_PER_REV: u32 = 138;

/// Transitions accumulated before the speed estimate refreshes
pub const RPM_WINDOW_TRANSITIONS: u32 = 10;

/// No transition for this long means the wheel has stopped
pub const RPM_STALL_TIMEOUT_US: u64 = 500_000;

/// Wheel RPM to road speed in mph for the fitted tire
pub const RPM_TO_MPH: f32 = 0.04767;

// TODO: retune the cruise gains against on-vehicle logs; these are bench
// values.
/// Cruise proportional gain (mA per mph of error)
pub const CRUISE_KP: f32 = 40.0;
/// Cruise integral gain (mA per mph-second away from target)
pub const CRUISE_KI: f32 = 4.0;
/// Cruise derivative gain (mA per mph/s)
pub const CRUISE_KD: f32 = 2.5;

/// Largest change cruise may make to the current target in one tick (mA)
pub const CRUISE_INCREMENT_MAX_MA: f32 = 500.0;

/// Band around the target speed that counts as on-target (mph)
pub const CRUISE_SPEED_TOLERANCE_MPH: f32 = 1.0;
