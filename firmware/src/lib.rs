//!
//! Hardware adapters for the drive-controller firmware.  Everything here
//! bridges between the control math in `drive-control` and the actual
//! STM32F031 peripherals.
//!

#![no_std]
#![feature(type_alias_impl_trait)]

use embedded_hal::PwmPin;
use embedded_hal::digital::v2::InputPin;
use portable_atomic::{AtomicI32, AtomicU8, AtomicU16, AtomicU32, Ordering};
use stm32f0xx_hal::{
    gpio::{
        AF1, Alternate, Input, Output, PullDown, PushPull,
        gpioa::{PA0, PA1, PA2, PA14, PA15},
        gpiob::PB1,
    },
    pac::{ADC, RCC, TIM1, USART1},
    pwm::{C1, C1N, C2, C2N, C3, C3N, ComplementaryPwm, DTInterval, PwmChannels},
    serial::Serial,
};

use drive_common::TelemetryFrame;
use drive_control::{
    ControlState, DriveMode, HallCode, PhaseLevels, SampleBatch,
    config::{ADC_BIAS_OVERSAMPLE, DUTY_CYCLE_MAX, HALL_OVERSAMPLE},
};

/// The frequency of the tim2 clock
pub const TIM2_CLOCK_HZ: u32 = 24_000_000;

/// Baud rate of the serial link
pub const SERIAL_BAUD: u32 = 115_200;

/// Cadence of unsolicited telemetry frames
pub const TELEMETRY_PERIOD_MS: u64 = 250;

/// Hall sensor 1 input
pub type HS1 = PA0<Input<PullDown>>;
/// Hall sensor 2 input
pub type HS2 = PA1<Input<PullDown>>;
/// Hall sensor 3 input
pub type HS3 = PA2<Input<PullDown>>;

/// Status LED
pub type StatusLed = PB1<Output<PushPull>>;

/// The serial link to the dashboard
pub type SerialInterface = Serial<USART1, PA14<Alternate<AF1>>, PA15<Alternate<AF1>>>;

/// Channels scanned each PWM period: IN3 phase current, IN4 bus voltage,
/// IN5 throttle (PA3/PA4/PA5), converted in that order
const SCAN_CHANNELS: u32 = (1 << 3) | (1 << 4) | (1 << 5);

/// Just the current channel, for bias calibration
const CURRENT_CHANNEL: u32 = 1 << 3;

/// Outcome of draining the conversion sequence
pub enum ScanEvent {
    /// The scan hasn't finished yet
    Pending,
    /// A complete three-channel batch
    Batch(SampleBatch),
    /// The scan came up short or overran, so this tick should be skipped
    Dropped,
}

/// Owns the ADC and collects the per-period conversion sequence.
///
/// The HAL's `Adc` wrapper only does blocking one-shot reads, so this works
/// the register block directly: the PWM wrap handler restarts the hardware
/// scan and the ADC interrupt drains it one conversion at a time.
pub struct AdcSequencer {
    adc: ADC,
    buffer: [u16; 3],
    count: usize,
    overrun: bool,
}

impl AdcSequencer {
    /// Clock, calibrate, and power up the ADC
    pub fn new(adc: ADC) -> Self {
        unsafe { (*RCC::ptr()).apb2enr.modify(|_, w| w.adcen().set_bit()) };

        // ADC clock = PCLK / 4, keeping it under the 14 MHz limit
        adc.cfgr2.write(|w| unsafe { w.bits(0b10 << 30) });

        adc.cr.modify(|_, w| w.adcal().set_bit());
        while adc.cr.read().adcal().bit_is_set() {}

        adc.isr.write(|w| w.adrdy().set_bit());
        adc.cr.modify(|_, w| w.aden().set_bit());
        while adc.isr.read().adrdy().bit_is_clear() {}

        // 13.5 cycle sampling, about 2us per conversion
        adc.smpr.write(|w| unsafe { w.bits(0b010) });

        Self {
            adc,
            buffer: [0u16; 3],
            count: 0,
            overrun: false,
        }
    }

    /// Average a pile of quiet-bridge conversions of the current channel to
    /// find the shunt amplifier's zero point.  Blocking, boot only.
    pub fn calibrate_bias(&mut self) -> i32 {
        self.adc.chselr.write(|w| unsafe { w.bits(CURRENT_CHANNEL) });

        let mut total = 0u32;
        for _ in 0..ADC_BIAS_OVERSAMPLE {
            self.adc.cr.modify(|_, w| w.adstart().set_bit());
            while self.adc.isr.read().eoc().bit_is_clear() {}
            total += self.adc.dr.read().bits() & 0xffff;
        }
        self.adc.isr.write(|w| w.eoseq().set_bit());

        (total / ADC_BIAS_OVERSAMPLE) as i32
    }

    /// Switch to the three-channel scan and enable its interrupts.  The
    /// first conversion starts on the next PWM wrap.
    pub fn start_scan(&mut self) {
        self.adc.chselr.write(|w| unsafe { w.bits(SCAN_CHANNELS) });
        self.adc
            .isr
            .write(|w| w.eoc().set_bit().eoseq().set_bit().ovr().set_bit());
        self.adc
            .ier
            .write(|w| w.eocie().set_bit().eoseqie().set_bit().ovrie().set_bit());
    }

    /// Top of each PWM period: abort any scan still in flight, throw away
    /// stale flags and samples, and kick off a fresh one.
    pub fn restart(&mut self) {
        if self.adc.cr.read().adstart().bit_is_set() {
            self.adc.cr.modify(|_, w| w.adstp().set_bit());
            while self.adc.cr.read().adstp().bit_is_set() {}
        }
        self.adc
            .isr
            .write(|w| w.eoc().set_bit().eoseq().set_bit().ovr().set_bit());
        self.count = 0;
        self.overrun = false;
        self.adc.cr.modify(|_, w| w.adstart().set_bit());
    }

    /// Pull finished conversions out of the data register.  Returns a batch
    /// once the whole sequence has completed.
    pub fn drain(&mut self) -> ScanEvent {
        if self.adc.isr.read().ovr().bit_is_set() {
            self.adc.isr.write(|w| w.ovr().set_bit());
            self.overrun = true;
        }

        while self.adc.isr.read().eoc().bit_is_set() {
            let raw = (self.adc.dr.read().bits() & 0xffff) as u16;
            if self.count < self.buffer.len() {
                self.buffer[self.count] = raw;
                self.count += 1;
            } else {
                // more conversions than the scan should ever produce
                self.overrun = true;
            }
        }

        if self.adc.isr.read().eoseq().bit_is_set() {
            self.adc.isr.write(|w| w.eoseq().set_bit());
            let count = core::mem::replace(&mut self.count, 0);
            let overrun = core::mem::replace(&mut self.overrun, false);

            if overrun {
                return ScanEvent::Dropped;
            }
            return match SampleBatch::from_slice(&self.buffer[..count]) {
                Some(batch) => ScanEvent::Batch(batch),
                None => ScanEvent::Dropped,
            };
        }

        ScanEvent::Pending
    }
}

/// Majority-voted hall reading.  Each line is sampled several times back to
/// back to ride through switching noise from the bridge.
pub fn read_hall_code(hall_1: &HS1, hall_2: &HS2, hall_3: &HS3) -> HallCode {
    let mut high_counts = [0u8; 3];
    for _ in 0..HALL_OVERSAMPLE {
        high_counts[0] += hall_1.is_high().unwrap() as u8;
        high_counts[1] += hall_2.is_high().unwrap() as u8;
        high_counts[2] += hall_3.is_high().unwrap() as u8;
    }
    HallCode::from_majority(high_counts)
}

/// The channel tuple handed back by `pwm::tim1` for the bridge pins
pub type DrivePwm = (
    PwmChannels<TIM1, C1>,
    PwmChannels<TIM1, C1N>,
    PwmChannels<TIM1, C2>,
    PwmChannels<TIM1, C2N>,
    PwmChannels<TIM1, C3>,
    PwmChannels<TIM1, C3N>,
);

/// The six TIM1 outputs driving the half bridges
pub struct PwmOutputs {
    a_high: PwmChannels<TIM1, C1>,
    a_low: PwmChannels<TIM1, C1N>,
    b_high: PwmChannels<TIM1, C2>,
    b_low: PwmChannels<TIM1, C2N>,
    c_high: PwmChannels<TIM1, C3>,
    c_low: PwmChannels<TIM1, C3N>,
    max_duty: u16,
}

impl PwmOutputs {
    /// Program dead time and park every switch off
    pub fn new(channels: DrivePwm) -> Self {
        let (mut a_high, mut a_low, mut b_high, mut b_low, mut c_high, mut c_low) = channels;

        a_high.set_dead_time(DTInterval::DT_5);

        let max_duty = a_high.get_max_duty();
        a_high.set_duty(0);
        a_high.disable();
        a_low.set_duty(0);
        a_low.disable();
        b_high.set_duty(0);
        b_high.disable();
        b_low.set_duty(0);
        b_low.disable();
        c_high.set_duty(0);
        c_high.disable();
        c_low.set_duty(0);
        c_low.disable();

        Self {
            a_high,
            a_low,
            b_high,
            b_low,
            c_high,
            c_low,
            max_duty,
        }
    }

    /// Apply one tick's gate levels.
    ///
    /// The low sides are the timer's complementary outputs, so a nonzero low
    /// level just enables the complementary channel and the hardware inserts
    /// the inverted duty and dead time itself.
    pub fn write(&mut self, levels: &PhaseLevels) {
        drive_leg(
            &mut self.a_high,
            &mut self.a_low,
            levels.a_high,
            levels.a_low,
            self.max_duty,
        );
        drive_leg(
            &mut self.b_high,
            &mut self.b_low,
            levels.b_high,
            levels.b_low,
            self.max_duty,
        );
        drive_leg(
            &mut self.c_high,
            &mut self.c_low,
            levels.c_high,
            levels.c_low,
            self.max_duty,
        );
    }
}

fn drive_leg<HIGH, LOW>(
    high_channel: &mut HIGH,
    low_channel: &mut LOW,
    high: u8,
    low: u8,
    max_duty: u16,
) where
    HIGH: PwmPin<Duty = u16>,
    LOW: PwmPin<Duty = u16>,
{
    if high > 0 {
        high_channel.set_duty(scale_level(high, max_duty));
        high_channel.enable();
        if low > 0 {
            low_channel.enable();
        } else {
            low_channel.disable();
        }
    } else if low > 0 {
        // high side parked at zero duty so the complementary output is on
        // for the whole period
        high_channel.set_duty(0);
        high_channel.enable();
        low_channel.enable();
    } else {
        high_channel.disable();
        low_channel.disable();
    }
}

/// 8-bit gate level to timer compare counts
pub fn scale_level(level: u8, max_duty: u16) -> u16 {
    (level as u32 * max_duty as u32 / 255) as u16
}

/// Enable TIM1's update interrupt.  The HAL's pwm constructor keeps the
/// timer, so this pokes the register block directly.
pub fn enable_pwm_wrap_irq() {
    unsafe { (*TIM1::ptr()).dier.modify(|_, w| w.uie().set_bit()) };
}

/// Acknowledge TIM1's update flag at the top of the wrap handler
pub fn clear_pwm_wrap_irq() {
    unsafe { (*TIM1::ptr()).sr.modify(|_, w| w.uif().clear_bit()) };
}

// Command cells, written by the serial handler and latched once per control
// tick.  Each is an independent word and the control loop just wants the
// freshest value, so relaxed loads and stores are enough.
pub static COMMAND_MODE: AtomicU8 = AtomicU8::new(DriveMode::Drive.to_wire());
/// Cruise setpoint, stored as f32 bits
pub static COMMAND_TARGET_SPEED_MPH: AtomicU32 = AtomicU32::new(0);
pub static COMMAND_TEST_CURRENT_MA: AtomicI32 = AtomicI32::new(0);

// Telemetry cells, published at the end of each control tick.  The reader
// runs in the background and tolerates tearing across fields.
pub static TELEMETRY_VOLTAGE_MV: AtomicU32 = AtomicU32::new(0);
pub static TELEMETRY_CURRENT_MA: AtomicI32 = AtomicI32::new(0);
pub static TELEMETRY_BATTERY_CURRENT_MA: AtomicI32 = AtomicI32::new(0);
pub static TELEMETRY_RPM: AtomicU16 = AtomicU16::new(0);
pub static TELEMETRY_SPEED_MPH_X10: AtomicU16 = AtomicU16::new(0);
pub static TELEMETRY_DUTY_PCT: AtomicU8 = AtomicU8::new(0);
pub static TELEMETRY_THROTTLE_PCT: AtomicU8 = AtomicU8::new(0);
pub static TELEMETRY_STATUS: AtomicU8 = AtomicU8::new(0);
pub static TELEMETRY_ODOMETER: AtomicU32 = AtomicU32::new(0);
pub static DROPPED_TICKS: AtomicU16 = AtomicU16::new(0);
pub static TELEMETRY_SEQUENCE: AtomicU8 = AtomicU8::new(0);

/// Publish the interesting parts of the control state for the telemetry
/// task to pick up
pub fn publish_telemetry(state: &ControlState) {
    TELEMETRY_VOLTAGE_MV.store(state.voltage_mv.max(0) as u32, Ordering::Relaxed);
    TELEMETRY_CURRENT_MA.store(state.current_ma_smoothed, Ordering::Relaxed);
    TELEMETRY_BATTERY_CURRENT_MA.store(state.battery_current_ma, Ordering::Relaxed);
    TELEMETRY_RPM.store(state.rpm as u16, Ordering::Relaxed);
    TELEMETRY_SPEED_MPH_X10.store((state.speed_mph * 10.0) as u16, Ordering::Relaxed);
    TELEMETRY_DUTY_PCT.store((state.duty_cycle * 100 / DUTY_CYCLE_MAX) as u8, Ordering::Relaxed);
    TELEMETRY_THROTTLE_PCT.store((state.throttle as u32 * 100 / 255) as u8, Ordering::Relaxed);
    TELEMETRY_STATUS.store(
        TelemetryFrame::status_bits(
            state.mode.to_wire(),
            state.launch,
            state.cruise,
            state.synchronous,
        ),
        Ordering::Relaxed,
    );
    TELEMETRY_ODOMETER.store(state.rpm_estimator.odometer(), Ordering::Relaxed);
}

/// Assemble the next telemetry frame from the published cells
pub fn telemetry_frame() -> TelemetryFrame {
    TelemetryFrame {
        voltage_mv: TELEMETRY_VOLTAGE_MV.load(Ordering::Relaxed),
        current_ma: TELEMETRY_CURRENT_MA.load(Ordering::Relaxed),
        battery_current_ma: TELEMETRY_BATTERY_CURRENT_MA.load(Ordering::Relaxed),
        rpm: TELEMETRY_RPM.load(Ordering::Relaxed),
        speed_mph_x10: TELEMETRY_SPEED_MPH_X10.load(Ordering::Relaxed),
        duty_pct: TELEMETRY_DUTY_PCT.load(Ordering::Relaxed),
        throttle_pct: TELEMETRY_THROTTLE_PCT.load(Ordering::Relaxed),
        status: TELEMETRY_STATUS.load(Ordering::Relaxed),
        odometer: TELEMETRY_ODOMETER.load(Ordering::Relaxed),
        dropped_ticks: DROPPED_TICKS.load(Ordering::Relaxed),
        sequence: TELEMETRY_SEQUENCE.fetch_add(1, Ordering::Relaxed),
    }
}
