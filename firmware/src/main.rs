//!
//! Closed-loop drive controller firmware
//!

#![no_std]
#![no_main]
#![feature(type_alias_impl_trait)]

use panic_probe as _;

use defmt_rtt as _;

#[rtic::app(device = stm32f0xx_hal::pac, peripherals = true, dispatchers = [TSC])]
mod app {
    use ncomm_utils::packing::Packable;
    use portable_atomic::Ordering;
    use rtic_monotonics::stm32::prelude::*;
    use stm32f0xx_hal::{
        prelude::*,
        pwm,
        serial::{self, Serial},
    };

    use drive_common::{CONTROL_COMMAND_SIZE, ControlCommand, SYNC_BYTE, TELEMETRY_FRAME_SIZE};
    use drive_control::{ControlState, DriveMode, config::PWM_FREQUENCY_HZ, control_tick};
    use drive_firmware::{
        AdcSequencer, COMMAND_MODE, COMMAND_TARGET_SPEED_MPH, COMMAND_TEST_CURRENT_MA,
        DROPPED_TICKS, HS1, HS2, HS3, PwmOutputs, SERIAL_BAUD, ScanEvent, SerialInterface,
        StatusLed, TELEMETRY_PERIOD_MS, TIM2_CLOCK_HZ, clear_pwm_wrap_irq, enable_pwm_wrap_irq,
        publish_telemetry, read_hall_code, telemetry_frame,
    };

    stm32_tim2_monotonic!(Mono, 1_000_000);

    #[local]
    struct Local {
        // Hall sensor inputs
        hs1: HS1,
        hs2: HS2,
        hs3: HS3,

        // The six bridge outputs
        pwm: PwmOutputs,

        // Everything the control loop remembers between ticks
        state: ControlState,

        // The board led
        led: StatusLed,
    }

    #[shared]
    struct Shared {
        // The ADC scan, restarted by the wrap handler and drained by the
        // conversion handler
        adc: AdcSequencer,

        // The usart serial interface to the dashboard
        usart: SerialInterface,
    }

    #[init]
    fn init(mut ctx: init::Context) -> (Shared, Local) {
        Mono::start(TIM2_CLOCK_HZ);

        let mut rcc = ctx
            .device
            .RCC
            .configure()
            .sysclk(48.mhz())
            .freeze(&mut ctx.device.FLASH);
        let gpioa = ctx.device.GPIOA.split(&mut rcc);
        let gpiob = ctx.device.GPIOB.split(&mut rcc);

        let pwm_pins = cortex_m::interrupt::free(move |cs| {
            (
                gpioa.pa8.into_alternate_af2(cs),
                gpiob.pb13.into_alternate_af2(cs),
                gpioa.pa9.into_alternate_af2(cs),
                gpiob.pb14.into_alternate_af2(cs),
                gpioa.pa10.into_alternate_af2(cs),
                gpiob.pb15.into_alternate_af2(cs),
            )
        });

        let channels = pwm::tim1(ctx.device.TIM1, pwm_pins, &mut rcc, PWM_FREQUENCY_HZ.hz());
        let pwm = PwmOutputs::new(channels);

        let hs1 = cortex_m::interrupt::free(|cs| gpioa.pa0.into_pull_down_input(cs));
        let hs2 = cortex_m::interrupt::free(|cs| gpioa.pa1.into_pull_down_input(cs));
        let hs3 = cortex_m::interrupt::free(|cs| gpioa.pa2.into_pull_down_input(cs));

        // PA3/PA4/PA5 feed ADC channels 3..=5 (current, voltage, throttle)
        cortex_m::interrupt::free(|cs| {
            gpioa.pa3.into_analog(cs);
            gpioa.pa4.into_analog(cs);
            gpioa.pa5.into_analog(cs);
        });

        let mut led = cortex_m::interrupt::free(|cs| gpiob.pb1.into_push_pull_output(cs));
        led.set_high().unwrap();

        let (tx, rx) = cortex_m::interrupt::free(|cs| {
            (
                gpioa.pa14.into_alternate_af1(cs),
                gpioa.pa15.into_alternate_af1(cs),
            )
        });
        let mut usart = Serial::usart1(ctx.device.USART1, (tx, rx), SERIAL_BAUD.bps(), &mut rcc);
        usart.listen(serial::Event::Rxne);

        // The bridge is parked, so whatever the shunt amplifier reads now is
        // its zero point
        let mut adc = AdcSequencer::new(ctx.device.ADC);
        let bias = adc.calibrate_bias();
        adc.start_scan();

        let state = ControlState::new(bias);

        enable_pwm_wrap_irq();

        defmt::info!("drive controller up, shunt bias {} counts", bias);

        telemetry_heartbeat::spawn().ok();

        (
            Shared { adc, usart },
            Local {
                hs1,
                hs2,
                hs3,
                pwm,
                state,
                led,
            },
        )
    }

    #[idle]
    fn idle(_ctx: idle::Context) -> ! {
        loop {
            cortex_m::asm::wfi();
        }
    }

    #[task(
        shared = [adc],
        binds = TIM1_BRK_UP_TRG_COM,
        priority = 3
    )]
    /// Runs at every PWM wrap.  Restarts the ADC scan so the samples line up
    /// with the same point of each switching period.
    fn pwm_wrap(mut ctx: pwm_wrap::Context) {
        clear_pwm_wrap_irq();
        ctx.shared.adc.lock(|adc| adc.restart());
    }

    #[task(
        local = [state, pwm, hs1, hs2, hs3],
        shared = [adc],
        binds = ADC_COMP,
        priority = 3
    )]
    /// Drains finished conversions and, once the batch is complete, runs one
    /// control tick and writes the resulting gate levels.
    fn adc_tick(mut ctx: adc_tick::Context) {
        let batch = match ctx.shared.adc.lock(|adc| adc.drain()) {
            ScanEvent::Batch(batch) => batch,
            ScanEvent::Pending => return,
            ScanEvent::Dropped => {
                DROPPED_TICKS.fetch_add(1, Ordering::Relaxed);
                return;
            }
        };

        let state = ctx.local.state;
        state.mode = DriveMode::from_wire(COMMAND_MODE.load(Ordering::Relaxed));
        state.target_speed_mph = f32::from_bits(COMMAND_TARGET_SPEED_MPH.load(Ordering::Relaxed));
        state.test_current_ma = COMMAND_TEST_CURRENT_MA.load(Ordering::Relaxed);

        let hall = read_hall_code(ctx.local.hs1, ctx.local.hs2, ctx.local.hs3);
        let levels = control_tick(state, hall, batch, Mono::now().ticks());
        ctx.local.pwm.write(&levels);

        publish_telemetry(state);
    }

    #[task(
        local = [
            buffer: [u8; CONTROL_COMMAND_SIZE] = [0u8; CONTROL_COMMAND_SIZE],
            idx: usize = 0,
        ],
        shared = [usart],
        binds = USART1,
        priority = 2
    )]
    /// Reassembles dashboard commands from the byte stream.  A sync byte
    /// resets the frame, anything else accumulates until a full command is
    /// buffered.
    fn usart_rx(mut ctx: usart_rx::Context) {
        let data = match ctx.shared.usart.lock(|usart| nb::block!(usart.read())) {
            Ok(data) => data,
            Err(_err) => {
                defmt::error!("usart read error");
                return;
            }
        };

        if data == SYNC_BYTE {
            *ctx.local.idx = 0;
            return;
        }
        if *ctx.local.idx < ctx.local.buffer.len() {
            ctx.local.buffer[*ctx.local.idx] = data;
            *ctx.local.idx += 1;
        }
        if *ctx.local.idx < ctx.local.buffer.len() {
            return;
        }
        *ctx.local.idx = 0;

        match ControlCommand::unpack(ctx.local.buffer.as_slice()) {
            Ok(ControlCommand::SetMode { mode }) => {
                COMMAND_MODE.store(mode, Ordering::Relaxed);
                defmt::info!("mode set to {}", mode);
            }
            Ok(ControlCommand::SetTargetSpeed { mph }) => {
                COMMAND_TARGET_SPEED_MPH.store(mph.to_bits(), Ordering::Relaxed);
            }
            Ok(ControlCommand::SetTestCurrent { ma }) => {
                COMMAND_TEST_CURRENT_MA.store(ma, Ordering::Relaxed);
            }
            Ok(ControlCommand::RequestTelemetry) => {
                send_telemetry::spawn().ok();
            }
            Ok(ControlCommand::Unknown) => defmt::warn!("unknown command"),
            Err(_err) => defmt::warn!("malformed command"),
        }
    }

    #[task(shared = [usart], priority = 1)]
    /// Frame and send one telemetry report over the serial link
    async fn send_telemetry(mut ctx: send_telemetry::Context) {
        let frame = telemetry_frame();

        let mut buffer = [0u8; TELEMETRY_FRAME_SIZE + 1];
        buffer[0] = SYNC_BYTE;
        // cannot fail, the buffer is sized for the frame
        let _ = frame.pack(&mut buffer[1..]);

        ctx.shared.usart.lock(|usart| {
            for byte in buffer {
                nb::block!(usart.write(byte)).unwrap();
                nb::block!(usart.flush()).unwrap();
            }
        });

        defmt::debug!("telemetry frame {} sent", frame.sequence);
    }

    #[task(
        local = [
            led,
            led_on: bool = true,
            last_dropped: u16 = 0,
        ],
        priority = 1
    )]
    /// Blinks the board led and pushes a telemetry frame every period
    async fn telemetry_heartbeat(ctx: telemetry_heartbeat::Context) {
        loop {
            if *ctx.local.led_on {
                ctx.local.led.set_low().unwrap();
                *ctx.local.led_on = false;
            } else {
                ctx.local.led.set_high().unwrap();
                *ctx.local.led_on = true;
            }

            let dropped = DROPPED_TICKS.load(Ordering::Relaxed);
            let delta = dropped.wrapping_sub(*ctx.local.last_dropped);
            if delta > 0 {
                defmt::warn!("{} control ticks dropped", delta);
            }
            *ctx.local.last_dropped = dropped;

            send_telemetry::spawn().ok();

            Mono::delay(TELEMETRY_PERIOD_MS.millis()).await;
        }
    }
}
