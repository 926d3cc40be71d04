//!
//! Pushes a canned telemetry frame over the serial link every 250 ms, for
//! bring-up of the dashboard side without a motor attached.
//!

#![no_std]
#![no_main]
#![feature(type_alias_impl_trait)]

use panic_probe as _;

use defmt_rtt as _;

#[rtic::app(device = stm32f0xx_hal::pac, peripherals = true, dispatchers = [TSC])]
mod app {
    use drive_common::{SYNC_BYTE, TELEMETRY_FRAME_SIZE, TelemetryFrame};
    use drive_firmware::{SERIAL_BAUD, SerialInterface, TELEMETRY_PERIOD_MS, TIM2_CLOCK_HZ};
    use ncomm_utils::packing::Packable;
    use rtic_monotonics::stm32::prelude::*;
    use stm32f0xx_hal::{
        prelude::*,
        serial::Serial,
    };

    stm32_tim2_monotonic!(Mono, 1_000_000);

    #[local]
    struct Local {
        usart: SerialInterface,
    }

    #[shared]
    struct Shared {}

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

        let (tx, rx) = cortex_m::interrupt::free(|cs| {
            (
                gpioa.pa14.into_alternate_af1(cs),
                gpioa.pa15.into_alternate_af1(cs),
            )
        });
        let usart = Serial::usart1(ctx.device.USART1, (tx, rx), SERIAL_BAUD.bps(), &mut rcc);

        write_telemetry::spawn().ok();

        (Shared {}, Local { usart })
    }

    #[idle]
    fn idle(_ctx: idle::Context) -> ! {
        loop {
            cortex_m::asm::wfi();
        }
    }

    #[task(local = [usart, sequence: u8 = 0], priority = 1)]
    async fn write_telemetry(ctx: write_telemetry::Context) {
        loop {
            let frame = TelemetryFrame {
                voltage_mv: 36_000,
                current_ma: 1_250,
                battery_current_ma: 400,
                rpm: 1_200,
                speed_mph_x10: 123,
                duty_pct: 42,
                throttle_pct: 50,
                status: TelemetryFrame::status_bits(1, false, false, true),
                odometer: 98_765,
                dropped_ticks: 0,
                sequence: *ctx.local.sequence,
            };
            *ctx.local.sequence = ctx.local.sequence.wrapping_add(1);

            let mut buffer = [0u8; TELEMETRY_FRAME_SIZE + 1];
            buffer[0] = SYNC_BYTE;
            let _ = frame.pack(&mut buffer[1..]);

            for byte in buffer {
                nb::block!(ctx.local.usart.write(byte)).unwrap();
            }
            nb::block!(ctx.local.usart.flush()).unwrap();

            defmt::info!("sent frame {}", frame.sequence);

            Mono::delay(TELEMETRY_PERIOD_MS.millis()).await;
        }
    }
}
