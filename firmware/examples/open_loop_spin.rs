//!
//! Spin the motor open loop by stepping through the commutation sectors at a
//! fixed cadence with a small duty cycle.  No feedback anywhere, so only run
//! this with the wheel off the ground.
//!

#![no_std]
#![no_main]
#![feature(type_alias_impl_trait)]

use panic_probe as _;

use defmt_rtt as _;

#[rtic::app(device = stm32f0xx_hal::pac, peripherals = true, dispatchers = [TSC])]
mod app {
    use drive_control::{Sector, drive_levels};
    use drive_firmware::{PwmOutputs, TIM2_CLOCK_HZ};
    use rtic_monotonics::stm32::prelude::*;
    use stm32f0xx_hal::{prelude::*, pwm};

    stm32_tim2_monotonic!(Mono, 1_000_000);

    /// Gate level out of 255 applied to the driven phase
    const SPIN_LEVEL: u16 = 20;
    /// Time per commutation step
    const STEP_MS: u64 = 50;

    #[local]
    struct Local {
        pwm: PwmOutputs,
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
        let channels = pwm::tim1(ctx.device.TIM1, pwm_pins, &mut rcc, 16_000u32.hz());
        let pwm = PwmOutputs::new(channels);

        defmt::info!("stepping sectors at {} ms with level {}", STEP_MS, SPIN_LEVEL);

        step_sector::spawn().ok();

        (Shared {}, Local { pwm })
    }

    #[idle]
    fn idle(_ctx: idle::Context) -> ! {
        loop {
            cortex_m::asm::wfi();
        }
    }

    #[task(local = [pwm, sector: Sector = Sector::S0], priority = 1)]
    async fn step_sector(ctx: step_sector::Context) {
        loop {
            let levels = drive_levels(Some(*ctx.local.sector), SPIN_LEVEL, false);
            ctx.local.pwm.write(&levels);
            *ctx.local.sector = ctx.local.sector.next();

            Mono::delay(STEP_MS.millis()).await;
        }
    }
}
