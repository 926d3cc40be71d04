//!
//! Example program that prints the majority-voted hall code and the sector
//! it maps to.  Turn the rotor by hand and watch the sector walk 0..=5.
//!

#![no_std]
#![no_main]
#![feature(type_alias_impl_trait)]

use panic_probe as _;

use defmt_rtt as _;

#[rtic::app(device = stm32f0xx_hal::pac, peripherals = true, dispatchers = [TSC])]
mod app {
    use drive_firmware::{HS1, HS2, HS3, TIM2_CLOCK_HZ, read_hall_code};
    use rtic_monotonics::stm32::prelude::*;
    use stm32f0xx_hal::prelude::*;

    stm32_tim2_monotonic!(Mono, 1_000_000);

    #[local]
    struct Local {
        hs1: HS1,
        hs2: HS2,
        hs3: HS3,
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

        let hs1 = cortex_m::interrupt::free(|cs| gpioa.pa0.into_pull_down_input(cs));
        let hs2 = cortex_m::interrupt::free(|cs| gpioa.pa1.into_pull_down_input(cs));
        let hs3 = cortex_m::interrupt::free(|cs| gpioa.pa2.into_pull_down_input(cs));

        print_hall_values::spawn().ok();

        (Shared {}, Local { hs1, hs2, hs3 })
    }

    #[idle]
    fn idle(_ctx: idle::Context) -> ! {
        loop {
            cortex_m::asm::wfi();
        }
    }

    #[task(local = [hs1, hs2, hs3], priority = 1)]
    async fn print_hall_values(ctx: print_hall_values::Context) {
        loop {
            let code = read_hall_code(ctx.local.hs1, ctx.local.hs2, ctx.local.hs3);
            defmt::info!("hall code {=u8:b} -> sector {}", code.bits(), code.sector());

            Mono::delay(100.millis()).await;
        }
    }
}
