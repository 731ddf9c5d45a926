//! Power-on sequence: clock, bus lines, settle delay, interrupts off, loop.

use rom_emu_core::clock::{ClockError, ClockPlan, ClockSequencer};
use rom_emu_core::config::{ConfigError, EmulatorConfig};
use rom_emu_core::drive::AnyDriver;
use rom_emu_core::lines::{configure_bus_lines, disable_jtag, enable_port_clocks};
use rom_emu_core::logging::{log, LogCategory, LogLevel};
use rom_emu_core::poll::PollLoop;
use rom_emu_core::registers::{ControlRegisters, GpioRegisters};
use rom_emu_core::rom::{ImageError, MemoryImage};
use thiserror::Error;

use crate::delay::{Delay, SpinDelay};
use crate::interrupts::{CortexM, InterruptControl};
use crate::leds::DebugLeds;
use crate::mmio::Stm32f1;

#[derive(Debug, Error)]
pub enum BootError {
    #[error("Clock error: {0}")]
    Clock(#[from] ClockError),
    #[error("Config error: {0}")]
    Config(#[from] ConfigError),
    #[error("Image error: {0}")]
    Image(#[from] ImageError),
    #[error("Peripherals already taken")]
    PeripheralsTaken,
}

/// Bring the clock up, retrying per `retries` (`None` = forever).
///
/// Returns the number of attempts used.
pub fn bring_up_with_retries<C: ControlRegisters + ?Sized>(
    ctrl: &mut C,
    plan: ClockPlan,
    retries: Option<u32>,
) -> Result<u32, ClockError> {
    let mut attempt = 0u32;
    loop {
        attempt = attempt.saturating_add(1);
        match ClockSequencer::new(&mut *ctrl, plan).bring_up() {
            Ok(()) => return Ok(attempt),
            Err(err) => {
                log(LogCategory::Boot, LogLevel::Warn, || {
                    format!(
                        "Clock bring-up attempt {} failed: {} (code {})",
                        attempt,
                        err,
                        err.code()
                    )
                });
                if retries.is_some_and(|retries| attempt > retries) {
                    return Err(err);
                }
            }
        }
    }
}

/// Run the boot sequence and hand back a loop ready to serve the host.
///
/// On a clock failure the fault LED is lit before the error is returned.
/// Interrupts stay masked once this returns `Ok`.
pub fn boot<'a, C, G, D, I>(
    ctrl: &mut C,
    mut gpio: G,
    image: MemoryImage<'a>,
    config: &EmulatorConfig,
    delay: &mut D,
    interrupts: &mut I,
) -> Result<PollLoop<'a, G, AnyDriver>, BootError>
where
    C: ControlRegisters + ?Sized,
    G: GpioRegisters,
    D: Delay + ?Sized,
    I: InterruptControl + ?Sized,
{
    config.validate()?;
    let plan = config.clock.plan()?;
    log(LogCategory::Boot, LogLevel::Info, || {
        format!(
            "Booting: {} byte image at {:04X}, {:?} revision",
            image.len(),
            image.base(),
            config.revision
        )
    });

    enable_port_clocks(ctrl);
    disable_jtag(ctrl);
    let leds = DebugLeds::default();
    leds.init(&mut gpio);

    match bring_up_with_retries(ctrl, plan, config.clock_retries) {
        Ok(attempts) => log(LogCategory::Boot, LogLevel::Info, || {
            format!("Clock up after {} attempt(s)", attempts)
        }),
        Err(err) => {
            leds.show_fault(&mut gpio);
            log(LogCategory::Boot, LogLevel::Error, || {
                format!("Giving up on the clock: {}", err)
            });
            return Err(err.into());
        }
    }

    configure_bus_lines(&mut gpio, config);
    delay.delay_ms(config.settle_delay_ms);
    leds.show_ready(&mut gpio);
    interrupts.disable_all();

    log(LogCategory::Boot, LogLevel::Info, || {
        "Interrupts masked, entering poll loop".to_string()
    });
    Ok(PollLoop::from_config(gpio, image, config)?)
}

/// Firmware entry: boot on the real device and serve forever.
///
/// Halts in a spin loop if booting fails.
pub fn run_firmware(rom: &'static [u8], config: &EmulatorConfig) -> ! {
    if let Err(err) = boot_device(rom, config) {
        log(LogCategory::Boot, LogLevel::Error, || {
            format!("Halted: {}", err)
        });
    }
    loop {
        std::hint::spin_loop();
    }
}

fn boot_device(rom: &'static [u8], config: &EmulatorConfig) -> Result<(), BootError> {
    let image = MemoryImage::new(config.base_address, rom)?;
    // SAFETY: this is the firmware entry point, the sole owner of the device
    let Stm32f1 { mut control, gpio } =
        unsafe { Stm32f1::take() }.ok_or(BootError::PeripheralsTaken)?;
    let poll = boot(
        &mut control,
        gpio,
        image,
        config,
        &mut SpinDelay::default(),
        &mut CortexM,
    )?;
    poll.run()
}
