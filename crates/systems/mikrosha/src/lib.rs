//! Mikrosha ROM emulator board
//!
//! An STM32F103 sitting on the expansion bus of a Mikrosha (Radio-86RK
//! family) computer, answering reads in the upper 32K window.
//!
//! # Board
//!
//! - **MCU**: STM32F103, 8 MHz crystal, PLL x9 = 72 MHz
//! - **Address**: 16 bits through two 4-bit multiplexers, selector PB3..PB4,
//!   segment lines PA8..PA11
//! - **Strobes**: `/32K` on PB6, `/RD` on PB7, both active low
//! - **Data**: PB8..PB15, directly or through a K555AP6 transceiver
//!   (`EZ` on PB0, `SED` on PB1)
//! - **LEDs**: PA0 ready, PC13 clock fault

pub mod boot;
pub mod delay;
pub mod interrupts;
pub mod leds;
pub mod mmio;

pub use boot::{boot, bring_up_with_retries, run_firmware, BootError};
pub use delay::{Delay, RecordedDelay, SpinDelay};
pub use interrupts::{CortexM, InterruptControl, SimInterrupts};
pub use leds::DebugLeds;
pub use mmio::Stm32f1;
