//! The real-time poll loop.
//!
//! Two states, re-evaluated on every iteration without blocking:
//!
//! - **Idle**: bus released, nothing asserted.
//! - **Active**: bus driven with the byte for the last captured address.
//!
//! ```text
//! read strobes (IDR, never cached)
//!   |-- window inactive -> release (if Active) -> capture if /32K low -> Idle
//!   `-- /32K and /RD low -> capture -> lookup (or default byte) -> drive -> Active
//! ```
//!
//! Releasing is always the first thing an inactive iteration does, so the
//! emulator lags a strobe change by at most one iteration. The loop never
//! logs or waits.
//!
//! # Deployment constraint
//!
//! On the microcontroller `step`, the address capture and the driver must be
//! linked into SRAM (zero wait states) and all interrupts must be masked
//! before [`PollLoop::run`] is entered. Flash wait states or an interrupt
//! entry push the strobe-to-data latency past the host's read window.

use serde::{Deserialize, Serialize};

use crate::capture::AddressCapture;
use crate::config::{ConfigError, EmulatorConfig};
use crate::drive::{AnyDriver, BusDriver, BusOwnership};
use crate::pins::PinMap;
use crate::registers::{GpioReg, GpioRegisters, Port};
use crate::rom::MemoryImage;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum LoopState {
    Idle,
    Active,
}

/// Observable loop state for tools and tests
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct BusSnapshot {
    pub state: LoopState,
    pub ownership: BusOwnership,
    pub last_address: Option<u16>,
    pub driven_byte: Option<u8>,
}

/// Single owner of the GPIO bank and the data bus while the emulator runs.
pub struct PollLoop<'a, G, D> {
    gpio: G,
    driver: D,
    image: MemoryImage<'a>,
    capture: AddressCapture,
    strobe_port: Port,
    address_valid_mask: u32,
    read_mask: u32,
    default_byte: u8,
    state: LoopState,
    last_address: Option<u16>,
}

impl<'a, G: GpioRegisters, D: BusDriver> PollLoop<'a, G, D> {
    /// The bus lines must already be configured, data bus released.
    pub fn new(gpio: G, driver: D, image: MemoryImage<'a>, pins: &PinMap, default_byte: u8) -> Self {
        Self {
            gpio,
            driver,
            image,
            capture: AddressCapture::new(pins),
            strobe_port: pins.strobe_port,
            address_valid_mask: pins.address_valid_mask(),
            read_mask: pins.read_mask(),
            default_byte,
            state: LoopState::Idle,
            last_address: None,
        }
    }

    /// One iteration. A bounded, fixed sequence of register accesses.
    #[inline(always)]
    pub fn step(&mut self) -> LoopState {
        let strobes = self.gpio.read_port(self.strobe_port, GpioReg::Idr);
        let address_valid = strobes & self.address_valid_mask == 0;
        let reading = strobes & self.read_mask == 0;

        if !(address_valid && reading) {
            if self.state == LoopState::Active {
                self.driver.release(&mut self.gpio);
                self.state = LoopState::Idle;
            }
            if address_valid {
                self.last_address = Some(self.capture.capture(&mut self.gpio));
            }
            return self.state;
        }

        let address = self.capture.capture(&mut self.gpio);
        self.last_address = Some(address);
        let byte = self.image.lookup(address).unwrap_or(self.default_byte);
        self.driver.drive(&mut self.gpio, byte);
        self.state = LoopState::Active;
        self.state
    }

    /// Serve the host until reset.
    pub fn run(mut self) -> ! {
        self.driver.release(&mut self.gpio);
        self.state = LoopState::Idle;
        loop {
            self.step();
        }
    }

    pub fn state(&self) -> LoopState {
        self.state
    }

    pub fn ownership(&self) -> BusOwnership {
        self.driver.ownership()
    }

    pub fn last_address(&self) -> Option<u16> {
        self.last_address
    }

    pub fn default_byte(&self) -> u8 {
        self.default_byte
    }

    pub fn image(&self) -> &MemoryImage<'a> {
        &self.image
    }

    pub fn snapshot(&self) -> BusSnapshot {
        BusSnapshot {
            state: self.state,
            ownership: self.driver.ownership(),
            last_address: self.last_address,
            driven_byte: self.driver.driven_byte(),
        }
    }

    pub fn gpio(&self) -> &G {
        &self.gpio
    }

    /// Mutable access to the bank, for simulated hosts between iterations.
    pub fn gpio_mut(&mut self) -> &mut G {
        &mut self.gpio
    }
}

impl<'a, G: GpioRegisters> PollLoop<'a, G, AnyDriver> {
    /// Build a loop whose revision, wiring and default byte come from `config`.
    pub fn from_config(
        gpio: G,
        image: MemoryImage<'a>,
        config: &EmulatorConfig,
    ) -> Result<Self, ConfigError> {
        config.validate()?;
        Ok(Self::new(
            gpio,
            AnyDriver::for_config(config),
            image,
            &config.pins,
            config.default_byte,
        ))
    }
}
