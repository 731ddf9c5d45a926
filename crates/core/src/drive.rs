//! Data bus ownership.
//!
//! The data bus is shared with the host's own drivers. The controller here
//! is the only code that writes the data pins, and it tracks whether the
//! emulator currently drives them. Two board revisions exist:
//!
//! - **Pin mode** ([`PinModeDriver`]): the data pins themselves switch
//!   between an output mode and a non-driving mode.
//! - **Transceiver** ([`TransceiverDriver`]): the data pins are permanent
//!   outputs feeding a bus transceiver, whose active-low enable line decides
//!   whether anything reaches the host.
//!
//! In both cases the byte is latched before the path to the host opens, so
//! the host never sees a stale value from a previous cycle.

use serde::{Deserialize, Serialize};

use crate::config::{BusRevision, EmulatorConfig, ReleaseMode};
use crate::pins::PinMap;
use crate::registers::{bsrr_word, pin_config, GpioReg, GpioRegisters, Port};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum BusOwnership {
    /// High impedance / pulled input, the host owns the bus
    Released,
    /// The emulator asserts a byte
    Driven,
}

/// The only writer of the data pins.
pub trait BusDriver {
    /// Stop driving. Idempotent.
    fn release<G: GpioRegisters + ?Sized>(&mut self, gpio: &mut G);

    /// Put `byte` on the bus and keep driving it.
    fn drive<G: GpioRegisters + ?Sized>(&mut self, gpio: &mut G, byte: u8);

    fn ownership(&self) -> BusOwnership;

    /// Byte currently asserted, `None` while released
    fn driven_byte(&self) -> Option<u8>;
}

#[inline(always)]
fn byte_word(shift: u32, byte: u8) -> u32 {
    bsrr_word(0xFF << shift, u32::from(byte) << shift)
}

/// Drives by switching the data pins' electrical mode.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PinModeDriver {
    port: Port,
    shift: u32,
    config_reg: GpioReg,
    drive_config: u32,
    release_config: u32,
    release_mode: ReleaseMode,
    driven: Option<u8>,
}

impl PinModeDriver {
    pub fn new(pins: &PinMap, release_mode: ReleaseMode) -> Self {
        let (drive_nibble, release_nibble) = match release_mode {
            ReleaseMode::PulledInput => (pin_config::OUTPUT_PUSH_PULL, pin_config::INPUT_PULL),
            ReleaseMode::OpenDrainIdle => {
                (pin_config::OUTPUT_OPEN_DRAIN, pin_config::OUTPUT_OPEN_DRAIN)
            }
        };

        Self {
            port: pins.data_port,
            shift: u32::from(pins.data_shift),
            config_reg: pins.data_config_reg(),
            drive_config: pin_config::all_pins(drive_nibble),
            release_config: pin_config::all_pins(release_nibble),
            release_mode,
            driven: None,
        }
    }

    pub fn release_mode(&self) -> ReleaseMode {
        self.release_mode
    }
}

impl BusDriver for PinModeDriver {
    #[inline(always)]
    fn release<G: GpioRegisters + ?Sized>(&mut self, gpio: &mut G) {
        let mask = 0xFF << self.shift;
        match self.release_mode {
            ReleaseMode::PulledInput => {
                // Stop driving first, then point the pulls down.
                gpio.write_port(self.port, self.config_reg, self.release_config);
                gpio.write_port(self.port, GpioReg::Brr, mask);
            }
            ReleaseMode::OpenDrainIdle => {
                // A latched 1 leaves an open-drain pin floating.
                gpio.write_port(self.port, GpioReg::Bsrr, mask);
                gpio.write_port(self.port, self.config_reg, self.release_config);
            }
        }
        self.driven = None;
    }

    #[inline(always)]
    fn drive<G: GpioRegisters + ?Sized>(&mut self, gpio: &mut G, byte: u8) {
        // Latch first: while still an input the latch only selects pull
        // direction, so the output comes up with the right value.
        gpio.write_port(self.port, GpioReg::Bsrr, byte_word(self.shift, byte));
        gpio.write_port(self.port, self.config_reg, self.drive_config);
        self.driven = Some(byte);
    }

    fn ownership(&self) -> BusOwnership {
        match self.driven {
            Some(_) => BusOwnership::Driven,
            None => BusOwnership::Released,
        }
    }

    fn driven_byte(&self) -> Option<u8> {
        self.driven
    }
}

/// Drives through a bus transceiver with an active-low enable line.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TransceiverDriver {
    data_port: Port,
    shift: u32,
    enable_port: Port,
    enable_mask: u32,
    driven: Option<u8>,
}

impl TransceiverDriver {
    pub fn new(pins: &PinMap) -> Self {
        Self {
            data_port: pins.data_port,
            shift: u32::from(pins.data_shift),
            enable_port: pins.transceiver_port,
            enable_mask: pins.enable_mask(),
            driven: None,
        }
    }
}

impl BusDriver for TransceiverDriver {
    #[inline(always)]
    fn release<G: GpioRegisters + ?Sized>(&mut self, gpio: &mut G) {
        gpio.write_port(self.enable_port, GpioReg::Bsrr, self.enable_mask);
        self.driven = None;
    }

    #[inline(always)]
    fn drive<G: GpioRegisters + ?Sized>(&mut self, gpio: &mut G, byte: u8) {
        gpio.write_port(self.data_port, GpioReg::Bsrr, byte_word(self.shift, byte));
        gpio.write_port(self.enable_port, GpioReg::Brr, self.enable_mask);
        self.driven = Some(byte);
    }

    fn ownership(&self) -> BusOwnership {
        match self.driven {
            Some(_) => BusOwnership::Driven,
            None => BusOwnership::Released,
        }
    }

    fn driven_byte(&self) -> Option<u8> {
        self.driven
    }
}

/// Revision picked at runtime, for tools that load the revision from a
/// config file. Firmware builds use the concrete driver type.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AnyDriver {
    PinMode(PinModeDriver),
    Transceiver(TransceiverDriver),
}

impl AnyDriver {
    pub fn for_config(config: &EmulatorConfig) -> Self {
        match config.revision {
            BusRevision::PinMode => {
                AnyDriver::PinMode(PinModeDriver::new(&config.pins, config.release_mode))
            }
            BusRevision::Transceiver => AnyDriver::Transceiver(TransceiverDriver::new(&config.pins)),
        }
    }

    pub fn revision(&self) -> BusRevision {
        match self {
            AnyDriver::PinMode(_) => BusRevision::PinMode,
            AnyDriver::Transceiver(_) => BusRevision::Transceiver,
        }
    }
}

impl BusDriver for AnyDriver {
    #[inline(always)]
    fn release<G: GpioRegisters + ?Sized>(&mut self, gpio: &mut G) {
        match self {
            AnyDriver::PinMode(d) => d.release(gpio),
            AnyDriver::Transceiver(d) => d.release(gpio),
        }
    }

    #[inline(always)]
    fn drive<G: GpioRegisters + ?Sized>(&mut self, gpio: &mut G, byte: u8) {
        match self {
            AnyDriver::PinMode(d) => d.drive(gpio, byte),
            AnyDriver::Transceiver(d) => d.drive(gpio, byte),
        }
    }

    fn ownership(&self) -> BusOwnership {
        match self {
            AnyDriver::PinMode(d) => d.ownership(),
            AnyDriver::Transceiver(d) => d.ownership(),
        }
    }

    fn driven_byte(&self) -> Option<u8> {
        match self {
            AnyDriver::PinMode(d) => d.driven_byte(),
            AnyDriver::Transceiver(d) => d.driven_byte(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::lines::configure_bus_lines;
    use crate::sim::SimGpio;

    fn pin_mode(release_mode: ReleaseMode) -> (PinModeDriver, SimGpio) {
        let pins = PinMap::default();
        (PinModeDriver::new(&pins, release_mode), SimGpio::new(pins, false))
    }

    fn transceiver() -> (TransceiverDriver, SimGpio) {
        let config = EmulatorConfig {
            revision: BusRevision::Transceiver,
            ..EmulatorConfig::default()
        };
        let mut gpio = SimGpio::new(config.pins, true);
        configure_bus_lines(&mut gpio, &config);
        (TransceiverDriver::new(&config.pins), gpio)
    }

    #[test]
    fn test_pin_mode_drive_and_release() {
        let (mut driver, mut gpio) = pin_mode(ReleaseMode::PulledInput);
        driver.release(&mut gpio);
        assert_eq!(driver.ownership(), BusOwnership::Released);
        assert_eq!(gpio.driven_lines(), 0);

        driver.drive(&mut gpio, 0xA5);
        assert_eq!(driver.ownership(), BusOwnership::Driven);
        assert_eq!(driver.driven_byte(), Some(0xA5));
        assert_eq!(gpio.host_sample(), Some(0xA5));
        assert_eq!(gpio.read_port(Port::B, GpioReg::Crh), 0x3333_3333);

        driver.release(&mut gpio);
        assert_eq!(driver.ownership(), BusOwnership::Released);
        assert_eq!(gpio.driven_lines(), 0);
        assert_eq!(gpio.read_port(Port::B, GpioReg::Crh), 0x8888_8888);
        // Pulls point down
        assert_eq!(gpio.read_port(Port::B, GpioReg::Odr) & 0xFF00, 0);
    }

    #[test]
    fn test_release_is_idempotent() {
        let (mut driver, mut gpio) = pin_mode(ReleaseMode::PulledInput);
        driver.drive(&mut gpio, 0x42);
        driver.release(&mut gpio);
        let snapshot = gpio.port_registers(Port::B);
        driver.release(&mut gpio);

        assert_eq!(driver.ownership(), BusOwnership::Released);
        assert_eq!(gpio.port_registers(Port::B), snapshot);
    }

    #[test]
    fn test_repeated_drive_keeps_value() {
        let (mut driver, mut gpio) = pin_mode(ReleaseMode::PulledInput);
        driver.drive(&mut gpio, 0x3C);
        driver.drive(&mut gpio, 0x3C);
        assert_eq!(driver.driven_byte(), Some(0x3C));
        assert_eq!(gpio.host_sample(), Some(0x3C));

        driver.drive(&mut gpio, 0xC3);
        assert_eq!(gpio.host_sample(), Some(0xC3));
    }

    #[test]
    fn test_drive_leaves_neighbouring_pins_alone() {
        let (mut driver, mut gpio) = pin_mode(ReleaseMode::PulledInput);
        gpio.write_port(Port::B, GpioReg::Odr, 0x00FF);
        driver.drive(&mut gpio, 0x00);
        driver.release(&mut gpio);
        assert_eq!(gpio.read_port(Port::B, GpioReg::Odr) & 0x00FF, 0x00FF);
    }

    #[test]
    fn test_open_drain_release_floats_every_line() {
        let (mut driver, mut gpio) = pin_mode(ReleaseMode::OpenDrainIdle);
        driver.drive(&mut gpio, 0x0F);
        // Open drain can only sink: the zero bits are driven
        assert_eq!(gpio.driven_lines(), 0xF0);
        assert_eq!(gpio.host_sample(), Some(0x0F));

        driver.release(&mut gpio);
        assert_eq!(gpio.driven_lines(), 0);
        assert_eq!(gpio.read_port(Port::B, GpioReg::Odr) & 0xFF00, 0xFF00);
        assert_eq!(driver.release_mode(), ReleaseMode::OpenDrainIdle);
    }

    #[test]
    fn test_transceiver_byte_before_enable() {
        let (mut driver, mut gpio) = transceiver();
        assert_eq!(gpio.driven_lines(), 0);

        driver.drive(&mut gpio, 0x99);
        assert_eq!(gpio.host_sample(), Some(0x99));
        // The data write lands before the enable write
        let writes = gpio.write_log();
        let data = writes
            .iter()
            .rposition(|w| w.reg == GpioReg::Bsrr && w.value & 0xFF00_FF00 != 0)
            .unwrap();
        let enable = writes.iter().rposition(|w| w.reg == GpioReg::Brr).unwrap();
        assert!(data < enable);

        driver.release(&mut gpio);
        assert_eq!(driver.ownership(), BusOwnership::Released);
        assert_eq!(gpio.driven_lines(), 0);
        driver.release(&mut gpio);
        assert_eq!(gpio.driven_lines(), 0);
    }

    #[test]
    fn test_transceiver_repeated_drive_keeps_value() {
        let (mut driver, mut gpio) = transceiver();
        driver.drive(&mut gpio, 0x3C);
        driver.drive(&mut gpio, 0x3C);
        assert_eq!(driver.ownership(), BusOwnership::Driven);
        assert_eq!(driver.driven_byte(), Some(0x3C));
        assert_eq!(gpio.host_sample(), Some(0x3C));

        driver.drive(&mut gpio, 0xC3);
        assert_eq!(driver.driven_byte(), Some(0xC3));
        assert_eq!(gpio.host_sample(), Some(0xC3));
    }

    #[test]
    fn test_any_driver_follows_config() {
        let mut config = EmulatorConfig::default();
        assert_eq!(AnyDriver::for_config(&config).revision(), BusRevision::PinMode);

        config.revision = BusRevision::Transceiver;
        let mut driver = AnyDriver::for_config(&config);
        assert_eq!(driver.revision(), BusRevision::Transceiver);

        let mut gpio = SimGpio::new(config.pins, true);
        configure_bus_lines(&mut gpio, &config);
        driver.drive(&mut gpio, 0x10);
        assert_eq!(driver.ownership(), BusOwnership::Driven);
        assert_eq!(gpio.host_sample(), Some(0x10));
        driver.release(&mut gpio);
        assert_eq!(driver.driven_byte(), None);
    }
}
