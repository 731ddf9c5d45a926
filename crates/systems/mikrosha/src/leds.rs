//! Diagnostic LEDs.
//!
//! PA0 (active high) lights when the poll loop is about to start. PC13
//! (active low, the on-board LED of common STM32F103 boards) lights when the
//! clock could not be brought up.

use rom_emu_core::registers::{configure_pin, pin_config, GpioReg, GpioRegisters, Port};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Led {
    pub port: Port,
    pub pin: u8,
    pub active_low: bool,
}

impl Led {
    fn mask(&self) -> u32 {
        1 << self.pin
    }

    pub fn set<G: GpioRegisters + ?Sized>(&self, gpio: &mut G, lit: bool) {
        let reg = if lit != self.active_low {
            GpioReg::Bsrr
        } else {
            GpioReg::Brr
        };
        gpio.write_port(self.port, reg, self.mask());
    }

    pub fn is_lit<G: GpioRegisters + ?Sized>(&self, gpio: &G) -> bool {
        let high = gpio.read_port(self.port, GpioReg::Odr) & self.mask() != 0;
        high != self.active_low
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DebugLeds {
    pub ready: Led,
    pub fault: Led,
}

impl Default for DebugLeds {
    fn default() -> Self {
        Self {
            ready: Led {
                port: Port::A,
                pin: 0,
                active_low: false,
            },
            fault: Led {
                port: Port::C,
                pin: 13,
                active_low: true,
            },
        }
    }
}

impl DebugLeds {
    /// Both LEDs off, then switched to push-pull outputs.
    pub fn init<G: GpioRegisters + ?Sized>(&self, gpio: &mut G) {
        for led in [self.ready, self.fault] {
            led.set(gpio, false);
            configure_pin(gpio, led.port, led.pin, pin_config::OUTPUT_PUSH_PULL);
        }
    }

    pub fn show_fault<G: GpioRegisters + ?Sized>(&self, gpio: &mut G) {
        self.fault.set(gpio, true);
    }

    pub fn show_ready<G: GpioRegisters + ?Sized>(&self, gpio: &mut G) {
        self.ready.set(gpio, true);
    }
}
