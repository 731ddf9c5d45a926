//! Simulated register banks and a simulated host.
//!
//! [`SimControl`] models just enough of RCC/FLASH/AFIO for the clock
//! sequencer: oscillators become ready after a configurable number of polls
//! (or never), and the system clock switch status follows the selected
//! source once that source is ready.
//!
//! [`SimGpio`] models three GPIO ports wired to a host bus. The host side
//! places an address on the multiplexers and asserts the strobes; the
//! simulation answers the segment lines according to the selector pins the
//! engine drives, and reports which data lines the engine is driving.

use std::cell::Cell;

use serde::{Deserialize, Serialize};

use crate::pins::PinMap;
use crate::registers::{pin_config, rcc, ControlReg, ControlRegisters, GpioReg, GpioRegisters, Port};

/// When a simulated oscillator reports ready
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ReadyAfter {
    Immediately,
    /// Ready on the first poll after this many not-ready polls
    Polls(u32),
    Never,
}

#[derive(Debug)]
struct Oscillator {
    ready_after: ReadyAfter,
    /// Number of start attempts that never become ready
    failing_attempts: u32,
    attempts: Cell<u32>,
    polls: Cell<u32>,
}

impl Oscillator {
    fn new(ready_after: ReadyAfter) -> Self {
        Self {
            ready_after,
            failing_attempts: 0,
            attempts: Cell::new(0),
            polls: Cell::new(0),
        }
    }

    fn start(&self) {
        self.attempts.set(self.attempts.get() + 1);
        self.polls.set(0);
    }

    fn poll(&self) -> bool {
        if self.attempts.get() <= self.failing_attempts {
            return false;
        }
        match self.ready_after {
            ReadyAfter::Immediately => true,
            ReadyAfter::Never => false,
            ReadyAfter::Polls(n) => {
                let polls = self.polls.get();
                if polls >= n {
                    true
                } else {
                    self.polls.set(polls + 1);
                    false
                }
            }
        }
    }
}

/// Simulated RCC, FLASH and AFIO registers.
#[derive(Debug)]
pub struct SimControl {
    regs: [u32; 5],
    crystal: Oscillator,
    pll: Oscillator,
}

impl SimControl {
    pub fn new(crystal: ReadyAfter, pll: ReadyAfter) -> Self {
        let mut regs = [0; 5];
        regs[ControlReg::RccCr.index()] = rcc::CR_HSION | rcc::CR_HSIRDY;
        Self {
            regs,
            crystal: Oscillator::new(crystal),
            pll: Oscillator::new(pll),
        }
    }

    /// Crystal and PLL that fail the first `crystal_fails` / `pll_fails`
    /// start attempts, then come up immediately.
    pub fn flaky(crystal_fails: u32, pll_fails: u32) -> Self {
        let mut sim = Self::new(ReadyAfter::Immediately, ReadyAfter::Immediately);
        sim.crystal.failing_attempts = crystal_fails;
        sim.pll.failing_attempts = pll_fails;
        sim
    }

    /// Start attempts seen so far, crystal then PLL
    pub fn start_attempts(&self) -> (u32, u32) {
        (self.crystal.attempts.get(), self.pll.attempts.get())
    }

    fn cr(&self) -> u32 {
        self.regs[ControlReg::RccCr.index()]
    }

    pub fn hse_enabled(&self) -> bool {
        self.cr() & rcc::CR_HSEON != 0
    }

    pub fn pll_enabled(&self) -> bool {
        self.cr() & rcc::CR_PLLON != 0
    }

    pub fn hsi_enabled(&self) -> bool {
        self.cr() & rcc::CR_HSION != 0
    }

    pub fn running_from_pll(&self) -> bool {
        let cfgr = self.read_reg(ControlReg::RccCfgr);
        cfgr & rcc::CFGR_SWS_MASK == rcc::CFGR_SW_PLL << rcc::CFGR_SWS_POS
    }

    fn crystal_ready(&self) -> bool {
        self.hse_enabled() && self.crystal.poll()
    }
}

impl ControlRegisters for SimControl {
    fn read_reg(&self, reg: ControlReg) -> u32 {
        let value = self.regs[reg.index()];
        match reg {
            ControlReg::RccCr => {
                let mut cr = value & !(rcc::CR_HSERDY | rcc::CR_PLLRDY);
                let crystal_ready = self.crystal_ready();
                if crystal_ready {
                    cr |= rcc::CR_HSERDY;
                }
                if crystal_ready && self.pll_enabled() && self.pll.poll() {
                    cr |= rcc::CR_PLLRDY;
                }
                cr
            }
            ControlReg::RccCfgr => {
                // SWS follows SW only when the PLL is actually running
                let sw = value & rcc::CFGR_SW_MASK;
                let sws = if sw == rcc::CFGR_SW_PLL && !self.pll_enabled() {
                    0
                } else {
                    sw
                };
                (value & !rcc::CFGR_SWS_MASK) | (sws << rcc::CFGR_SWS_POS)
            }
            _ => value,
        }
    }

    fn write_reg(&mut self, reg: ControlReg, value: u32) {
        match reg {
            ControlReg::RccCr => {
                let before = self.cr();
                let rising = value & !before;
                if rising & rcc::CR_HSEON != 0 {
                    self.crystal.start();
                }
                if rising & rcc::CR_PLLON != 0 {
                    self.pll.start();
                }
                let mut cr = value & !(rcc::CR_HSERDY | rcc::CR_PLLRDY | rcc::CR_HSIRDY);
                if cr & rcc::CR_HSION != 0 {
                    cr |= rcc::CR_HSIRDY;
                }
                self.regs[reg.index()] = cr;
            }
            ControlReg::RccCfgr => {
                self.regs[reg.index()] = value & !rcc::CFGR_SWS_MASK;
            }
            _ => self.regs[reg.index()] = value,
        }
    }
}

/// Register file of one simulated GPIO port
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SimPort {
    pub crl: u32,
    pub crh: u32,
    pub odr: u32,
}

impl Default for SimPort {
    fn default() -> Self {
        Self {
            crl: 0x4444_4444,
            crh: 0x4444_4444,
            odr: 0,
        }
    }
}

impl SimPort {
    fn pin_config(&self, pin: u32) -> u32 {
        if pin < 8 {
            (self.crl >> (pin * 4)) & 0xF
        } else {
            (self.crh >> ((pin - 8) * 4)) & 0xF
        }
    }
}

/// One register write, in the order the engine issued it
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct GpioWrite {
    pub port: Port,
    pub reg: GpioReg,
    pub value: u32,
}

/// Three GPIO ports wired to a simulated host.
#[derive(Debug, Clone)]
pub struct SimGpio {
    pins: PinMap,
    transceiver: bool,
    ports: [SimPort; 3],
    address: u16,
    address_valid: bool,
    reading: bool,
    selector_history: Vec<u32>,
    write_log: Vec<GpioWrite>,
    ever_driven: u8,
}

impl SimGpio {
    /// Ports at reset values, host idle. `transceiver` fits a bus
    /// transceiver between the data pins and the host.
    pub fn new(pins: PinMap, transceiver: bool) -> Self {
        Self {
            pins,
            transceiver,
            ports: [SimPort::default(); 3],
            address: 0,
            address_valid: false,
            reading: false,
            selector_history: Vec::new(),
            write_log: Vec::new(),
            ever_driven: 0,
        }
    }

    /// Present `address` on the multiplexer inputs.
    pub fn set_address(&mut self, address: u16) {
        self.address = address;
    }

    /// Assert (`true`) or release the /32K and /RD strobes.
    pub fn set_strobes(&mut self, address_valid: bool, reading: bool) {
        self.address_valid = address_valid;
        self.reading = reading;
    }

    pub fn port_registers(&self, port: Port) -> SimPort {
        self.ports[port.index()]
    }

    /// Selector value after every write that touched the selector pins
    pub fn selector_history(&self) -> &[u32] {
        &self.selector_history
    }

    pub fn write_log(&self) -> &[GpioWrite] {
        &self.write_log
    }

    pub fn clear_history(&mut self) {
        self.selector_history.clear();
        self.write_log.clear();
    }

    fn port(&self, port: Port) -> &SimPort {
        &self.ports[port.index()]
    }

    fn selector(&self) -> u32 {
        let odr = self.port(self.pins.selector_port).odr;
        (odr >> self.pins.selector_shift) & 0b11
    }

    fn transceiver_enabled(&self) -> bool {
        let port = self.port(self.pins.transceiver_port);
        let enable = u32::from(self.pins.enable_bit);
        let direction = u32::from(self.pins.direction_bit);
        let data = self.port(self.pins.data_port);
        pin_config::is_output(port.pin_config(enable))
            && pin_config::is_output(port.pin_config(direction))
            && port.odr & (1 << enable) == 0
            && port.odr & (1 << direction) != 0
            && pin_config::is_output(data.pin_config(u32::from(self.pins.data_shift)))
    }

    /// Data lines the emulator currently pulls to a level, one bit per line.
    pub fn driven_lines(&self) -> u8 {
        if self.transceiver {
            return if self.transceiver_enabled() { 0xFF } else { 0 };
        }

        let port = self.port(self.pins.data_port);
        let shift = u32::from(self.pins.data_shift);
        (0..8).fold(0u8, |lines, bit| {
            let pin = shift + bit;
            let config = port.pin_config(pin);
            let latched_low = port.odr & (1 << pin) == 0;
            let driven = if pin_config::is_open_drain_output(config) {
                latched_low
            } else {
                pin_config::is_output(config)
            };
            if driven {
                lines | (1 << bit)
            } else {
                lines
            }
        })
    }

    /// Data lines ever driven since construction
    pub fn ever_driven_lines(&self) -> u8 {
        self.ever_driven
    }

    /// What the host reads on the data bus, `None` when nobody drives it.
    /// Undriven lines float high.
    pub fn host_sample(&self) -> Option<u8> {
        let driven = self.driven_lines();
        if driven == 0 {
            return None;
        }
        let latched = (self.port(self.pins.data_port).odr >> self.pins.data_shift) as u8;
        Some((latched & driven) | !driven)
    }

    /// The emulator drives the bus outside a read window.
    pub fn contention(&self) -> bool {
        self.driven_lines() != 0 && !(self.address_valid && self.reading)
    }

    fn input_levels(&self, port: Port) -> u32 {
        // Pulled inputs and outputs both follow the latch
        let mut levels = self.port(port).odr & 0xFFFF;

        if port == self.pins.segment_port {
            let nibble = u32::from(self.address >> (self.selector() * 4)) & 0xF;
            levels = (levels & !self.pins.segment_mask()) | (nibble << self.pins.segment_shift);
        }
        if port == self.pins.strobe_port {
            levels |= self.pins.strobe_mask();
            if self.address_valid {
                levels &= !self.pins.address_valid_mask();
            }
            if self.reading {
                levels &= !self.pins.read_mask();
            }
        }
        levels
    }
}

impl GpioRegisters for SimGpio {
    fn read_port(&self, port: Port, reg: GpioReg) -> u32 {
        match reg {
            GpioReg::Crl => self.port(port).crl,
            GpioReg::Crh => self.port(port).crh,
            GpioReg::Idr => self.input_levels(port),
            GpioReg::Odr => self.port(port).odr,
            GpioReg::Bsrr | GpioReg::Brr => 0,
        }
    }

    fn write_port(&mut self, port: Port, reg: GpioReg, value: u32) {
        self.write_log.push(GpioWrite { port, reg, value });

        let selector_mask = self.pins.selector_mask();
        let touches_selector = port == self.pins.selector_port
            && match reg {
                GpioReg::Bsrr => (value | (value >> 16)) & selector_mask != 0,
                GpioReg::Brr | GpioReg::Odr => value & selector_mask != 0,
                _ => false,
            };

        let regs = &mut self.ports[port.index()];
        match reg {
            GpioReg::Crl => regs.crl = value,
            GpioReg::Crh => regs.crh = value,
            GpioReg::Idr => {}
            GpioReg::Odr => regs.odr = value & 0xFFFF,
            GpioReg::Bsrr => regs.odr = (regs.odr & !(value >> 16)) | (value & 0xFFFF),
            GpioReg::Brr => regs.odr &= !(value & 0xFFFF),
        }

        if touches_selector {
            let selector = self.selector();
            self.selector_history.push(selector);
        }
        self.ever_driven |= self.driven_lines();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_control_reset_state() {
        let regs = SimControl::new(ReadyAfter::Immediately, ReadyAfter::Immediately);
        assert!(regs.hsi_enabled());
        assert!(!regs.hse_enabled());
        assert!(!regs.running_from_pll());
        // Not enabled, so never ready
        assert_eq!(regs.read_reg(ControlReg::RccCr) & rcc::CR_HSERDY, 0);
    }

    #[test]
    fn test_ready_after_polls() {
        let mut regs = SimControl::new(ReadyAfter::Polls(2), ReadyAfter::Never);
        regs.set_bits(ControlReg::RccCr, rcc::CR_HSEON);
        assert_eq!(regs.read_reg(ControlReg::RccCr) & rcc::CR_HSERDY, 0);
        assert_eq!(regs.read_reg(ControlReg::RccCr) & rcc::CR_HSERDY, 0);
        assert_ne!(regs.read_reg(ControlReg::RccCr) & rcc::CR_HSERDY, 0);
    }

    #[test]
    fn test_flaky_oscillator_counts_attempts() {
        let mut regs = SimControl::flaky(1, 0);
        regs.set_bits(ControlReg::RccCr, rcc::CR_HSEON);
        assert_eq!(regs.read_reg(ControlReg::RccCr) & rcc::CR_HSERDY, 0);

        regs.clear_bits(ControlReg::RccCr, rcc::CR_HSEON);
        regs.set_bits(ControlReg::RccCr, rcc::CR_HSEON);
        assert_ne!(regs.read_reg(ControlReg::RccCr) & rcc::CR_HSERDY, 0);
        assert_eq!(regs.start_attempts(), (2, 0));
    }

    #[test]
    fn test_segment_lines_follow_selector() {
        let pins = PinMap::default();
        let mut gpio = SimGpio::new(pins, false);
        gpio.set_address(0xABCD);

        gpio.write_port(Port::B, GpioReg::Bsrr, (0b11 << 3) << 16);
        assert_eq!((gpio.read_port(Port::A, GpioReg::Idr) >> 8) & 0xF, 0xD);
        gpio.write_port(Port::B, GpioReg::Bsrr, 0b11 << 3);
        assert_eq!((gpio.read_port(Port::A, GpioReg::Idr) >> 8) & 0xF, 0xA);
    }

    #[test]
    fn test_strobes_are_active_low() {
        let pins = PinMap::default();
        let mut gpio = SimGpio::new(pins, false);
        assert_eq!(gpio.read_port(Port::B, GpioReg::Idr) & 0xC0, 0xC0);

        gpio.set_strobes(true, false);
        assert_eq!(gpio.read_port(Port::B, GpioReg::Idr) & 0xC0, 0x80);
        gpio.set_strobes(true, true);
        assert_eq!(gpio.read_port(Port::B, GpioReg::Idr) & 0xC0, 0);
    }

    #[test]
    fn test_undriven_bus_reads_nothing() {
        let gpio = SimGpio::new(PinMap::default(), true);
        assert_eq!(gpio.driven_lines(), 0);
        assert_eq!(gpio.host_sample(), None);
        assert!(!gpio.contention());
    }

    #[test]
    fn test_push_pull_outside_window_is_contention() {
        let mut gpio = SimGpio::new(PinMap::default(), false);
        gpio.write_port(Port::B, GpioReg::Crh, pin_config::all_pins(pin_config::OUTPUT_PUSH_PULL));
        assert_eq!(gpio.driven_lines(), 0xFF);
        assert!(gpio.contention());

        gpio.set_strobes(true, true);
        assert!(!gpio.contention());
        assert_eq!(gpio.ever_driven_lines(), 0xFF);
    }
}
