//! Typed access to the memory-mapped register groups the engine touches.
//!
//! The engine never dereferences raw addresses. Everything goes through two
//! small traits so the same code runs against the real peripheral block on
//! the microcontroller and against the simulated banks in [`crate::sim`].
//!
//! # Register groups
//!
//! - **Control**: RCC `CR`/`CFGR`/`APB2ENR`, FLASH `ACR`, AFIO `MAPR`.
//!   Only touched during boot.
//! - **GPIO**: per-port `CRL`/`CRH` (pin configuration), `IDR` (pin levels),
//!   `ODR` (output latch), `BSRR`/`BRR` (atomic set/reset).
//!
//! Hot-path pin writes always go through `BSRR`/`BRR`. A read-modify-write of
//! `ODR` on a port shared by the selector and the data bus could otherwise
//! clobber a pin another routine just changed.

use serde::{Deserialize, Serialize};

/// Boot-time control registers (clock tree, flash, pin remapping).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ControlReg {
    /// RCC clock control register
    RccCr,
    /// RCC clock configuration register
    RccCfgr,
    /// RCC APB2 peripheral clock enable register
    RccApb2enr,
    /// FLASH access control register
    FlashAcr,
    /// AFIO remap and debug I/O configuration register
    AfioMapr,
}

impl ControlReg {
    pub const ALL: [ControlReg; 5] = [
        ControlReg::RccCr,
        ControlReg::RccCfgr,
        ControlReg::RccApb2enr,
        ControlReg::FlashAcr,
        ControlReg::AfioMapr,
    ];

    pub(crate) fn index(self) -> usize {
        match self {
            ControlReg::RccCr => 0,
            ControlReg::RccCfgr => 1,
            ControlReg::RccApb2enr => 2,
            ControlReg::FlashAcr => 3,
            ControlReg::AfioMapr => 4,
        }
    }
}

/// GPIO port identifier
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Port {
    A,
    B,
    C,
}

impl Port {
    pub const ALL: [Port; 3] = [Port::A, Port::B, Port::C];

    pub(crate) fn index(self) -> usize {
        match self {
            Port::A => 0,
            Port::B => 1,
            Port::C => 2,
        }
    }
}

/// Registers of a single GPIO port
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum GpioReg {
    /// Configuration of pins 0..=7
    Crl,
    /// Configuration of pins 8..=15
    Crh,
    /// Input data (read-only)
    Idr,
    /// Output data latch
    Odr,
    /// Bit set (low half) / reset (high half), write-only
    Bsrr,
    /// Bit reset, write-only
    Brr,
}

/// Read/write access to the control register group.
pub trait ControlRegisters {
    fn read_reg(&self, reg: ControlReg) -> u32;
    fn write_reg(&mut self, reg: ControlReg, value: u32);

    fn set_bits(&mut self, reg: ControlReg, mask: u32) {
        let value = self.read_reg(reg);
        self.write_reg(reg, value | mask);
    }

    fn clear_bits(&mut self, reg: ControlReg, mask: u32) {
        let value = self.read_reg(reg);
        self.write_reg(reg, value & !mask);
    }

    /// Clear `clear` then set `set` in a single write.
    fn modify(&mut self, reg: ControlReg, clear: u32, set: u32) {
        let value = self.read_reg(reg);
        self.write_reg(reg, (value & !clear) | set);
    }
}

/// Read/write access to the GPIO register group.
pub trait GpioRegisters {
    fn read_port(&self, port: Port, reg: GpioReg) -> u32;
    fn write_port(&mut self, port: Port, reg: GpioReg, value: u32);
}

impl<T: ControlRegisters + ?Sized> ControlRegisters for &mut T {
    fn read_reg(&self, reg: ControlReg) -> u32 {
        (**self).read_reg(reg)
    }

    fn write_reg(&mut self, reg: ControlReg, value: u32) {
        (**self).write_reg(reg, value)
    }
}

impl<T: GpioRegisters + ?Sized> GpioRegisters for &mut T {
    #[inline(always)]
    fn read_port(&self, port: Port, reg: GpioReg) -> u32 {
        (**self).read_port(port, reg)
    }

    #[inline(always)]
    fn write_port(&mut self, port: Port, reg: GpioReg, value: u32) {
        (**self).write_port(port, reg, value)
    }
}

/// RCC bit positions and field masks.
pub mod rcc {
    pub const CR_HSION: u32 = 1 << 0;
    pub const CR_HSIRDY: u32 = 1 << 1;
    pub const CR_HSEON: u32 = 1 << 16;
    pub const CR_HSERDY: u32 = 1 << 17;
    pub const CR_PLLON: u32 = 1 << 24;
    pub const CR_PLLRDY: u32 = 1 << 25;

    pub const CFGR_SW_MASK: u32 = 0b11;
    pub const CFGR_SW_PLL: u32 = 0b10;
    pub const CFGR_SWS_POS: u32 = 2;
    pub const CFGR_SWS_MASK: u32 = 0b11 << CFGR_SWS_POS;
    pub const CFGR_HPRE_POS: u32 = 4;
    pub const CFGR_HPRE_MASK: u32 = 0xF << CFGR_HPRE_POS;
    pub const CFGR_PPRE1_POS: u32 = 8;
    pub const CFGR_PPRE1_MASK: u32 = 0x7 << CFGR_PPRE1_POS;
    pub const CFGR_PPRE2_POS: u32 = 11;
    pub const CFGR_PPRE2_MASK: u32 = 0x7 << CFGR_PPRE2_POS;
    pub const CFGR_PLLSRC: u32 = 1 << 16;
    pub const CFGR_PLLMULL_POS: u32 = 18;
    pub const CFGR_PLLMULL_MASK: u32 = 0xF << CFGR_PLLMULL_POS;

    pub const APB2ENR_AFIOEN: u32 = 1 << 0;
    pub const APB2ENR_IOPAEN: u32 = 1 << 2;
    pub const APB2ENR_IOPBEN: u32 = 1 << 3;
    pub const APB2ENR_IOPCEN: u32 = 1 << 4;
}

/// FLASH access control fields.
pub mod flash {
    pub const ACR_LATENCY_MASK: u32 = 0x7;
}

/// AFIO debug port remapping.
pub mod afio {
    pub const MAPR_SWJ_CFG_MASK: u32 = 0x7 << 24;
    /// JTAG off, SWD on. Frees PB3, PB4 and PA15.
    pub const MAPR_SWJ_CFG_JTAGDISABLE: u32 = 0x2 << 24;
}

/// Pin configuration nibbles (`CNF << 2 | MODE`).
pub mod pin_config {
    pub const MODE_INPUT: u32 = 0b00;
    pub const MODE_OUTPUT_50MHZ: u32 = 0b11;

    pub const CNF_PUSH_PULL: u32 = 0b00;
    pub const CNF_OPEN_DRAIN: u32 = 0b01;
    pub const CNF_FLOATING: u32 = 0b01;
    pub const CNF_PULL: u32 = 0b10;

    pub const fn nibble(mode: u32, cnf: u32) -> u32 {
        (cnf << 2) | mode
    }

    pub const INPUT_FLOATING: u32 = nibble(MODE_INPUT, CNF_FLOATING);
    pub const INPUT_PULL: u32 = nibble(MODE_INPUT, CNF_PULL);
    pub const OUTPUT_PUSH_PULL: u32 = nibble(MODE_OUTPUT_50MHZ, CNF_PUSH_PULL);
    pub const OUTPUT_OPEN_DRAIN: u32 = nibble(MODE_OUTPUT_50MHZ, CNF_OPEN_DRAIN);

    /// The same nibble for all eight pins of a CRL/CRH register.
    pub const fn all_pins(nibble: u32) -> u32 {
        nibble * 0x1111_1111
    }

    pub fn is_output(nibble: u32) -> bool {
        nibble & 0b11 != MODE_INPUT
    }

    pub fn is_open_drain_output(nibble: u32) -> bool {
        is_output(nibble) && (nibble >> 2) & 0b01 != 0
    }
}

/// Configuration register holding `pin` and the bit offset of its nibble.
pub fn config_slot(pin: u8) -> (GpioReg, u32) {
    let reg = if pin < 8 { GpioReg::Crl } else { GpioReg::Crh };
    (reg, u32::from(pin % 8) * 4)
}

/// Rewrite the configuration nibble of a single pin, leaving its neighbours alone.
pub fn configure_pin<G: GpioRegisters + ?Sized>(gpio: &mut G, port: Port, pin: u8, nibble: u32) {
    let (reg, shift) = config_slot(pin);
    let value = gpio.read_port(port, reg);
    gpio.write_port(port, reg, (value & !(0xF << shift)) | ((nibble & 0xF) << shift));
}

/// `BSRR` word that makes the pins under `mask` equal to `value` in one store.
#[inline(always)]
pub fn bsrr_word(mask: u32, value: u32) -> u32 {
    let set = value & mask;
    let reset = !value & mask;
    set | (reset << 16)
}
