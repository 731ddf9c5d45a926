//! Memory-mapped STM32F103 register banks.

use std::ptr;
use std::sync::atomic::{AtomicBool, Ordering};

use rom_emu_core::registers::{ControlReg, ControlRegisters, GpioReg, GpioRegisters, Port};

pub const RCC_BASE: usize = 0x4002_1000;
pub const FLASH_BASE: usize = 0x4002_2000;
pub const AFIO_BASE: usize = 0x4001_0000;
pub const GPIOA_BASE: usize = 0x4001_0800;
pub const GPIOB_BASE: usize = 0x4001_0C00;
pub const GPIOC_BASE: usize = 0x4001_1000;

static TAKEN: AtomicBool = AtomicBool::new(false);

/// Address of a control register.
pub fn control_address(reg: ControlReg) -> usize {
    match reg {
        ControlReg::RccCr => RCC_BASE,
        ControlReg::RccCfgr => RCC_BASE + 0x04,
        ControlReg::RccApb2enr => RCC_BASE + 0x18,
        ControlReg::FlashAcr => FLASH_BASE,
        ControlReg::AfioMapr => AFIO_BASE + 0x04,
    }
}

/// Address of a GPIO port register.
#[inline(always)]
pub fn gpio_address(port: Port, reg: GpioReg) -> usize {
    let base = match port {
        Port::A => GPIOA_BASE,
        Port::B => GPIOB_BASE,
        Port::C => GPIOC_BASE,
    };
    let offset = match reg {
        GpioReg::Crl => 0x00,
        GpioReg::Crh => 0x04,
        GpioReg::Idr => 0x08,
        GpioReg::Odr => 0x0C,
        GpioReg::Bsrr => 0x10,
        GpioReg::Brr => 0x14,
    };
    base + offset
}

/// RCC, FLASH and AFIO, touched only while booting.
#[derive(Debug)]
pub struct Stm32Control {
    _private: (),
}

/// GPIOA..GPIOC, owned by the poll loop once running.
#[derive(Debug)]
pub struct Stm32Gpio {
    _private: (),
}

/// Both register groups of the one physical device.
#[derive(Debug)]
pub struct Stm32f1 {
    pub control: Stm32Control,
    pub gpio: Stm32Gpio,
}

impl Stm32f1 {
    /// Claim the peripheral block. Returns `None` on every call after the first.
    ///
    /// # Safety
    ///
    /// Only valid on an STM32F1, where the addresses above are mapped.
    /// Nothing else in the program may access these registers.
    pub unsafe fn take() -> Option<Self> {
        if TAKEN.swap(true, Ordering::AcqRel) {
            return None;
        }
        Some(Self {
            control: Stm32Control { _private: () },
            gpio: Stm32Gpio { _private: () },
        })
    }
}

impl ControlRegisters for Stm32Control {
    fn read_reg(&self, reg: ControlReg) -> u32 {
        // SAFETY: `take` guarantees a single owner on a device where the
        // address is a mapped, aligned 32-bit register.
        unsafe { ptr::read_volatile(control_address(reg) as *const u32) }
    }

    fn write_reg(&mut self, reg: ControlReg, value: u32) {
        // SAFETY: as for `read_reg`
        unsafe { ptr::write_volatile(control_address(reg) as *mut u32, value) }
    }
}

impl GpioRegisters for Stm32Gpio {
    #[inline(always)]
    fn read_port(&self, port: Port, reg: GpioReg) -> u32 {
        // SAFETY: as for `Stm32Control::read_reg`
        unsafe { ptr::read_volatile(gpio_address(port, reg) as *const u32) }
    }

    #[inline(always)]
    fn write_port(&mut self, port: Port, reg: GpioReg, value: u32) {
        // SAFETY: as for `Stm32Control::read_reg`
        unsafe { ptr::write_volatile(gpio_address(port, reg) as *mut u32, value) }
    }
}
