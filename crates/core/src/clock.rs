//! Clock bring-up: internal RC oscillator -> external crystal -> PLL.
//!
//! None of the bus timing holds until the core runs from the PLL, so this is
//! the first thing the firmware does. Both ready-flag waits are bounded by a
//! fixed poll count rather than wall-clock time (no timer is trustworthy
//! before the clock is). On a timeout everything enabled so far is switched
//! off again before the error is returned.
//!
//! # Sequence
//!
//! ```text
//! Default -> CrystalStarting -> CrystalReady -> MultiplierStarting
//!         -> MultiplierReady -> Switched
//!                  \-> CrystalFailed       \-> MultiplierFailed
//! ```

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::config::ConfigError;
use crate::logging::{log, LogCategory, LogLevel};
use crate::registers::{flash, rcc, ControlReg, ControlRegisters};

/// Reference crystal frequency
pub const DEFAULT_HSE_HZ: u32 = 8_000_000;
/// Ready-flag poll ceiling
pub const DEFAULT_STARTUP_TIMEOUT: u32 = 0x1000;
/// Highest APB1 frequency the peripheral bus tolerates
pub const APB1_MAX_HZ: u32 = 36_000_000;
/// Highest wait-state count FLASH_ACR defines
pub const MAX_FLASH_LATENCY: u8 = 2;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ClockState {
    Default,
    CrystalStarting,
    CrystalReady,
    CrystalFailed,
    MultiplierStarting,
    MultiplierReady,
    MultiplierFailed,
    Switched,
}

#[derive(Debug, Error, Clone, Copy, PartialEq, Eq)]
pub enum ClockError {
    #[error("External crystal oscillator did not become ready")]
    CrystalTimeout,
    #[error("PLL did not lock")]
    MultiplierTimeout,
}

impl ClockError {
    /// Numeric code for diagnostic outputs (1 = crystal, 2 = PLL)
    pub fn code(self) -> u8 {
        match self {
            ClockError::CrystalTimeout => 1,
            ClockError::MultiplierTimeout => 2,
        }
    }
}

/// User-facing clock tree settings
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ClockConfig {
    pub hse_hz: u32,
    /// PLL multiplier, 2..=16
    pub pll_multiplier: u8,
    /// Maximum number of ready-flag polls per stage
    pub startup_timeout: u32,
    /// Flash wait states; derived from SYSCLK when absent
    pub flash_latency: Option<u8>,
    pub ahb_prescaler: u16,
    pub apb1_prescaler: u8,
    pub apb2_prescaler: u8,
}

impl Default for ClockConfig {
    fn default() -> Self {
        Self {
            hse_hz: DEFAULT_HSE_HZ,
            pll_multiplier: 9,
            startup_timeout: DEFAULT_STARTUP_TIMEOUT,
            flash_latency: None,
            ahb_prescaler: 1,
            apb1_prescaler: 2,
            apb2_prescaler: 1,
        }
    }
}

impl ClockConfig {
    pub fn sysclk_hz(&self) -> u32 {
        self.hse_hz.saturating_mul(u32::from(self.pll_multiplier))
    }

    pub fn hclk_hz(&self) -> u32 {
        self.sysclk_hz() / u32::from(self.ahb_prescaler.max(1))
    }

    pub fn pclk1_hz(&self) -> u32 {
        self.hclk_hz() / u32::from(self.apb1_prescaler.max(1))
    }

    /// Fewest flash wait states the target frequency band allows
    pub fn minimum_flash_latency(&self) -> u8 {
        match self.sysclk_hz() {
            0..=24_000_000 => 0,
            24_000_001..=48_000_000 => 1,
            _ => 2,
        }
    }

    /// Flash wait states for the target frequency band
    pub fn effective_flash_latency(&self) -> u8 {
        self.flash_latency.unwrap_or_else(|| self.minimum_flash_latency())
    }

    /// Encode into register field values, rejecting anything the RCC cannot express.
    pub fn plan(&self) -> Result<ClockPlan, ConfigError> {
        let pll_mul_bits = match self.pll_multiplier {
            2..=16 => u32::from(self.pll_multiplier - 2),
            other => return Err(ConfigError::InvalidMultiplier(other)),
        };
        let hpre_bits = ahb_bits(self.ahb_prescaler)
            .ok_or(ConfigError::InvalidPrescaler(self.ahb_prescaler))?;
        let ppre1_bits = apb_bits(self.apb1_prescaler)
            .ok_or(ConfigError::InvalidPrescaler(u16::from(self.apb1_prescaler)))?;
        let ppre2_bits = apb_bits(self.apb2_prescaler)
            .ok_or(ConfigError::InvalidPrescaler(u16::from(self.apb2_prescaler)))?;
        if self.pclk1_hz() > APB1_MAX_HZ {
            return Err(ConfigError::Apb1TooFast(self.pclk1_hz()));
        }
        if let Some(latency) = self.flash_latency {
            let minimum = self.minimum_flash_latency();
            if latency > MAX_FLASH_LATENCY || latency < minimum {
                return Err(ConfigError::InvalidFlashLatency { latency, minimum });
            }
        }

        Ok(ClockPlan {
            pll_mul_bits,
            hpre_bits,
            ppre1_bits,
            ppre2_bits,
            flash_latency: u32::from(self.effective_flash_latency()),
            startup_timeout: self.startup_timeout,
            sysclk_hz: self.sysclk_hz(),
        })
    }
}

fn ahb_bits(divisor: u16) -> Option<u32> {
    match divisor {
        1 => Some(0b0000),
        2 => Some(0b1000),
        4 => Some(0b1001),
        8 => Some(0b1010),
        16 => Some(0b1011),
        64 => Some(0b1100),
        128 => Some(0b1101),
        256 => Some(0b1110),
        512 => Some(0b1111),
        _ => None,
    }
}

fn apb_bits(divisor: u8) -> Option<u32> {
    match divisor {
        1 => Some(0b000),
        2 => Some(0b100),
        4 => Some(0b101),
        8 => Some(0b110),
        16 => Some(0b111),
        _ => None,
    }
}

/// Register field values for one bring-up, already validated.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ClockPlan {
    pll_mul_bits: u32,
    hpre_bits: u32,
    ppre1_bits: u32,
    ppre2_bits: u32,
    flash_latency: u32,
    startup_timeout: u32,
    sysclk_hz: u32,
}

impl Default for ClockPlan {
    /// 8 MHz crystal, PLL x9 = 72 MHz, two wait states, APB1 /2.
    fn default() -> Self {
        Self {
            pll_mul_bits: 0x07,
            hpre_bits: 0b0000,
            ppre1_bits: 0b100,
            ppre2_bits: 0b000,
            flash_latency: 2,
            startup_timeout: DEFAULT_STARTUP_TIMEOUT,
            sysclk_hz: 72_000_000,
        }
    }
}

impl ClockPlan {
    pub fn sysclk_hz(&self) -> u32 {
        self.sysclk_hz
    }
}

/// Walks the clock tree from the reset default to the PLL.
pub struct ClockSequencer<'r, R: ControlRegisters + ?Sized> {
    regs: &'r mut R,
    plan: ClockPlan,
    state: ClockState,
}

impl<'r, R: ControlRegisters + ?Sized> ClockSequencer<'r, R> {
    pub fn new(regs: &'r mut R, plan: ClockPlan) -> Self {
        Self {
            regs,
            plan,
            state: ClockState::Default,
        }
    }

    pub fn state(&self) -> ClockState {
        self.state
    }

    /// Run the full sequence. Returns only after the switch to the PLL is
    /// confirmed, or after rolling back on a timeout.
    pub fn bring_up(&mut self) -> Result<(), ClockError> {
        self.start_crystal()?;
        self.start_multiplier()?;
        self.switch_to_multiplier();
        Ok(())
    }

    fn start_crystal(&mut self) -> Result<(), ClockError> {
        self.state = ClockState::CrystalStarting;
        self.regs.set_bits(ControlReg::RccCr, rcc::CR_HSEON);

        if !self.wait_ready(rcc::CR_HSERDY) {
            self.regs.clear_bits(ControlReg::RccCr, rcc::CR_HSEON);
            self.state = ClockState::CrystalFailed;
            log(LogCategory::Clock, LogLevel::Error, || {
                format!(
                    "HSE not ready after {} polls, oscillator disabled",
                    self.plan.startup_timeout
                )
            });
            return Err(ClockError::CrystalTimeout);
        }

        self.state = ClockState::CrystalReady;
        log(LogCategory::Clock, LogLevel::Debug, || "HSE ready".to_string());
        Ok(())
    }

    fn start_multiplier(&mut self) -> Result<(), ClockError> {
        self.regs.modify(
            ControlReg::RccCfgr,
            rcc::CFGR_PLLMULL_MASK | rcc::CFGR_PLLSRC,
            (self.plan.pll_mul_bits << rcc::CFGR_PLLMULL_POS) | rcc::CFGR_PLLSRC,
        );
        self.state = ClockState::MultiplierStarting;
        self.regs.set_bits(ControlReg::RccCr, rcc::CR_PLLON);

        if !self.wait_ready(rcc::CR_PLLRDY) {
            self.regs
                .clear_bits(ControlReg::RccCr, rcc::CR_PLLON | rcc::CR_HSEON);
            self.state = ClockState::MultiplierFailed;
            log(LogCategory::Clock, LogLevel::Error, || {
                format!(
                    "PLL not locked after {} polls, PLL and HSE disabled",
                    self.plan.startup_timeout
                )
            });
            return Err(ClockError::MultiplierTimeout);
        }

        self.state = ClockState::MultiplierReady;
        log(LogCategory::Clock, LogLevel::Debug, || "PLL locked".to_string());
        Ok(())
    }

    fn switch_to_multiplier(&mut self) {
        self.regs.modify(
            ControlReg::FlashAcr,
            flash::ACR_LATENCY_MASK,
            self.plan.flash_latency,
        );
        self.regs.modify(
            ControlReg::RccCfgr,
            rcc::CFGR_HPRE_MASK | rcc::CFGR_PPRE1_MASK | rcc::CFGR_PPRE2_MASK,
            (self.plan.hpre_bits << rcc::CFGR_HPRE_POS)
                | (self.plan.ppre1_bits << rcc::CFGR_PPRE1_POS)
                | (self.plan.ppre2_bits << rcc::CFGR_PPRE2_POS),
        );
        self.regs
            .modify(ControlReg::RccCfgr, rcc::CFGR_SW_MASK, rcc::CFGR_SW_PLL);

        // The switch itself cannot fail once the PLL is locked.
        while self.regs.read_reg(ControlReg::RccCfgr) & rcc::CFGR_SWS_MASK
            != rcc::CFGR_SW_PLL << rcc::CFGR_SWS_POS
        {
            std::hint::spin_loop();
        }

        self.regs.clear_bits(ControlReg::RccCr, rcc::CR_HSION);
        self.state = ClockState::Switched;
        log(LogCategory::Clock, LogLevel::Info, || {
            format!("SYSCLK from PLL at {} Hz, HSI off", self.plan.sysclk_hz)
        });
    }

    fn wait_ready(&self, flag: u32) -> bool {
        (0..=self.plan.startup_timeout).any(|_| self.regs.read_reg(ControlReg::RccCr) & flag != 0)
    }
}

/// Bring the reference clock tree up (8 MHz crystal, 72 MHz core).
pub fn bring_up_clock<R: ControlRegisters + ?Sized>(regs: &mut R) -> Result<(), ClockError> {
    ClockSequencer::new(regs, ClockPlan::default()).bring_up()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sim::{ReadyAfter, SimControl};

    #[test]
    fn test_default_plan_matches_reference_encoding() {
        let plan = ClockConfig::default().plan().unwrap();
        assert_eq!(plan, ClockPlan::default());
        assert_eq!(plan.sysclk_hz(), 72_000_000);
    }

    #[test]
    fn test_successful_bring_up() {
        let mut regs = SimControl::new(ReadyAfter::Polls(10), ReadyAfter::Polls(20));
        let mut seq = ClockSequencer::new(&mut regs, ClockPlan::default());

        assert_eq!(seq.state(), ClockState::Default);
        assert!(seq.bring_up().is_ok());
        assert_eq!(seq.state(), ClockState::Switched);

        assert!(regs.hse_enabled());
        assert!(regs.pll_enabled());
        assert!(!regs.hsi_enabled());
        assert!(regs.running_from_pll());

        let cfgr = regs.read_reg(ControlReg::RccCfgr);
        assert_eq!((cfgr & rcc::CFGR_PLLMULL_MASK) >> rcc::CFGR_PLLMULL_POS, 0x07);
        assert_ne!(cfgr & rcc::CFGR_PLLSRC, 0);
        assert_eq!((cfgr & rcc::CFGR_PPRE1_MASK) >> rcc::CFGR_PPRE1_POS, 0b100);
        assert_eq!(regs.read_reg(ControlReg::FlashAcr) & flash::ACR_LATENCY_MASK, 2);
    }

    #[test]
    fn test_crystal_timeout_rolls_back() {
        let mut regs = SimControl::new(ReadyAfter::Never, ReadyAfter::Immediately);
        let mut seq = ClockSequencer::new(&mut regs, ClockPlan::default());

        assert_eq!(seq.bring_up(), Err(ClockError::CrystalTimeout));
        assert_eq!(seq.state(), ClockState::CrystalFailed);

        assert!(!regs.hse_enabled());
        assert!(!regs.pll_enabled());
        assert!(regs.hsi_enabled());
        assert!(!regs.running_from_pll());
    }

    #[test]
    fn test_multiplier_timeout_rolls_back_both() {
        let mut regs = SimControl::new(ReadyAfter::Immediately, ReadyAfter::Never);
        assert_eq!(bring_up_clock(&mut regs), Err(ClockError::MultiplierTimeout));

        assert!(!regs.hse_enabled());
        assert!(!regs.pll_enabled());
        assert!(regs.hsi_enabled());
        assert!(!regs.running_from_pll());
    }

    #[test]
    fn test_timeout_is_a_poll_count() {
        // A ceiling of 16 allows 17 reads: ready on the 17th is in time,
        // ready on the 18th is not
        let config = ClockConfig {
            startup_timeout: 16,
            ..ClockConfig::default()
        };
        let mut late = SimControl::new(ReadyAfter::Polls(17), ReadyAfter::Immediately);
        let mut seq = ClockSequencer::new(&mut late, config.plan().unwrap());
        assert_eq!(seq.bring_up(), Err(ClockError::CrystalTimeout));

        let mut in_time = SimControl::new(ReadyAfter::Polls(16), ReadyAfter::Immediately);
        let mut seq = ClockSequencer::new(&mut in_time, config.plan().unwrap());
        assert!(seq.bring_up().is_ok());
    }

    #[test]
    fn test_error_codes_are_distinct() {
        assert_eq!(ClockError::CrystalTimeout.code(), 1);
        assert_eq!(ClockError::MultiplierTimeout.code(), 2);
    }

    #[test]
    fn test_flash_latency_bands() {
        let slow = ClockConfig {
            pll_multiplier: 3,
            ..ClockConfig::default()
        };
        assert_eq!(slow.effective_flash_latency(), 0);

        let mid = ClockConfig {
            pll_multiplier: 6,
            ..ClockConfig::default()
        };
        assert_eq!(mid.effective_flash_latency(), 1);
        assert_eq!(ClockConfig::default().effective_flash_latency(), 2);
    }

    #[test]
    fn test_plan_rejects_bad_settings() {
        let bad_mul = ClockConfig {
            pll_multiplier: 17,
            ..ClockConfig::default()
        };
        assert!(matches!(bad_mul.plan(), Err(ConfigError::InvalidMultiplier(17))));

        let bad_div = ClockConfig {
            ahb_prescaler: 3,
            ..ClockConfig::default()
        };
        assert!(matches!(bad_div.plan(), Err(ConfigError::InvalidPrescaler(3))));

        let fast_apb1 = ClockConfig {
            apb1_prescaler: 1,
            ..ClockConfig::default()
        };
        assert!(matches!(fast_apb1.plan(), Err(ConfigError::Apb1TooFast(72_000_000))));

        // LATENCY is a 3-bit field but only 0..=2 are defined
        let spills = ClockConfig {
            flash_latency: Some(8),
            ..ClockConfig::default()
        };
        assert!(matches!(
            spills.plan(),
            Err(ConfigError::InvalidFlashLatency { latency: 8, minimum: 2 })
        ));

        let too_few = ClockConfig {
            flash_latency: Some(0),
            ..ClockConfig::default()
        };
        assert!(matches!(
            too_few.plan(),
            Err(ConfigError::InvalidFlashLatency { latency: 0, minimum: 2 })
        ));

        let slow_but_safe = ClockConfig {
            pll_multiplier: 3,
            flash_latency: Some(1),
            ..ClockConfig::default()
        };
        assert!(slow_but_safe.plan().is_ok());
        let exact = ClockConfig {
            flash_latency: Some(2),
            ..ClockConfig::default()
        };
        assert_eq!(exact.plan().unwrap(), ClockPlan::default());
    }
}
