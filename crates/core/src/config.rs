//! Build-time configuration of the emulated ROM window and the board revision.
//!
//! Serialized as JSON so the same description feeds the firmware build and
//! the host-side simulator.

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::clock::ClockConfig;
use crate::logging::{log, LogCategory, LogLevel};
use crate::pins::PinMap;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Invalid configuration JSON: {0}")]
    Json(#[from] serde_json::Error),
    #[error("Invalid pin map: {0}")]
    InvalidPinMap(String),
    #[error("PLL multiplier {0} outside 2..=16")]
    InvalidMultiplier(u8),
    #[error("Prescaler /{0} not supported")]
    InvalidPrescaler(u16),
    #[error("APB1 clock {0} Hz exceeds 36 MHz")]
    Apb1TooFast(u32),
    #[error("Flash latency {latency} outside {minimum}..=2 for the configured SYSCLK")]
    InvalidFlashLatency { latency: u8, minimum: u8 },
}

/// How the data bus is handed back to the host.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum BusRevision {
    /// Data pins switch between output and input mode
    #[default]
    PinMode,
    /// Data pins stay outputs behind a bus transceiver with an enable line
    Transceiver,
}

/// Electrical state of the data pins while released (pin-mode revision only).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ReleaseMode {
    /// Input with pull-down
    #[default]
    PulledInput,
    /// Open-drain output latched high (not sinking)
    OpenDrainIdle,
}

/// Everything that differs between builds of the emulator.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct EmulatorConfig {
    /// First host address served from the image
    pub base_address: u16,
    /// Byte driven for addresses outside the image
    pub default_byte: u8,
    pub revision: BusRevision,
    pub release_mode: ReleaseMode,
    pub pins: PinMap,
    pub clock: ClockConfig,
    /// Delay between clock bring-up and the first poll, expected by the host
    pub settle_delay_ms: u32,
    /// Clock bring-up retries; `None` retries forever
    pub clock_retries: Option<u32>,
}

impl Default for EmulatorConfig {
    fn default() -> Self {
        Self {
            base_address: 0x8000,
            default_byte: 0xFF,
            revision: BusRevision::PinMode,
            release_mode: ReleaseMode::PulledInput,
            pins: PinMap::default(),
            clock: ClockConfig::default(),
            settle_delay_ms: 300,
            clock_retries: Some(3),
        }
    }
}

impl EmulatorConfig {
    /// Parse and validate a JSON description. Missing fields take defaults.
    pub fn from_json(json: &str) -> Result<Self, ConfigError> {
        let config: EmulatorConfig = serde_json::from_str(json)?;
        config.validate()?;
        log(LogCategory::Config, LogLevel::Info, || {
            format!(
                "Loaded config: base={:04X} default={:02X} revision={:?}",
                config.base_address, config.default_byte, config.revision
            )
        });
        Ok(config)
    }

    pub fn to_json(&self) -> Result<String, ConfigError> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        self.pins.validate()?;
        self.clock.plan()?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::registers::Port;

    #[test]
    fn test_defaults_are_valid() {
        let config = EmulatorConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.clock.sysclk_hz(), 72_000_000);
    }

    #[test]
    fn test_partial_json_takes_defaults() {
        let config = EmulatorConfig::from_json(
            r#"{ "base_address": 40960, "default_byte": 17, "revision": "transceiver" }"#,
        )
        .unwrap();

        assert_eq!(config.base_address, 0xA000);
        assert_eq!(config.default_byte, 0x11);
        assert_eq!(config.revision, BusRevision::Transceiver);
        assert_eq!(config.release_mode, ReleaseMode::PulledInput);
        assert_eq!(config.pins, PinMap::default());
        assert_eq!(config.settle_delay_ms, 300);
    }

    #[test]
    fn test_nested_overrides() {
        let config = EmulatorConfig::from_json(
            r#"{
                "release_mode": "open-drain-idle",
                "pins": { "segment_port": "C" },
                "clock": { "pll_multiplier": 6 },
                "clock_retries": null
            }"#,
        )
        .unwrap();

        assert_eq!(config.release_mode, ReleaseMode::OpenDrainIdle);
        assert_eq!(config.pins.segment_port, Port::C);
        assert_eq!(config.pins.selector_shift, 3);
        assert_eq!(config.clock.sysclk_hz(), 48_000_000);
        assert_eq!(config.clock_retries, None);
    }

    #[test]
    fn test_json_roundtrip() {
        let config = EmulatorConfig {
            default_byte: 0x77,
            revision: BusRevision::Transceiver,
            ..EmulatorConfig::default()
        };
        let json = config.to_json().unwrap();
        assert_eq!(EmulatorConfig::from_json(&json).unwrap(), config);
    }

    #[test]
    fn test_invalid_json_is_reported() {
        assert!(matches!(
            EmulatorConfig::from_json("{ not json"),
            Err(ConfigError::Json(_))
        ));
    }

    #[test]
    fn test_invalid_clock_is_rejected() {
        let result = EmulatorConfig::from_json(r#"{ "clock": { "pll_multiplier": 1 } }"#);
        assert!(matches!(result, Err(ConfigError::InvalidMultiplier(1))));
    }
}
