//! Board wiring between the microcontroller and the host bus.

use serde::{Deserialize, Serialize};

use crate::config::ConfigError;
use crate::registers::{GpioReg, Port};

/// Where every bus signal lands on the microcontroller's GPIO ports.
///
/// The default is the reference board:
///
/// ```text
/// PB3..PB4   segment selector (2 bits, push-pull outputs)
/// PA8..PA11  address segment lines (4 bits, floating inputs)
/// PB6        /32K  address window valid (active low)
/// PB7        /RD   read cycle (active low)
/// PB8..PB15  data bus D0..D7
/// PB0        EZ    transceiver enable (active low)
/// PB1        SED   transceiver direction (high = towards the host)
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PinMap {
    pub selector_port: Port,
    pub selector_shift: u8,
    pub segment_port: Port,
    pub segment_shift: u8,
    pub strobe_port: Port,
    pub address_valid_bit: u8,
    pub read_bit: u8,
    pub data_port: Port,
    /// Must be 0 or 8 so the data bus fills exactly one of CRL/CRH
    pub data_shift: u8,
    pub transceiver_port: Port,
    pub enable_bit: u8,
    pub direction_bit: u8,
}

impl Default for PinMap {
    fn default() -> Self {
        Self {
            selector_port: Port::B,
            selector_shift: 3,
            segment_port: Port::A,
            segment_shift: 8,
            strobe_port: Port::B,
            address_valid_bit: 6,
            read_bit: 7,
            data_port: Port::B,
            data_shift: 8,
            transceiver_port: Port::B,
            enable_bit: 0,
            direction_bit: 1,
        }
    }
}

impl PinMap {
    pub fn selector_mask(&self) -> u32 {
        0b11 << self.selector_shift
    }

    pub fn segment_mask(&self) -> u32 {
        0xF << self.segment_shift
    }

    pub fn address_valid_mask(&self) -> u32 {
        1 << self.address_valid_bit
    }

    pub fn read_mask(&self) -> u32 {
        1 << self.read_bit
    }

    pub fn strobe_mask(&self) -> u32 {
        self.address_valid_mask() | self.read_mask()
    }

    pub fn data_mask(&self) -> u32 {
        0xFF << self.data_shift
    }

    pub fn enable_mask(&self) -> u32 {
        1 << self.enable_bit
    }

    pub fn direction_mask(&self) -> u32 {
        1 << self.direction_bit
    }

    /// Configuration register covering the whole data bus.
    pub fn data_config_reg(&self) -> GpioReg {
        if self.data_shift == 0 {
            GpioReg::Crl
        } else {
            GpioReg::Crh
        }
    }

    /// Reject wirings the engine cannot serve: fields out of range, a data
    /// bus straddling CRL/CRH, or two signals sharing a pin.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.selector_shift > 14 {
            return Err(invalid("selector pins run past pin 15"));
        }
        if self.segment_shift > 12 {
            return Err(invalid("address segment pins run past pin 15"));
        }
        if self.data_shift != 0 && self.data_shift != 8 {
            return Err(invalid("data bus must occupy pins 0..7 or 8..15"));
        }
        for bit in [
            self.address_valid_bit,
            self.read_bit,
            self.enable_bit,
            self.direction_bit,
        ] {
            if bit > 15 {
                return Err(invalid("single-bit signal beyond pin 15"));
            }
        }

        let signals = [
            ("selector", self.selector_port, self.selector_mask()),
            ("address segment", self.segment_port, self.segment_mask()),
            ("address valid strobe", self.strobe_port, self.address_valid_mask()),
            ("read strobe", self.strobe_port, self.read_mask()),
            ("data bus", self.data_port, self.data_mask()),
            ("transceiver enable", self.transceiver_port, self.enable_mask()),
            ("transceiver direction", self.transceiver_port, self.direction_mask()),
        ];
        for (i, (name_a, port_a, mask_a)) in signals.iter().enumerate() {
            for (name_b, port_b, mask_b) in &signals[i + 1..] {
                if port_a == port_b && mask_a & mask_b != 0 {
                    return Err(ConfigError::InvalidPinMap(format!(
                        "{} overlaps {} on port {:?}",
                        name_a, name_b, port_a
                    )));
                }
            }
        }
        Ok(())
    }
}

fn invalid(reason: &str) -> ConfigError {
    ConfigError::InvalidPinMap(reason.to_string())
}
