//! Multiplexed address capture.
//!
//! The host's 16 address lines reach the microcontroller through a pair of
//! 4-bit multiplexers. A 2-bit selector picks which nibble is presented on
//! the 4 segment lines:
//!
//! ```text
//! selector 00 -> A0..A3
//! selector 01 -> A4..A7
//! selector 10 -> A8..A11
//! selector 11 -> A12..A15
//! ```
//!
//! The multiplexers settle within the latency of the selector store, so the
//! segment lines are sampled immediately after each selector write. Any
//! extra delay, or any other write to the selector's port slipping in
//! between, corrupts the nibble being read.

use crate::pins::PinMap;
use crate::registers::{bsrr_word, GpioReg, GpioRegisters, Port};

/// Selector values in capture order, low nibble first
pub const SELECTOR_SEQUENCE: [u32; 4] = [0b00, 0b01, 0b10, 0b11];

/// Precomputed register values for one capture.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AddressCapture {
    selector_port: Port,
    /// One BSRR word per selector value
    selector_words: [u32; 4],
    segment_port: Port,
    segment_shift: u32,
}

impl AddressCapture {
    pub fn new(pins: &PinMap) -> Self {
        let mask = pins.selector_mask();
        let shift = u32::from(pins.selector_shift);
        let mut selector_words = [0; 4];
        for (word, selector) in selector_words.iter_mut().zip(SELECTOR_SEQUENCE) {
            *word = bsrr_word(mask, selector << shift);
        }

        Self {
            selector_port: pins.selector_port,
            selector_words,
            segment_port: pins.segment_port,
            segment_shift: u32::from(pins.segment_shift),
        }
    }

    /// Walk the selector through 00, 01, 10, 11 and assemble the address.
    ///
    /// Only meaningful while the host holds the address-valid strobe; at any
    /// other time the result is whatever happens to be on the lines.
    #[inline(always)]
    pub fn capture<G: GpioRegisters + ?Sized>(&self, gpio: &mut G) -> u16 {
        let mut address = 0u16;
        for (segment, &word) in self.selector_words.iter().enumerate() {
            gpio.write_port(self.selector_port, GpioReg::Bsrr, word);
            let lines = gpio.read_port(self.segment_port, GpioReg::Idr);
            let nibble = ((lines >> self.segment_shift) & 0xF) as u16;
            address |= nibble << (segment * 4);
        }
        address
    }
}

/// One-shot capture with the given wiring.
pub fn capture_address<G: GpioRegisters + ?Sized>(gpio: &mut G, pins: &PinMap) -> u16 {
    AddressCapture::new(pins).capture(gpio)
}
