//! One-time bus-line configuration.
//!
//! Puts every pin the engine uses into its electrical mode before the poll
//! loop starts. The loop never re-checks these modes.

use crate::config::{BusRevision, EmulatorConfig};
use crate::drive::{BusDriver, PinModeDriver};
use crate::logging::{log, LogCategory, LogLevel};
use crate::registers::{
    afio, configure_pin, pin_config, rcc, ControlReg, ControlRegisters, GpioReg, GpioRegisters,
};

/// Clock the three GPIO ports and the alternate-function block.
pub fn enable_port_clocks<C: ControlRegisters + ?Sized>(ctrl: &mut C) {
    ctrl.set_bits(
        ControlReg::RccApb2enr,
        rcc::APB2ENR_IOPAEN | rcc::APB2ENR_IOPBEN | rcc::APB2ENR_IOPCEN | rcc::APB2ENR_AFIOEN,
    );
}

/// Turn JTAG off (SWD stays) so PB3, PB4 and PA15 become plain GPIO.
pub fn disable_jtag<C: ControlRegisters + ?Sized>(ctrl: &mut C) {
    ctrl.modify(
        ControlReg::AfioMapr,
        afio::MAPR_SWJ_CFG_MASK,
        afio::MAPR_SWJ_CFG_JTAGDISABLE,
    );
}

/// Selector outputs, segment and strobe inputs, data bus released.
pub fn configure_bus_lines<G: GpioRegisters + ?Sized>(gpio: &mut G, config: &EmulatorConfig) {
    let pins = &config.pins;

    for pin in pins.selector_shift..pins.selector_shift + 2 {
        configure_pin(gpio, pins.selector_port, pin, pin_config::OUTPUT_PUSH_PULL);
    }
    for pin in pins.segment_shift..pins.segment_shift + 4 {
        configure_pin(gpio, pins.segment_port, pin, pin_config::INPUT_FLOATING);
    }

    // Pulled up: a disconnected host reads as an inactive window.
    for pin in [pins.address_valid_bit, pins.read_bit] {
        configure_pin(gpio, pins.strobe_port, pin, pin_config::INPUT_PULL);
    }
    gpio.write_port(pins.strobe_port, GpioReg::Bsrr, pins.strobe_mask());

    match config.revision {
        BusRevision::PinMode => {
            PinModeDriver::new(pins, config.release_mode).release(gpio);
        }
        BusRevision::Transceiver => {
            // Latch EZ high (disabled) and SED high (towards the host)
            // before the control pins become outputs.
            gpio.write_port(
                pins.transceiver_port,
                GpioReg::Bsrr,
                pins.enable_mask() | pins.direction_mask(),
            );
            configure_pin(gpio, pins.transceiver_port, pins.enable_bit, pin_config::OUTPUT_PUSH_PULL);
            configure_pin(
                gpio,
                pins.transceiver_port,
                pins.direction_bit,
                pin_config::OUTPUT_PUSH_PULL,
            );
            gpio.write_port(
                pins.data_port,
                pins.data_config_reg(),
                pin_config::all_pins(pin_config::OUTPUT_PUSH_PULL),
            );
        }
    }

    log(LogCategory::Bus, LogLevel::Info, || {
        format!(
            "Bus lines configured for {:?} revision, data bus released",
            config.revision
        )
    });
}
