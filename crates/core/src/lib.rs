//! Core ROM emulation engine.
//!
//! The engine answers a legacy 8-bit host's read cycles from a memory image,
//! sharing the data bus with the host without ever contending for it. It is
//! written against the register traits in [`registers`], so the same code
//! runs on the microcontroller and against the simulated board in [`sim`].

pub mod capture;
pub mod clock;
pub mod config;
pub mod drive;
pub mod lines;
pub mod logging;
pub mod pins;
pub mod poll;
pub mod registers;
pub mod rom;
pub mod sim;

pub use capture::{capture_address, AddressCapture};
pub use clock::{bring_up_clock, ClockConfig, ClockError, ClockPlan, ClockSequencer, ClockState};
pub use config::{BusRevision, ConfigError, EmulatorConfig, ReleaseMode};
pub use drive::{AnyDriver, BusDriver, BusOwnership, PinModeDriver, TransceiverDriver};
pub use lines::{configure_bus_lines, disable_jtag, enable_port_clocks};
pub use pins::PinMap;
pub use poll::{BusSnapshot, LoopState, PollLoop};
pub use registers::{ControlReg, ControlRegisters, GpioReg, GpioRegisters, Port};
pub use rom::{ImageError, MemoryImage};
