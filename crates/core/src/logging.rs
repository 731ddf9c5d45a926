//! Centralized logging configuration for the emulator engine.
//!
//! Logging is a boot-time facility only. Nothing on the poll-loop hot path
//! calls [`log`]: a single formatted line costs far more than the host's
//! bus-timing budget.
//!
//! # Architecture
//!
//! - **LogConfig**: process-wide configuration stored in atomics
//! - **LogLevel**: hierarchical levels (Off < Error < Warn < Info < Debug < Trace)
//! - **LogCategory**: Clock, Bus, Config, Boot
//! - **log()**: lazily formatted output, the closure only runs when enabled
//!
//! # Usage
//!
//! ```rust
//! use rom_emu_core::logging::{log, LogCategory, LogLevel};
//!
//! log(LogCategory::Clock, LogLevel::Info, || {
//!     format!("Clock: switched to PLL at {} Hz", 72_000_000)
//! });
//! ```

use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::{Mutex, OnceLock};

/// Log level for controlling verbosity
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
#[repr(u8)]
pub enum LogLevel {
    Off = 0,
    Error = 1,
    Warn = 2,
    Info = 3,
    Debug = 4,
    Trace = 5,
}

impl LogLevel {
    /// Parse log level from string (case-insensitive)
    #[allow(clippy::should_implement_trait)]
    pub fn from_str(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "off" | "0" => Some(LogLevel::Off),
            "error" | "err" | "1" => Some(LogLevel::Error),
            "warn" | "warning" | "2" => Some(LogLevel::Warn),
            "info" | "3" => Some(LogLevel::Info),
            "debug" | "4" => Some(LogLevel::Debug),
            "trace" | "5" => Some(LogLevel::Trace),
            _ => None,
        }
    }

    fn from_u8(val: u8) -> Self {
        match val {
            1 => LogLevel::Error,
            2 => LogLevel::Warn,
            3 => LogLevel::Info,
            4 => LogLevel::Debug,
            5 => LogLevel::Trace,
            _ => LogLevel::Off,
        }
    }
}

/// Log category for the engine's components
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum LogCategory {
    /// Clock bring-up (crystal, PLL, switch-over)
    Clock,
    /// Bus-line configuration and data bus ownership changes
    Bus,
    /// Configuration loading and validation
    Config,
    /// Boot sequence
    Boot,
}

impl LogCategory {
    pub const ALL: [LogCategory; 4] = [
        LogCategory::Clock,
        LogCategory::Bus,
        LogCategory::Config,
        LogCategory::Boot,
    ];

    fn index(self) -> usize {
        match self {
            LogCategory::Clock => 0,
            LogCategory::Bus => 1,
            LogCategory::Config => 2,
            LogCategory::Boot => 3,
        }
    }
}

type Sink = Box<dyn Fn(LogLevel, &str) + Send + Sync>;

/// Global logging configuration
pub struct LogConfig {
    /// Applies to every category without its own level
    global_level: AtomicU8,
    /// Per-category overrides, `Off` means "use global"
    category_levels: [AtomicU8; 4],
    /// Replacement for stderr output (tools capture boot logs through this)
    sink: Mutex<Option<Sink>>,
}

impl LogConfig {
    fn new() -> Self {
        Self {
            global_level: AtomicU8::new(LogLevel::Off as u8),
            category_levels: [
                AtomicU8::new(LogLevel::Off as u8),
                AtomicU8::new(LogLevel::Off as u8),
                AtomicU8::new(LogLevel::Off as u8),
                AtomicU8::new(LogLevel::Off as u8),
            ],
            sink: Mutex::new(None),
        }
    }

    /// Get the global singleton instance
    pub fn global() -> &'static Self {
        static INSTANCE: OnceLock<LogConfig> = OnceLock::new();
        INSTANCE.get_or_init(LogConfig::new)
    }

    pub fn set_global_level(&self, level: LogLevel) {
        self.global_level.store(level as u8, Ordering::Relaxed);
    }

    pub fn get_global_level(&self) -> LogLevel {
        LogLevel::from_u8(self.global_level.load(Ordering::Relaxed))
    }

    pub fn set_level(&self, category: LogCategory, level: LogLevel) {
        self.category_levels[category.index()].store(level as u8, Ordering::Relaxed);
    }

    pub fn get_level(&self, category: LogCategory) -> LogLevel {
        LogLevel::from_u8(self.category_levels[category.index()].load(Ordering::Relaxed))
    }

    /// A category-specific level wins; `Off` falls back to the global level.
    pub fn should_log(&self, category: LogCategory, level: LogLevel) -> bool {
        if level == LogLevel::Off {
            return false;
        }
        let category_level = self.get_level(category);
        if category_level != LogLevel::Off {
            level <= category_level
        } else {
            level <= self.get_global_level()
        }
    }

    /// Reset all logging to Off and drop any installed sink
    pub fn reset(&self) {
        self.set_global_level(LogLevel::Off);
        for category in LogCategory::ALL {
            self.set_level(category, LogLevel::Off);
        }
        self.clear_sink();
    }

    /// Route messages to `sink` instead of stderr. The sink sees each
    /// message's level so it can keep errors apart from chatter.
    pub fn set_sink<F>(&self, sink: F)
    where
        F: Fn(LogLevel, &str) + Send + Sync + 'static,
    {
        if let Ok(mut slot) = self.sink.lock() {
            *slot = Some(Box::new(sink));
        }
    }

    pub fn clear_sink(&self) {
        if let Ok(mut slot) = self.sink.lock() {
            *slot = None;
        }
    }

    fn write_message(&self, level: LogLevel, message: &str) {
        match self.sink.lock() {
            Ok(slot) => match slot.as_ref() {
                Some(sink) => sink(level, message),
                None => eprintln!("{}", message),
            },
            Err(_) => eprintln!("{}", message),
        }
    }
}

/// Log a message with the specified category and level.
///
/// The message closure is only evaluated when the category/level pair is
/// enabled, so disabled logging costs two atomic loads.
pub fn log<F>(category: LogCategory, level: LogLevel, message_fn: F)
where
    F: FnOnce() -> String,
{
    let config = LogConfig::global();
    if config.should_log(category, level) {
        let message = format!("[{:?}] {}", category, message_fn());
        config.write_message(level, &message);
    }
}
