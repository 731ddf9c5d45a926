use anyhow::{Context, Result};
use clap::{Parser, ValueEnum};
use rom_emu_core::config::{BusRevision, EmulatorConfig};
use rom_emu_core::logging::{LogConfig, LogLevel};
use std::fs::{self, File};
use std::io::Write;
use std::path::PathBuf;

mod replay;

use replay::{replay, ClockFaults};

#[derive(Debug, Clone, Copy, ValueEnum)]
enum Revision {
    PinMode,
    Transceiver,
}

impl From<Revision> for BusRevision {
    fn from(revision: Revision) -> Self {
        match revision {
            Revision::PinMode => BusRevision::PinMode,
            Revision::Transceiver => BusRevision::Transceiver,
        }
    }
}

/// Boot the ROM emulator on simulated registers and replay host read cycles.
#[derive(Parser)]
#[command(name = "rom-emu")]
struct Args {
    /// ROM image to serve
    image: PathBuf,

    /// Emulator configuration (JSON); missing fields take defaults
    #[arg(long)]
    config: Option<PathBuf>,

    /// Base address of the image (e.g. 0x8000)
    #[arg(long, value_parser = parse_u16)]
    base: Option<u16>,

    /// Byte served for unmapped addresses
    #[arg(long, value_parser = parse_u8)]
    default_byte: Option<u8>,

    /// Board revision
    #[arg(long, value_enum)]
    revision: Option<Revision>,

    /// First address to replay (default: 16 below the image)
    #[arg(long, value_parser = parse_u16)]
    from: Option<u16>,

    /// Last address to replay, inclusive (default: 16 past the image)
    #[arg(long, value_parser = parse_u16)]
    to: Option<u16>,

    /// Crystal start attempts that fail before it comes up
    #[arg(long, default_value_t = 0)]
    crystal_fails: u32,

    /// PLL start attempts that fail before it locks
    #[arg(long, default_value_t = 0)]
    pll_fails: u32,

    /// Write the replay report to this file as JSON
    #[arg(long, default_value = "report.json")]
    report: PathBuf,

    /// off, error, warn, info, debug or trace
    #[arg(long, default_value = "info")]
    log_level: String,
}

fn parse_number(s: &str) -> Result<u32, String> {
    let parsed = match s.strip_prefix("0x").or_else(|| s.strip_prefix("0X")) {
        Some(hex) => u32::from_str_radix(hex, 16),
        None => s.parse(),
    };
    parsed.map_err(|e| format!("invalid number '{}': {}", s, e))
}

fn parse_u16(s: &str) -> Result<u16, String> {
    let value = parse_number(s)?;
    u16::try_from(value).map_err(|_| format!("{} does not fit in 16 bits", s))
}

fn parse_u8(s: &str) -> Result<u8, String> {
    let value = parse_number(s)?;
    u8::try_from(value).map_err(|_| format!("{} does not fit in 8 bits", s))
}

/// `log` level a core message is forwarded at; `Off` is never emitted.
fn facade_level(level: LogLevel) -> Option<log::Level> {
    match level {
        LogLevel::Off => None,
        LogLevel::Error => Some(log::Level::Error),
        LogLevel::Warn => Some(log::Level::Warn),
        LogLevel::Info => Some(log::Level::Info),
        LogLevel::Debug => Some(log::Level::Debug),
        LogLevel::Trace => Some(log::Level::Trace),
    }
}

fn forward_core_message(level: LogLevel, message: &str) {
    if let Some(level) = facade_level(level) {
        log::log!(target: "rom_emu_core", level, "{}", message);
    }
}

fn load_config(args: &Args) -> Result<EmulatorConfig> {
    let mut config = match &args.config {
        Some(path) => {
            let json = fs::read_to_string(path)
                .with_context(|| format!("Reading config {}", path.display()))?;
            EmulatorConfig::from_json(&json)?
        }
        None => EmulatorConfig::default(),
    };
    if let Some(base) = args.base {
        config.base_address = base;
    }
    if let Some(byte) = args.default_byte {
        config.default_byte = byte;
    }
    if let Some(revision) = args.revision {
        config.revision = revision.into();
    }
    config.validate()?;
    Ok(config)
}

fn main() -> Result<()> {
    let args = Args::parse();
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(&args.log_level))
        .init();

    // Route the engine's boot logging through the `log` facade.
    let level = LogLevel::from_str(&args.log_level)
        .with_context(|| format!("Unknown log level: {}", args.log_level))?;
    let core_log = LogConfig::global();
    core_log.set_global_level(level);
    core_log.set_sink(forward_core_message);

    let config = load_config(&args)?;
    let rom = fs::read(&args.image)
        .with_context(|| format!("Reading image {}", args.image.display()))?;

    let range = match (args.from, args.to) {
        (None, None) => None,
        (from, to) => Some((from.unwrap_or(0), to.unwrap_or(0xFFFF))),
    };
    let faults = ClockFaults {
        crystal_fails: args.crystal_fails,
        pll_fails: args.pll_fails,
    };

    let report = replay(&rom, &config, range, faults)?;

    let mut f = File::create(&args.report)?;
    write!(f, "{}", serde_json::to_string_pretty(&report)?)?;

    println!(
        "{} cycles, {} mismatches, {} contentions, report in {}",
        report.cycles.len(),
        report.mismatches,
        report.contentions,
        args.report.display()
    );
    if !report.passed() {
        anyhow::bail!(
            "Replay failed: {} mismatches, {} contentions",
            report.mismatches,
            report.contentions
        );
    }

    Ok(())
}
