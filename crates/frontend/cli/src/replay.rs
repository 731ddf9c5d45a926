//! Replays host read cycles against a booted, simulated board.

use anyhow::{Context, Result};
use rom_emu_core::config::{BusRevision, EmulatorConfig};
use rom_emu_core::drive::AnyDriver;
use rom_emu_core::poll::{BusSnapshot, PollLoop};
use rom_emu_core::rom::MemoryImage;
use rom_emu_core::sim::{SimControl, SimGpio};
use rom_emu_mikrosha::{boot, RecordedDelay, SimInterrupts};
use serde::Serialize;

/// Sweep margin around the image when no range is given
pub const DEFAULT_MARGIN: u32 = 16;

#[derive(Debug, Clone, Copy, Default)]
pub struct ClockFaults {
    pub crystal_fails: u32,
    pub pll_fails: u32,
}

#[derive(Debug, Clone, Serialize)]
pub struct CycleRecord {
    pub address: u16,
    pub mapped: bool,
    pub expected: u8,
    pub served: Option<u8>,
    /// Contention seen in any phase of this cycle
    pub contention: bool,
}

#[derive(Debug, Clone, Serialize)]
pub struct Report {
    pub base: u16,
    pub image_len: usize,
    pub revision: BusRevision,
    pub default_byte: u8,
    pub clock_attempts: u32,
    pub settle_delay_ms: u64,
    pub cycles: Vec<CycleRecord>,
    pub mismatches: usize,
    pub contentions: usize,
    pub final_state: BusSnapshot,
}

impl Report {
    pub fn passed(&self) -> bool {
        self.mismatches == 0 && self.contentions == 0
    }
}

/// `[base - margin, end - 1 + margin]`, clamped to the address space.
pub fn default_range(image: &MemoryImage<'_>) -> (u16, u16) {
    let from = u32::from(image.base()).saturating_sub(DEFAULT_MARGIN);
    let to = (image.end() - 1 + DEFAULT_MARGIN).min(0xFFFF);
    (from as u16, to as u16)
}

/// One host read cycle at `address`: address phase (`/32K` only), read phase
/// (`/32K` and `/RD`), then both strobes released. Returns the byte the host
/// sampled and whether any phase saw contention.
///
/// The bank's write history is dropped first, so it only ever covers the
/// current cycle however long the sweep runs.
fn read_cycle(poll: &mut PollLoop<'_, SimGpio, AnyDriver>, address: u16) -> (Option<u8>, bool) {
    poll.gpio_mut().clear_history();
    poll.gpio_mut().set_address(address);

    poll.gpio_mut().set_strobes(true, false);
    poll.step();
    let mut contention = poll.gpio().contention();

    poll.gpio_mut().set_strobes(true, true);
    poll.step();
    let served = poll.gpio().host_sample();
    contention |= poll.gpio().contention();

    poll.gpio_mut().set_strobes(false, false);
    poll.step();
    contention |= poll.gpio().contention();

    (served, contention)
}

/// Boot against simulated registers, then run one read cycle per address in
/// `from..=to`.
pub fn replay(
    rom: &[u8],
    config: &EmulatorConfig,
    range: Option<(u16, u16)>,
    faults: ClockFaults,
) -> Result<Report> {
    let image = MemoryImage::new(config.base_address, rom).context("Invalid ROM image")?;
    let (from, to) = range.unwrap_or_else(|| default_range(&image));
    anyhow::ensure!(from <= to, "Empty address range {:04X}..={:04X}", from, to);

    let mut ctrl = SimControl::flaky(faults.crystal_fails, faults.pll_fails);
    let gpio = SimGpio::new(config.pins, config.revision == BusRevision::Transceiver);
    let mut delay = RecordedDelay::default();
    let mut interrupts = SimInterrupts::default();

    let mut poll = boot(&mut ctrl, gpio, image, config, &mut delay, &mut interrupts)
        .context("Boot failed")?;
    log::info!(
        "Booted after {} clock attempt(s), replaying {:04X}..={:04X}",
        ctrl.start_attempts().0,
        from,
        to
    );

    let mut cycles = Vec::with_capacity(usize::from(to - from) + 1);
    for address in from..=to {
        let (served, contention) = read_cycle(&mut poll, address);

        let lookup = poll.image().lookup(address);
        let expected = lookup.unwrap_or(config.default_byte);
        if served != Some(expected) {
            log::warn!(
                "{:04X}: expected {:02X}, host read {:?}",
                address,
                expected,
                served
            );
        }
        cycles.push(CycleRecord {
            address,
            mapped: lookup.is_some(),
            expected,
            served,
            contention,
        });
    }

    let mismatches = cycles
        .iter()
        .filter(|c| c.served != Some(c.expected))
        .count();
    let contentions = cycles.iter().filter(|c| c.contention).count();

    Ok(Report {
        base: config.base_address,
        image_len: rom.len(),
        revision: config.revision,
        default_byte: config.default_byte,
        clock_attempts: ctrl.start_attempts().0,
        settle_delay_ms: delay.total_ms(),
        cycles,
        mismatches,
        contentions,
        final_state: poll.snapshot(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use rom_emu_core::drive::BusOwnership;
    use rom_emu_core::sim::ReadyAfter;

    const ROM: [u8; 5] = [0x55, 0x00, 0xFF, 0x01, 0x20];

    #[test]
    fn test_default_range_has_margin() {
        let image = MemoryImage::new(0x8000, &ROM).unwrap();
        assert_eq!(default_range(&image), (0x7FF0, 0x8014));

        let low = MemoryImage::new(0x0004, &ROM).unwrap();
        assert_eq!(default_range(&low), (0x0000, 0x0018));

        let top = [0u8; 4];
        let high = MemoryImage::new(0xFFFC, &top).unwrap();
        assert_eq!(default_range(&high), (0xFFEC, 0xFFFF));
    }

    #[test]
    fn test_write_history_covers_one_cycle() {
        let config = EmulatorConfig::default();
        let mut ctrl = SimControl::new(ReadyAfter::Immediately, ReadyAfter::Immediately);
        let gpio = SimGpio::new(config.pins, false);
        let image = MemoryImage::new(config.base_address, &ROM).unwrap();
        let mut poll = boot(
            &mut ctrl,
            gpio,
            image,
            &config,
            &mut RecordedDelay::default(),
            &mut SimInterrupts::default(),
        )
        .unwrap();
        assert!(!poll.gpio().write_log().is_empty());

        let (served, contention) = read_cycle(&mut poll, 0x8000);
        assert_eq!(served, Some(0x55));
        assert!(!contention);
        let writes = poll.gpio().write_log().len();
        let selects = poll.gpio().selector_history().len();
        assert!(writes > 0);
        assert!(selects > 0);

        // Same-shaped cycles leave the same amount of history behind
        for address in 0x8001..=0x8400 {
            read_cycle(&mut poll, address);
            assert_eq!(poll.gpio().write_log().len(), writes);
            assert_eq!(poll.gpio().selector_history().len(), selects);
        }
    }

    #[test]
    fn test_replay_serves_every_cycle() {
        let config = EmulatorConfig {
            default_byte: 0x77,
            ..EmulatorConfig::default()
        };
        let report = replay(&ROM, &config, Some((0x7FFE, 0x8006)), ClockFaults::default()).unwrap();

        assert!(report.passed());
        assert_eq!(report.cycles.len(), 9);
        let served: Vec<_> = report.cycles.iter().map(|c| c.served).collect();
        assert_eq!(
            served,
            vec![
                Some(0x77),
                Some(0x77),
                Some(0x55),
                Some(0x00),
                Some(0xFF),
                Some(0x01),
                Some(0x20),
                Some(0x77),
                Some(0x77),
            ]
        );
        assert_eq!(report.final_state.ownership, BusOwnership::Released);
        assert_eq!(report.settle_delay_ms, 300);
    }

    #[test]
    fn test_replay_transceiver_revision() {
        let config = EmulatorConfig {
            revision: BusRevision::Transceiver,
            ..EmulatorConfig::default()
        };
        let report = replay(&ROM, &config, None, ClockFaults::default()).unwrap();
        assert!(report.passed());
        assert_eq!(report.cycles.len(), 5 + 32);
    }

    #[test]
    fn test_replay_survives_clock_retries() {
        let config = EmulatorConfig::default();
        let faults = ClockFaults {
            crystal_fails: 1,
            pll_fails: 2,
        };
        let report = replay(&ROM, &config, Some((0x8000, 0x8000)), faults).unwrap();
        assert_eq!(report.clock_attempts, 4);
        assert!(report.passed());
    }

    #[test]
    fn test_replay_fails_when_clock_never_comes_up() {
        let config = EmulatorConfig {
            clock_retries: Some(1),
            ..EmulatorConfig::default()
        };
        let faults = ClockFaults {
            crystal_fails: 5,
            pll_fails: 0,
        };
        assert!(replay(&ROM, &config, None, faults).is_err());
    }

    #[test]
    fn test_report_serializes() {
        let report = replay(&ROM, &EmulatorConfig::default(), Some((0x8000, 0x8001)), ClockFaults::default())
            .unwrap();
        let json = serde_json::to_value(&report).unwrap();
        assert_eq!(json["revision"], "pin-mode");
        assert_eq!(json["cycles"][0]["served"], 0x55);
        assert_eq!(json["mismatches"], 0);
    }
}
