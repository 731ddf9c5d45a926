//! Busy-wait delays. No timer peripheral is used.

/// Blocking millisecond delay
pub trait Delay {
    fn delay_ms(&mut self, ms: u32);
}

/// Inner-loop iterations per millisecond at 72 MHz
pub const SPINS_PER_MS: u32 = 500;

/// Calibrated spin loop.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SpinDelay {
    spins_per_ms: u32,
}

impl SpinDelay {
    pub fn new(spins_per_ms: u32) -> Self {
        Self { spins_per_ms }
    }
}

impl Default for SpinDelay {
    fn default() -> Self {
        Self::new(SPINS_PER_MS)
    }
}

impl Delay for SpinDelay {
    fn delay_ms(&mut self, ms: u32) {
        for _ in 0..ms {
            for _ in 0..self.spins_per_ms {
                std::hint::spin_loop();
            }
        }
    }
}

/// Records requested delays without waiting. For simulation.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RecordedDelay {
    pub calls: Vec<u32>,
}

impl RecordedDelay {
    pub fn total_ms(&self) -> u64 {
        self.calls.iter().map(|&ms| u64::from(ms)).sum()
    }
}

impl Delay for RecordedDelay {
    fn delay_ms(&mut self, ms: u32) {
        self.calls.push(ms);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_recorded_delay() {
        let mut delay = RecordedDelay::default();
        delay.delay_ms(300);
        delay.delay_ms(5);
        assert_eq!(delay.calls, vec![300, 5]);
        assert_eq!(delay.total_ms(), 305);
    }

    #[test]
    fn test_spin_delay_returns() {
        let mut delay = SpinDelay::new(10);
        delay.delay_ms(3);
        delay.delay_ms(0);
    }
}
