//! Global interrupt masking before the poll loop starts.

pub trait InterruptControl {
    /// Mask every maskable interrupt, including faults. Not undone.
    fn disable_all(&mut self);
}

/// The Cortex-M core's fault mask.
#[derive(Debug, Default)]
pub struct CortexM;

impl InterruptControl for CortexM {
    #[cfg(target_arch = "arm")]
    fn disable_all(&mut self) {
        // SAFETY: sets FAULTMASK, no memory is touched
        unsafe { std::arch::asm!("cpsid f", options(nomem, nostack, preserves_flags)) }
    }

    #[cfg(not(target_arch = "arm"))]
    fn disable_all(&mut self) {}
}

/// Remembers whether masking was requested. For simulation.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct SimInterrupts {
    pub masked: bool,
}

impl InterruptControl for SimInterrupts {
    fn disable_all(&mut self) {
        self.masked = true;
    }
}
