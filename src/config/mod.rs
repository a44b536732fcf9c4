//! Module: config
//!
//! Purpose: Runtime-tunable arbitration parameters.
//!
//! Architecture:
//! - One [`ArbiterConfig`] per printer, every field an atomic
//! - Readers load with `Relaxed`; a changed value takes effect on the next
//!   acquisition, never in the middle of one
//!
//! Safety: Lock-free. Safe to read from any context, including interrupts.

use core::sync::atomic::{AtomicU32, Ordering};

/// Default spin budget of a routine flush attempt, per console.
pub const DEFAULT_FLUSH_SPIN_US: u32 = 1_000;

/// Default spin budget of the final panic flush before it turns hostile.
pub const DEFAULT_FINAL_SPIN_US: u32 = 100_000;

/// Default spin budget of one device-lock acquisition attempt.
pub const DEFAULT_DEVICE_LOCK_SPIN_US: u32 = 1_000;

/// Default number of lost compare-and-swap races an acquisition tolerates.
pub const DEFAULT_ACQUIRE_RETRY_LIMIT: u32 = 64;

/// Arbitration tunables.
///
/// ```ignore
/// let printer = Printer::new(store, cores);
/// printer.config().flush_spin_us.store(50, Ordering::Relaxed);
/// ```
pub struct ArbiterConfig {
    /// Spin budget (µs) for flushes triggered by new records and emergency
    /// exit. Bounds how long one stuck console can delay the others.
    pub flush_spin_us: AtomicU32,

    /// Spin budget (µs) of the final panic flush, after which it seizes
    /// consoles from owners stuck in an unsafe region.
    pub final_spin_us: AtomicU32,

    /// Spin budget (µs) per attempt when a driver brackets a hardware
    /// reconfiguration with the device-lock bridge.
    pub device_lock_spin_us: AtomicU32,

    /// Lost CAS races tolerated by one acquisition. Past the limit a panic
    /// context with hostile takeover allowed forces ownership; everyone else
    /// is denied.
    pub acquire_retry_limit: AtomicU32,
}

impl ArbiterConfig {
    pub const fn new() -> Self {
        Self {
            flush_spin_us: AtomicU32::new(DEFAULT_FLUSH_SPIN_US),
            final_spin_us: AtomicU32::new(DEFAULT_FINAL_SPIN_US),
            device_lock_spin_us: AtomicU32::new(DEFAULT_DEVICE_LOCK_SPIN_US),
            acquire_retry_limit: AtomicU32::new(DEFAULT_ACQUIRE_RETRY_LIMIT),
        }
    }

    #[inline]
    pub fn flush_spin_us(&self) -> u64 {
        self.flush_spin_us.load(Ordering::Relaxed) as u64
    }

    #[inline]
    pub fn final_spin_us(&self) -> u64 {
        self.final_spin_us.load(Ordering::Relaxed) as u64
    }

    #[inline]
    pub fn device_lock_spin_us(&self) -> u64 {
        self.device_lock_spin_us.load(Ordering::Relaxed) as u64
    }

    #[inline]
    pub fn acquire_retry_limit(&self) -> u32 {
        self.acquire_retry_limit.load(Ordering::Relaxed)
    }

    /// Get a snapshot of the current values.
    pub fn snapshot(&self) -> ConfigSnapshot {
        ConfigSnapshot {
            flush_spin_us: self.flush_spin_us.load(Ordering::Relaxed),
            final_spin_us: self.final_spin_us.load(Ordering::Relaxed),
            device_lock_spin_us: self.device_lock_spin_us.load(Ordering::Relaxed),
            acquire_retry_limit: self.acquire_retry_limit.load(Ordering::Relaxed),
        }
    }
}

impl Default for ArbiterConfig {
    fn default() -> Self {
        Self::new()
    }
}

/// Plain copy of an [`ArbiterConfig`].
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ConfigSnapshot {
    pub flush_spin_us: u32,
    pub final_spin_us: u32,
    pub device_lock_spin_us: u32,
    pub acquire_retry_limit: u32,
}
