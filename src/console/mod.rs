//! Consoles: output devices the printer emits log records to
//!
//! A console bundles a driver with everything the arbiter keeps per device:
//! the ownership word, the next-sequence cursor and the dropped-record
//! counters. Drivers only ever see a [`WriteContext`], which proves
//! ownership and carries the formatted text.

pub mod error;
pub mod staging;

pub use error::ConsoleError;
pub use staging::{StagingBuf, STAGING_SIZE};

use core::fmt;
use core::sync::atomic::{AtomicBool, AtomicU64, Ordering};

use crate::arbiter::ConsoleOwner;
use crate::seq::SeqCursor;
use crate::state::{AtomicOwnerState, OwnerState, Priority};
use crate::store::LogStore;
use crate::worker::WorkerSlot;

bitflags::bitflags! {
    /// Write paths a console driver supports.
    #[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
    pub struct ConsoleFlags: u8 {
        /// `write_atomic` may be called from any context, including with
        /// preemption disabled and during a panic.
        const ATOMIC = 1 << 0;
        /// `write_thread` is driven by a dedicated worker thread.
        const THREADED = 1 << 1;
    }
}

/// Output device driver.
///
/// Both methods return `true` if the whole text reached the device. A driver
/// doing a long transfer should poll [`WriteContext::can_proceed`] between
/// chunks and return `false` early when it turns false.
pub trait ConsoleDriver: Send + Sync {
    /// Write from any context. Must not block or sleep.
    fn write_atomic(&self, wctxt: &mut WriteContext<'_>) -> bool {
        let _ = wctxt;
        false
    }

    /// Write from the console's worker thread. May sleep.
    fn write_thread(&self, wctxt: &mut WriteContext<'_>) -> bool {
        let _ = wctxt;
        false
    }
}

/// A registered output device.
pub struct Console {
    name: String,
    flags: ConsoleFlags,
    enabled: AtomicBool,
    pub(crate) state: AtomicOwnerState,
    pub(crate) seq: SeqCursor,
    /// Trimmed records not yet reported on this console.
    dropped: AtomicU64,
    dropped_total: AtomicU64,
    driver: Box<dyn ConsoleDriver>,
    pub(crate) worker: WorkerSlot,
}

impl Console {
    pub fn new<D>(name: impl Into<String>, flags: ConsoleFlags, driver: D) -> Self
    where
        D: ConsoleDriver + 'static,
    {
        Self {
            name: name.into(),
            flags,
            enabled: AtomicBool::new(true),
            state: AtomicOwnerState::new(),
            seq: SeqCursor::new(0),
            dropped: AtomicU64::new(0),
            dropped_total: AtomicU64::new(0),
            driver: Box::new(driver),
            worker: WorkerSlot::new(),
        }
    }

    #[inline]
    pub fn name(&self) -> &str {
        &self.name
    }

    #[inline]
    pub fn flags(&self) -> ConsoleFlags {
        self.flags
    }

    #[inline]
    pub fn is_enabled(&self) -> bool {
        self.enabled.load(Ordering::Acquire)
    }

    pub(crate) fn set_enabled(&self, enabled: bool) {
        self.enabled.store(enabled, Ordering::Release);
    }

    /// Current ownership word.
    #[inline]
    pub fn state(&self) -> OwnerState {
        self.state.load()
    }

    /// Sequence of the next record this console will print.
    #[inline]
    pub fn next_seq(&self, store: &dyn LogStore) -> u64 {
        self.seq.load(store)
    }

    /// Trimmed records waiting to be reported.
    #[inline]
    pub fn dropped(&self) -> u64 {
        self.dropped.load(Ordering::Acquire)
    }

    /// Trimmed records since registration.
    #[inline]
    pub fn dropped_total(&self) -> u64 {
        self.dropped_total.load(Ordering::Acquire)
    }

    pub(crate) fn add_dropped(&self, count: u64) {
        self.dropped.fetch_add(count, Ordering::AcqRel);
        self.dropped_total.fetch_add(count, Ordering::AcqRel);
    }

    /// The notice for `count` records went out.
    pub(crate) fn ack_dropped(&self, count: u64) {
        let _ = self
            .dropped
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |d| Some(d.saturating_sub(count)));
    }

    #[inline]
    pub(crate) fn driver(&self) -> &dyn ConsoleDriver {
        &*self.driver
    }

    #[inline]
    pub fn has_worker(&self) -> bool {
        self.flags.contains(ConsoleFlags::THREADED)
    }
}

impl fmt::Debug for Console {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Console")
            .field("name", &self.name)
            .field("flags", &self.flags)
            .field("enabled", &self.is_enabled())
            .field("state", &self.state())
            .field("dropped_total", &self.dropped_total())
            .finish()
    }
}

/// What a driver gets to write with: ownership proof plus the text.
pub struct WriteContext<'a> {
    owner: &'a ConsoleOwner<'a>,
    text: &'a [u8],
}

impl<'a> WriteContext<'a> {
    pub(crate) fn new(owner: &'a ConsoleOwner<'a>, text: &'a [u8]) -> Self {
        Self { owner, text }
    }

    /// Formatted output, newline terminated.
    #[inline]
    pub fn text(&self) -> &[u8] {
        self.text
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.text.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.text.is_empty()
    }

    /// Priority the write runs at.
    #[inline]
    pub fn priority(&self) -> Priority {
        self.owner.priority()
    }

    /// A previous owner was seized mid-write. The device may be in an
    /// unknown state and need resetting before this write.
    #[inline]
    pub fn unsafe_takeover(&self) -> bool {
        self.owner.unsafe_takeover()
    }

    /// `false` once the driver should stop: ownership lost, or a
    /// higher-priority context is waiting.
    #[inline]
    pub fn can_proceed(&self) -> bool {
        self.owner.can_proceed()
    }
}
