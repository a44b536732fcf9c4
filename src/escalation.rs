//! Emergency and panic escalation state.
//!
//! # Rules
//!
//! - A core's emergency nesting counter is only ever written by that core
//! - Panic is claimed once; the first core to claim it keeps it
//! - Core ids past the configured core count never escalate and read as
//!   depth 0
//! - While a panic is in progress every other core is refused console
//!   ownership, so the panic core has the hardware to itself
//!
//! The printer wraps these counters with preemption control and the
//! flush-on-exit; this module only keeps the bookkeeping.

use core::sync::atomic::{AtomicU32, AtomicUsize, Ordering};

use crossbeam_utils::CachePadded;

use crate::state::{CoreId, Priority};

const NO_CORE: usize = usize::MAX;

/// Per-core emergency nesting and the global panic owner.
pub struct Escalation {
    /// One counter per core. Padded so cores never share a cache line.
    nesting: Box<[CachePadded<AtomicU32>]>,

    /// Number of cores with a nonzero nesting counter.
    escalated: AtomicU32,

    /// Core handling a fatal error, or `NO_CORE`.
    panic_core: AtomicUsize,
}

impl Escalation {
    pub fn new(cores: usize) -> Self {
        Self {
            nesting: (0..cores).map(|_| CachePadded::new(AtomicU32::new(0))).collect(),
            escalated: AtomicU32::new(0),
            panic_core: AtomicUsize::new(NO_CORE),
        }
    }

    /// Open an emergency section on `core`. Returns the new depth.
    #[inline]
    pub fn enter(&self, core: CoreId) -> u32 {
        let Some(slot) = self.nesting.get(core) else {
            log::warn!("emergency entry from unknown core {}", core);
            return 0;
        };
        let prev = slot.fetch_add(1, Ordering::AcqRel);
        if prev == 0 {
            self.escalated.fetch_add(1, Ordering::AcqRel);
        }
        prev + 1
    }

    /// Close an emergency section on `core`. Returns the remaining depth.
    ///
    /// An exit without a matching enter is ignored.
    #[inline]
    pub fn exit(&self, core: CoreId) -> u32 {
        let Some(slot) = self.nesting.get(core) else {
            return 0;
        };
        let prev = slot.load(Ordering::Acquire);
        if prev == 0 {
            log::warn!("unbalanced emergency exit on core {}", core);
            return 0;
        }
        slot.fetch_sub(1, Ordering::AcqRel);
        if prev == 1 {
            self.escalated.fetch_sub(1, Ordering::AcqRel);
        }
        prev - 1
    }

    /// Emergency nesting depth of `core`.
    #[inline]
    pub fn nesting(&self, core: CoreId) -> u32 {
        self.nesting.get(core).map_or(0, |n| n.load(Ordering::Acquire))
    }

    /// Claim the panic for `core`.
    ///
    /// Returns `true` if `core` is (now or already) the panic core.
    pub fn try_enter_panic(&self, core: CoreId) -> bool {
        match self
            .panic_core
            .compare_exchange(NO_CORE, core, Ordering::AcqRel, Ordering::Acquire)
        {
            Ok(_) => true,
            Err(owner) => owner == core,
        }
    }

    #[inline]
    pub fn panic_core(&self) -> Option<CoreId> {
        match self.panic_core.load(Ordering::Acquire) {
            NO_CORE => None,
            core => Some(core),
        }
    }

    #[inline]
    pub fn panic_in_progress(&self) -> bool {
        self.panic_core().is_some()
    }

    /// True if some core other than `core` is handling a fatal error.
    #[inline]
    pub fn other_core_in_panic(&self, core: CoreId) -> bool {
        matches!(self.panic_core(), Some(p) if p != core)
    }

    /// True if any core is in an emergency section or a panic is running.
    #[inline]
    pub fn any_escalated(&self) -> bool {
        self.escalated.load(Ordering::Acquire) > 0 || self.panic_in_progress()
    }

    /// Priority that output from `core` is printed at by default.
    ///
    /// Panic on the panic core, Emergency inside an emergency section,
    /// Normal otherwise.
    #[inline]
    pub fn default_priority(&self, core: CoreId) -> Priority {
        if self.panic_core() == Some(core) {
            Priority::Panic
        } else if self.nesting(core) > 0 {
            Priority::Emergency
        } else {
            Priority::Normal
        }
    }

    /// Get a snapshot of `core`'s escalation state.
    pub fn snapshot(&self, core: CoreId) -> EscalationSnapshot {
        EscalationSnapshot {
            nesting: self.nesting(core),
            panic_core: self.panic_core(),
            priority: self.default_priority(core),
        }
    }
}

/// Escalation state of one core at a point in time.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct EscalationSnapshot {
    pub nesting: u32,
    pub panic_core: Option<CoreId>,
    pub priority: Priority,
}
