//! Module: state
//!
//! Purpose: The packed per-console ownership word and the priority tiers it
//! is arbitrated on.
//!
//! Architecture:
//! - One `AtomicU32` per console, read and compare-and-swapped as a unit
//! - Every transition (acquire, handover request, unsafe enter/exit,
//!   release) is a single CAS from an observed word to a derived word
//! - 32 bits so the same layout works on cores without 64-bit atomics
//!
//! ```text
//!  31            14 13      6   5        4       3..2      1..0
//! [  generation   ][  core  ][takeover][unsafe][req_prio][ prio ]
//! ```
//!
//! Safety: Safe. No unsafe blocks.

use core::fmt;
use core::sync::atomic::{AtomicU32, Ordering};

/// Execution core identifier.
pub type CoreId = usize;

/// Number of cores the state word can name.
pub const MAX_CORES: usize = 1 << CORE_BITS;

const PRIO_SHIFT: u32 = 0;
const REQ_SHIFT: u32 = 2;
const PRIO_MASK: u32 = 0b11;
const UNSAFE_BIT: u32 = 1 << 4;
const TAKEOVER_BIT: u32 = 1 << 5;
const CORE_SHIFT: u32 = 6;
const CORE_BITS: u32 = 8;
const CORE_MASK: u32 = (1 << CORE_BITS) - 1;
const GEN_SHIFT: u32 = CORE_SHIFT + CORE_BITS;
const GEN_MASK: u32 = (1 << (32 - GEN_SHIFT)) - 1;

/// Priority tier of a console owner.
///
/// Totally ordered. A context may only take a console away from an owner of
/// strictly lower priority.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[repr(u8)]
pub enum Priority {
    /// Unowned.
    None = 0,
    /// Ordinary log traffic and device-lock holders.
    Normal = 1,
    /// Per-core emergency sections (lockup reports, warnings).
    Emergency = 2,
    /// The core handling a fatal error.
    Panic = 3,
}

impl Priority {
    /// Convert from the 2-bit field value.
    pub const fn from_bits(bits: u32) -> Self {
        match bits & PRIO_MASK {
            0 => Priority::None,
            1 => Priority::Normal,
            2 => Priority::Emergency,
            _ => Priority::Panic,
        }
    }

    /// Name for diagnostics.
    pub fn as_str(self) -> &'static str {
        match self {
            Priority::None => "none",
            Priority::Normal => "normal",
            Priority::Emergency => "emergency",
            Priority::Panic => "panic",
        }
    }
}

impl fmt::Display for Priority {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Identity of one particular acquisition.
///
/// Two acquisitions by the same core at the same priority still differ in
/// `generation`, so a context that was taken over can never act on the
/// ownership of its successor.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct OwnerId {
    pub core: CoreId,
    pub prio: Priority,
    pub generation: u32,
}

/// Snapshot of a console's ownership word.
#[derive(Clone, Copy, PartialEq, Eq, Default)]
pub struct OwnerState(u32);

impl OwnerState {
    /// Never owned, no waiter, safe.
    pub const UNOWNED: Self = Self(0);

    #[inline]
    pub const fn from_raw(raw: u32) -> Self {
        Self(raw)
    }

    #[inline]
    pub const fn raw(self) -> u32 {
        self.0
    }

    /// Priority of the current owner, `None` when unowned.
    #[inline]
    pub const fn prio(self) -> Priority {
        Priority::from_bits(self.0 >> PRIO_SHIFT)
    }

    /// Priority of a waiter asking the owner to hand over.
    #[inline]
    pub const fn req_prio(self) -> Priority {
        Priority::from_bits(self.0 >> REQ_SHIFT)
    }

    #[inline]
    pub const fn is_unsafe(self) -> bool {
        self.0 & UNSAFE_BIT != 0
    }

    #[inline]
    pub const fn unsafe_takeover(self) -> bool {
        self.0 & TAKEOVER_BIT != 0
    }

    #[inline]
    pub const fn core(self) -> CoreId {
        ((self.0 >> CORE_SHIFT) & CORE_MASK) as CoreId
    }

    #[inline]
    pub const fn generation(self) -> u32 {
        (self.0 >> GEN_SHIFT) & GEN_MASK
    }

    #[inline]
    pub fn is_owned(self) -> bool {
        self.prio() != Priority::None
    }

    /// Generation the next acquisition will carry. Wraps.
    #[inline]
    pub const fn next_generation(self) -> u32 {
        self.generation().wrapping_add(1) & GEN_MASK
    }

    /// True if this word still describes the acquisition `id`.
    #[inline]
    pub fn is_owned_by(self, id: OwnerId) -> bool {
        self.prio() == id.prio && self.core() == id.core && self.generation() == id.generation
    }

    /// Identity of the current owner, if any.
    pub fn owner(self) -> Option<OwnerId> {
        self.is_owned().then(|| OwnerId {
            core: self.core(),
            prio: self.prio(),
            generation: self.generation(),
        })
    }

    #[must_use]
    #[inline]
    pub const fn with_prio(self, prio: Priority) -> Self {
        Self((self.0 & !(PRIO_MASK << PRIO_SHIFT)) | ((prio as u32) << PRIO_SHIFT))
    }

    #[must_use]
    #[inline]
    pub const fn with_req_prio(self, prio: Priority) -> Self {
        Self((self.0 & !(PRIO_MASK << REQ_SHIFT)) | ((prio as u32) << REQ_SHIFT))
    }

    #[must_use]
    #[inline]
    pub const fn with_unsafe(self, value: bool) -> Self {
        if value {
            Self(self.0 | UNSAFE_BIT)
        } else {
            Self(self.0 & !UNSAFE_BIT)
        }
    }

    #[must_use]
    #[inline]
    pub const fn with_unsafe_takeover(self, value: bool) -> Self {
        if value {
            Self(self.0 | TAKEOVER_BIT)
        } else {
            Self(self.0 & !TAKEOVER_BIT)
        }
    }

    #[must_use]
    #[inline]
    pub const fn with_core(self, core: CoreId) -> Self {
        Self((self.0 & !(CORE_MASK << CORE_SHIFT)) | (((core as u32) & CORE_MASK) << CORE_SHIFT))
    }

    #[must_use]
    #[inline]
    pub const fn with_generation(self, generation: u32) -> Self {
        Self((self.0 & !(GEN_MASK << GEN_SHIFT)) | ((generation & GEN_MASK) << GEN_SHIFT))
    }

    /// Word for a fresh acquisition by `core` at `prio`, derived from `self`.
    ///
    /// Bumps the generation and starts out safe. The waiter field and the
    /// takeover flag are left for the caller to decide.
    #[must_use]
    pub const fn acquired_by(self, core: CoreId, prio: Priority) -> Self {
        self.with_prio(prio)
            .with_core(core)
            .with_generation(self.next_generation())
            .with_unsafe(false)
    }

    /// Word after the owner lets go.
    ///
    /// Keeps `req_prio` so a waiting context finds the console reserved for
    /// it, and keeps `unsafe_takeover` for the next owner to observe.
    #[must_use]
    pub const fn released(self) -> Self {
        self.with_prio(Priority::None).with_core(0).with_unsafe(false)
    }
}

impl fmt::Debug for OwnerState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("OwnerState")
            .field("prio", &self.prio())
            .field("req_prio", &self.req_prio())
            .field("unsafe", &self.is_unsafe())
            .field("unsafe_takeover", &self.unsafe_takeover())
            .field("core", &self.core())
            .field("generation", &self.generation())
            .finish()
    }
}

/// The atomic cell holding an [`OwnerState`].
pub struct AtomicOwnerState(AtomicU32);

impl AtomicOwnerState {
    pub const fn new() -> Self {
        Self(AtomicU32::new(OwnerState::UNOWNED.raw()))
    }

    #[inline]
    pub fn load(&self) -> OwnerState {
        OwnerState(self.0.load(Ordering::Acquire))
    }

    /// Install `new` if the word still equals `current`.
    ///
    /// On failure returns the word actually observed.
    #[inline]
    pub fn compare_exchange(&self, current: OwnerState, new: OwnerState) -> Result<(), OwnerState> {
        self.0
            .compare_exchange(current.0, new.0, Ordering::AcqRel, Ordering::Acquire)
            .map(|_| ())
            .map_err(OwnerState)
    }

    /// Unconditionally install `new`, returning the previous word.
    #[inline]
    pub fn swap(&self, new: OwnerState) -> OwnerState {
        OwnerState(self.0.swap(new.0, Ordering::AcqRel))
    }
}

impl Default for AtomicOwnerState {
    fn default() -> Self {
        Self::new()
    }
}
