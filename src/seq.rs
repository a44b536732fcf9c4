//! Module: seq
//!
//! Purpose: Per-console next-sequence cursors and narrow-to-wide sequence
//! reconstruction.
//!
//! Architecture:
//! - The authoritative sequence number is 64-bit and monotonic
//! - Cores with 64-bit atomics keep the cursor as `AtomicU64`
//! - Cores without them (Xtensa, RV32) keep the low 32 bits and widen them
//!   against the store's first available sequence on every read
//! - Advances are compare-and-swap from the value the owner read, so a
//!   context that lost ownership cannot move the cursor
//!
//! Safety: Safe. No unsafe blocks.

#[cfg(target_has_atomic = "64")]
use core::sync::atomic::AtomicU64;
use core::sync::atomic::{AtomicU32, Ordering};

use crate::store::LogStore;

/// Reconstruct a 64-bit sequence from its low 32 bits.
///
/// `first_seq` is the store's earliest available sequence. The witness is
/// assumed to lie within ±2³¹ of it, in either direction. The difference is
/// taken as a *signed* 32-bit value; unsigned arithmetic would turn a small
/// backward step into a jump of almost 2³².
#[inline]
pub fn widen_seq(first_seq: u64, narrow: u32) -> u64 {
    let behind = (first_seq as u32).wrapping_sub(narrow) as i32;
    first_seq.wrapping_sub(behind as i64 as u64)
}

/// Low 32 bits of a sequence.
#[inline]
pub const fn narrow_seq(seq: u64) -> u32 {
    seq as u32
}

/// Cursor storing the full 64-bit sequence.
#[cfg(target_has_atomic = "64")]
pub struct WideSeqCursor(AtomicU64);

#[cfg(target_has_atomic = "64")]
impl WideSeqCursor {
    pub const fn new(seq: u64) -> Self {
        Self(AtomicU64::new(seq))
    }

    #[inline]
    pub fn load(&self, _store: &dyn LogStore) -> u64 {
        self.0.load(Ordering::Acquire)
    }

    #[inline]
    pub fn store(&self, seq: u64) {
        self.0.store(seq, Ordering::Release);
    }

    /// Move the cursor from `from` to `to`. Fails if someone else moved it.
    #[inline]
    pub fn try_advance(&self, from: u64, to: u64, _store: &dyn LogStore) -> bool {
        debug_assert!(to >= from, "cursor moving backwards: {} -> {}", from, to);
        self.0
            .compare_exchange(from, to, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
    }
}

/// Cursor storing only the low 32 bits of the sequence.
#[cfg_attr(target_has_atomic = "64", allow(dead_code))]
pub struct NarrowSeqCursor(AtomicU32);

#[cfg_attr(target_has_atomic = "64", allow(dead_code))]
impl NarrowSeqCursor {
    pub const fn new(seq: u64) -> Self {
        Self(AtomicU32::new(narrow_seq(seq)))
    }

    #[inline]
    pub fn load(&self, store: &dyn LogStore) -> u64 {
        widen_seq(store.first_seq(), self.0.load(Ordering::Acquire))
    }

    #[inline]
    pub fn store(&self, seq: u64) {
        self.0.store(narrow_seq(seq), Ordering::Release);
    }

    #[inline]
    pub fn try_advance(&self, from: u64, to: u64, _store: &dyn LogStore) -> bool {
        debug_assert!(to >= from, "cursor moving backwards: {} -> {}", from, to);
        self.0
            .compare_exchange(narrow_seq(from), narrow_seq(to), Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
    }
}

/// The cursor type consoles use on this target.
#[cfg(target_has_atomic = "64")]
pub type SeqCursor = WideSeqCursor;

/// The cursor type consoles use on this target.
#[cfg(not(target_has_atomic = "64"))]
pub type SeqCursor = NarrowSeqCursor;
