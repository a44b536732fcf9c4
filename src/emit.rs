//! Module: emit
//!
//! Purpose: Move one record from the store to one console, and the flush
//! loops built on top of that.
//!
//! Architecture:
//! - Acquire first, then read the cursor and the record, so a context that
//!   is not the owner never acts on a cursor value
//! - Trimmed records are skipped forward to the store's first sequence and
//!   counted; the count is printed as a notice on the next line that makes it
//! - The device write is bracketed by enter/exit unsafe. Losing ownership at
//!   either end abandons the record with the cursor unchanged
//! - A failed device write is treated like a loss: release, do not retry
//!
//! Line format: `[timestamp_us] LEVEL: message\n`
//!
//! Safety: Lock-free. The atomic path may run in any context.

use core::fmt::Write;

use crate::arbiter::{AcquireContext, Arbiter, ConsoleOwner, Denied};
use crate::console::{Console, ConsoleFlags, StagingBuf, WriteContext};
use crate::store::{LogRecord, LogStore};

/// Which driver callback an emission goes through.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum WritePath {
    /// `write_atomic`, from the caller's own context.
    Atomic,
    /// `write_thread`, from the console's worker.
    Thread,
}

impl WritePath {
    fn flag(self) -> ConsoleFlags {
        match self {
            WritePath::Atomic => ConsoleFlags::ATOMIC,
            WritePath::Thread => ConsoleFlags::THREADED,
        }
    }
}

/// Result of one emission attempt.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum EmitOutcome {
    /// One record printed, cursor advanced.
    Emitted,
    /// Nothing left to print.
    CaughtUp,
    /// Ownership not granted.
    Denied(Denied),
    /// Ownership taken away during the write. Cursor unchanged.
    Lost,
    /// The driver reported failure. Cursor unchanged.
    Failed,
    /// Console disabled, or it has no driver for this path.
    Unavailable,
    /// Not attempted at the caller's priority.
    Deferred,
}

impl EmitOutcome {
    #[inline]
    pub fn emitted(self) -> bool {
        self == EmitOutcome::Emitted
    }
}

/// Format `record` into `buf`, preceded by a notice if `dropped` records
/// were trimmed before it.
pub fn format_record(buf: &mut StagingBuf, record: &LogRecord, dropped: u64) {
    buf.clear();
    if dropped > 0 {
        let _ = write!(buf, "** {} records dropped **\n", dropped);
    }
    let _ = write!(buf, "[{:10}] {}: ", record.timestamp_us, record.level.as_str());
    buf.push_bytes(record.message());
    buf.push_bytes(b"\n");
}

/// Print the next record on `console`.
pub(crate) fn emit_next(
    store: &dyn LogStore,
    arbiter: &Arbiter,
    console: &Console,
    ctx: AcquireContext,
    path: WritePath,
    buf: &mut StagingBuf,
) -> EmitOutcome {
    if let Some(outcome) = idle_outcome(store, console, path) {
        return outcome;
    }
    match arbiter.acquire(console, ctx) {
        Ok(owner) => emit_owned(store, &owner, path, buf),
        Err(denied) => EmitOutcome::Denied(denied),
    }
}

/// Why `console` has nothing to print on `path`, or `None` if it does.
pub(crate) fn idle_outcome(store: &dyn LogStore, console: &Console, path: WritePath) -> Option<EmitOutcome> {
    if !console.is_enabled() || !console.flags().contains(path.flag()) {
        return Some(EmitOutcome::Unavailable);
    }
    // Do not disturb an owner when there is nothing to do.
    if console.next_seq(store) >= store.next_reserve_seq() {
        return Some(EmitOutcome::CaughtUp);
    }
    None
}

/// Print the next record as `owner`.
pub(crate) fn emit_owned(store: &dyn LogStore, owner: &ConsoleOwner<'_>, path: WritePath, buf: &mut StagingBuf) -> EmitOutcome {
    let console = owner.console();

    let mut seq = console.seq.load(store);
    let record = loop {
        if seq >= store.next_reserve_seq() {
            return EmitOutcome::CaughtUp;
        }
        if let Some(record) = store.read(seq) {
            break record;
        }

        let first = store.first_seq();
        if first <= seq {
            return EmitOutcome::CaughtUp;
        }
        if !owner.is_owner() || !console.seq.try_advance(seq, first, store) {
            return EmitOutcome::Lost;
        }
        log::trace!("console {}: skipped {} trimmed records", console.name(), first - seq);
        console.add_dropped(first - seq);
        seq = first;
    };

    let pending = console.dropped();
    format_record(buf, &record, pending);

    if !owner.enter_unsafe() {
        return EmitOutcome::Lost;
    }
    let written = {
        let mut wctxt = WriteContext::new(owner, buf.as_bytes());
        match path {
            WritePath::Atomic => console.driver().write_atomic(&mut wctxt),
            WritePath::Thread => console.driver().write_thread(&mut wctxt),
        }
    };
    if !owner.exit_unsafe() {
        return EmitOutcome::Lost;
    }
    if !written {
        return EmitOutcome::Failed;
    }

    if !console.seq.try_advance(seq, seq + 1, store) {
        return EmitOutcome::Lost;
    }
    if pending > 0 {
        console.ack_dropped(pending);
    }
    EmitOutcome::Emitted
}

/// Print records on `console` until its cursor reaches `target` or an
/// attempt makes no progress. Returns the number printed and the outcome
/// that ended the loop.
pub(crate) fn flush_console(
    store: &dyn LogStore,
    arbiter: &Arbiter,
    console: &Console,
    ctx: AcquireContext,
    target: u64,
    buf: &mut StagingBuf,
) -> (usize, EmitOutcome) {
    let mut printed = 0;
    loop {
        if console.next_seq(store) >= target {
            return (printed, EmitOutcome::CaughtUp);
        }
        match emit_next(store, arbiter, console, ctx, WritePath::Atomic, buf) {
            EmitOutcome::Emitted => printed += 1,
            outcome => return (printed, outcome),
        }
    }
}
