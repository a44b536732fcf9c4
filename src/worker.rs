//! Module: worker
//!
//! Purpose: One background thread per THREADED console, printing through
//! `write_thread` whenever nothing more urgent is going on.
//!
//! Architecture:
//! - Each iteration: acquire at Normal with preemption off, then print one
//!   record through `write_thread` with preemption back on, release
//! - Frozen while any core is in an emergency section or a panic is in
//!   progress; the emergency exit flush wakes it again
//! - Sleeps when caught up. Wakeup is a pending flag plus `Thread::unpark`,
//!   so a notification that arrives before the worker parks is not lost
//! - Holds only a weak reference to the printer; exits when it goes away
//!
//! Safety: Worker threads may sleep. Wakeup (`WorkerSlot::wake`) is
//! lock-free and callable from any context.

use core::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};
use std::thread::{self, JoinHandle, Thread};
use std::time::Duration;

use crate::arbiter::AcquireContext;
use crate::console::{Console, ConsoleError, StagingBuf};
use crate::emit::{self, EmitOutcome, WritePath};
use crate::printer::Shared;
use crate::state::Priority;

/// Back-off after a denied or lost attempt.
const RETRY_BACKOFF: Duration = Duration::from_millis(1);

/// Per-console worker bookkeeping.
pub(crate) struct WorkerSlot {
    pending: AtomicBool,
    stop: AtomicBool,
    thread: spin::Once<Thread>,
    handle: spin::Mutex<Option<JoinHandle<()>>>,
}

impl WorkerSlot {
    pub(crate) const fn new() -> Self {
        Self {
            pending: AtomicBool::new(false),
            stop: AtomicBool::new(false),
            thread: spin::Once::new(),
            handle: spin::Mutex::new(None),
        }
    }

    /// Deferred wakeup.
    #[inline]
    pub(crate) fn wake(&self) {
        self.pending.store(true, Ordering::Release);
        if let Some(thread) = self.thread.get() {
            thread.unpark();
        }
    }

    /// A worker was started and not yet told to stop.
    #[inline]
    pub(crate) fn is_running(&self) -> bool {
        self.thread.get().is_some() && !self.stop.load(Ordering::Acquire)
    }

    /// Tell the worker to exit without waiting for it.
    pub(crate) fn request_stop(&self) {
        self.stop.store(true, Ordering::Release);
        if let Some(thread) = self.thread.get() {
            thread.unpark();
        }
    }

    /// Tell the worker to exit and wait until it has.
    pub(crate) fn stop_and_join(&self, name: &str) {
        self.request_stop();
        let handle = self.handle.lock().take();
        if let Some(handle) = handle {
            if handle.thread().id() == thread::current().id() {
                return;
            }
            if handle.join().is_err() {
                log::warn!("console {}: worker panicked", name);
            }
        }
    }

    fn stopping(&self) -> bool {
        self.stop.load(Ordering::Acquire)
    }

    /// Sleep until woken or told to stop.
    fn wait(&self) {
        while !self.pending.swap(false, Ordering::AcqRel) {
            if self.stopping() {
                return;
            }
            thread::park();
        }
    }

    /// Sleep for at most `timeout`, returning early if woken.
    fn backoff(&self, timeout: Duration) {
        if !self.pending.swap(false, Ordering::AcqRel) && !self.stopping() {
            thread::park_timeout(timeout);
        }
    }
}

/// Start the worker of `console`.
pub(crate) fn spawn(shared: &Arc<Shared>, console: &Arc<Console>) -> Result<(), ConsoleError> {
    let printer = Arc::downgrade(shared);
    let con = Arc::clone(console);
    let handle = thread::Builder::new()
        .name(format!("pr/{}", console.name()))
        .spawn(move || run(printer, con))?;

    console.worker.thread.call_once(|| handle.thread().clone());
    *console.worker.handle.lock() = Some(handle);
    Ok(())
}

enum Step {
    Progress,
    Idle,
    Blocked,
}

fn run(printer: Weak<Shared>, console: Arc<Console>) {
    log::debug!("console {}: worker started", console.name());
    let mut buf = Box::new(StagingBuf::new());

    while !console.worker.stopping() {
        let next = match printer.upgrade() {
            Some(shared) => step(&shared, &console, &mut buf),
            None => break,
        };
        match next {
            Step::Progress => {}
            Step::Idle => console.worker.wait(),
            Step::Blocked => console.worker.backoff(RETRY_BACKOFF),
        }
    }

    log::debug!("console {}: worker stopped", console.name());
}

fn step(shared: &Shared, console: &Console, buf: &mut StagingBuf) -> Step {
    let arbiter = &shared.arbiter;
    if arbiter.escalation().any_escalated() {
        return Step::Idle;
    }

    if emit::idle_outcome(&*shared.store, console, WritePath::Thread).is_some() {
        return Step::Idle;
    }

    // Rescheduling is off only while waiting for ownership. The write itself
    // may sleep.
    let cores = arbiter.cores();
    cores.preempt_disable();
    let acquired = arbiter.acquire(console, AcquireContext::new(Priority::Normal));
    cores.preempt_enable();

    let outcome = match acquired {
        Ok(owner) => emit::emit_owned(&*shared.store, &owner, WritePath::Thread, buf),
        Err(denied) => EmitOutcome::Denied(denied),
    };

    match outcome {
        EmitOutcome::Emitted => Step::Progress,
        EmitOutcome::Denied(_) | EmitOutcome::Lost => Step::Blocked,
        EmitOutcome::Failed => {
            log::trace!("console {}: thread write failed", console.name());
            Step::Idle
        }
        EmitOutcome::CaughtUp | EmitOutcome::Unavailable | EmitOutcome::Deferred => Step::Idle,
    }
}
