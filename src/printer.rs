//! Module: printer
//!
//! Purpose: The front end producers and drivers talk to. Owns the console
//! table, the arbiter and the store handle, and ties emission, escalation
//! and the worker threads together.
//!
//! Architecture:
//! ```text
//! printk() ─▶ store.append() ─▶ notify_new_record()
//!                                   │
//!                   ┌───────────────┴───────────────┐
//!                   ▼                               ▼
//!          wake console workers          inline atomic flush
//!          (THREADED consoles)           (Normal priority only,
//!                                         consoles without a worker)
//!
//! enter_emergency() ... exit_emergency() ─▶ flush at Emergency, wake workers
//! panic_flush() ─▶ flush at Panic, hostile takeover allowed
//! ```
//!
//! Safety: Emission and escalation entry points are callable from any
//! context. Registration, shutdown and the device-lock bridge are
//! task-context only.

use core::fmt;
use core::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use crate::arbiter::{AcquireContext, Arbiter, ConsoleOwner};
use crate::config::ArbiterConfig;
use crate::console::{Console, ConsoleError, ConsoleFlags, StagingBuf};
use crate::cpu::CoreContext;
use crate::emit::{self, EmitOutcome, WritePath};
use crate::logger::format_to_buffer;
use crate::state::Priority;
use crate::store::{LogLevel, LogStore, MAX_MSG_LEN};
use crate::worker;

/// Maximum number of registered consoles.
pub const MAX_CONSOLES: usize = 8;

/// State shared between the printer handles and the console workers.
pub(crate) struct Shared {
    pub(crate) store: Arc<dyn LogStore>,
    pub(crate) arbiter: Arbiter,
    consoles: spin::RwLock<Vec<Arc<Console>>>,
    workers_stopped: AtomicBool,
}

impl Shared {
    fn wake_workers(&self) {
        for console in self.consoles.read().iter() {
            if console.worker.is_running() {
                console.worker.wake();
            }
        }
    }

    /// Flush every enabled ATOMIC console, optionally skipping the ones a
    /// worker looks after. Returns the number of records printed.
    fn flush_consoles(&self, prio: Priority, target: u64, allow_hostile: bool, skip_threaded: bool) -> usize {
        let config = self.arbiter.config();
        let spin = if allow_hostile {
            config.final_spin_us()
        } else {
            config.flush_spin_us()
        };
        let ctx = AcquireContext::new(prio)
            .allow_hostile(allow_hostile)
            .spin_budget_us(spin);

        let mut buf = StagingBuf::new();
        let mut printed = 0;
        for console in self.consoles.read().iter() {
            if !console.is_enabled() || !console.flags().contains(ConsoleFlags::ATOMIC) {
                continue;
            }
            if skip_threaded && console.worker.is_running() {
                continue;
            }
            let (n, outcome) = emit::flush_console(&*self.store, &self.arbiter, console, ctx, target, &mut buf);
            printed += n;
            if let EmitOutcome::Denied(denied) = outcome {
                if prio == Priority::Panic {
                    log::warn!("console {}: final flush denied: {}", console.name(), denied);
                } else {
                    log::trace!("console {}: flush denied: {}", console.name(), denied);
                }
            }
        }
        printed
    }
}

impl Drop for Shared {
    fn drop(&mut self) {
        for console in self.consoles.get_mut().iter() {
            console.worker.request_stop();
        }
    }
}

/// Console printer.
///
/// Cheap to clone; all clones share the same consoles and state.
///
/// ```ignore
/// let printer = Printer::new(Arc::new(MemoryLogStore::<256>::new()), Arc::new(ThreadCores::new(2)));
/// printer.register(Console::new("uart0", ConsoleFlags::ATOMIC, driver))?;
/// printer.printk(LogLevel::Info, format_args!("hello"));
/// ```
#[derive(Clone)]
pub struct Printer {
    shared: Arc<Shared>,
}

impl Printer {
    pub fn new(store: Arc<dyn LogStore>, cores: Arc<dyn CoreContext>) -> Self {
        Self::with_config(store, cores, ArbiterConfig::new())
    }

    pub fn with_config(store: Arc<dyn LogStore>, cores: Arc<dyn CoreContext>, config: ArbiterConfig) -> Self {
        Self {
            shared: Arc::new(Shared {
                store,
                arbiter: Arbiter::with_config(cores, config),
                consoles: spin::RwLock::new(Vec::new()),
                workers_stopped: AtomicBool::new(false),
            }),
        }
    }

    #[inline]
    pub fn store(&self) -> &dyn LogStore {
        &*self.shared.store
    }

    #[inline]
    pub fn arbiter(&self) -> &Arbiter {
        &self.shared.arbiter
    }

    #[inline]
    pub fn config(&self) -> &ArbiterConfig {
        self.shared.arbiter.config()
    }

    // ========================================================================
    // Console lifecycle
    // ========================================================================

    /// Add a console. Its cursor starts at the store's first available
    /// record. THREADED consoles get their worker started here.
    pub fn register(&self, console: Console) -> Result<Arc<Console>, ConsoleError> {
        if !console.flags().intersects(ConsoleFlags::ATOMIC | ConsoleFlags::THREADED) {
            return Err(ConsoleError::NoWritePath(console.name().to_owned()));
        }

        let console = Arc::new(console);
        {
            let mut table = self.shared.consoles.write();
            if table.len() >= MAX_CONSOLES {
                return Err(ConsoleError::TableFull(MAX_CONSOLES));
            }
            if table.iter().any(|c| c.name() == console.name()) {
                return Err(ConsoleError::Duplicate(console.name().to_owned()));
            }
            console.seq.store(self.shared.store.first_seq());
            table.push(Arc::clone(&console));
        }

        if console.has_worker() && !self.shared.workers_stopped.load(Ordering::Acquire) {
            if let Err(err) = worker::spawn(&self.shared, &console) {
                self.shared.consoles.write().retain(|c| !Arc::ptr_eq(c, &console));
                return Err(err);
            }
            console.worker.wake();
        }

        log::debug!("registered console {} ({:?})", console.name(), console.flags());
        Ok(console)
    }

    /// Remove a console and stop its worker.
    pub fn unregister(&self, name: &str) -> Result<Arc<Console>, ConsoleError> {
        let console = {
            let mut table = self.shared.consoles.write();
            let idx = table
                .iter()
                .position(|c| c.name() == name)
                .ok_or_else(|| ConsoleError::NotRegistered(name.to_owned()))?;
            table.remove(idx)
        };
        console.set_enabled(false);
        console.worker.stop_and_join(console.name());

        log::debug!("unregistered console {}", name);
        Ok(console)
    }

    /// Registered console by name.
    pub fn console(&self, name: &str) -> Option<Arc<Console>> {
        self.shared.consoles.read().iter().find(|c| c.name() == name).cloned()
    }

    /// All registered consoles.
    pub fn consoles(&self) -> Vec<Arc<Console>> {
        self.shared.consoles.read().clone()
    }

    pub fn enable(&self, console: &Console) {
        console.set_enabled(true);
        console.worker.wake();
    }

    pub fn disable(&self, console: &Console) {
        console.set_enabled(false);
    }

    /// Ask every console worker to print what is pending.
    pub fn request_flush(&self) {
        self.shared.wake_workers();
    }

    // ========================================================================
    // Emission
    // ========================================================================

    /// Priority the calling context prints at.
    #[inline]
    pub fn default_priority(&self) -> Priority {
        self.shared.arbiter.default_priority()
    }

    /// Print the next record on `console` through its atomic path, at the
    /// caller's default priority.
    ///
    /// Inside an emergency section this does nothing and returns
    /// [`EmitOutcome::Deferred`]; the section's exit flushes instead.
    pub fn emit_next(&self, console: &Console) -> EmitOutcome {
        let prio = self.default_priority();
        if prio == Priority::Emergency {
            return EmitOutcome::Deferred;
        }
        let ctx = AcquireContext::new(prio).spin_budget_us(self.config().flush_spin_us());
        let mut buf = StagingBuf::new();
        emit::emit_next(
            &*self.shared.store,
            &self.shared.arbiter,
            console,
            ctx,
            WritePath::Atomic,
            &mut buf,
        )
    }

    /// Print pending records on every enabled ATOMIC console until each
    /// reaches `target` or stops making progress.
    ///
    /// `allow_hostile` only has an effect on the panic core.
    pub fn flush_all(&self, target: u64, allow_hostile: bool) -> usize {
        let prio = self.default_priority();
        let hostile = allow_hostile && prio == Priority::Panic;
        self.shared.flush_consoles(prio, target, hostile, false)
    }

    /// A record was appended to the store.
    ///
    /// Wakes the console workers and, at Normal priority, prints inline on
    /// the consoles no worker looks after. Emergency and panic output is
    /// left to accumulate until the section ends.
    pub fn notify_new_record(&self) {
        self.shared.wake_workers();
        if self.default_priority() != Priority::Normal {
            return;
        }
        let target = self.shared.store.next_reserve_seq();
        self.shared.flush_consoles(Priority::Normal, target, false, true);
    }

    /// Store a record at the caller's priority and get it printed.
    /// Returns its sequence number.
    pub fn printk(&self, level: LogLevel, args: fmt::Arguments<'_>) -> u64 {
        let mut msg = [0u8; MAX_MSG_LEN];
        let len = format_to_buffer(&mut msg, args);
        let now = self.shared.arbiter.cores().now_us();
        let seq = self
            .shared
            .store
            .append(now, level, self.default_priority(), &msg[..len]);
        self.notify_new_record();
        seq
    }

    // ========================================================================
    // Escalation
    // ========================================================================

    /// Start an emergency section on the calling core.
    ///
    /// Disables rescheduling until the matching [`Printer::exit_emergency`].
    pub fn enter_emergency(&self) {
        let arbiter = &self.shared.arbiter;
        let cores = arbiter.cores();
        cores.preempt_disable();
        if arbiter.escalation().enter(cores.current_core()) == 0 {
            // Unknown core: no section was opened, so exit will not balance.
            cores.preempt_enable();
        }
    }

    /// End an emergency section. The outermost exit flushes everything the
    /// section produced and wakes the workers.
    pub fn exit_emergency(&self) {
        let arbiter = &self.shared.arbiter;
        let cores = arbiter.cores();
        let core = cores.current_core();
        let escalation = arbiter.escalation();

        if escalation.nesting(core) == 0 {
            log::warn!("exit_emergency without enter on core {}", core);
            return;
        }
        if escalation.exit(core) == 0 {
            let prio = if escalation.panic_core() == Some(core) {
                Priority::Panic
            } else {
                Priority::Emergency
            };
            let target = self.shared.store.next_reserve_seq();
            self.shared.flush_consoles(prio, target, false, false);
            self.shared.wake_workers();
        }
        cores.preempt_enable();
    }

    /// Start an emergency section that ends when the guard drops.
    pub fn emergency(&self) -> EmergencySection<'_> {
        self.enter_emergency();
        EmergencySection { printer: self }
    }

    /// Claim the panic for the calling core. `false` if another core already
    /// holds it.
    pub fn enter_panic(&self) -> bool {
        let arbiter = &self.shared.arbiter;
        let core = arbiter.current_core();
        let claimed = arbiter.escalation().try_enter_panic(core);
        if claimed {
            log::warn!("panic in progress on core {}", core);
        }
        claimed
    }

    /// Final flush of a fatal error. Claims the panic, then prints everything
    /// stored, seizing consoles from owners stuck mid-write if it must.
    ///
    /// Does nothing on a core that lost the panic claim.
    pub fn panic_flush(&self) -> usize {
        if !self.enter_panic() {
            return 0;
        }
        let target = self.shared.store.next_reserve_seq();
        self.flush_all(target, true)
    }

    // ========================================================================
    // Device lock bridge
    // ========================================================================

    /// A driver took its device lock to reconfigure hardware that is also
    /// `console`. Waits until it owns the console at Normal priority, in an
    /// unsafe region.
    pub fn on_device_lock_acquired<'c>(&'c self, console: &'c Console) -> DeviceOwner<'c> {
        let arbiter = &self.shared.arbiter;
        let ctx = AcquireContext::new(Priority::Normal).spin_budget_us(self.config().device_lock_spin_us());
        loop {
            match arbiter.acquire(console, ctx) {
                Ok(owner) if owner.enter_unsafe() => return DeviceOwner { owner },
                Ok(_) => {}
                Err(denied) => {
                    log::trace!("console {}: device lock waiting: {}", console.name(), denied);
                }
            }
            arbiter.cores().relax();
        }
    }

    /// The driver dropped its device lock. Releases the console and gets
    /// whatever piled up meanwhile printed.
    pub fn on_device_lock_released(&self, guard: DeviceOwner<'_>) {
        let console = guard.owner.console();
        if !guard.owner.exit_unsafe() {
            log::debug!("console {}: device lock holder lost ownership", console.name());
        }
        drop(guard);

        if console.worker.is_running() {
            console.worker.wake();
        } else {
            self.notify_new_record();
        }
    }

    // ========================================================================
    // Shutdown
    // ========================================================================

    /// Stop every console worker and flush what they left behind through the
    /// atomic path, which prints everything from now on.
    pub fn shutdown(&self) {
        self.shared.workers_stopped.store(true, Ordering::Release);
        let consoles = self.consoles();
        for console in &consoles {
            console.worker.stop_and_join(console.name());
        }
        let target = self.shared.store.next_reserve_seq();
        let printed = self.flush_all(target, false);
        log::debug!("printer shut down ({} records flushed)", printed);
    }
}

/// Emergency section guard. Dropping it ends the section.
pub struct EmergencySection<'a> {
    printer: &'a Printer,
}

impl Drop for EmergencySection<'_> {
    fn drop(&mut self) {
        self.printer.exit_emergency();
    }
}

/// Console ownership held on behalf of a driver's device lock.
pub struct DeviceOwner<'c> {
    owner: ConsoleOwner<'c>,
}

impl<'c> DeviceOwner<'c> {
    #[inline]
    pub fn owner(&self) -> &ConsoleOwner<'c> {
        &self.owner
    }

    /// `false` once a more urgent context wants the console.
    #[inline]
    pub fn can_proceed(&self) -> bool {
        self.owner.can_proceed()
    }
}
