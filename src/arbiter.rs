//! Module: arbiter
//!
//! Purpose: Console ownership. Decides which context may touch a console's
//! hardware, and lets higher-priority contexts take it away from lower ones.
//!
//! Architecture:
//! - All state lives in the console's packed [`OwnerState`] word
//! - Acquire paths, tried in order on every loop iteration:
//!   1. direct: console unowned, or owned at lower priority by a context
//!      that is not in an unsafe region
//!   2. handover: lower-priority owner is unsafe; record `req_prio` and
//!      spin (bounded) until it releases or reaches a safe point
//!   3. hostile: spin budget exhausted and the caller allows it; seize the
//!      console, mark `unsafe_takeover`, abandon the owner's output
//! - An owner detects loss at its next CAS (`enter_unsafe`, `exit_unsafe`)
//!   or by polling `can_proceed`
//! - Equal or higher priority is never preempted
//!
//! Delivery: best effort for Normal and Emergency output, guaranteed attempt
//! for Panic output.
//!
//! Safety: Lock-free. Callable from any context. The only waiting is the
//! bounded handover spin.

use core::fmt;
use std::sync::Arc;

use crate::config::ArbiterConfig;
use crate::console::Console;
use crate::cpu::CoreContext;
use crate::escalation::Escalation;
use crate::state::{CoreId, OwnerId, OwnerState, Priority};

/// What a context asks for when it tries to become owner.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct AcquireContext {
    prio: Priority,
    allow_hostile: bool,
    spin_budget_us: u64,
}

impl AcquireContext {
    /// Acquire at `prio`, no spinning, no hostile takeover.
    pub const fn new(prio: Priority) -> Self {
        Self {
            prio,
            allow_hostile: false,
            spin_budget_us: 0,
        }
    }

    /// Allow seizing the console from an owner stuck in an unsafe region.
    pub const fn allow_hostile(mut self, allow: bool) -> Self {
        self.allow_hostile = allow;
        self
    }

    /// How long to wait for an unsafe lower-priority owner to hand over.
    pub const fn spin_budget_us(mut self, us: u64) -> Self {
        self.spin_budget_us = us;
        self
    }

    #[inline]
    pub const fn prio(&self) -> Priority {
        self.prio
    }

    #[inline]
    pub const fn hostile_allowed(&self) -> bool {
        self.allow_hostile
    }

    #[inline]
    pub const fn spin_budget(&self) -> u64 {
        self.spin_budget_us
    }
}

/// Why an acquisition did not succeed.
///
/// Denial is a normal outcome: the caller defers to the console's worker or
/// tries again later.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Denied {
    /// Owned, or requested, at equal or higher priority.
    Busy { holder: Priority },
    /// A lower-priority owner stayed in its unsafe region for the whole spin
    /// budget and hostile takeover was not allowed.
    Timeout,
    /// Another core is handling a fatal error.
    PanicElsewhere,
    /// Lost too many compare-and-swap races.
    Contended,
}

impl fmt::Display for Denied {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Denied::Busy { holder } => write!(f, "busy at {} priority", holder),
            Denied::Timeout => f.write_str("owner did not leave its unsafe region"),
            Denied::PanicElsewhere => f.write_str("panic in progress on another core"),
            Denied::Contended => f.write_str("too many lost races"),
        }
    }
}

/// Ownership arbiter shared by all consoles of a printer.
pub struct Arbiter {
    cores: Arc<dyn CoreContext>,
    escalation: Escalation,
    config: ArbiterConfig,
}

/// Raw result of a successful acquisition.
struct Acquired {
    id: OwnerId,
    snapshot: OwnerState,
    unsafe_takeover: bool,
}

impl Arbiter {
    pub fn new(cores: Arc<dyn CoreContext>) -> Self {
        Self::with_config(cores, ArbiterConfig::new())
    }

    pub fn with_config(cores: Arc<dyn CoreContext>, config: ArbiterConfig) -> Self {
        let escalation = Escalation::new(cores.core_count());
        Self {
            cores,
            escalation,
            config,
        }
    }

    #[inline]
    pub fn cores(&self) -> &dyn CoreContext {
        &*self.cores
    }

    #[inline]
    pub fn escalation(&self) -> &Escalation {
        &self.escalation
    }

    #[inline]
    pub fn config(&self) -> &ArbiterConfig {
        &self.config
    }

    #[inline]
    pub fn current_core(&self) -> CoreId {
        self.cores.current_core()
    }

    /// Priority the calling context prints at.
    #[inline]
    pub fn default_priority(&self) -> Priority {
        self.escalation.default_priority(self.current_core())
    }

    /// Try to become owner of `console`.
    pub fn acquire<'c>(&'c self, console: &'c Console, ctx: AcquireContext) -> Result<ConsoleOwner<'c>, Denied> {
        let acquired = self.try_acquire(console, ctx)?;
        Ok(ConsoleOwner {
            console,
            arbiter: self,
            ctx,
            id: acquired.id,
            snapshot: acquired.snapshot,
            unsafe_takeover: acquired.unsafe_takeover,
            staging_lost: false,
        })
    }

    fn try_acquire(&self, console: &Console, ctx: AcquireContext) -> Result<Acquired, Denied> {
        let core = self.current_core();
        let prio = ctx.prio;
        debug_assert!(prio != Priority::None, "acquire at priority none");

        if self.escalation.other_core_in_panic(core) {
            return Err(Denied::PanicElsewhere);
        }

        let retry_limit = self.config.acquire_retry_limit();
        let mut retries = 0u32;
        let mut requested = false;
        let mut deadline = 0u64;

        loop {
            let cur = console.state.load();

            // Our own pending request does not block us.
            let waiter = match cur.req_prio() {
                p if requested && p == prio => Priority::None,
                p => p,
            };
            if cur.prio() >= prio || waiter >= prio {
                if requested {
                    withdraw_request(console, prio);
                }
                return Err(Denied::Busy {
                    holder: cur.prio().max(waiter),
                });
            }

            let hostile;
            let new = if !cur.is_owned() || !cur.is_unsafe() {
                hostile = false;
                cur.acquired_by(core, prio)
                    .with_req_prio(Priority::None)
                    .with_unsafe_takeover(false)
            } else if !requested && ctx.spin_budget_us > 0 {
                match console.state.compare_exchange(cur, cur.with_req_prio(prio)) {
                    Ok(()) => {
                        requested = true;
                        deadline = self.cores.now_us().saturating_add(ctx.spin_budget_us);
                    }
                    Err(_) => {
                        retries += 1;
                        if retries > retry_limit {
                            return self.contended(console, core, ctx, requested);
                        }
                    }
                }
                continue;
            } else if requested && self.cores.now_us() < deadline {
                self.cores.relax();
                continue;
            } else if ctx.allow_hostile {
                hostile = true;
                cur.acquired_by(core, prio)
                    .with_req_prio(Priority::None)
                    .with_unsafe_takeover(true)
            } else {
                if requested {
                    withdraw_request(console, prio);
                }
                return Err(Denied::Timeout);
            };

            match console.state.compare_exchange(cur, new) {
                Ok(()) => {
                    if hostile {
                        log::warn!(
                            "console {}: {} context on core {} seized ownership from unsafe {} owner on core {}",
                            console.name(),
                            prio,
                            core,
                            cur.prio(),
                            cur.core()
                        );
                    }
                    return Ok(Acquired {
                        id: OwnerId {
                            core,
                            prio,
                            generation: new.generation(),
                        },
                        snapshot: cur,
                        unsafe_takeover: hostile || cur.unsafe_takeover(),
                    });
                }
                Err(_) => {
                    retries += 1;
                    if retries > retry_limit {
                        return self.contended(console, core, ctx, requested);
                    }
                }
            }
        }
    }

    /// Retry budget exhausted. Only a hostile panic context gets through, and
    /// never past another Panic owner.
    fn contended(&self, console: &Console, core: CoreId, ctx: AcquireContext, requested: bool) -> Result<Acquired, Denied> {
        if !(ctx.allow_hostile && ctx.prio == Priority::Panic) {
            if requested {
                withdraw_request(console, ctx.prio);
            }
            log::trace!("console {}: acquisition on core {} gave up after lost races", console.name(), core);
            return Err(Denied::Contended);
        }

        // Other cores are refused while the panic runs, so the word settles.
        let mut cur = console.state.load();
        let new = loop {
            if cur.prio() >= Priority::Panic {
                if requested {
                    withdraw_request(console, Priority::Panic);
                }
                return Err(Denied::Busy { holder: cur.prio() });
            }
            let new = cur
                .acquired_by(core, Priority::Panic)
                .with_req_prio(Priority::None)
                .with_unsafe_takeover(cur.is_owned());
            match console.state.compare_exchange(cur, new) {
                Ok(()) => break new,
                Err(actual) => cur = actual,
            }
        };
        log::warn!(
            "console {}: forced panic ownership on core {} (previous owner {} on core {})",
            console.name(),
            core,
            cur.prio(),
            cur.core()
        );
        Ok(Acquired {
            id: OwnerId {
                core,
                prio: Priority::Panic,
                generation: new.generation(),
            },
            snapshot: cur,
            unsafe_takeover: cur.is_owned() || cur.unsafe_takeover(),
        })
    }
}

/// Clear a handover request we made, unless someone replaced it.
fn withdraw_request(console: &Console, prio: Priority) {
    loop {
        let cur = console.state.load();
        if cur.req_prio() != prio {
            return;
        }
        if console.state.compare_exchange(cur, cur.with_req_prio(Priority::None)).is_ok() {
            return;
        }
    }
}

/// A context currently (or formerly) holding ownership of a console.
///
/// Dropping it releases ownership if it is still held.
pub struct ConsoleOwner<'c> {
    console: &'c Console,
    arbiter: &'c Arbiter,
    ctx: AcquireContext,
    id: OwnerId,
    snapshot: OwnerState,
    unsafe_takeover: bool,
    staging_lost: bool,
}

impl<'c> ConsoleOwner<'c> {
    #[inline]
    pub fn console(&self) -> &'c Console {
        self.console
    }

    #[inline]
    pub fn id(&self) -> OwnerId {
        self.id
    }

    #[inline]
    pub fn priority(&self) -> Priority {
        self.id.prio
    }

    /// State word observed just before this acquisition.
    #[inline]
    pub fn snapshot(&self) -> OwnerState {
        self.snapshot
    }

    /// True if a previous owner was abandoned mid-write. The device may need
    /// resynchronizing before use.
    #[inline]
    pub fn unsafe_takeover(&self) -> bool {
        self.unsafe_takeover
    }

    /// True if the last [`ConsoleOwner::reacquire`] had to acquire anew.
    /// Anything staged before it must not be printed.
    #[inline]
    pub fn staging_lost(&self) -> bool {
        self.staging_lost
    }

    /// Still the owner?
    #[inline]
    pub fn is_owner(&self) -> bool {
        self.console.state.load().is_owned_by(self.id)
    }

    /// Mark the start of a hardware access. `false` if ownership was lost.
    #[inline]
    pub fn enter_unsafe(&self) -> bool {
        self.update_unsafe(true)
    }

    /// Mark the end of a hardware access.
    ///
    /// `false` if ownership was lost while unsafe. The access must then be
    /// considered void.
    #[inline]
    pub fn exit_unsafe(&self) -> bool {
        self.update_unsafe(false)
    }

    fn update_unsafe(&self, value: bool) -> bool {
        loop {
            let cur = self.console.state.load();
            if !cur.is_owned_by(self.id) {
                return false;
            }
            if cur.is_unsafe() == value {
                return true;
            }
            if self.console.state.compare_exchange(cur, cur.with_unsafe(value)).is_ok() {
                return true;
            }
        }
    }

    /// Should the owner keep going?
    ///
    /// `false` if ownership is gone or a higher-priority context asked for a
    /// handover. Advisory: wind down to a safe point and release.
    #[inline]
    pub fn can_proceed(&self) -> bool {
        let cur = self.console.state.load();
        cur.is_owned_by(self.id) && cur.req_prio() <= self.id.prio
    }

    /// Get ownership back at the original priority, waiting as long as it
    /// takes.
    ///
    /// Used by holders that must finish a follow-up obligation (e.g.
    /// re-enabling something they disabled). If ownership had to be acquired
    /// anew, [`ConsoleOwner::staging_lost`] becomes true.
    pub fn reacquire(&mut self) {
        if self.is_owner() {
            return;
        }
        loop {
            match self.arbiter.try_acquire(self.console, self.ctx) {
                Ok(acquired) => {
                    self.id = acquired.id;
                    self.snapshot = acquired.snapshot;
                    self.unsafe_takeover = acquired.unsafe_takeover;
                    self.staging_lost = true;
                    return;
                }
                Err(_) => self.arbiter.cores().relax(),
            }
        }
    }

    /// Give up ownership. A no-op if it was already taken away.
    pub fn release(self) {
        drop(self);
    }

    fn release_inner(&self) {
        loop {
            let cur = self.console.state.load();
            if !cur.is_owned_by(self.id) {
                return;
            }
            if self.console.state.compare_exchange(cur, cur.released()).is_ok() {
                return;
            }
        }
    }
}

impl Drop for ConsoleOwner<'_> {
    fn drop(&mut self) {
        self.release_inner();
    }
}

impl fmt::Debug for ConsoleOwner<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConsoleOwner")
            .field("console", &self.console.name())
            .field("id", &self.id)
            .field("unsafe_takeover", &self.unsafe_takeover)
            .finish()
    }
}
