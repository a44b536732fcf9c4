//! # console-arbiter
//!
//! Priority-aware console ownership for printing log records from any
//! execution context: tasks, interrupts, emergency sections and the core
//! handling a fatal error.
//!
//! ## Architecture
//!
//! Every output device ([`Console`]) carries one packed atomic ownership
//! word. All hardware access goes through the [`Arbiter`]:
//! - At most one owner per console at a time
//! - A context only takes a console from a strictly lower priority owner
//! - An owner in an unsafe region (mid-write) is asked to hand over, and is
//!   only seized by force on the panic core
//! - No global print lock; waiting is a bounded spin
//!
//! Records come from a [`LogStore`]. Each console tracks its own next
//! sequence, so a slow console never holds back a fast one.

pub mod arbiter;
pub mod config;
pub mod console;
pub mod cpu;
pub mod emit;
pub mod escalation;
pub mod logger;
pub mod printer;
pub mod seq;
pub mod state;
pub mod store;
pub mod uart_console;
mod worker;

pub use arbiter::{AcquireContext, Arbiter, ConsoleOwner, Denied};
pub use config::ArbiterConfig;
pub use console::{Console, ConsoleDriver, ConsoleError, ConsoleFlags, StagingBuf, WriteContext};
pub use cpu::CoreContext;
#[cfg(not(target_os = "espidf"))]
pub use cpu::ThreadCores;
#[cfg(target_os = "espidf")]
pub use cpu::EspCores;
pub use emit::EmitOutcome;
pub use escalation::{Escalation, EscalationSnapshot};
pub use logger::ArbiterLogger;
pub use printer::{DeviceOwner, EmergencySection, Printer, MAX_CONSOLES};
pub use seq::{widen_seq, SeqCursor};
pub use state::{CoreId, OwnerId, OwnerState, Priority};
pub use store::{LogLevel, LogRecord, LogStore, MemoryLogStore};
pub use uart_console::{UartConsoleConfig, WriterConsole};
