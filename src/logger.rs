//! `log` facade backend and the printk macros.
//!
//! # Architecture
//!
//! ```text
//! log::info!() ──▶ ArbiterLogger ──▶ Printer::printk() ──▶ store + consoles
//! printk!()    ─────────────────────▶ Printer::printk()
//! ```
//!
//! # Rules
//!
//! - Records logged by this crate itself are never routed back into the
//!   printer; a hostile-takeover warning must not recurse into the arbiter
//! - Messages longer than [`crate::store::MAX_MSG_LEN`] are truncated on a
//!   character boundary

use log::{LevelFilter, Log, Metadata, Record, SetLoggerError};

use crate::printer::Printer;

/// Format a message into a buffer.
///
/// Returns the number of bytes written.
#[inline]
pub fn format_to_buffer(buf: &mut [u8], args: core::fmt::Arguments<'_>) -> usize {
    use core::fmt::Write;

    struct BufWriter<'a> {
        buf: &'a mut [u8],
        pos: usize,
    }

    impl<'a> Write for BufWriter<'a> {
        fn write_str(&mut self, s: &str) -> core::fmt::Result {
            let remaining = self.buf.len() - self.pos;
            let mut to_write = s.len().min(remaining);
            while !s.is_char_boundary(to_write) {
                to_write -= 1;
            }
            self.buf[self.pos..self.pos + to_write].copy_from_slice(&s.as_bytes()[..to_write]);
            self.pos += to_write;
            Ok(())
        }
    }

    let mut writer = BufWriter { buf, pos: 0 };
    let _ = core::fmt::write(&mut writer, args);
    writer.pos
}

/// Target prefix of this crate's own diagnostics.
const OWN_TARGET: &str = env!("CARGO_CRATE_NAME");

fn is_own_target(target: &str) -> bool {
    target
        .strip_prefix(OWN_TARGET)
        .map_or(false, |rest| rest.is_empty() || rest.starts_with("::"))
}

/// `log::Log` implementation printing through a [`Printer`].
pub struct ArbiterLogger {
    printer: Printer,
    level: LevelFilter,
}

impl ArbiterLogger {
    pub fn new(printer: Printer, level: LevelFilter) -> Self {
        Self { printer, level }
    }
}

impl Log for ArbiterLogger {
    fn enabled(&self, metadata: &Metadata<'_>) -> bool {
        metadata.level() <= self.level && !is_own_target(metadata.target())
    }

    fn log(&self, record: &Record<'_>) {
        if !self.enabled(record.metadata()) {
            return;
        }
        self.printer.printk(record.level().into(), *record.args());
    }

    fn flush(&self) {
        self.printer.request_flush();
    }
}

/// Install an [`ArbiterLogger`] as the global logger.
pub fn init(printer: Printer, level: LevelFilter) -> Result<(), SetLoggerError> {
    log::set_boxed_logger(Box::new(ArbiterLogger::new(printer, level)))?;
    log::set_max_level(level);
    Ok(())
}

/// Print through a printer at an explicit level.
///
/// # Example
///
/// ```ignore
/// printk!(printer, LogLevel::Info, "core {} online", core);
/// ```
#[macro_export]
macro_rules! printk {
    ($printer:expr, $level:expr, $($arg:tt)*) => {
        $printer.printk($level, format_args!($($arg)*))
    };
}

/// Print at error level.
#[macro_export]
macro_rules! pr_err {
    ($printer:expr, $($arg:tt)*) => {
        $crate::printk!($printer, $crate::store::LogLevel::Error, $($arg)*)
    };
}

/// Print at warn level.
#[macro_export]
macro_rules! pr_warn {
    ($printer:expr, $($arg:tt)*) => {
        $crate::printk!($printer, $crate::store::LogLevel::Warn, $($arg)*)
    };
}

/// Print at info level.
#[macro_export]
macro_rules! pr_info {
    ($printer:expr, $($arg:tt)*) => {
        $crate::printk!($printer, $crate::store::LogLevel::Info, $($arg)*)
    };
}
