//! Log record store.
//!
//! # Architecture
//!
//! ```text
//! producers            LogStore                 consoles
//! ─────────            ────────                 ────────
//!
//! append() ─────▶ [s0][s1][s2]...[sN] ◀───── read(cursor)
//!                 first_seq    next_reserve_seq
//! ```
//!
//! The arbiter only needs the [`LogStore`] contract: sequences are 64-bit,
//! monotonic, and a read below `first_seq()` means the record was trimmed.
//! [`MemoryLogStore`] is a fixed-size ring that trims the oldest record when
//! full, used on host and by tests.

use crate::state::Priority;

/// Maximum message length.
pub const MAX_MSG_LEN: usize = 120;

/// Default ring size (number of records).
pub const LOG_BUFFER_SIZE: usize = 256;

/// Log level.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord)]
#[repr(u8)]
pub enum LogLevel {
    Error = 0,
    Warn = 1,
    Info = 2,
    Debug = 3,
    Trace = 4,
}

impl LogLevel {
    /// Convert to string for output.
    pub fn as_str(self) -> &'static str {
        match self {
            LogLevel::Error => "ERROR",
            LogLevel::Warn => "WARN",
            LogLevel::Info => "INFO",
            LogLevel::Debug => "DEBUG",
            LogLevel::Trace => "TRACE",
        }
    }
}

impl From<log::Level> for LogLevel {
    fn from(level: log::Level) -> Self {
        match level {
            log::Level::Error => LogLevel::Error,
            log::Level::Warn => LogLevel::Warn,
            log::Level::Info => LogLevel::Info,
            log::Level::Debug => LogLevel::Debug,
            log::Level::Trace => LogLevel::Trace,
        }
    }
}

/// A single stored record.
#[derive(Clone, Copy)]
pub struct LogRecord {
    /// Sequence number assigned at append.
    pub seq: u64,
    /// Timestamp in microseconds.
    pub timestamp_us: u64,
    /// Log level.
    pub level: LogLevel,
    /// Priority of the producer when the record was stored.
    pub prio: Priority,
    /// Message length.
    pub len: u8,
    /// Message bytes (not null-terminated).
    pub msg: [u8; MAX_MSG_LEN],
}

impl LogRecord {
    pub const EMPTY: Self = Self {
        seq: 0,
        timestamp_us: 0,
        level: LogLevel::Info,
        prio: Priority::Normal,
        len: 0,
        msg: [0; MAX_MSG_LEN],
    };

    /// Message bytes.
    #[inline]
    pub fn message(&self) -> &[u8] {
        &self.msg[..self.len as usize]
    }

    /// Message as text.
    pub fn text(&self) -> &str {
        core::str::from_utf8(self.message()).unwrap_or("<invalid utf8>")
    }
}

impl core::fmt::Debug for LogRecord {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("LogRecord")
            .field("seq", &self.seq)
            .field("timestamp_us", &self.timestamp_us)
            .field("level", &self.level)
            .field("prio", &self.prio)
            .field("msg", &self.text())
            .finish()
    }
}

/// The append-only record store consoles print from.
pub trait LogStore: Send + Sync {
    /// Store a record and return its sequence number. Messages longer than
    /// [`MAX_MSG_LEN`] are truncated.
    fn append(&self, timestamp_us: u64, level: LogLevel, prio: Priority, msg: &[u8]) -> u64;

    /// Earliest sequence still readable. Everything below was trimmed.
    fn first_seq(&self) -> u64;

    /// Sequence the next append will receive.
    fn next_reserve_seq(&self) -> u64;

    /// Read record `seq`.
    ///
    /// `None` below [`LogStore::first_seq`] means trimmed; at or above
    /// [`LogStore::next_reserve_seq`] it means not yet stored.
    fn read(&self, seq: u64) -> Option<LogRecord>;
}

struct Ring<const N: usize> {
    entries: [LogRecord; N],
    /// Sequence of the very first record.
    start: u64,
    head: u64,
}

impl<const N: usize> Ring<N> {
    fn first(&self) -> u64 {
        self.head.saturating_sub(N as u64).max(self.start)
    }
}

/// Fixed-size ring store. Trims the oldest record when full.
///
/// Appends and reads serialize on a short spinlock that only guards the
/// copy of one record.
pub struct MemoryLogStore<const N: usize = LOG_BUFFER_SIZE> {
    ring: spin::Mutex<Ring<N>>,
}

impl<const N: usize> MemoryLogStore<N> {
    /// Create a new empty store.
    pub const fn new() -> Self {
        Self::starting_at(0)
    }

    /// Create an empty store whose first record gets sequence `seq`.
    pub const fn starting_at(seq: u64) -> Self {
        assert!(N > 0, "store needs at least one slot");

        Self {
            ring: spin::Mutex::new(Ring {
                entries: [LogRecord::EMPTY; N],
                start: seq,
                head: seq,
            }),
        }
    }

    /// Get the store capacity.
    #[inline]
    pub const fn capacity(&self) -> usize {
        N
    }
}

impl<const N: usize> LogStore for MemoryLogStore<N> {
    fn append(&self, timestamp_us: u64, level: LogLevel, prio: Priority, msg: &[u8]) -> u64 {
        let len = msg.len().min(MAX_MSG_LEN);
        let mut ring = self.ring.lock();
        let seq = ring.head;

        let entry = &mut ring.entries[(seq % N as u64) as usize];
        entry.seq = seq;
        entry.timestamp_us = timestamp_us;
        entry.level = level;
        entry.prio = prio;
        entry.len = len as u8;
        entry.msg[..len].copy_from_slice(&msg[..len]);

        ring.head = seq + 1;
        seq
    }

    fn first_seq(&self) -> u64 {
        self.ring.lock().first()
    }

    fn next_reserve_seq(&self) -> u64 {
        self.ring.lock().head
    }

    fn read(&self, seq: u64) -> Option<LogRecord> {
        let ring = self.ring.lock();
        if seq >= ring.head || seq < ring.first() {
            return None;
        }
        Some(ring.entries[(seq % N as u64) as usize])
    }
}

impl<const N: usize> Default for MemoryLogStore<N> {
    fn default() -> Self {
        Self::new()
    }
}
