//! Shared test drivers and setup

#![allow(dead_code)]

use std::io;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use console_arbiter::{
    ArbiterConfig, ConsoleDriver, LogLevel, LogStore, MemoryLogStore, Printer, Priority, ThreadCores,
    WriteContext,
};

pub fn init_logging() {
    let _ = env_logger::builder().is_test(true).try_init();
}

/// Printer over `cores` simulated cores with short spin budgets.
pub fn printer<const N: usize>(cores: usize) -> (Printer, Arc<MemoryLogStore<N>>) {
    init_logging();
    let store = Arc::new(MemoryLogStore::<N>::new());
    let config = ArbiterConfig::new();
    config.flush_spin_us.store(200, Ordering::Relaxed);
    config.final_spin_us.store(2_000, Ordering::Relaxed);
    let printer = Printer::with_config(store.clone(), Arc::new(ThreadCores::new(cores)), config);
    (printer, store)
}

/// Append `count` records straight to the store, bypassing notification.
pub fn append(store: &dyn LogStore, count: usize, tag: &str) {
    for i in 0..count {
        let msg = format!("{}{}", tag, i);
        store.append(0, LogLevel::Info, Priority::Normal, msg.as_bytes());
    }
}

/// Poll `cond` until it holds or `timeout` passes.
pub fn wait_for(timeout: Duration, mut cond: impl FnMut() -> bool) -> bool {
    let start = Instant::now();
    while start.elapsed() < timeout {
        if cond() {
            return true;
        }
        std::thread::sleep(Duration::from_millis(1));
    }
    cond()
}

/// What a recording driver saw.
#[derive(Clone, Default)]
pub struct Recorded {
    pub writes: Arc<Mutex<Vec<String>>>,
    pub takeovers: Arc<AtomicUsize>,
    pub priorities: Arc<Mutex<Vec<Priority>>>,
}

impl Recorded {
    pub fn writes(&self) -> Vec<String> {
        self.writes.lock().unwrap().clone()
    }

    pub fn count(&self) -> usize {
        self.writes.lock().unwrap().len()
    }

    /// Message part of every write, notices stripped.
    pub fn messages(&self) -> Vec<String> {
        self.writes()
            .iter()
            .filter_map(|w| w.lines().last().and_then(|l| l.split(": ").nth(1)).map(str::to_owned))
            .collect()
    }
}

/// Driver that records every write on both paths.
pub struct RecordingDriver {
    rec: Recorded,
}

impl RecordingDriver {
    pub fn new() -> (Self, Recorded) {
        let rec = Recorded::default();
        (Self { rec: rec.clone() }, rec)
    }

    fn record(&self, wctxt: &WriteContext<'_>) -> bool {
        if wctxt.unsafe_takeover() {
            self.rec.takeovers.fetch_add(1, Ordering::SeqCst);
        }
        self.rec.priorities.lock().unwrap().push(wctxt.priority());
        let text = String::from_utf8_lossy(wctxt.text()).into_owned();
        self.rec.writes.lock().unwrap().push(text);
        true
    }
}

impl ConsoleDriver for RecordingDriver {
    fn write_atomic(&self, wctxt: &mut WriteContext<'_>) -> bool {
        self.record(wctxt)
    }

    fn write_thread(&self, wctxt: &mut WriteContext<'_>) -> bool {
        self.record(wctxt)
    }
}

/// Driver whose device never accepts a write.
pub struct FailingDriver {
    pub attempts: Arc<AtomicUsize>,
}

impl FailingDriver {
    pub fn new() -> (Self, Arc<AtomicUsize>) {
        let attempts = Arc::new(AtomicUsize::new(0));
        (Self { attempts: attempts.clone() }, attempts)
    }
}

impl ConsoleDriver for FailingDriver {
    fn write_atomic(&self, _wctxt: &mut WriteContext<'_>) -> bool {
        self.attempts.fetch_add(1, Ordering::SeqCst);
        false
    }
}

/// Driver that detects two contexts inside the device at once.
pub struct ExclusiveDriver {
    busy: AtomicBool,
    pub overlaps: Arc<AtomicUsize>,
    pub writes: Arc<AtomicUsize>,
}

impl ExclusiveDriver {
    pub fn new() -> (Self, Arc<AtomicUsize>, Arc<AtomicUsize>) {
        let overlaps = Arc::new(AtomicUsize::new(0));
        let writes = Arc::new(AtomicUsize::new(0));
        (
            Self {
                busy: AtomicBool::new(false),
                overlaps: overlaps.clone(),
                writes: writes.clone(),
            },
            overlaps,
            writes,
        )
    }

    fn touch(&self) -> bool {
        if self.busy.swap(true, Ordering::SeqCst) {
            self.overlaps.fetch_add(1, Ordering::SeqCst);
        }
        for _ in 0..200 {
            std::hint::spin_loop();
        }
        self.writes.fetch_add(1, Ordering::SeqCst);
        self.busy.store(false, Ordering::SeqCst);
        true
    }
}

impl ConsoleDriver for ExclusiveDriver {
    fn write_atomic(&self, _wctxt: &mut WriteContext<'_>) -> bool {
        self.touch()
    }

    fn write_thread(&self, _wctxt: &mut WriteContext<'_>) -> bool {
        self.touch()
    }
}

/// Open/closed state of a [`StuckWriter`].
#[derive(Clone, Default)]
pub struct Gate {
    entered: Arc<AtomicBool>,
    open: Arc<AtomicBool>,
}

impl Gate {
    /// A write is blocked inside the device.
    pub fn entered(&self) -> bool {
        self.entered.load(Ordering::SeqCst)
    }

    /// Let blocked writes finish.
    pub fn release(&self) {
        self.open.store(true, Ordering::SeqCst);
    }
}

/// Writer whose device hangs until its gate is released.
pub struct StuckWriter {
    gate: Gate,
}

impl StuckWriter {
    pub fn new() -> (Self, Gate) {
        let gate = Gate::default();
        (Self { gate: gate.clone() }, gate)
    }
}

impl io::Write for StuckWriter {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.gate.entered.store(true, Ordering::SeqCst);
        while !self.gate.open.load(Ordering::SeqCst) {
            std::thread::sleep(Duration::from_millis(1));
        }
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}
