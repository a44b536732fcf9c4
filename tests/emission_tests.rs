//! Atomic emission and flush tests

mod common;

use std::sync::atomic::Ordering;

use console_arbiter::{
    AcquireContext, Console, ConsoleError, ConsoleFlags, EmitOutcome, LogStore, Priority, ThreadCores,
    MAX_CONSOLES,
};

use common::{FailingDriver, RecordingDriver};

/// A console whose device rejects every write neither blocks the others nor
/// loses its place
#[test]
fn test_failing_console_does_not_block_others() {
    let (printer, store) = common::printer::<64>(1);
    let (bad, attempts) = FailingDriver::new();
    let (good, rec) = RecordingDriver::new();
    let bad = printer.register(Console::new("bad", ConsoleFlags::ATOMIC, bad)).unwrap();
    let good = printer.register(Console::new("good", ConsoleFlags::ATOMIC, good)).unwrap();

    common::append(&*store, 5, "r");
    let printed = printer.flush_all(store.next_reserve_seq(), false);

    assert_eq!(printed, 5);
    assert_eq!(good.next_seq(&*store), 5);
    assert_eq!(rec.messages(), vec!["r0", "r1", "r2", "r3", "r4"]);

    // One attempt, no retry loop, nothing counted as dropped.
    assert_eq!(attempts.load(Ordering::SeqCst), 1);
    assert_eq!(bad.next_seq(&*store), 0);
    assert_eq!(bad.dropped(), 0);
    assert!(!bad.state().is_owned());
    assert!(!good.state().is_owned());
}

/// Trimmed records are reported once, on the next line printed
#[test]
fn test_trimmed_records_notice() {
    let (printer, store) = common::printer::<4>(1);
    let (driver, rec) = RecordingDriver::new();
    let console = printer.register(Console::new("c", ConsoleFlags::ATOMIC, driver)).unwrap();

    common::append(&*store, 10, "m");
    assert_eq!(store.first_seq(), 6);
    printer.flush_all(store.next_reserve_seq(), false);

    let writes = rec.writes();
    assert_eq!(writes.len(), 4);
    assert!(writes[0].starts_with("** 6 records dropped **\n"));
    assert!(writes[0].ends_with("INFO: m6\n"));
    assert!(!writes[1].contains("dropped"));
    assert_eq!(console.dropped(), 0);
    assert_eq!(console.dropped_total(), 6);
    assert_eq!(console.next_seq(&*store), 10);
}

/// The dropped notice survives a failed write
#[test]
fn test_dropped_notice_kept_until_printed() {
    let (printer, store) = common::printer::<4>(1);
    let (driver, attempts) = FailingDriver::new();
    let console = printer.register(Console::new("c", ConsoleFlags::ATOMIC, driver)).unwrap();

    common::append(&*store, 6, "m");
    assert_eq!(printer.emit_next(&console), EmitOutcome::Failed);
    assert_eq!(attempts.load(Ordering::SeqCst), 1);

    // Skipped forward, but the notice is still owed.
    assert_eq!(console.next_seq(&*store), 2);
    assert_eq!(console.dropped(), 2);
}

/// Every record is printed once, in store order, with the cursor only ever
/// moving forward
#[test]
fn test_cursor_monotonic_under_concurrent_producers() {
    let (printer, store) = common::printer::<256>(4);
    let (driver, rec) = RecordingDriver::new();
    let console = printer.register(Console::new("c", ConsoleFlags::ATOMIC, driver)).unwrap();

    let done = std::sync::atomic::AtomicBool::new(false);
    std::thread::scope(|s| {
        let watcher = s.spawn(|| {
            let mut last = 0;
            while !done.load(Ordering::Acquire) {
                let seq = console.next_seq(&*store);
                assert!(seq >= last, "cursor went back from {} to {}", last, seq);
                last = seq;
            }
        });

        let producers: Vec<_> = (0..4)
            .map(|core| {
                let printer = printer.clone();
                s.spawn(move || {
                    ThreadCores::bind(core);
                    for i in 0..40 {
                        console_arbiter::pr_info!(printer, "c{}-{}", core, i);
                    }
                })
            })
            .collect();
        for p in producers {
            p.join().unwrap();
        }
        done.store(true, Ordering::Release);
        watcher.join().unwrap();
    });

    printer.flush_all(store.next_reserve_seq(), false);

    let expected: Vec<String> = (0..160)
        .map(|seq| store.read(seq).unwrap().text().to_owned())
        .collect();
    assert_eq!(rec.messages(), expected);
}

/// EmitNext does nothing inside an emergency section
#[test]
fn test_emit_next_deferred_in_emergency() {
    let (printer, store) = common::printer::<16>(1);
    let (driver, rec) = RecordingDriver::new();
    let console = printer.register(Console::new("c", ConsoleFlags::ATOMIC, driver)).unwrap();
    common::append(&*store, 1, "m");

    printer.enter_emergency();
    assert_eq!(printer.emit_next(&console), EmitOutcome::Deferred);
    assert_eq!(rec.count(), 0);
    printer.exit_emergency();

    assert_eq!(rec.count(), 1);
    assert_eq!(printer.emit_next(&console), EmitOutcome::CaughtUp);
}

/// Disabled consoles and consoles without an atomic path are skipped
#[test]
fn test_flush_skips_unavailable_consoles() {
    let (printer, store) = common::printer::<16>(1);
    let (off, off_rec) = RecordingDriver::new();
    let off = printer.register(Console::new("off", ConsoleFlags::ATOMIC, off)).unwrap();
    printer.disable(&off);

    common::append(&*store, 3, "m");
    assert_eq!(printer.flush_all(store.next_reserve_seq(), false), 0);
    assert_eq!(printer.emit_next(&off), EmitOutcome::Unavailable);
    assert_eq!(off_rec.count(), 0);

    printer.enable(&off);
    assert_eq!(printer.flush_all(store.next_reserve_seq(), false), 3);
}

/// Flushing stops at the requested target
#[test]
fn test_flush_stops_at_target() {
    let (printer, store) = common::printer::<16>(1);
    let (driver, rec) = RecordingDriver::new();
    let console = printer.register(Console::new("c", ConsoleFlags::ATOMIC, driver)).unwrap();

    common::append(&*store, 5, "m");
    assert_eq!(printer.flush_all(2, false), 2);
    assert_eq!(console.next_seq(&*store), 2);
    assert_eq!(rec.count(), 2);
}

/// Only the panic core's final flush seizes a console stuck mid-write
#[test]
fn test_hostile_only_on_panic_core() {
    let (printer, store) = common::printer::<16>(2);
    let (driver, rec) = RecordingDriver::new();
    let console = printer.register(Console::new("c", ConsoleFlags::ATOMIC, driver)).unwrap();
    common::append(&*store, 3, "m");

    let stuck = printer
        .arbiter()
        .acquire(&console, AcquireContext::new(Priority::Normal))
        .unwrap();
    assert!(stuck.enter_unsafe());

    ThreadCores::bind(1);
    {
        let _section = printer.emergency();
        assert_eq!(printer.flush_all(store.next_reserve_seq(), true), 0);
    }
    assert!(stuck.is_owner());
    assert_eq!(rec.count(), 0);

    assert_eq!(printer.panic_flush(), 3);
    ThreadCores::bind(0);

    assert!(!stuck.exit_unsafe());
    // The seizing write and the next acquisition both see the takeover.
    assert_eq!(rec.takeovers.load(Ordering::SeqCst), 2);
    assert_eq!(*rec.priorities.lock().unwrap(), vec![Priority::Panic; 3]);
}

/// Inline printing from notify_new_record is Normal priority only
#[test]
fn test_notify_prints_inline_at_normal() {
    let (printer, _store) = common::printer::<16>(1);
    let (driver, rec) = RecordingDriver::new();
    printer.register(Console::new("c", ConsoleFlags::ATOMIC, driver)).unwrap();

    console_arbiter::pr_info!(printer, "now");
    assert_eq!(rec.messages(), vec!["now"]);
}

/// The device lock bridge holds the console unsafe and flushes on release
#[test]
fn test_device_lock_bridge() {
    let (printer, _store) = common::printer::<16>(1);
    let (driver, rec) = RecordingDriver::new();
    let console = printer.register(Console::new("c", ConsoleFlags::ATOMIC, driver)).unwrap();

    let guard = printer.on_device_lock_acquired(&console);
    assert!(console.state().is_unsafe());
    assert!(guard.can_proceed());

    console_arbiter::pr_info!(printer, "during reconfig");
    assert_eq!(rec.count(), 0);

    printer.on_device_lock_released(guard);
    assert!(!console.state().is_owned());
    assert_eq!(rec.messages(), vec!["during reconfig"]);
}

#[test]
fn test_register_errors() {
    let (printer, _store) = common::printer::<16>(1);

    let (d, _) = RecordingDriver::new();
    printer.register(Console::new("dup", ConsoleFlags::ATOMIC, d)).unwrap();
    let (d, _) = RecordingDriver::new();
    let err = printer.register(Console::new("dup", ConsoleFlags::ATOMIC, d)).unwrap_err();
    assert!(matches!(err, ConsoleError::Duplicate(ref n) if n == "dup"));

    let (d, _) = RecordingDriver::new();
    let err = printer.register(Console::new("none", ConsoleFlags::empty(), d)).unwrap_err();
    assert_eq!(err.code(), "E04");

    for i in 1..MAX_CONSOLES {
        let (d, _) = RecordingDriver::new();
        printer.register(Console::new(format!("c{}", i), ConsoleFlags::ATOMIC, d)).unwrap();
    }
    let (d, _) = RecordingDriver::new();
    let err = printer.register(Console::new("extra", ConsoleFlags::ATOMIC, d)).unwrap_err();
    assert!(matches!(err, ConsoleError::TableFull(MAX_CONSOLES)));

    assert!(printer.unregister("dup").is_ok());
    assert!(matches!(printer.unregister("dup"), Err(ConsoleError::NotRegistered(_))));
    assert_eq!(printer.consoles().len(), MAX_CONSOLES - 1);
}

/// A new console starts at the store's first available record
#[test]
fn test_register_starts_at_first_seq() {
    let (printer, store) = common::printer::<4>(1);
    common::append(&*store, 7, "m");

    let (driver, _) = RecordingDriver::new();
    let console = printer.register(Console::new("late", ConsoleFlags::ATOMIC, driver)).unwrap();
    assert_eq!(console.next_seq(&*store), 3);
    assert_eq!(console.dropped(), 0);
}
