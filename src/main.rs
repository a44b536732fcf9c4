//! console-demo - prints from several cores through the console arbiter
//!
//! Host: two simulated cores share one stdout console. Core 1 reports from
//! inside an emergency section while core 0 keeps logging.
//!
//! ESP-IDF: one UART console on GPIO6, fed by the `log` facade.

use std::sync::Arc;

use console_arbiter::{logger, pr_info, pr_warn, Console, ConsoleFlags, MemoryLogStore, Printer};

#[cfg(not(target_os = "espidf"))]
fn main() -> Result<(), Box<dyn std::error::Error>> {
    use console_arbiter::{LogStore, ThreadCores, WriterConsole};

    let cores = Arc::new(ThreadCores::new(2));
    let store = Arc::new(MemoryLogStore::<256>::new());
    let printer = Printer::new(store, cores);

    let flags = ConsoleFlags::ATOMIC | ConsoleFlags::THREADED;
    printer.register(Console::new("stdout", flags, WriterConsole::new(std::io::stdout())))?;
    logger::init(printer.clone(), log::LevelFilter::Info)?;

    log::info!("{} starting", env!("VERSION_STRING"));

    let p = printer.clone();
    let core1 = std::thread::Builder::new().name("core1".into()).spawn(move || {
        ThreadCores::bind(1);
        for i in 0..5 {
            pr_info!(p, "core 1 tick {}", i);
        }
        let _section = p.emergency();
        pr_warn!(p, "core 1 emergency report: {} records stored", p.store().next_reserve_seq());
    })?;

    for i in 0..5 {
        log::info!("core 0 tick {}", i);
    }

    if core1.join().is_err() {
        log::error!("core 1 thread panicked");
    }
    printer.shutdown();
    Ok(())
}

#[cfg(target_os = "espidf")]
fn main() -> Result<(), esp_idf_svc::sys::EspError> {
    use console_arbiter::uart_console::{init_uart_console, UartConsole, UartConsoleConfig};
    use console_arbiter::EspCores;
    use esp_idf_svc::hal::peripherals::Peripherals;

    // Initialize ESP-IDF
    esp_idf_svc::sys::link_patches();

    let peripherals = Peripherals::take()?;
    let uart = init_uart_console(peripherals.uart1, peripherals.pins.gpio6, &UartConsoleConfig::default())?;

    let store = Arc::new(MemoryLogStore::<256>::new());
    let printer = Printer::new(store, Arc::new(EspCores));
    let flags = ConsoleFlags::ATOMIC | ConsoleFlags::THREADED;
    if let Err(err) = printer.register(Console::new("uart1", flags, UartConsole::new(uart))) {
        pr_warn!(printer, "console registration failed: {} ({})", err, err.code());
    }
    if logger::init(printer.clone(), log::LevelFilter::Info).is_err() {
        pr_warn!(printer, "logger already installed");
    }

    log::info!("{} starting", env!("VERSION_STRING"));

    let mut tick = 0u32;
    loop {
        pr_info!(printer, "alive {}", tick);
        tick = tick.wrapping_add(1);
        // SAFETY: plain FreeRTOS delay from task context
        unsafe {
            esp_idf_svc::sys::vTaskDelay(1000);
        }
    }
}
