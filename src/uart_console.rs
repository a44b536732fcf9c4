//! Console drivers.
//!
//! - [`WriterConsole`]: any `std::io::Write` (stdout, a file, a `Vec<u8>` in
//!   tests)
//! - `UartConsole` (ESP-IDF only): UART TX on a GPIO
//!
//! # Hardware Setup
//!
//! ```text
//! ESP32-S3 GPIO6 (TX) ──────▶ USB-UART RX
//!                              └─▶ PC Serial Monitor
//! ```
//!
//! **WARNING**: GPIO6 conflicts with Octal PSRAM. Only use on Quad flash boards!
//!
//! Both drivers write in chunks and check [`WriteContext::can_proceed`]
//! between them, so a more urgent context waiting for the console gets it
//! at the next chunk boundary.
//!
//! The device lock inside a driver is only ever tried, never waited on. If
//! an owner that was taken over hostilely is still stuck inside the device,
//! the new owner's write fails instead of hanging.

use std::io;

use crate::console::{ConsoleDriver, WriteContext};

/// Bytes written between ownership checks.
pub const WRITE_CHUNK: usize = 32;

/// Console writing to a `std::io::Write`.
pub struct WriterConsole<W> {
    out: spin::Mutex<W>,
}

impl<W: io::Write + Send> WriterConsole<W> {
    pub fn new(out: W) -> Self {
        Self {
            out: spin::Mutex::new(out),
        }
    }

    /// Run `f` with the underlying writer.
    pub fn with<R>(&self, f: impl FnOnce(&mut W) -> R) -> R {
        f(&mut self.out.lock())
    }

    pub fn into_inner(self) -> W {
        self.out.into_inner()
    }

    fn write(&self, wctxt: &mut WriteContext<'_>) -> bool {
        let Some(mut out) = self.out.try_lock() else {
            return false;
        };
        for chunk in wctxt.text().chunks(WRITE_CHUNK) {
            if !wctxt.can_proceed() {
                return false;
            }
            if out.write_all(chunk).is_err() {
                return false;
            }
        }
        out.flush().is_ok()
    }
}

impl<W: io::Write + Send> ConsoleDriver for WriterConsole<W> {
    fn write_atomic(&self, wctxt: &mut WriteContext<'_>) -> bool {
        self.write(wctxt)
    }

    fn write_thread(&self, wctxt: &mut WriteContext<'_>) -> bool {
        self.write(wctxt)
    }
}

/// UART configuration for console output.
pub struct UartConsoleConfig {
    pub baud_rate: u32,
    pub tx_pin: u8,
}

impl Default for UartConsoleConfig {
    fn default() -> Self {
        Self {
            baud_rate: 115200,
            tx_pin: 6, // GPIO6 - UART TX (Quad flash, GPIO6 free for UART)
        }
    }
}

#[cfg(target_os = "espidf")]
pub use esp::{init_uart_console, UartConsole};

#[cfg(target_os = "espidf")]
mod esp {
    use super::*;
    use esp_idf_svc::hal::gpio;
    use esp_idf_svc::hal::peripheral::Peripheral;
    use esp_idf_svc::hal::uart::{self, UartTxDriver};

    /// Console writing to a UART TX driver.
    pub struct UartConsole {
        uart: spin::Mutex<UartTxDriver<'static>>,
    }

    impl UartConsole {
        pub fn new(uart: UartTxDriver<'static>) -> Self {
            Self {
                uart: spin::Mutex::new(uart),
            }
        }

        /// `blocking` waits for room in the driver's TX buffer. Otherwise
        /// bytes go straight to the TX FIFO, spinning while it is full; that
        /// path never sleeps, so it is usable with the scheduler suspended.
        fn write(&self, wctxt: &mut WriteContext<'_>, blocking: bool) -> bool {
            let Some(mut uart) = self.uart.try_lock() else {
                return false;
            };
            for chunk in wctxt.text().chunks(WRITE_CHUNK) {
                if !wctxt.can_proceed() {
                    return false;
                }
                let mut rest = chunk;
                while !rest.is_empty() {
                    let sent = if blocking { uart.write(rest) } else { uart.write_nb(rest) };
                    match sent {
                        Ok(0) if !wctxt.can_proceed() => return false,
                        Ok(n) => rest = &rest[n..],
                        Err(_) => return false,
                    }
                }
            }
            true
        }
    }

    impl ConsoleDriver for UartConsole {
        fn write_atomic(&self, wctxt: &mut WriteContext<'_>) -> bool {
            self.write(wctxt, false)
        }

        fn write_thread(&self, wctxt: &mut WriteContext<'_>) -> bool {
            self.write(wctxt, true)
        }
    }

    /// Initialize UART1 TX-only for console output.
    ///
    /// Returns a UartTxDriver configured for TX-only operation.
    pub fn init_uart_console(
        uart: impl Peripheral<P = uart::UART1> + 'static,
        tx_pin: impl Peripheral<P = impl gpio::OutputPin> + 'static,
        config: &UartConsoleConfig,
    ) -> Result<UartTxDriver<'static>, esp_idf_svc::sys::EspError> {
        let uart_config = uart::config::Config::default()
            .baudrate(esp_idf_svc::hal::units::Hertz(config.baud_rate));

        UartTxDriver::new(
            uart,
            tx_pin,
            Option::<gpio::AnyIOPin>::None, // CTS
            Option::<gpio::AnyIOPin>::None, // RTS
            &uart_config,
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    use crate::arbiter::{AcquireContext, Arbiter};
    use crate::console::{Console, ConsoleFlags};
    use crate::cpu::ThreadCores;
    use crate::state::Priority;

    #[test]
    fn test_default_config() {
        let config = UartConsoleConfig::default();
        assert_eq!(config.baud_rate, 115200);
        assert_eq!(config.tx_pin, 6);
    }

    #[test]
    fn test_writer_console_stops_when_preempted() {
        let arbiter = Arbiter::new(Arc::new(ThreadCores::new(1)));
        let console = Console::new("buf", ConsoleFlags::ATOMIC, WriterConsole::new(Vec::new()));
        let text = [b'a'; WRITE_CHUNK * 3];

        let owner = arbiter.acquire(&console, AcquireContext::new(Priority::Normal)).unwrap();
        let mut wctxt = WriteContext::new(&owner, &text);
        let driver = WriterConsole::new(Vec::new());
        assert!(driver.write_atomic(&mut wctxt));
        assert_eq!(driver.with(|v| v.len()), WRITE_CHUNK * 3);

        // A waiting higher-priority context makes the driver back off.
        let state = console.state.load();
        console.state.compare_exchange(state, state.with_req_prio(Priority::Emergency)).unwrap();
        let driver = WriterConsole::new(Vec::new());
        assert!(!driver.write_atomic(&mut wctxt));
        assert!(driver.into_inner().is_empty());
    }

    #[test]
    fn test_writer_console_never_waits_for_device() {
        let arbiter = Arbiter::new(Arc::new(ThreadCores::new(1)));
        let console = Console::new("buf", ConsoleFlags::ATOMIC, WriterConsole::new(Vec::new()));
        let owner = arbiter.acquire(&console, AcquireContext::new(Priority::Panic)).unwrap();
        let mut wctxt = WriteContext::new(&owner, b"final words\n");

        // Someone is still inside the device.
        let driver = WriterConsole::new(Vec::new());
        let written = driver.with(|_| driver.write_atomic(&mut wctxt));
        assert!(!written);

        assert!(driver.write_atomic(&mut wctxt));
        assert_eq!(driver.into_inner(), b"final words\n".to_vec());
    }
}
