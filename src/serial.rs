//! COM1 serial output and the `log` backend.
//!
//! Serial is the developer channel: it works before the framebuffer console
//! exists and keeps working when the console lock is unavailable. Log records
//! go through [`try_print`], so a trap taken while the port is locked drops
//! its line instead of spinning.

use core::fmt::{self, Write};

use log::{LevelFilter, Metadata, Record};
use spin::Mutex;
use uart_16550::SerialPort;
use x86_64::instructions::interrupts;

use crate::config::BootError;

pub static SERIAL: Mutex<SerialPort> = Mutex::new(unsafe { SerialPort::new(0x3F8) });

pub fn init() {
    SERIAL.lock().init();
}

/// Writes `args` unless the port is already locked.
///
/// Returns whether the text was written. Trap handlers reach the port only
/// through this path: the context they interrupted may hold the lock.
pub fn try_print(args: fmt::Arguments) -> bool {
    match SERIAL.try_lock() {
        Some(mut port) => {
            let _ = port.write_fmt(args);
            true
        }
        None => false,
    }
}

#[doc(hidden)]
pub fn _print(args: fmt::Arguments) {
    // A trap taken while the port is locked would spin forever.
    interrupts::without_interrupts(|| {
        let _ = SERIAL.lock().write_fmt(args);
    });
}

#[macro_export]
macro_rules! serial_println {
    ($($arg:tt)*) => {
        $crate::serial::_print(core::format_args!("{}\n", core::format_args!($($arg)*)))
    };
}

static LOGGER: SerialLogger = SerialLogger;

struct SerialLogger;

/// Installs the serial logger as the `log` backend.
pub fn init_logger(level: LevelFilter) -> Result<(), BootError> {
    log::set_logger(&LOGGER).map_err(|_| BootError::LoggerAlreadySet)?;
    log::set_max_level(level);
    Ok(())
}

impl log::Log for SerialLogger {
    fn enabled(&self, metadata: &Metadata) -> bool {
        metadata.level() <= log::max_level()
    }

    fn log(&self, record: &Record) {
        if self.enabled(record.metadata()) {
            try_print(format_args!(
                "[{:<5} {}] {}\n",
                record.level(),
                record.module_path_static().unwrap_or_default(),
                record.args()
            ));
        }
    }

    fn flush(&self) {}
}
