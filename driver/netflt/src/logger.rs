//! Logging helpers
//!
//! Records are formatted into a fixed-size buffer before being written out,
//! so logging from the data path never allocates.

use std::io::Write as _;

use log::{Level, Metadata, Record};

/// Size of the formatting buffer, matching what a single `DbgPrint` call accepts
pub const MESSAGE_BUFFER_LEN: usize = 512;

/// Writes records to the debug output (standard error)
pub struct DebugLogger;

#[doc(hidden)]
pub fn report_init_fail() {
    let _ = std::io::stderr().write_all(b"ERROR [netflt] failed to initialize debug logger\n");
}

/// Initializes the debug logging infrastructure
///
/// Only the first initialization in a process takes effect, later ones are
/// reported and otherwise ignored.
#[macro_export]
macro_rules! init_debug_logger {
    ($level:expr) => {{
        static LOGGER: $crate::logger::DebugLogger = $crate::logger::DebugLogger;

        match ::log::set_logger(&LOGGER) {
            Ok(()) => ::log::set_max_level($level),
            Err(_) => $crate::logger::report_init_fail(),
        }
    }};
}

impl DebugLogger {
    /// Formats `record` into a line, or `None` if it doesn't fit the buffer
    pub fn format(record: &Record) -> Option<heapless::String<MESSAGE_BUFFER_LEN>> {
        use core::fmt::Write;

        let mut message_buf = heapless::String::<MESSAGE_BUFFER_LEN>::new();

        write!(
            &mut message_buf,
            "{:<5} [{}] {}\n",
            record.level(),
            record.target(),
            record.args()
        )
        .ok()?;

        Some(message_buf)
    }
}

impl log::Log for DebugLogger {
    fn enabled(&self, metadata: &Metadata) -> bool {
        metadata.level() <= log::max_level()
    }

    fn log(&self, record: &Record) {
        if !self.enabled(record.metadata()) {
            return;
        }

        let mut out = std::io::stderr().lock();

        match Self::format(record) {
            Some(message) => {
                let _ = out.write_all(message.as_bytes());
            }
            None => {
                let _ = writeln!(
                    out,
                    "{:<5} [netflt] overflow while formatting message buffer",
                    Level::Error
                );
            }
        }
    }

    fn flush(&self) {
        let _ = std::io::stderr().flush();
    }
}
