//! Output sink behind the `print!` family of macros.
//!
//! The server has no console of its own. Whoever boots it installs a sink
//! (a serial port, the root task's debug channel, a test buffer) exactly once
//! with [`install`]. Until then all output is dropped.

use alloc::boxed::Box;
use core::fmt::{self, Write};
use once_cell::race::OnceBox;

pub trait ConsoleSink: Sync {
    fn write_str(&self, s: &str);

    /// Error output. Sinks that can highlight it (colour, a separate stream)
    /// override this.
    fn write_err(&self, s: &str) {
        self.write_str(s);
    }
}

static CONSOLE: OnceBox<&'static dyn ConsoleSink> = OnceBox::new();

/// Installs the console sink. Returns `false` if one was already installed,
/// in which case the old sink stays in place.
pub fn install(sink: &'static dyn ConsoleSink) -> bool {
    CONSOLE.set(Box::new(sink)).is_ok()
}

pub fn is_installed() -> bool {
    CONSOLE.get().is_some()
}

struct Writer {
    err: bool,
}

impl Write for Writer {
    fn write_str(&mut self, s: &str) -> fmt::Result {
        if let Some(sink) = CONSOLE.get() {
            if self.err {
                sink.write_err(s);
            } else {
                sink.write_str(s);
            }
        }
        Ok(())
    }
}

#[doc(hidden)]
pub fn _print(args: fmt::Arguments) {
    // Writer never fails.
    let _ = Writer { err: false }.write_fmt(args);
}

#[doc(hidden)]
pub fn _eprint(args: fmt::Arguments) {
    let _ = Writer { err: true }.write_fmt(args);
}
