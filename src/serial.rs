//! Ambient trace sink.
//!
//! On real hardware this bootloader has no UART budget to spare, so unlike
//! the rest of this family of AVR crates (which drive `UBRR0`/`UDR0`
//! directly for `Serial::begin`/`println!`), tracing here is host-only: a
//! `core::fmt::Write` sink over `std::io::stdout`, compiled in only under
//! `trace` (which always implies `std`). Call sites look exactly like the
//! upstream `serial-print` usage, just gated the other way around.

extern crate std;

use core::fmt::{self, Write};
use std::io::Write as _;

/// A `core::fmt::Write` sink that forwards to standard output, for tracing
/// protocol/engine state during host-side development and debugging.
pub struct Trace;

impl Write for Trace {
    fn write_str(&mut self, s: &str) -> fmt::Result {
        std::io::stdout().write_all(s.as_bytes()).map_err(|_| fmt::Error)
    }
}

/// Writes a trace line, same shape as `println!`, only active when the
/// `trace` feature is enabled.
#[macro_export]
macro_rules! trace {
    ($($arg:tt)*) => {{
        use core::fmt::Write as _;
        let _ = writeln!($crate::serial::Trace, $($arg)*);
    }};
}
