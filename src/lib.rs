//! Interrupt-free TWI/USI in-system bootloader core.
//!
//! This crate implements the two tightly coupled subsystems of a small
//! two-wire (I2C) in-system programming bootloader for 8-bit AVR parts:
//!
//! - [`usi`]: a polled, interrupt-free TWI slave engine that reproduces a
//!   USI-style hardware peripheral in software.
//! - [`command`] + [`bootloader`]: the request/reply protocol and
//!   flash-programming state machine layered on top of it.
//!
//! Everything that differs per MCU family (flash self-programming, fuse
//! reads, clock prescaler control, GPIO line reads, the final jump to the
//! application) is abstracted behind the [`platform::Platform`] trait, so
//! this crate stays `#![no_std]` and free of any particular register
//! layout.
#![cfg_attr(not(feature = "std"), no_std)]
#![warn(missing_docs)]

pub mod bootloader;
pub mod command;
pub mod config;
pub mod flash;
#[cfg(not(feature = "std"))]
pub mod hardware;
pub mod interrupt;
pub mod mempack;
pub mod platform;
pub mod registers;
pub mod ring;
#[cfg(feature = "trace")]
pub mod serial;
pub mod usi;

#[cfg(any(test, feature = "std"))]
pub mod mock;

pub use bootloader::{Bootloader, Outcome};
pub use config::{config, Config, FeatureFlags};
pub use mempack::{Flags, MemPack};
pub use platform::{Flash, GpioLine, Platform, UsiHardware};
