//! Bootloader session state.
//!
//! `MemPack` tracks exactly one upload session: where the next page goes,
//! how much of it has arrived, and the handful of sticky flags the command
//! handlers and the main loop communicate through. It is created once at
//! boot, zero-initialized, and lives until the device either jumps to the
//! application or resets — it is never torn down.

use bitflags::bitflags;

bitflags! {
    /// Sticky session flags set by command handlers and consumed by the
    /// main supervisory loop.
    #[derive(Default)]
    pub struct Flags: u8 {
        /// The bootloader has seen its first identification command.
        const INIT_1    = 0b0000_0001;
        /// Second step of two-step init has completed (only meaningful
        /// when `TWO_STEP_INIT` is enabled).
        const INIT_2    = 0b0000_0010;
        /// `EXITTMNL` was received; the next slow-op cycle jumps to the app.
        const EXIT_TML  = 0b0000_0100;
        /// Either `DELFLASH` was received, or a `WRITPAGE` checksum/overflow
        /// fault occurred; the next slow-op cycle erases the whole app
        /// region instead of committing a page.
        const DEL_FLASH = 0b0000_1000;
    }
}

/// Bootloader session state: upload progress plus the sticky flags above.
#[derive(Debug, Clone, Copy, Default)]
pub struct MemPack {
    /// Flash byte-address of the current target page's base. Always
    /// page-aligned.
    pub page_addr: u16,
    /// Bytes already filled into the current page's temporary buffer, in
    /// `[0, pagesize]`.
    pub page_ix: u16,
    /// Sticky session flags.
    pub flags: Flags,
    /// Low byte of the application's original reset vector, captured the
    /// first time `WRITPAGE` fills the reset page (auto-page-address mode
    /// only).
    pub app_reset_lsb: u8,
    /// High byte of the application's original reset vector.
    pub app_reset_msb: u8,
}

impl MemPack {
    /// Builds a fresh, zero-initialized session.
    pub const fn new() -> Self {
        Self {
            page_addr: 0,
            page_ix: 0,
            flags: Flags::empty(),
            app_reset_lsb: 0,
            app_reset_msb: 0,
        }
    }

    /// `true` once the bootloader has completed identification (and, when
    /// `two_step_init` is in force, the second init step too).
    pub fn is_initialized(&self, two_step_init: bool) -> bool {
        if two_step_init {
            self.flags.contains(Flags::INIT_1 | Flags::INIT_2)
        } else {
            self.flags.contains(Flags::INIT_1)
        }
    }

    /// The application's original reset vector, as saved by `WRITPAGE`.
    pub fn app_reset_vector(&self) -> u16 {
        u16::from(self.app_reset_msb) << 8 | u16::from(self.app_reset_lsb)
    }

    /// Resets upload progress for the next page, leaving the sticky flags
    /// and saved reset vector untouched.
    pub fn advance_page(&mut self, pagesize: u16) {
        self.page_addr += pagesize;
        self.page_ix = 0;
    }
}
