//! The platform capability surface.
//!
//! Everything that is genuinely specific to one MCU family or one board —
//! the USI/TWI register layout, the flash self-programming primitives, the
//! fuse read, the clock prescaler, a GPIO line read, and the final jump to
//! the application — lives behind the traits in this module. The core
//! protocol and engine code in this crate never touches a raw register; it
//! only calls these trait methods. Per the Design Notes, this is the one
//! place platform-specific assembly (or, on a host build, a simulation)
//! lives.

/// Read access to the USI/TWI hardware surface the line-level engine
/// polls and drives: the shift/data register, the four status flags, the
/// 4-bit counter, and SDA/SCL direction control.
pub trait UsiHardware {
    /// Reads the current value of the data/shift register.
    fn data_read(&self) -> u8;
    /// Writes a byte into the data/shift register, priming it to shift out.
    fn data_write(&mut self, value: u8);

    /// `true` once a START condition has been latched.
    fn start_flag(&self) -> bool;
    /// `true` once the 4-bit counter has overflowed (a full byte/ack shifted).
    fn overflow_flag(&self) -> bool;
    /// Clears START, overflow, STOP, and collision flags and reloads the
    /// counter to shift the given number of bits (8 for a byte, 1 for an ack).
    fn clear_flags_and_load_counter(&mut self, bits: u8);

    /// Arms detection of a bus START condition only (no RESTART, no SCL hold).
    fn arm_detect_start(&mut self);
    /// Arms detection of START *and* RESTART, holding SCL low on overflow.
    fn arm_detect_restart(&mut self);

    /// Floats the SDA line (configures it as input).
    fn sda_release(&mut self);
    /// Drives the SDA line (configures it as output).
    fn sda_drive(&mut self);

    /// Reads the instantaneous level of SCL.
    fn scl_level(&self) -> bool;
    /// Reads the instantaneous level of SDA.
    fn sda_level(&self) -> bool;
}

/// A single-bit GPIO line, used for the ambient LED-toggle hook and for any
/// platform that wants to expose raw line reads outside the USI engine.
pub trait GpioLine {
    /// Reads the instantaneous logic level of the line.
    fn level(&self) -> bool;
    /// Sets the instantaneous logic level of the line.
    fn set(&mut self, value: bool);
}

/// Page-granular self-programming primitives (`SPM`). A `Flash`
/// implementation owns exactly one hardware temporary page buffer;
/// `fill` calls must stay confined to a single page between `erase`/`write`
/// boundaries (see spec.md §5, "Flash as shared resource").
pub trait Flash {
    /// Erases the flash page containing `addr`.
    fn erase(&mut self, addr: u16);
    /// Stages one 16-bit word into the temporary page buffer at `addr`.
    /// `addr` must be even and within the page currently being filled.
    fn fill(&mut self, addr: u16, word: u16);
    /// Commits the temporary page buffer to the page containing `page_addr`.
    fn write(&mut self, page_addr: u16);
    /// Reads a single byte directly out of flash (used for `READFLSH` and
    /// for reading back the trampoline page in `GETTMNLV`/verification).
    fn read_byte(&self, addr: u16) -> u8;
    /// Clears the temporary page buffer. Called once at boot, mirroring the
    /// `CTPB`+`spm` sequence the original firmware runs before computing the
    /// application/bootloader entry pointers.
    fn clear_temp_buffer(&mut self);
}

/// Everything the bootloader core needs from the concrete MCU/board: flash
/// programming, the low fuse byte, clock prescaler control, oscillator
/// trim, and the two ways execution ever leaves the bootloader.
pub trait Platform {
    /// The concrete flash self-programming backend.
    type Flash: Flash;

    /// Borrows the flash backend.
    fn flash(&mut self) -> &mut Self::Flash;

    /// Returns the low fuse byte (clock source + prescaler bit).
    fn read_fuse_low(&self) -> u8;

    /// Resets the CPU clock prescaler to divide-by-one.
    fn clock_prescaler_reset(&mut self);
    /// Restores the CPU clock prescaler to its original divider.
    fn clock_prescaler_restore(&mut self);

    /// Reads the current RC-oscillator trim value.
    fn osccal_read(&self) -> u8;
    /// Writes the RC-oscillator trim value.
    fn osccal_write(&mut self, value: u8);

    /// Toggles the UI LED, if any. A no-op by default: UI LED driving is an
    /// external collaborator concern (spec.md §1, Out of scope), but the
    /// bootloader still calls this hook at the same points the original
    /// firmware toggles its LED, so a board can wire one up without
    /// touching the core.
    fn led_toggle(&mut self) {}

    /// Reads the 16-bit word at `addr` directly out of flash (low byte at
    /// `addr`, high byte at `addr + 1`). Used by `GETTMNLV` to report the
    /// trampoline bytes actually committed to flash, rather than recomputing
    /// them from in-memory session state.
    fn flash_read_word(&mut self, addr: u16) -> u16 {
        let lo = self.flash().read_byte(addr);
        let hi = self.flash().read_byte(addr + 1);
        u16::from(lo) | (u16::from(hi) << 8)
    }

    /// Transfers control to the application at `TIMONEL_START - 2`. Never
    /// returns.
    fn jump_to_app(&mut self) -> !;

    /// Restarts the bootloader (jump to `TIMONEL_START`, or trigger the
    /// watchdog, depending on `USE_WDT_RESET`). Never returns.
    fn restart(&mut self) -> !;
}
