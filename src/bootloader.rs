//! The main supervisory loop.
//!
//! Polls the TWI engine, dispatches commands, and — once the handshake
//! byte has been acknowledged — runs at most one deferred slow operation
//! (exit, erase, or page commit) per iteration. Pre-initialization, it
//! also runs the LED-blink/timeout-exit countdown. Everything platform
//! specific goes through a `&mut P: Platform` passed into [`Bootloader::tick`]
//! rather than captured, so the same loop drives both the real hardware and
//! the hosted mock.

use crate::command;
use crate::config::{self, Config, FeatureFlags};
use crate::flash;
use crate::mempack::{Flags, MemPack};
use crate::platform::{Flash, Platform, UsiHardware};
use crate::usi::UsiEngine;

/// What happened on a given call to [`Bootloader::tick`]. The caller (the
/// real `main` on hardware, or a test driver here) is the one that actually
/// transfers control — `tick` never diverges itself, so it stays testable.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    /// Nothing final happened this tick; keep polling.
    Continue,
    /// `EXITTMNL` (or the timeout countdown) fired. The caller should
    /// restore the clock, then call `platform.jump_to_app()`.
    ExitToApp,
    /// `DELFLASH` (or a `WRITPAGE` fault) fully erased the application
    /// region. The caller should call `platform.restart()`.
    Restarted,
}

/// Owned engine context: the TWI engine, the session state, and the timing
/// counters the pre-init countdown needs. One instance per device; never
/// destroyed.
pub struct Bootloader<const RX_CAP: usize, const TX_CAP: usize> {
    engine: UsiEngine<RX_CAP, TX_CAP>,
    pack: MemPack,
    cfg: Config,
    slow_ops_enabled: bool,
    led_delay: u16,
    exit_delay: u8,
}

impl<const RX_CAP: usize, const TX_CAP: usize> Bootloader<RX_CAP, TX_CAP> {
    /// Builds a fresh bootloader context from the compile-time configuration.
    pub fn new() -> Self {
        let cfg = config::config();
        Self {
            engine: UsiEngine::new(cfg.twi_addr),
            pack: MemPack::new(),
            cfg,
            slow_ops_enabled: false,
            led_delay: 0,
            exit_delay: 0,
        }
    }

    /// The session state, mostly for tests and tracing.
    pub fn mempack(&self) -> &MemPack {
        &self.pack
    }

    /// Runs one iteration of the main loop against `hw` (the USI register
    /// shim) and `platform` (flash/clock/fuse/osccal). Returns what, if
    /// anything final, happened.
    pub fn tick<H: UsiHardware, P: Platform>(&mut self, hw: &mut H, platform: &mut P) -> Outcome {
        if hw.start_flag() {
            self.engine.on_start(hw);
        }
        if hw.overflow_flag() {
            let cfg = self.cfg;
            let pack = &mut self.pack;
            self.slow_ops_enabled = self.engine.on_overflow(hw, |rx, tx| {
                command::dispatch(rx, tx, pack, platform, &cfg);
            });
        }

        if self.pack.is_initialized(self.cfg.features.contains(FeatureFlags::TWO_STEP_INIT)) {
            self.run_slow_op(platform)
        } else {
            self.run_preinit_countdown(platform)
        }
    }

    fn run_slow_op<P: Platform>(&mut self, platform: &mut P) -> Outcome {
        if !self.slow_ops_enabled {
            return Outcome::Continue;
        }
        self.slow_ops_enabled = false;

        if self.pack.flags.contains(Flags::EXIT_TML) {
            return Outcome::ExitToApp;
        }

        if self.pack.flags.contains(Flags::DEL_FLASH) {
            self.erase_application(platform);
            return Outcome::Restarted;
        }

        if self.pack.page_ix == self.cfg.pagesize {
            self.commit_page(platform);
        }

        Outcome::Continue
    }

    fn erase_application<P: Platform>(&mut self, platform: &mut P) {
        let mut addr = self.cfg.timonel_start - self.cfg.pagesize;
        loop {
            platform.flash().erase(addr);
            if addr == 0 {
                break;
            }
            addr -= self.cfg.pagesize;
        }
    }

    fn commit_page<P: Platform>(&mut self, platform: &mut P) {
        let app_use_tpl_pg = self.cfg.features.contains(FeatureFlags::APP_USE_TPL_PG);
        if !flash::is_committable(self.pack.page_addr, self.cfg.timonel_start, self.cfg.pagesize, app_use_tpl_pg) {
            self.pack.advance_page(self.cfg.pagesize);
            return;
        }

        platform.flash().write(self.pack.page_addr);

        if flash::is_reset_page(self.pack.page_addr) && self.cfg.features.contains(FeatureFlags::AUTO_PAGE_ADDR) {
            let tpl = flash::trampoline_word(self.cfg.timonel_start, self.pack.app_reset_vector());
            let tpl_addr = flash::trampoline_word_addr(self.cfg.timonel_start);
            if app_use_tpl_pg {
                let hi = platform.flash().read_byte(tpl_addr + 1);
                let lo = platform.flash().read_byte(tpl_addr);
                let written = (u16::from(hi) << 8) | u16::from(lo);
                if written != tpl {
                    self.pack.flags |= Flags::DEL_FLASH;
                }
            } else {
                let page_base = flash::trampoline_page_addr(self.cfg.timonel_start, self.cfg.pagesize);
                // The temp buffer is one shared hardware resource and still
                // holds application page 0's data from the `write` above;
                // blank every word but the last before filling the trampoline
                // word in, or the trampoline page ends up a copy of page 0.
                let mut addr = page_base;
                while addr < tpl_addr {
                    platform.flash().fill(addr, 0xFFFF);
                    addr += 2;
                }
                platform.flash().fill(tpl_addr, tpl);
                platform.flash().write(page_base);
            }
        }

        self.pack.advance_page(self.cfg.pagesize);
    }

    fn run_preinit_countdown<P: Platform>(&mut self, platform: &mut P) -> Outcome {
        self.led_delay = self.led_delay.wrapping_sub(1);
        if self.led_delay != 0 {
            return Outcome::Continue;
        }
        self.led_delay = config::SHORT_LED_DLY;
        platform.led_toggle();

        if !self.cfg.features.contains(FeatureFlags::TIMEOUT_EXIT) {
            return Outcome::Continue;
        }
        self.exit_delay = self.exit_delay.wrapping_sub(1);
        if self.exit_delay == 0 {
            self.exit_delay = config::SHORT_EXIT_DLY;
            Outcome::ExitToApp
        } else {
            Outcome::Continue
        }
    }
}

impl<const RX_CAP: usize, const TX_CAP: usize> Default for Bootloader<RX_CAP, TX_CAP> {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mock::{MockPlatform, MockUsiHardware};

    fn new_bootloader() -> Bootloader<16, 16> {
        Bootloader::new()
    }

    #[test]
    fn exit_tmnl_reports_exit_to_app_exactly_once() {
        let mut boot = new_bootloader();
        boot.pack.flags |= Flags::INIT_1 | Flags::EXIT_TML;
        boot.slow_ops_enabled = true;
        let mut hw = MockUsiHardware::new();
        let mut platform = MockPlatform::new(8192, 64);
        let outcome = boot.tick(&mut hw, &mut platform);
        assert_eq!(outcome, Outcome::ExitToApp);
    }

    #[test]
    fn del_flash_erases_every_application_page_and_nothing_above_start() {
        let mut boot = new_bootloader();
        boot.pack.flags |= Flags::INIT_1 | Flags::DEL_FLASH;
        boot.slow_ops_enabled = true;
        let mut hw = MockUsiHardware::new();
        let mut platform = MockPlatform::new(8192, 64);
        let outcome = boot.tick(&mut hw, &mut platform);
        assert_eq!(outcome, Outcome::Restarted);
        let erased = &platform.flash_image().erase_calls;
        assert!(erased.iter().all(|&a| a < boot.cfg.timonel_start));
        assert!(erased.contains(&0));
        assert!(erased.contains(&(boot.cfg.timonel_start - boot.cfg.pagesize)));
    }

    #[test]
    fn page_commit_writes_once_page_ix_reaches_pagesize() {
        let mut boot = new_bootloader();
        boot.pack.flags |= Flags::INIT_1;
        boot.pack.page_addr = 64;
        boot.pack.page_ix = boot.cfg.pagesize;
        boot.slow_ops_enabled = true;
        let mut hw = MockUsiHardware::new();
        let mut platform = MockPlatform::new(8192, 64);
        boot.tick(&mut hw, &mut platform);
        assert!(platform.flash_image().write_calls.contains(&64));
        assert_eq!(boot.pack.page_addr, 64 + boot.cfg.pagesize);
        assert_eq!(boot.pack.page_ix, 0);
    }

    #[test]
    fn slow_ops_never_run_until_the_flag_has_been_set_by_on_overflow() {
        let mut boot = new_bootloader();
        boot.pack.flags |= Flags::INIT_1 | Flags::DEL_FLASH;
        let mut hw = MockUsiHardware::new();
        let mut platform = MockPlatform::new(8192, 64);
        let outcome = boot.tick(&mut hw, &mut platform);
        assert_eq!(outcome, Outcome::Continue);
        assert!(platform.flash_image().erase_calls.is_empty());
    }

    #[test]
    fn preinit_countdown_exits_to_app_after_led_and_exit_delay_wrap() {
        let mut boot = new_bootloader();
        boot.led_delay = 1;
        boot.exit_delay = 1;
        let mut hw = MockUsiHardware::new();
        let mut platform = MockPlatform::new(8192, 64);
        let outcome = boot.tick(&mut hw, &mut platform);
        assert_eq!(outcome, Outcome::ExitToApp);
    }

    #[test]
    fn reset_page_commit_does_not_leak_page_zero_into_trampoline_page() {
        let mut boot = new_bootloader();
        boot.pack.flags |= Flags::INIT_1;
        boot.pack.page_addr = 0;
        boot.pack.page_ix = boot.cfg.pagesize;
        boot.slow_ops_enabled = true;
        let mut hw = MockUsiHardware::new();
        let mut platform = MockPlatform::new(8192, boot.cfg.pagesize);

        // Simulate an uploaded page 0 sitting in the shared temp buffer,
        // as if a prior WRITPAGE had just filled it.
        let mut addr = 0u16;
        while addr < boot.cfg.pagesize {
            platform.flash().fill(addr, 0xAAAA);
            addr += 2;
        }

        boot.tick(&mut hw, &mut platform);

        let tpl_page = flash::trampoline_page_addr(boot.cfg.timonel_start, boot.cfg.pagesize);
        let contents = platform.flash_image().read_range(tpl_page, boot.cfg.pagesize as usize);
        let (blank, last_word) = contents.split_at(contents.len() - 2);
        assert!(blank.iter().all(|&b| b == 0xFF), "trampoline page leaked page 0's data: {blank:?}");
        let tpl = u16::from(last_word[0]) | (u16::from(last_word[1]) << 8);
        assert_eq!(tpl, flash::trampoline_word(boot.cfg.timonel_start, boot.pack.app_reset_vector()));
    }
}
