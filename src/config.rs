//! Compile-time configuration.
//!
//! All the feature toggles from the original design (`AUTO_PAGE_ADDR`,
//! `CMD_SETPGADDR`, `CMD_READFLASH`, `TWO_STEP_INIT`, `APP_USE_TPL_PG`,
//! `CHECK_PAGE_IX`, `TIMEOUT_EXIT`, `FORCE_ERASE_PG`, `USE_WDT_RESET`,
//! `ENABLE_LED_UI`, `AUTO_CLK_TWEAK`, `CLEAR_BIT_7_R31`) collapse into one
//! [`FeatureFlags`] record instead of `#ifdef`s, per the Design Notes.
//! Values are populated by `build.rs` from `TWIBOOT_*` environment
//! variables, mirroring the `CPU_FREQUENCY`/`OUT_DIR/constants.rs` pattern
//! in the upstream `atmega` crate's `build.rs`.

include!(concat!(env!("OUT_DIR"), "/config.rs"));

use bitflags::bitflags;

bitflags! {
    /// Optional feature bits reported in the `GETTMNLV` reply (`features`
    /// byte) and used internally to gate behavior that spec.md's `#ifdef`
    /// toggles used to gate.
    pub struct FeatureFlags: u8 {
        /// `CMD_SETPGADDR` compiled in.
        const CMD_SETPGADDR  = 0b0000_0001;
        /// `CMD_READFLASH` compiled in.
        const CMD_READFLASH  = 0b0000_0010;
        /// `AUTO_PAGE_ADDR` compiled in.
        const AUTO_PAGE_ADDR = 0b0000_0100;
        /// `TWO_STEP_INIT` compiled in.
        const TWO_STEP_INIT  = 0b0000_1000;
        /// `APP_USE_TPL_PG` compiled in.
        const APP_USE_TPL_PG = 0b0001_0000;
        /// `CHECK_PAGE_IX` compiled in.
        const CHECK_PAGE_IX  = 0b0010_0000;
        /// `TIMEOUT_EXIT` compiled in.
        const TIMEOUT_EXIT   = 0b0100_0000;
    }
}

impl FeatureFlags {
    /// Builds the feature byte from the `TWIBOOT_*` configuration baked in
    /// by `build.rs`.
    pub fn from_config() -> FeatureFlags {
        let mut bits = 0u8;
        if CMD_SETPGADDR {
            bits |= FeatureFlags::CMD_SETPGADDR.bits();
        }
        if CMD_READFLASH {
            bits |= FeatureFlags::CMD_READFLASH.bits();
        }
        if AUTO_PAGE_ADDR {
            bits |= FeatureFlags::AUTO_PAGE_ADDR.bits();
        }
        if TWO_STEP_INIT {
            bits |= FeatureFlags::TWO_STEP_INIT.bits();
        }
        if APP_USE_TPL_PG {
            bits |= FeatureFlags::APP_USE_TPL_PG.bits();
        }
        if CHECK_PAGE_IX {
            bits |= FeatureFlags::CHECK_PAGE_IX.bits();
        }
        if TIMEOUT_EXIT {
            bits |= FeatureFlags::TIMEOUT_EXIT.bits();
        }
        FeatureFlags::from_bits_truncate(bits)
    }
}

/// Extended feature byte, reserved for future use (`TML_EXT_FEATURES` in
/// the original design). Always zero today.
pub const EXT_FEATURES: u8 = 0;

/// Bootloader protocol major version reported by `GETTMNLV`.
pub const VERSION_MAJOR: u8 = 1;
/// Bootloader protocol minor version reported by `GETTMNLV`.
pub const VERSION_MINOR: u8 = 0;

/// The flash page that holds the reset vector (word 0).
pub const RESET_PAGE: u16 = 0;

/// A read-only view over every compile-time constant this crate needs, so
/// call sites take one `&Config` instead of a dozen free constants.
#[derive(Debug, Clone, Copy)]
pub struct Config {
    /// Own 7-bit TWI slave address, in `[8, 35]`.
    pub twi_addr: u8,
    /// Flash page size in bytes, at most 64.
    pub pagesize: u16,
    /// Flash byte-address of the bootloader's first byte.
    pub timonel_start: u16,
    /// Maximum payload bytes accepted per `WRITPAGE`/master packet.
    pub mst_packet_size: usize,
    /// Maximum payload bytes sent per `READFLSH`/slave packet.
    pub slv_packet_size: usize,
    /// Feature toggle record.
    pub features: FeatureFlags,
}

const fn validate() {
    assert!(TWI_ADDR >= 8 && TWI_ADDR <= 35, "TWI_ADDR out of [8,35]");
    assert!(PAGESIZE <= 64 && PAGESIZE.is_power_of_two(), "PAGESIZE must be a power of two <= 64");
    assert!(TIMONEL_START % PAGESIZE == 0, "TIMONEL_START must be page-aligned");
    assert!(RX_CAPACITY.is_power_of_two(), "RX_CAPACITY must be a power of two");
    assert!(TX_CAPACITY.is_power_of_two(), "TX_CAPACITY must be a power of two");
    assert!(MST_PACKET_SIZE <= RX_CAPACITY / 2, "MST_PACKET_SIZE too large for RX_CAPACITY");
    assert!(SLV_PACKET_SIZE <= TX_CAPACITY / 2, "SLV_PACKET_SIZE too large for TX_CAPACITY");
    assert!(AUTO_PAGE_ADDR || CMD_SETPGADDR, "CMD_SETPGADDR must be enabled when AUTO_PAGE_ADDR is disabled");
}

const _VALIDATE: () = validate();

/// Builds the single configuration record from `build.rs`'s output. Pure
/// and cheap (every field is a compile-time constant); called once from
/// `Bootloader::new()` rather than cached in a `static`, since `FeatureFlags`
/// construction from `bitflags` isn't available as a `const fn`.
pub fn config() -> Config {
    Config {
        twi_addr: TWI_ADDR,
        pagesize: PAGESIZE,
        timonel_start: TIMONEL_START,
        mst_packet_size: MST_PACKET_SIZE,
        slv_packet_size: SLV_PACKET_SIZE,
        features: FeatureFlags::from_config(),
    }
}
