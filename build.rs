use std::{env, fs::File, io::Write, path::Path};

/// One env-var-with-default lookup, `cargo:warning`-ing when the default is used.
/// Mirrors the `AVR_CPU_FREQUENCY_HZ` pattern from the upstream `atmega` crate's `build.rs`.
fn env_u64(name: &str, default: u64) -> u64 {
    match env::var(name) {
        Ok(val) => val.parse().unwrap_or_else(|_| {
            println!("cargo:warning=Unable to parse {name} as u64, defaulting to {default}");
            default
        }),
        Err(_) => default,
    }
}

fn env_bool(name: &str, default: bool) -> bool {
    match env::var(name) {
        Ok(val) => match val.as_str() {
            "1" | "true" | "yes" => true,
            "0" | "false" | "no" => false,
            _ => {
                println!("cargo:warning=Unable to parse {name} as bool, defaulting to {default}");
                default
            }
        },
        Err(_) => default,
    }
}

fn main() {
    let out_dir = env::var("OUT_DIR").expect("Environment variable OUT_DIR not defined");
    let dest_path = Path::new(&out_dir).join("config.rs");
    let mut f = File::create(&dest_path).expect("Could not create \"config.rs\"");

    let twi_addr = env_u64("TWIBOOT_TWI_ADDR", 11);
    let pagesize = env_u64("TWIBOOT_PAGESIZE", 64);
    let timonel_start = env_u64("TWIBOOT_START", 0x1A00);
    let rx_capacity = env_u64("TWIBOOT_RX_CAPACITY", 16);
    let tx_capacity = env_u64("TWIBOOT_TX_CAPACITY", 16);
    let mst_packet_size = env_u64("TWIBOOT_MST_PACKET_SIZE", 8);
    let slv_packet_size = env_u64("TWIBOOT_SLV_PACKET_SIZE", 8);
    let short_led_dly = env_u64("TWIBOOT_SHORT_LED_DLY", 200);
    let short_exit_dly = env_u64("TWIBOOT_SHORT_EXIT_DLY", 100);

    let auto_page_addr = env_bool("TWIBOOT_AUTO_PAGE_ADDR", true);
    let cmd_setpgaddr = env_bool("TWIBOOT_CMD_SETPGADDR", true);
    let cmd_readflash = env_bool("TWIBOOT_CMD_READFLASH", true);
    let two_step_init = env_bool("TWIBOOT_TWO_STEP_INIT", false);
    let app_use_tpl_pg = env_bool("TWIBOOT_APP_USE_TPL_PG", false);
    let check_page_ix = env_bool("TWIBOOT_CHECK_PAGE_IX", true);
    let timeout_exit = env_bool("TWIBOOT_TIMEOUT_EXIT", true);
    let force_erase_pg = env_bool("TWIBOOT_FORCE_ERASE_PG", false);
    let use_wdt_reset = env_bool("TWIBOOT_USE_WDT_RESET", false);
    let enable_led_ui = env_bool("TWIBOOT_ENABLE_LED_UI", true);
    let auto_clk_tweak = env_bool("TWIBOOT_AUTO_CLK_TWEAK", true);
    let clear_bit_7_r31 = env_bool("TWIBOOT_CLEAR_BIT_7_R31", false);

    // Hard invariants: these can't be papered over with a default, matching
    // the upstream `#error` pragmas in timonel.c's configuration checks.
    if !(8..=35).contains(&twi_addr) {
        panic!("TWIBOOT_TWI_ADDR must be in [8, 35], got {twi_addr}");
    }
    if pagesize == 0 || pagesize > 64 || (pagesize & (pagesize - 1)) != 0 {
        panic!("TWIBOOT_PAGESIZE must be a power of two no greater than 64, got {pagesize}");
    }
    if timonel_start % pagesize != 0 {
        panic!("TWIBOOT_START ({timonel_start}) must be a multiple of TWIBOOT_PAGESIZE ({pagesize})");
    }
    if rx_capacity == 0 || (rx_capacity & (rx_capacity - 1)) != 0 {
        panic!("TWIBOOT_RX_CAPACITY must be a power of two, got {rx_capacity}");
    }
    if tx_capacity == 0 || (tx_capacity & (tx_capacity - 1)) != 0 {
        panic!("TWIBOOT_TX_CAPACITY must be a power of two, got {tx_capacity}");
    }
    if mst_packet_size > rx_capacity / 2 {
        panic!("TWIBOOT_MST_PACKET_SIZE must be <= TWIBOOT_RX_CAPACITY/2");
    }
    if slv_packet_size > tx_capacity / 2 {
        panic!("TWIBOOT_SLV_PACKET_SIZE must be <= TWIBOOT_TX_CAPACITY/2");
    }
    if !auto_page_addr && !cmd_setpgaddr {
        panic!("If TWIBOOT_AUTO_PAGE_ADDR is disabled, TWIBOOT_CMD_SETPGADDR must be enabled");
    }

    writeln!(
        f,
        "// Generated by build.rs from TWIBOOT_* environment variables. Do not edit.\n\
         pub const TWI_ADDR: u8 = {twi_addr};\n\
         pub const PAGESIZE: u16 = {pagesize};\n\
         pub const TIMONEL_START: u16 = {timonel_start};\n\
         pub const RX_CAPACITY: usize = {rx_capacity};\n\
         pub const TX_CAPACITY: usize = {tx_capacity};\n\
         pub const MST_PACKET_SIZE: usize = {mst_packet_size};\n\
         pub const SLV_PACKET_SIZE: usize = {slv_packet_size};\n\
         pub const SHORT_LED_DLY: u16 = {short_led_dly};\n\
         pub const SHORT_EXIT_DLY: u8 = {short_exit_dly};\n\
         pub const AUTO_PAGE_ADDR: bool = {auto_page_addr};\n\
         pub const CMD_SETPGADDR: bool = {cmd_setpgaddr};\n\
         pub const CMD_READFLASH: bool = {cmd_readflash};\n\
         pub const TWO_STEP_INIT: bool = {two_step_init};\n\
         pub const APP_USE_TPL_PG: bool = {app_use_tpl_pg};\n\
         pub const CHECK_PAGE_IX: bool = {check_page_ix};\n\
         pub const TIMEOUT_EXIT: bool = {timeout_exit};\n\
         pub const FORCE_ERASE_PG: bool = {force_erase_pg};\n\
         pub const USE_WDT_RESET: bool = {use_wdt_reset};\n\
         pub const ENABLE_LED_UI: bool = {enable_led_ui};\n\
         pub const AUTO_CLK_TWEAK: bool = {auto_clk_tweak};\n\
         pub const CLEAR_BIT_7_R31: bool = {clear_bit_7_r31};\n",
    )
    .expect("Failed to write config.rs");

    for var in [
        "TWIBOOT_TWI_ADDR",
        "TWIBOOT_PAGESIZE",
        "TWIBOOT_START",
        "TWIBOOT_RX_CAPACITY",
        "TWIBOOT_TX_CAPACITY",
        "TWIBOOT_MST_PACKET_SIZE",
        "TWIBOOT_SLV_PACKET_SIZE",
        "TWIBOOT_SHORT_LED_DLY",
        "TWIBOOT_SHORT_EXIT_DLY",
        "TWIBOOT_AUTO_PAGE_ADDR",
        "TWIBOOT_CMD_SETPGADDR",
        "TWIBOOT_CMD_READFLASH",
        "TWIBOOT_TWO_STEP_INIT",
        "TWIBOOT_APP_USE_TPL_PG",
        "TWIBOOT_CHECK_PAGE_IX",
        "TWIBOOT_TIMEOUT_EXIT",
        "TWIBOOT_FORCE_ERASE_PG",
        "TWIBOOT_USE_WDT_RESET",
        "TWIBOOT_ENABLE_LED_UI",
        "TWIBOOT_AUTO_CLK_TWEAK",
        "TWIBOOT_CLEAR_BIT_7_R31",
    ] {
        println!("cargo:rerun-if-env-changed={var}");
    }
}
