#![no_std]
#![no_main]

use twi_bootloader::hardware::{AttinyPlatform, AttinyUsi};
use twi_bootloader::{Bootloader, Outcome, Platform};

#[no_mangle]
pub extern "C" fn main() -> ! {
    let mut hw = AttinyUsi;
    let mut platform = AttinyPlatform::new();
    let mut boot: Bootloader<16, 16> = Bootloader::new();

    platform.clock_prescaler_reset();

    loop {
        match boot.tick(&mut hw, &mut platform) {
            Outcome::Continue => {}
            Outcome::ExitToApp => {
                platform.clock_prescaler_restore();
                platform.jump_to_app();
            }
            Outcome::Restarted => platform.restart(),
        }
    }
}

#[panic_handler]
fn panic(_info: &core::panic::PanicInfo) -> ! {
    loop {}
}
