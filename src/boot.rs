//! Reboot and bootloader entry.
//!
//! The bootloader checks a 32-byte marker at a fixed place in the
//! application image (see the `.fake_boot_string` section in `memory.x`).
//! While the marker is erased flash (all `0xFF`) it boots the application;
//! zeroing its first word makes it stay in DFU mode on the next reset.

use embedded_storage_async::nor_flash::NorFlash;

use crate::error::Error;

/// Firmware version reported by `app version`.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

#[repr(C, align(4))]
struct BootMarker([u8; 32]);

#[link_section = ".fake_boot_string"]
#[used]
static BOOT_MARKER: BootMarker = BootMarker([0xFF; 32]);

fn marker_address() -> u32 {
    core::ptr::addr_of!(BOOT_MARKER) as u32
}

/// Zero the marker word so the bootloader takes over after reset.
pub async fn clear_boot_marker<F: NorFlash>(flash: &mut F) -> Result<(), Error> {
    let address = marker_address();
    info!("clearing boot marker at {:#x}", address);
    flash.write(address, &[0u8; 4]).await.map_err(|_| Error::Storage)
}

/// Cold reset.
pub fn reboot() -> ! {
    cortex_m::peripheral::SCB::sys_reset()
}
