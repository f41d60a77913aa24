//! USB device subsystem - a single CDC-ACM serial port carrying the
//! operator shell.
//!
//! The SoftDevice owns the POWER peripheral, so VBUS events arrive as SoC
//! events and are fed into a [`SoftwareVbusDetect`] by the SoftDevice task.

pub mod console;

use embassy_nrf::usb::vbus_detect::SoftwareVbusDetect;
use embassy_nrf::usb::Driver;
use embassy_nrf::{bind_interrupts, peripherals};
use embassy_usb::class::cdc_acm::{CdcAcmClass, State};
use embassy_usb::driver::EndpointError;
use embassy_usb::{Builder, Config, UsbDevice};
use static_cell::StaticCell;

use crate::config;

bind_interrupts!(struct Irqs {
    USBD => embassy_nrf::usb::InterruptHandler<peripherals::USBD>;
});

pub type UsbDriver = Driver<'static, peripherals::USBD, &'static SoftwareVbusDetect>;
pub type SerialClass = CdcAcmClass<'static, UsbDriver>;

/// Full-speed bulk packet size.
const MAX_PACKET_SIZE: u16 = 64;

static CDC_STATE: StaticCell<State> = StaticCell::new();
static USB_CONFIG_DESC: StaticCell<[u8; 256]> = StaticCell::new();
static USB_BOS_DESC: StaticCell<[u8; 256]> = StaticCell::new();
static USB_MSOS_DESC: StaticCell<[u8; 256]> = StaticCell::new();
static USB_CTRL_BUF: StaticCell<[u8; 64]> = StaticCell::new();

/// Initialise the USB stack with one CDC-ACM interface.
///
/// Must be called exactly once. All static buffers are consumed here.
pub fn init(
    usbd: peripherals::USBD,
    vbus: &'static SoftwareVbusDetect,
) -> (UsbDevice<'static, UsbDriver>, SerialClass) {
    let driver = Driver::new(usbd, Irqs, vbus);

    let mut usb_config = Config::new(config::USB_VID, config::USB_PID);
    usb_config.manufacturer = Some(config::USB_MANUFACTURER);
    usb_config.product = Some(config::USB_PRODUCT);
    usb_config.serial_number = Some(config::USB_SERIAL_NUMBER);
    usb_config.max_power = 100; // mA
    usb_config.max_packet_size_0 = 64;

    let mut builder = Builder::new(
        driver,
        usb_config,
        USB_CONFIG_DESC.init([0u8; 256]),
        USB_BOS_DESC.init([0u8; 256]),
        USB_MSOS_DESC.init([0u8; 256]),
        USB_CTRL_BUF.init([0u8; 64]),
    );

    let state = CDC_STATE.init(State::new());
    let class = CdcAcmClass::new(&mut builder, state, MAX_PACKET_SIZE);
    let device = builder.build();

    info!("USB serial console initialised");
    (device, class)
}

/// Run the USB device stack - spawn as a dedicated task.
pub async fn run_usb_device(mut device: UsbDevice<'static, UsbDriver>) -> ! {
    info!("USB device task started");
    device.run().await
}

/// Write `data` in packet-sized chunks, closing with a zero-length packet
/// when the last chunk is full.
pub async fn write_all(class: &mut SerialClass, data: &[u8]) -> Result<(), EndpointError> {
    let max = usize::from(class.max_packet_size());
    for chunk in data.chunks(max) {
        class.write_packet(chunk).await?;
    }
    if !data.is_empty() && data.len() % max == 0 {
        class.write_packet(&[]).await?;
    }
    Ok(())
}
