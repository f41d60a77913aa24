//! esshub firmware - nRF52840 with SoftDevice S140.
//!
//! Task layout:
//! - `softdevice_task`: SoftDevice event loop, also feeds USB VBUS state
//! - `link_task` (one per peer): GATT operations for that peer
//! - `central_task`: scheduler wake-ups, link events, backoff timer
//! - `fan_task`: PWM ramp toward the commanded speed
//! - `usb_task` / `console_task`: USB stack and the operator shell

#![no_std]
#![no_main]

use defmt::{info, unwrap};
use embassy_executor::Spawner;
use embassy_nrf::gpio::{Flex, OutputDrive, Pin as _, Pull};
use embassy_nrf::interrupt::{self, InterruptExt as _};
use embassy_nrf::usb::vbus_detect::SoftwareVbusDetect;
use embassy_sync::mutex::Mutex;
use embassy_time::Delay;
use nrf_softdevice::{self as sd, Flash, SocEvent, Softdevice};
use static_cell::StaticCell;
use {defmt_rtt as _, panic_probe as _};

use esshub::ble::central::Central;
use esshub::ble::interest::InterestList;
use esshub::ble::link::{ChannelLink, CommandQueue, EventQueue};
use esshub::ble::radio::{self, CommandReceiver, EventReceiver, EventSender, SharedCentral};
use esshub::config::{PEER_COUNT, START_ON_BOOT};
use esshub::fan::pwm::FanDriver;
use esshub::fan::ramp::FanController;
use esshub::fan::FanShared;
use esshub::sensor::dht22::Dht22;
use esshub::sensor::LocalClimate;
use esshub::usb::console::Console;
use esshub::usb::{self, SerialClass, UsbDriver};

static LINK_COMMANDS: [CommandQueue; PEER_COUNT] = [const { CommandQueue::new() }; PEER_COUNT];
static LINK_EVENTS: EventQueue = EventQueue::new();
static CENTRAL: StaticCell<SharedCentral> = StaticCell::new();
static FAN: FanShared = FanShared::new();
static VBUS_DETECT: StaticCell<SoftwareVbusDetect> = StaticCell::new();

const DEVICE_NAME: &[u8] = b"esshub";

#[embassy_executor::main]
async fn main(spawner: Spawner) {
    info!("esshub v{} starting", esshub::boot::VERSION);

    let mut nrf_config = embassy_nrf::config::Config::default();
    nrf_config.gpiote_interrupt_priority = interrupt::Priority::P2;
    nrf_config.time_interrupt_priority = interrupt::Priority::P2;
    let p = embassy_nrf::init(nrf_config);
    interrupt::USBD.set_priority(interrupt::Priority::P2);

    // Cycle counter for DHT22 bit timing.
    let mut cp = unwrap!(cortex_m::Peripherals::take());
    cp.DCB.enable_trace();
    cp.DWT.enable_cycle_counter();

    let vbus = VBUS_DETECT.init_with(|| SoftwareVbusDetect::new(true, true));

    // ── SoftDevice ───────────────────────────────────────────────────────
    let sd_config = nrf_softdevice::Config {
        clock: Some(sd::raw::nrf_clock_lf_cfg_t {
            source: sd::raw::NRF_CLOCK_LF_SRC_RC as u8,
            rc_ctiv: 16,
            rc_temp_ctiv: 2,
            accuracy: sd::raw::NRF_CLOCK_LF_ACCURACY_500_PPM as u8,
        }),
        conn_gap: Some(sd::raw::ble_gap_conn_cfg_t {
            conn_count: PEER_COUNT as u8,
            event_length: 6,
        }),
        conn_gatt: Some(sd::raw::ble_gatt_conn_cfg_t { att_mtu: 23 }),
        gap_role_count: Some(sd::raw::ble_gap_cfg_role_count_t {
            adv_set_count: 1,
            periph_role_count: 0,
            central_role_count: PEER_COUNT as u8,
            central_sec_count: 0,
            _bitfield_1: sd::raw::ble_gap_cfg_role_count_t::new_bitfield_1(0),
        }),
        gap_device_name: Some(sd::raw::ble_gap_cfg_device_name_t {
            p_value: DEVICE_NAME.as_ptr() as _,
            current_len: DEVICE_NAME.len() as u16,
            max_len: DEVICE_NAME.len() as u16,
            write_perm: unsafe { core::mem::zeroed() },
            _bitfield_1: sd::raw::ble_gap_cfg_device_name_t::new_bitfield_1(
                sd::raw::BLE_GATTS_VLOC_STACK as u8,
            ),
        }),
        ..Default::default()
    };
    let sd = Softdevice::enable(&sd_config);
    spawner.must_spawn(softdevice_task(sd, vbus));

    // ── BLE engine ───────────────────────────────────────────────────────
    let interest = unwrap!(InterestList::from_config());
    let central = CENTRAL.init(Mutex::new(Central::new(
        interest,
        ChannelLink::new(&LINK_COMMANDS),
        START_ON_BOOT,
    )));

    for queue in LINK_COMMANDS.iter() {
        spawner.must_spawn(link_task(sd, queue.receiver(), LINK_EVENTS.sender()));
    }
    spawner.must_spawn(central_task(central, LINK_EVENTS.receiver()));

    // ── Fan ──────────────────────────────────────────────────────────────
    let fan = FanDriver::new(p.PWM0, p.P0_13.degrade());
    spawner.must_spawn(fan_task(fan));

    // ── Local sensor, USB console ────────────────────────────────────────
    let mut dht_pin = Flex::new(p.P0_03);
    dht_pin.set_high();
    dht_pin.set_as_input_output(Pull::Up, OutputDrive::Standard0Disconnect1);
    let climate = LocalClimate::new(Dht22::new(dht_pin, cortex_m::peripheral::DWT::cycle_count));

    let (device, class) = usb::init(p.USBD, vbus);
    spawner.must_spawn(usb_task(device));

    let console = Console::new(central, &FAN, climate, Flash::take(sd), Flex::new(p.P0_28));
    spawner.must_spawn(console_task(console, class));

    info!("all tasks spawned");
}

#[embassy_executor::task]
async fn softdevice_task(sd: &'static Softdevice, vbus: &'static SoftwareVbusDetect) -> ! {
    unsafe {
        sd::raw::sd_power_usbremoved_enable(1);
        sd::raw::sd_power_usbdetected_enable(1);
        sd::raw::sd_power_usbpwrrdy_enable(1);
    }

    sd.run_with_callback(|event: SocEvent| match event {
        SocEvent::PowerUsbRemoved => vbus.detected(false),
        SocEvent::PowerUsbDetected => vbus.detected(true),
        SocEvent::PowerUsbPowerReady => vbus.ready(),
        _ => {}
    })
    .await
}

#[embassy_executor::task(pool_size = PEER_COUNT)]
async fn link_task(sd: &'static Softdevice, commands: CommandReceiver, events: EventSender) -> ! {
    radio::link_task(sd, commands, events).await
}

#[embassy_executor::task]
async fn central_task(central: &'static SharedCentral, events: EventReceiver) -> ! {
    radio::central_task(central, events).await
}

#[embassy_executor::task]
async fn fan_task(mut driver: FanDriver) -> ! {
    FanController::new(&FAN).run(&mut driver, &mut Delay).await
}

#[embassy_executor::task]
async fn usb_task(device: embassy_usb::UsbDevice<'static, UsbDriver>) -> ! {
    usb::run_usb_device(device).await
}

#[embassy_executor::task]
async fn console_task(console: Console, class: SerialClass) -> ! {
    console.run(class).await
}
