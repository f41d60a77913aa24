//! Application-wide constants and compile-time configuration.
//!
//! All hardware pin assignments, timing parameters, and protocol
//! constants live here so they can be tuned in one place.

use crate::ble::interest::SensorKind;
use crate::ble::peer::{AddressKind, PeerAddress};

// BLE

/// BLE connection interval range (in 1.25 ms units).
/// Sensors notify every few seconds, so latency is not a concern.
pub const BLE_CONN_INTERVAL_MIN: u16 = 24;
pub const BLE_CONN_INTERVAL_MAX: u16 = 40;

/// BLE slave latency (number of connection events the peripheral can skip).
pub const BLE_SLAVE_LATENCY: u16 = 0;

/// BLE supervision timeout (in 10 ms units). 400 = 4 s.
pub const BLE_SUP_TIMEOUT: u16 = 400;

/// Create-connection timeout; expiry counts as a failed connection.
pub const BLE_CONNECT_TIMEOUT_MS: u64 = 3_000;

/// Upper bound for a single discover or subscribe round trip.
pub const DISCOVERY_STEP_TIMEOUT_MS: u64 = 10_000;

/// Capacity of each per-peer link command queue.
pub const LINK_COMMAND_DEPTH: usize = 4;

/// Capacity of the shared link event queue.
pub const LINK_EVENT_DEPTH: usize = 16;

// Peers

/// Number of fixed remote sensors.
pub const PEER_COUNT: usize = 3;

/// Static description of one remote sensor.
pub struct PeerConfig {
    pub address: PeerAddress,
    pub name: &'static str,
}

/// Remote sensors, in round-robin order. Address bytes are little-endian
/// (least significant octet first).
pub const PEERS: [PeerConfig; PEER_COUNT] = [
    PeerConfig {
        address: PeerAddress::new(AddressKind::RandomStatic, [0x22, 0x07, 0x7b, 0x1c, 0xb2, 0xf7]),
        name: "Server Room",
    },
    PeerConfig {
        address: PeerAddress::new(AddressKind::RandomStatic, [0xc5, 0x2a, 0xc2, 0x37, 0x3e, 0xe2]),
        name: "Plant area",
    },
    PeerConfig {
        address: PeerAddress::new(AddressKind::RandomStatic, [0x05, 0x55, 0x92, 0xa8, 0x8a, 0xe3]),
        name: "Northwind area",
    },
];

/// ESS characteristics read from every peer, in subscription order.
pub const ESS_INTEREST: &[SensorKind] = &[
    SensorKind::Temperature,
    SensorKind::Humidity,
    SensorKind::Pressure,
    SensorKind::DewPoint,
];

/// Also read the Battery Service level.
pub const BATTERY_INTEREST: bool = true;

/// Start connecting at boot; otherwise wait for `ess enable`.
pub const START_ON_BOOT: bool = true;

// Connection backoff

/// Failure counts strictly above these thresholds select the delays below.
pub const BACKOFF_SHORT_AFTER: u8 = 8;
pub const BACKOFF_MEDIUM_AFTER: u8 = 16;
/// Failure count at or above which the long delay applies.
pub const BACKOFF_LONG_FROM: u8 = 28;

pub const BACKOFF_SHORT_MS: u64 = 800;
pub const BACKOFF_MEDIUM_MS: u64 = 4_000;
pub const BACKOFF_LONG_MS: u64 = 10_000;

/// The global failure counter saturates here.
pub const CONNECTION_FAILURE_MAX: u8 = 30;

// Fan

/// Dwell between single-unit ramp steps.
pub const FAN_RAMP_DWELL_MS: u32 = 50;

/// PWM period is 1/64 s. At a 125 kHz counter clock (16 MHz / 128) that
/// is 1953 counts.
pub const FAN_PWM_MAX_DUTY: u16 = 1953;

// Local sensor

/// Name shown for the on-board DHT22.
pub const LOCAL_SENSOR_NAME: &str = "Loft";

/// Number of throwaway samples taken at boot.
pub const DHT_WARMUP_SAMPLES: u8 = 3;

/// DHT22 needs ~1 s between conversions.
pub const DHT_WARMUP_INTERVAL_MS: u32 = 1_200;

/// Pause before retrying a failed report-time sample.
pub const DHT_RETRY_DELAY_MS: u32 = 300;

/// Core clock, used to convert cycle counts to microseconds.
pub const CPU_CYCLES_PER_US: u32 = 64;

// Shell

/// Peer indices are printed 1-based.
pub const DEVICE_ID_DISPLAY_OFFSET: usize = 1;

/// Longest accepted command line.
pub const SHELL_LINE_MAX: usize = 64;

// USB

/// USB VID/PID - use the "pid.codes" open-source test VID.
/// Replace with your own allocated VID/PID for production.
pub const USB_VID: u16 = 0x1209;
pub const USB_PID: u16 = 0x0002;

/// USB device strings.
pub const USB_MANUFACTURER: &str = "esshub";
pub const USB_PRODUCT: &str = "ESS Hub Console";
pub const USB_SERIAL_NUMBER: &str = "000001";

// GPIO pin assignments (nRF52840-DK defaults)
//
// These are logical names; the actual `embassy_nrf::peripherals::*` pins are
// selected in `main.rs`.  Adjust for your custom PCB.
//
//   Fan PWM / drive   → P0.13
//   DHT22 data        → P0.03
//   External reset    → P0.28
