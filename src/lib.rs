//! esshub - BLE environmental-sensing hub.
//!
//! Connects to a fixed set of ESS peripherals one negotiation at a time,
//! subscribes to their readings and serves them over a USB serial shell,
//! next to a ramped PWM fan and a local DHT22 sensor.
//!
//! The scheduling, discovery, aggregation, fan ramp and shell logic are
//! hardware independent and tested on the host with `cargo test`. The
//! `embedded` feature adds the SoftDevice link adapter, the PWM fan
//! driver, the USB console and the bootloader hooks used by the firmware
//! binary in `main.rs`.

#![cfg_attr(not(test), no_std)]

// Must come first so the logging macros are visible to every module.
mod fmt;

pub mod ble;
pub mod config;
pub mod error;
pub mod fan;
pub mod sensor;
pub mod shell;

#[cfg(feature = "embedded")]
pub mod boot;
#[cfg(feature = "embedded")]
pub mod usb;

pub use error::Error;
