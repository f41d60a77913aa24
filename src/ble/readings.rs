//! Notification payload decoding and per-peer reading aggregation.
//!
//! Payload layouts (all little-endian):
//! ```text
//! Temperature  u16  0.01 °C
//! Humidity     u16  0.01 %RH
//! Pressure     u32  1 Pa
//! Dew point    i8   1 °C
//! Battery      u8   1 %
//! ```

use crate::ble::interest::SensorKind;
use crate::error::DecodeError;

/// One decoded notification.
#[derive(Debug, Clone, Copy, PartialEq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum Reading {
    /// Degrees Celsius.
    Temperature(f32),
    /// Percent relative humidity.
    Humidity(f32),
    /// Pascals.
    Pressure(u32),
    /// Whole degrees Celsius.
    DewPoint(i8),
    /// Percent.
    BatteryLevel(u8),
}

impl Reading {
    pub const fn kind(&self) -> SensorKind {
        match self {
            Reading::Temperature(_) => SensorKind::Temperature,
            Reading::Humidity(_) => SensorKind::Humidity,
            Reading::Pressure(_) => SensorKind::Pressure,
            Reading::DewPoint(_) => SensorKind::DewPoint,
            Reading::BatteryLevel(_) => SensorKind::BatteryLevel,
        }
    }
}

fn take<const N: usize>(payload: &[u8]) -> Result<[u8; N], DecodeError> {
    payload
        .get(..N)
        .and_then(|bytes| bytes.try_into().ok())
        .ok_or(DecodeError::TooShort {
            expected: N as u8,
            actual: payload.len().min(u8::MAX as usize) as u8,
        })
}

/// Decode a notification payload for `kind`. Trailing bytes are ignored.
pub fn decode(kind: SensorKind, payload: &[u8]) -> Result<Reading, DecodeError> {
    Ok(match kind {
        SensorKind::Temperature => {
            Reading::Temperature(u16::from_le_bytes(take(payload)?) as f32 / 100.0)
        }
        SensorKind::Humidity => Reading::Humidity(u16::from_le_bytes(take(payload)?) as f32 / 100.0),
        SensorKind::Pressure => Reading::Pressure(u32::from_le_bytes(take(payload)?)),
        SensorKind::DewPoint => Reading::DewPoint(i8::from_le_bytes(take(payload)?)),
        SensorKind::BatteryLevel => Reading::BatteryLevel(take::<1>(payload)?[0]),
    })
}

/// Latest value per kind plus the `received` bitmask.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct Readings {
    pub temperature: f32,
    pub humidity: f32,
    pub pressure: u32,
    pub dew_point: i8,
    pub battery_level: u8,
    received: u8,
}

impl Readings {
    pub const fn new() -> Self {
        Self {
            temperature: 0.0,
            humidity: 0.0,
            pressure: 0,
            dew_point: 0,
            battery_level: 0,
            received: 0,
        }
    }

    /// Store a value and set its bit.
    pub fn record(&mut self, reading: Reading) {
        match reading {
            Reading::Temperature(v) => self.temperature = v,
            Reading::Humidity(v) => self.humidity = v,
            Reading::Pressure(v) => self.pressure = v,
            Reading::DewPoint(v) => self.dew_point = v,
            Reading::BatteryLevel(v) => self.battery_level = v,
        }
        self.received |= reading.kind().bit();
    }

    pub fn received(&self) -> u8 {
        self.received
    }

    pub fn has(&self, kind: SensorKind) -> bool {
        self.received & kind.bit() != 0
    }

    /// Every bit of `mask` is set.
    pub fn is_complete(&self, mask: u8) -> bool {
        self.received & mask == mask
    }

    /// Clear the bitmask. Values are kept until overwritten.
    pub fn clear_received(&mut self) {
        self.received = 0;
    }

    /// Forget everything, as on disconnect.
    pub fn clear(&mut self) {
        *self = Self::new();
    }
}
