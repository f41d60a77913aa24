//! DHT22 / AM2302 single-wire driver.
//!
//! Frame (40 bits, MSB first):
//! ```text
//! Byte 0-1: humidity     u16  0.1 %RH
//! Byte 2-3: temperature  u16  0.1 °C, bit 15 = sign
//! Byte 4:   checksum     low byte of the sum of bytes 0-3
//! ```
//!
//! Each bit is a ~50 µs low preamble followed by a high pulse of ~27 µs
//! for 0 or ~70 µs for 1. The pin must be open-drain with a pull-up.
//! Pulse widths are measured with a free-running cycle counter.

use embedded_hal::digital::{InputPin, OutputPin};

use crate::config::CPU_CYCLES_PER_US;
use crate::error::SensorError;
use crate::sensor::{Channel, ClimateSensor};

/// Host start pulse.
const START_LOW_US: u32 = 1_100;
/// Response low/high phases are 80 µs each.
const RESPONSE_TIMEOUT_US: u32 = 120;
const PREAMBLE_TIMEOUT_US: u32 = 80;
const BIT_TIMEOUT_US: u32 = 100;
/// High pulses longer than this are ones.
const ONE_THRESHOLD_US: u32 = 48;

/// Check and convert a raw frame into (temperature °C, humidity %RH).
pub fn decode_frame(frame: [u8; 5]) -> Result<(f32, f32), SensorError> {
    let sum = frame[..4].iter().fold(0u8, |acc, b| acc.wrapping_add(*b));
    if sum != frame[4] {
        return Err(SensorError::Checksum);
    }

    let humidity = u16::from_be_bytes([frame[0], frame[1]]) as f32 / 10.0;
    let magnitude = u16::from_be_bytes([frame[2] & 0x7F, frame[3]]) as f32 / 10.0;
    let temperature = if frame[2] & 0x80 != 0 {
        -magnitude
    } else {
        magnitude
    };
    Ok((temperature, humidity))
}

pub struct Dht22<P> {
    pin: P,
    cycles: fn() -> u32,
    temperature: f32,
    humidity: f32,
}

impl<P: InputPin + OutputPin> Dht22<P> {
    /// `cycles` must return a counter ticking at [`CPU_CYCLES_PER_US`] MHz.
    pub fn new(pin: P, cycles: fn() -> u32) -> Self {
        Self {
            pin,
            cycles,
            temperature: 0.0,
            humidity: 0.0,
        }
    }

    fn elapsed_us(&self, since: u32) -> u32 {
        (self.cycles)().wrapping_sub(since) / CPU_CYCLES_PER_US
    }

    fn busy_wait_us(&self, us: u32) {
        let start = (self.cycles)();
        while self.elapsed_us(start) < us {}
    }

    /// Wait for the line to reach `high`; returns how long that took.
    fn wait_for(&mut self, high: bool, timeout_us: u32) -> Result<u32, SensorError> {
        let start = (self.cycles)();
        loop {
            let level = self.pin.is_high().map_err(|_| SensorError::Pin)?;
            let elapsed = self.elapsed_us(start);
            if level == high {
                return Ok(elapsed);
            }
            if elapsed > timeout_us {
                return Err(SensorError::Timeout);
            }
        }
    }

    fn read_frame(&mut self) -> Result<[u8; 5], SensorError> {
        self.pin.set_low().map_err(|_| SensorError::Pin)?;
        self.busy_wait_us(START_LOW_US);
        self.pin.set_high().map_err(|_| SensorError::Pin)?;

        let respond = |r: Result<u32, SensorError>| r.map_err(|_| SensorError::NoResponse);
        respond(self.wait_for(false, RESPONSE_TIMEOUT_US))?;
        respond(self.wait_for(true, RESPONSE_TIMEOUT_US))?;
        respond(self.wait_for(false, RESPONSE_TIMEOUT_US))?;

        let mut frame = [0u8; 5];
        for bit in 0..40 {
            self.wait_for(true, PREAMBLE_TIMEOUT_US)?;
            let high_us = self.wait_for(false, BIT_TIMEOUT_US)?;
            if high_us > ONE_THRESHOLD_US {
                frame[bit / 8] |= 0x80 >> (bit % 8);
            }
        }
        Ok(frame)
    }
}

impl<P: InputPin + OutputPin> ClimateSensor for Dht22<P> {
    fn fetch_sample(&mut self) -> Result<(), SensorError> {
        let result = self.read_frame();
        // Leave the bus released whatever happened.
        let _ = self.pin.set_high();
        let (temperature, humidity) = decode_frame(result?)?;
        self.temperature = temperature;
        self.humidity = humidity;
        Ok(())
    }

    fn read(&self, channel: Channel) -> f32 {
        match channel {
            Channel::Temperature => self.temperature,
            Channel::Humidity => self.humidity,
        }
    }
}
