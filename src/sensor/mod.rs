//! Local climate sensor.
//!
//! The on-board DHT22 is read on demand by the shell. It is warmed up at
//! boot and a failed sample is retried once before giving up.

pub mod dht22;

use embedded_hal_async::delay::DelayNs;

use crate::config::{DHT_RETRY_DELAY_MS, DHT_WARMUP_INTERVAL_MS, DHT_WARMUP_SAMPLES};
use crate::error::SensorError;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum Channel {
    Temperature,
    Humidity,
}

/// A sensor that converts on `fetch_sample` and serves the last
/// conversion from `read`.
pub trait ClimateSensor {
    fn fetch_sample(&mut self) -> Result<(), SensorError>;
    fn read(&self, channel: Channel) -> f32;
}

#[derive(Debug, Clone, Copy, PartialEq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct LocalReading {
    /// Degrees Celsius.
    pub temperature: f32,
    /// Percent relative humidity.
    pub humidity: f32,
}

pub struct LocalClimate<S> {
    sensor: S,
    healthy: bool,
}

impl<S: ClimateSensor> LocalClimate<S> {
    pub fn new(sensor: S) -> Self {
        Self {
            sensor,
            healthy: false,
        }
    }

    /// Whether the most recent fetch succeeded.
    pub fn healthy(&self) -> bool {
        self.healthy
    }

    /// Throwaway conversions after power-up; the first DHT22 reading is
    /// usually stale.
    pub async fn warm_up<D: DelayNs>(&mut self, delay: &mut D) {
        for i in 0..DHT_WARMUP_SAMPLES {
            if i > 0 {
                delay.delay_ms(DHT_WARMUP_INTERVAL_MS).await;
            }
            self.healthy = self.sensor.fetch_sample().is_ok();
        }
        info!("local sensor warm-up done (healthy {})", self.healthy);
    }

    /// Fresh reading, retried once after a short pause.
    pub async fn sample<D: DelayNs>(&mut self, delay: &mut D) -> Option<LocalReading> {
        let mut result = self.sensor.fetch_sample();
        if result.is_err() {
            delay.delay_ms(DHT_RETRY_DELAY_MS).await;
            result = self.sensor.fetch_sample();
        }
        self.healthy = result.is_ok();

        match result {
            Ok(()) => Some(LocalReading {
                temperature: self.sensor.read(Channel::Temperature),
                humidity: self.sensor.read(Channel::Humidity),
            }),
            Err(e) => {
                warn!("local sensor read failed: {:?}", e);
                None
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use embassy_futures::block_on;

    /// Fails the first `failures` fetches.
    struct ScriptedSensor {
        failures: u8,
        fetches: u8,
    }

    impl ClimateSensor for ScriptedSensor {
        fn fetch_sample(&mut self) -> Result<(), SensorError> {
            self.fetches += 1;
            if self.fetches <= self.failures {
                Err(SensorError::Checksum)
            } else {
                Ok(())
            }
        }

        fn read(&self, channel: Channel) -> f32 {
            match channel {
                Channel::Temperature => 21.5,
                Channel::Humidity => 48.0,
            }
        }
    }

    #[derive(Default)]
    struct RecordingDelay {
        waits: std::vec::Vec<u32>,
    }

    impl DelayNs for RecordingDelay {
        async fn delay_ns(&mut self, ns: u32) {
            self.waits.push(ns / 1_000_000);
        }

        async fn delay_ms(&mut self, ms: u32) {
            self.waits.push(ms);
        }
    }

    fn climate(failures: u8) -> LocalClimate<ScriptedSensor> {
        LocalClimate::new(ScriptedSensor {
            failures,
            fetches: 0,
        })
    }

    #[test]
    fn warm_up_fetches_three_times_spaced() {
        let mut c = climate(1);
        let mut delay = RecordingDelay::default();
        block_on(c.warm_up(&mut delay));
        assert_eq!(c.sensor.fetches, 3);
        assert_eq!(delay.waits, [1_200, 1_200]);
        assert!(c.healthy());
    }

    #[test]
    fn warm_up_health_follows_last_fetch() {
        let mut c = climate(3);
        block_on(c.warm_up(&mut RecordingDelay::default()));
        assert!(!c.healthy());
    }

    #[test]
    fn sample_retries_once() {
        let mut c = climate(1);
        let mut delay = RecordingDelay::default();
        let reading = block_on(c.sample(&mut delay)).unwrap();
        assert_eq!(reading.temperature, 21.5);
        assert_eq!(reading.humidity, 48.0);
        assert_eq!(delay.waits, [300]);
        assert!(c.healthy());
    }

    #[test]
    fn sample_gives_up_after_retry() {
        let mut c = climate(2);
        assert_eq!(block_on(c.sample(&mut RecordingDelay::default())), None);
        assert_eq!(c.sensor.fetches, 2);
        assert!(!c.healthy());
    }
}
