//! Fan subsystem.
//!
//! The command surface writes the target speed into [`FanShared`] and
//! raises its change signal; the fan task ramps the output toward it
//! (see [`ramp`]). Speeds are whole percent, optionally at half duty.

pub mod ramp;

#[cfg(feature = "embedded")]
pub mod pwm;

use core::sync::atomic::{AtomicU8, Ordering};

use embassy_sync::blocking_mutex::raw::CriticalSectionRawMutex;
use embassy_sync::signal::Signal;

use crate::error::CommandError;

/// Highest commandable speed.
pub const FAN_SPEED_MAX: u8 = 100;

const HALF_FLAG: u8 = 0x80;

/// A fan speed in percent plus the half-duty flag.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct FanSpeed {
    pub percent: u8,
    pub half: bool,
}

impl FanSpeed {
    pub const OFF: FanSpeed = FanSpeed {
        percent: 0,
        half: false,
    };

    pub fn new(percent: u8, half: bool) -> Result<Self, CommandError> {
        if percent > FAN_SPEED_MAX {
            return Err(CommandError::SpeedOutOfRange);
        }
        Ok(Self { percent, half })
    }

    const fn pack(self) -> u8 {
        self.percent | if self.half { HALF_FLAG } else { 0 }
    }

    const fn unpack(word: u8) -> Self {
        Self {
            percent: word & !HALF_FLAG,
            half: word & HALF_FLAG != 0,
        }
    }
}

/// Commanded and actual fan speed, each stored as one packed word so a
/// reader never sees a speed from one write and a flag from another.
pub struct FanShared {
    commanded: AtomicU8,
    actual: AtomicU8,
    changed: Signal<CriticalSectionRawMutex, ()>,
}

impl FanShared {
    pub const fn new() -> Self {
        Self {
            commanded: AtomicU8::new(0),
            actual: AtomicU8::new(0),
            changed: Signal::new(),
        }
    }

    /// Validate and store a new target, then wake the fan task.
    pub fn set_speed(&self, percent: u8, half: bool) -> Result<(), CommandError> {
        let speed = FanSpeed::new(percent, half)?;
        self.commanded.store(speed.pack(), Ordering::Release);
        self.changed.signal(());
        Ok(())
    }

    pub fn commanded(&self) -> FanSpeed {
        FanSpeed::unpack(self.commanded.load(Ordering::Acquire))
    }

    pub fn actual(&self) -> FanSpeed {
        FanSpeed::unpack(self.actual.load(Ordering::Acquire))
    }

    pub(crate) fn publish_actual(&self, speed: FanSpeed) {
        self.actual.store(speed.pack(), Ordering::Release);
    }

    pub(crate) async fn wait_changed(&self) {
        self.changed.wait().await
    }
}

impl Default for FanShared {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rejects_out_of_range_speed() {
        let fan = FanShared::new();
        assert_eq!(fan.set_speed(101, false), Err(CommandError::SpeedOutOfRange));
        assert_eq!(fan.commanded(), FanSpeed::OFF);
    }

    #[test]
    fn commanded_round_trips_half_flag() {
        let fan = FanShared::new();
        fan.set_speed(100, true).unwrap();
        assert_eq!(
            fan.commanded(),
            FanSpeed {
                percent: 100,
                half: true
            }
        );
        assert_eq!(fan.actual(), FanSpeed::OFF);
    }
}
