//! nRF52840 fan output: PWM0 on one pin for partial speeds, plain GPIO
//! for fully off and fully on.
//!
//! The PWM peripheral and the GPIO driver cannot own the pin at the same
//! time, so each mode switch drops the current driver and re-acquires the
//! pin for the next one.

use embassy_nrf::gpio::{AnyPin, Level, Output, OutputDrive, Pin as _};
use embassy_nrf::peripherals::PWM0;
use embassy_nrf::pwm::{Prescaler, SimplePwm};

use crate::config::FAN_PWM_MAX_DUTY;
use crate::error::DriveError;
use crate::fan::ramp::FanOutput;

enum Drive {
    Pwm(SimplePwm<'static, PWM0>),
    Static(Output<'static>),
}

pub struct FanDriver {
    pin_port: u8,
    drive: Option<Drive>,
}

impl FanDriver {
    /// Take ownership of PWM0 and the fan pin.
    pub fn new(pwm: PWM0, pin: AnyPin) -> Self {
        let pin_port = pin.pin_port();
        drop(pwm);
        drop(pin);
        Self {
            pin_port,
            drive: None,
        }
    }

    fn pin(&self) -> AnyPin {
        // SAFETY: `new` consumed the pin and the previous driver holding it
        // has been dropped by the caller.
        unsafe { AnyPin::steal(self.pin_port) }
    }
}

impl FanOutput for FanDriver {
    fn max_duty(&self) -> u16 {
        FAN_PWM_MAX_DUTY
    }

    fn set_duty(&mut self, duty: u16) -> Result<(), DriveError> {
        match &mut self.drive {
            Some(Drive::Pwm(pwm)) => {
                pwm.set_duty(0, duty);
                Ok(())
            }
            _ => Err(DriveError::Pwm),
        }
    }

    fn enter_pwm(&mut self) -> Result<(), DriveError> {
        self.drive = None;
        // SAFETY: PWM0 was consumed by `new`; any earlier SimplePwm on it
        // was dropped just above.
        let pwm0 = unsafe { PWM0::steal() };
        let mut pwm = SimplePwm::new_1ch(pwm0, self.pin());
        pwm.set_prescaler(Prescaler::Div128);
        pwm.set_max_duty(FAN_PWM_MAX_DUTY);
        pwm.set_duty(0, 0);
        self.drive = Some(Drive::Pwm(pwm));
        Ok(())
    }

    fn enter_static(&mut self, on: bool) -> Result<(), DriveError> {
        self.drive = None;
        let level = if on { Level::High } else { Level::Low };
        let output = Output::new(self.pin(), level, OutputDrive::Standard);
        self.drive = Some(Drive::Static(output));
        Ok(())
    }
}
