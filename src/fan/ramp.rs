//! Fan ramp controller.
//!
//! Moves the actual speed toward the commanded one in single-percent
//! steps with a fixed dwell between steps. Partial speeds use PWM; fully
//! off and fully on use static drive so the output never depends on the
//! PWM peripheral holding 0 % or 100 % duty.

use embedded_hal_async::delay::DelayNs;

use crate::config::FAN_RAMP_DWELL_MS;
use crate::error::DriveError;
use crate::fan::{FanShared, FanSpeed, FAN_SPEED_MAX};

/// Fan output stage.
pub trait FanOutput {
    /// Duty value for 100 %.
    fn max_duty(&self) -> u16;
    /// Set the PWM duty. Only meaningful in PWM mode.
    fn set_duty(&mut self, duty: u16) -> Result<(), DriveError>;
    /// Leave static drive and start the PWM peripheral.
    fn enter_pwm(&mut self) -> Result<(), DriveError>;
    /// Stop PWM and hold the pin at a fixed level.
    fn enter_static(&mut self, on: bool) -> Result<(), DriveError>;
}

/// PWM duty for `percent`, halved when `half` is set.
pub fn duty_for(max_duty: u16, percent: u8, half: bool) -> u16 {
    let divisor = if half { 200 } else { 100 };
    (u32::from(max_duty) * u32::from(percent) / divisor) as u16
}

pub struct FanController<'a> {
    shared: &'a FanShared,
    pwm_enabled: bool,
}

impl<'a> FanController<'a> {
    pub fn new(shared: &'a FanShared) -> Self {
        Self {
            shared,
            pwm_enabled: false,
        }
    }

    pub fn pwm_enabled(&self) -> bool {
        self.pwm_enabled
    }

    /// Startup state: PWM off, output held low.
    pub fn init<O: FanOutput>(&mut self, out: &mut O) {
        if let Err(e) = out.enter_static(false) {
            warn!("fan: initial drive failed: {:?}", e);
        }
        self.pwm_enabled = false;
        self.shared.publish_actual(FanSpeed::OFF);
    }

    /// Bring the actual speed to the current command. The command is
    /// re-read before every step, so a new target mid-ramp redirects it.
    pub async fn apply<O: FanOutput, D: DelayNs>(&mut self, out: &mut O, delay: &mut D) {
        let mut actual = self.shared.actual();
        let target = self.shared.commanded();
        if actual == target {
            return;
        }

        if target.percent == 0 {
            self.stop(out, target.half);
            return;
        }

        if !self.pwm_enabled {
            match out.enter_pwm() {
                Ok(()) => self.pwm_enabled = true,
                Err(e) => warn!("fan: enabling PWM failed: {:?}", e),
            }
        }

        let mut stepped = false;
        loop {
            let target = self.shared.commanded();
            if target.percent == 0 || actual.percent == target.percent {
                break;
            }
            if actual.percent < target.percent {
                actual.percent += 1;
            } else {
                actual.percent -= 1;
            }
            self.set_duty(
                out,
                FanSpeed {
                    percent: actual.percent,
                    half: target.half,
                },
            );
            // The half flag is only reported once the ramp settles.
            self.shared.publish_actual(actual);
            stepped = true;
            delay.delay_ms(FAN_RAMP_DWELL_MS).await;
        }

        let target = self.shared.commanded();
        if target.percent == 0 {
            self.stop(out, target.half);
            return;
        }
        if !stepped && actual.half != target.half {
            // Same speed, new duty scale.
            actual.half = target.half;
            self.set_duty(out, actual);
        }

        if actual.percent == FAN_SPEED_MAX {
            match out.enter_static(true) {
                Ok(()) => self.pwm_enabled = false,
                Err(e) => warn!("fan: full-on drive failed: {:?}", e),
            }
        }

        actual.half = target.half;
        self.shared.publish_actual(actual);
        debug!("fan at {}% (half {})", actual.percent, actual.half);
    }

    fn set_duty<O: FanOutput>(&mut self, out: &mut O, speed: FanSpeed) {
        let duty = duty_for(out.max_duty(), speed.percent, speed.half);
        if let Err(e) = out.set_duty(duty) {
            warn!("fan: duty {} failed: {:?}", duty, e);
        }
    }

    fn stop<O: FanOutput>(&mut self, out: &mut O, half: bool) {
        if self.pwm_enabled {
            if let Err(e) = out.set_duty(0) {
                warn!("fan: zero duty failed: {:?}", e);
            }
        }
        match out.enter_static(false) {
            Ok(()) => {
                self.pwm_enabled = false;
                self.shared.publish_actual(FanSpeed { percent: 0, half });
            }
            Err(e) => warn!("fan: off drive failed: {:?}", e),
        }
    }

    /// Fan task body.
    pub async fn run<O: FanOutput, D: DelayNs>(&mut self, out: &mut O, delay: &mut D) -> ! {
        self.init(out);
        loop {
            self.shared.wait_changed().await;
            self.apply(out, delay).await;
        }
    }
}
