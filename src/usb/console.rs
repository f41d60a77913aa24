//! Shell session over the CDC-ACM port.
//!
//! Bytes are echoed back, assembled into lines by [`LineBuffer`] and
//! executed against the BLE engine, the fan and the local sensor.

use core::fmt::Write;

use embassy_nrf::gpio::{Flex, OutputDrive};
use embassy_time::{Delay, Timer};
use embassy_usb::driver::EndpointError;
use nrf_softdevice::Flash;

use crate::ble::radio::{with_central, SharedCentral};
use crate::boot;
use crate::config::SHELL_LINE_MAX;
use crate::error::Error;
use crate::fan::FanShared;
use crate::sensor::dht22::Dht22;
use crate::sensor::LocalClimate;
use crate::shell::{self, Command, LineBuffer, Reply};
use crate::usb::{write_all, SerialClass};

/// Pause between the last reply and a reset so the host receives it.
const RESET_GRACE_MS: u64 = 300;

const PROMPT: &str = "> ";

/// What the session does once the reply is written.
enum After {
    Prompt,
    Reboot,
}

pub struct Console {
    central: &'static SharedCentral,
    fan: &'static FanShared,
    climate: LocalClimate<Dht22<Flex<'static>>>,
    flash: Flash,
    /// External reset line of the companion MCU, left floating until
    /// `app bootloader`.
    reset: Flex<'static>,
}

impl Console {
    pub fn new(
        central: &'static SharedCentral,
        fan: &'static FanShared,
        climate: LocalClimate<Dht22<Flex<'static>>>,
        flash: Flash,
        reset: Flex<'static>,
    ) -> Self {
        Self {
            central,
            fan,
            climate,
            flash,
            reset,
        }
    }

    /// Console task body.
    pub async fn run(mut self, mut class: SerialClass) -> ! {
        self.climate.warm_up(&mut Delay).await;

        let mut packet = [0u8; 64];

        loop {
            class.wait_connection().await;
            info!("console attached");
            let mut line = LineBuffer::<SHELL_LINE_MAX>::new();

            if let Err(e) = self.session(&mut class, &mut line, &mut packet).await {
                info!("console detached: {:?}", e);
            }
        }
    }

    async fn session(
        &mut self,
        class: &mut SerialClass,
        line: &mut LineBuffer<SHELL_LINE_MAX>,
        packet: &mut [u8; 64],
    ) -> Result<(), EndpointError> {
        write_all(class, PROMPT.as_bytes()).await?;
        loop {
            let n = match class.read_packet(packet).await {
                Ok(n) => n,
                Err(EndpointError::BufferOverflow) => continue,
                Err(e) => return Err(e),
            };
            write_all(class, &packet[..n]).await?;

            for &byte in &packet[..n] {
                let Some(result) = line.push(byte) else {
                    continue;
                };

                let mut reply = Reply::new();
                let _ = reply.push_str("\r\n");
                let after = match result {
                    Ok(text) => self.execute(&text, &mut reply).await,
                    Err(e) => {
                        let _ = write!(reply, "error: {}\r\n", e.message());
                        After::Prompt
                    }
                };

                if let After::Reboot = after {
                    write_all(class, reply.as_bytes()).await?;
                    Timer::after_millis(RESET_GRACE_MS).await;
                    boot::reboot();
                }
                let _ = reply.push_str(PROMPT);
                write_all(class, reply.as_bytes()).await?;
            }
        }
    }

    async fn execute(&mut self, text: &str, out: &mut Reply) -> After {
        let result = match Command::parse(text) {
            Ok(command) => self.dispatch(command, out).await,
            Err(e) => Err(e.into()),
        };
        result.unwrap_or_else(|e: Error| {
            warn!("shell: {:?}", e);
            let _ = write!(out, "error: {}\r\n", e.message());
            After::Prompt
        })
    }

    async fn dispatch(&mut self, command: Command, out: &mut Reply) -> Result<After, Error> {
        debug!("shell: {:?}", command);
        // Replies that overflow the buffer are sent truncated.
        match command {
            Command::EssReadings => {
                let (reports, interest) =
                    with_central(self.central, |c| (c.take_reports(), c.interest().clone())).await;
                let local = self.climate.sample(&mut Delay).await;
                let _ = shell::write_readings(out, &interest, &reports, local);
            }
            Command::EssStatus => {
                let rows = with_central(self.central, |c| c.status()).await;
                let _ = shell::write_status(out, &rows, self.climate.healthy());
            }
            Command::EssEnable => {
                with_central(self.central, |c| c.enable()).await?;
                let _ = out.push_str("Application state changed to enabled.\r\n");
            }
            Command::EssDisable => {
                with_central(self.central, |c| c.disable()).await?;
                let _ = out.push_str("Application state changed to disabled.\r\n");
            }
            Command::EssDisconnect => {
                let failed = with_central(self.central, |c| c.disconnect_all()).await;
                for id in failed {
                    let _ = write!(out, "error: disconnect from #{} not submitted\r\n", id.0);
                }
                let _ = out.push_str("Disconnected from all devices\r\n");
            }
            Command::FanSpeed => {
                let _ = shell::write_fan_speed(out, self.fan.commanded(), false);
            }
            Command::FanSpeedActual => {
                let _ = shell::write_fan_speed(out, self.fan.actual(), true);
            }
            Command::SetFanSpeed(speed) => {
                self.fan.set_speed(speed.percent, speed.half)?;
                let _ = out.push_str("Fan speed set\r\n");
            }
            Command::AppReboot => return Ok(After::Reboot),
            Command::AppBootloader => {
                self.reset.set_low();
                self.reset.set_as_output(OutputDrive::Standard);
                info!("companion reset asserted");
            }
            Command::AppVersion => {
                let _ = write!(out, "Version: {}\r\n", boot::VERSION);
            }
            Command::FwBootloader => {
                boot::clear_boot_marker(&mut self.flash).await?;
                let _ = out.push_str("Going to bootloader...\r\n");
                return Ok(After::Reboot);
            }
            Command::Help => {
                let _ = out.push_str(shell::HELP);
            }
        }
        Ok(After::Prompt)
    }
}
