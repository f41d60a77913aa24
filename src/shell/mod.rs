//! Operator shell: command parsing, line assembly and reply formatting.
//!
//! Transport-independent; the USB console in `usb::console` feeds bytes
//! in and writes the formatted replies out.

use core::fmt::{self, Write};

use heapless::{String, Vec};

use crate::ble::central::{PeerReport, PeerStatus};
use crate::ble::interest::{InterestList, SensorKind};
use crate::ble::peer::{AddressKind, PeerAddress};
use crate::ble::readings::Readings;
use crate::config::{DEVICE_ID_DISPLAY_OFFSET, LOCAL_SENSOR_NAME, PEER_COUNT};
use crate::error::CommandError;
use crate::fan::{FanSpeed, FAN_SPEED_MAX};
use crate::sensor::LocalReading;

/// Longest formatted reply.
pub const REPLY_MAX: usize = 512;

pub type Reply = String<REPLY_MAX>;

pub const HELP: &str = "ess readings|status|enable|disable|disconnect\r\n\
fan speed [actual|<0-100> [half]]\r\n\
app reboot|bootloader|version\r\n\
fw bootloader\r\n";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum Command {
    EssReadings,
    EssStatus,
    EssEnable,
    EssDisable,
    EssDisconnect,
    /// Show the commanded speed.
    FanSpeed,
    /// Show the speed the ramp has reached.
    FanSpeedActual,
    SetFanSpeed(FanSpeed),
    AppReboot,
    AppBootloader,
    AppVersion,
    FwBootloader,
    Help,
}

impl Command {
    pub fn parse(line: &str) -> Result<Command, CommandError> {
        let mut words = line.split_whitespace();
        let command = match (words.next(), words.next()) {
            (Some("ess"), Some("readings")) => Command::EssReadings,
            (Some("ess"), Some("status")) => Command::EssStatus,
            (Some("ess"), Some("enable")) => Command::EssEnable,
            (Some("ess"), Some("disable")) => Command::EssDisable,
            (Some("ess"), Some("disconnect")) => Command::EssDisconnect,
            (Some("fan"), Some("speed")) => match words.next() {
                None => Command::FanSpeed,
                Some("actual") => Command::FanSpeedActual,
                Some(word) => {
                    let percent = parse_number(word)?;
                    if percent > u32::from(FAN_SPEED_MAX) {
                        return Err(CommandError::SpeedOutOfRange);
                    }
                    let half = match words.next() {
                        None => false,
                        Some("half") => true,
                        Some(_) => return Err(CommandError::InvalidOption),
                    };
                    Command::SetFanSpeed(FanSpeed::new(percent as u8, half)?)
                }
            },
            (Some("app"), Some("reboot")) => Command::AppReboot,
            (Some("app"), Some("bootloader")) => Command::AppBootloader,
            (Some("app"), Some("version")) => Command::AppVersion,
            (Some("fw"), Some("bootloader")) => Command::FwBootloader,
            (Some("help"), None) => Command::Help,
            _ => return Err(CommandError::UnknownCommand),
        };

        if words.next().is_some() {
            return Err(CommandError::InvalidOption);
        }
        Ok(command)
    }
}

/// Decimal, or hexadecimal with a `0x` prefix.
fn parse_number(word: &str) -> Result<u32, CommandError> {
    let (digits, radix) = match word
        .strip_prefix("0x")
        .or_else(|| word.strip_prefix("0X"))
    {
        Some(hex) => (hex, 16),
        None => (word, 10),
    };
    u32::from_str_radix(digits, radix).map_err(|_| CommandError::InvalidNumber)
}

// ═══════════════════════════════════════════════════════════════════
//  Line assembly
// ═══════════════════════════════════════════════════════════════════

/// Collects console bytes into lines. Backspace and DEL erase; CR or LF
/// terminates; blank lines are swallowed.
pub struct LineBuffer<const N: usize> {
    buf: Vec<u8, N>,
    overflow: bool,
}

impl<const N: usize> LineBuffer<N> {
    pub const fn new() -> Self {
        Self {
            buf: Vec::new(),
            overflow: false,
        }
    }

    /// Feed one byte. Returns a finished line, or the reason it was dropped.
    pub fn push(&mut self, byte: u8) -> Option<Result<String<N>, CommandError>> {
        match byte {
            b'\r' | b'\n' => {
                let overflow = core::mem::replace(&mut self.overflow, false);
                let bytes = core::mem::take(&mut self.buf);
                if overflow {
                    return Some(Err(CommandError::LineTooLong));
                }
                if bytes.is_empty() {
                    return None;
                }
                Some(String::from_utf8(bytes).map_err(|_| CommandError::UnknownCommand))
            }
            0x08 | 0x7F => {
                self.buf.pop();
                None
            }
            _ => {
                if self.buf.push(byte).is_err() {
                    self.overflow = true;
                }
                None
            }
        }
    }
}

impl<const N: usize> Default for LineBuffer<N> {
    fn default() -> Self {
        Self::new()
    }
}

// ═══════════════════════════════════════════════════════════════════
//  Reply formatting
// ═══════════════════════════════════════════════════════════════════

const TICK: &str = " ✓";

/// Address column: type code then the octets, most significant first.
struct Compact<'a>(&'a PeerAddress);

impl fmt::Display for Compact<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let kind = match self.0.kind {
            AddressKind::Public => 0,
            AddressKind::RandomStatic => 1,
        };
        write!(f, "{:02x}", kind)?;
        for b in self.0.bytes.iter().rev() {
            write!(f, "{:02x}", b)?;
        }
        Ok(())
    }
}

fn column(kind: SensorKind) -> &'static str {
    match kind {
        SensorKind::Temperature => "temperature",
        SensorKind::Humidity => "humidity",
        SensorKind::Pressure => "pressure",
        SensorKind::DewPoint => "dewpoint",
        SensorKind::BatteryLevel => "battery",
    }
}

fn write_value<W: Write>(out: &mut W, kind: SensorKind, r: &Readings) -> fmt::Result {
    match kind {
        SensorKind::Temperature => write!(out, ",{:.2}", r.temperature),
        SensorKind::Humidity => write!(out, ",{:.2}", r.humidity),
        SensorKind::Pressure => write!(out, ",{}", r.pressure),
        SensorKind::DewPoint => write!(out, ",{}", r.dew_point),
        SensorKind::BatteryLevel => write!(out, ",{}", r.battery_level),
    }
}

const fn display_index(index: usize) -> usize {
    index + DEVICE_ID_DISPLAY_OFFSET
}

/// CSV readings: header, one row per complete peer, then the local
/// sensor row when it produced a sample.
pub fn write_readings<W: Write>(
    out: &mut W,
    interest: &InterestList,
    reports: &[PeerReport],
    local: Option<LocalReading>,
) -> fmt::Result {
    out.write_str("device,address,name")?;
    for kind in interest.kinds() {
        write!(out, ",{}", column(kind))?;
    }
    out.write_str("\r\n")?;

    for report in reports {
        write!(
            out,
            "{},{},{}",
            display_index(report.id.index()),
            Compact(&report.address),
            report.name
        )?;
        for kind in interest.kinds() {
            write_value(out, kind, &report.readings)?;
        }
        out.write_str("\r\n")?;
    }

    if let Some(local) = local {
        let mut readings = Readings::new();
        readings.temperature = local.temperature;
        readings.humidity = local.humidity;
        write!(
            out,
            "{},LOCAL,{}",
            display_index(PEER_COUNT),
            LOCAL_SENSOR_NAME
        )?;
        for kind in interest.kinds() {
            write_value(out, kind, &readings)?;
        }
        out.write_str("\r\n")?;
    }
    Ok(())
}

/// Status table, one row per peer plus the local sensor.
pub fn write_status<W: Write>(
    out: &mut W,
    rows: &[PeerStatus],
    local_healthy: bool,
) -> fmt::Result {
    let width = rows
        .iter()
        .map(|r| r.name.len())
        .chain([LOCAL_SENSOR_NAME.len(), "Name".len()])
        .max()
        .unwrap_or(0);

    write!(
        out,
        "# | Address        | {:<width$} | State       | Readings\r\n",
        "Name"
    )?;
    write!(
        out,
        "--|----------------|{:-<dashes$}|-------------|---------\r\n",
        "",
        dashes = width + 2
    )?;

    for row in rows {
        write!(
            out,
            "{} | {} | {:<width$} | {:<11} | 0x{:x}{}\r\n",
            display_index(row.id.index()),
            Compact(&row.address),
            row.name,
            row.state.label(),
            row.received,
            if row.complete { TICK } else { "" }
        )?;
    }

    let (state, mask, tick) = if local_healthy {
        let mask = SensorKind::Temperature.bit() | SensorKind::Humidity.bit();
        ("Active", mask, TICK)
    } else {
        ("Error", 0, "")
    };
    write!(
        out,
        "{} | LOCAL          | {:<width$} | {:<11} | 0x{:x}{}\r\n",
        display_index(PEER_COUNT),
        LOCAL_SENSOR_NAME,
        state,
        mask,
        tick
    )
}

pub fn write_fan_speed<W: Write>(out: &mut W, speed: FanSpeed, actual: bool) -> fmt::Result {
    let prefix = if actual { "Actual fan speed" } else { "Fan speed" };
    write!(out, "{}: {}", prefix, speed.percent)?;
    if speed.half {
        out.write_str(" (half)")?;
    }
    out.write_str("\r\n")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ble::peer::{PeerId, PeerState};

    const ADDRESS: PeerAddress =
        PeerAddress::new(AddressKind::RandomStatic, [0xE1, 0xC5, 0xD1, 0x6F, 0xAC, 0xC9]);

    #[test]
    fn parses_every_command() {
        let cases = [
            ("ess readings", Command::EssReadings),
            ("ess status", Command::EssStatus),
            ("ess enable", Command::EssEnable),
            ("ess disable", Command::EssDisable),
            ("ess disconnect", Command::EssDisconnect),
            ("fan speed", Command::FanSpeed),
            ("fan speed actual", Command::FanSpeedActual),
            ("app reboot", Command::AppReboot),
            ("app bootloader", Command::AppBootloader),
            ("app version", Command::AppVersion),
            ("fw bootloader", Command::FwBootloader),
            ("help", Command::Help),
        ];
        for (line, expected) in cases {
            assert_eq!(Command::parse(line), Ok(expected), "{line}");
        }
    }

    #[test]
    fn parses_fan_speed_arguments() {
        assert_eq!(
            Command::parse("fan speed 40"),
            Ok(Command::SetFanSpeed(FanSpeed {
                percent: 40,
                half: false
            }))
        );
        assert_eq!(
            Command::parse("  fan   speed 0x64 half "),
            Ok(Command::SetFanSpeed(FanSpeed {
                percent: 100,
                half: true
            }))
        );
    }

    #[test]
    fn rejects_bad_input() {
        assert_eq!(Command::parse("fan speed 101"), Err(CommandError::SpeedOutOfRange));
        assert_eq!(Command::parse("fan speed 50 quarter"), Err(CommandError::InvalidOption));
        assert_eq!(Command::parse("fan speed fast"), Err(CommandError::InvalidNumber));
        assert_eq!(Command::parse("ess status now"), Err(CommandError::InvalidOption));
        assert_eq!(Command::parse("ess"), Err(CommandError::UnknownCommand));
        assert_eq!(Command::parse("reboot"), Err(CommandError::UnknownCommand));
    }

    fn feed<const N: usize>(
        lb: &mut LineBuffer<N>,
        bytes: &[u8],
    ) -> std::vec::Vec<Result<String<N>, CommandError>> {
        bytes.iter().filter_map(|b| lb.push(*b)).collect()
    }

    #[test]
    fn line_buffer_handles_crlf_and_backspace() {
        let mut lb = LineBuffer::<16>::new();
        let lines = feed(&mut lb, b"fan speedd\x08 5\r\n\r\napp version\n");
        assert_eq!(lines.len(), 2);
        assert_eq!(lines[0].as_ref().unwrap().as_str(), "fan speed 5");
        assert_eq!(lines[1].as_ref().unwrap().as_str(), "app version");
    }

    #[test]
    fn line_buffer_reports_overflow_once() {
        let mut lb = LineBuffer::<4>::new();
        let lines = feed(&mut lb, b"abcdef\rok\r");
        assert_eq!(lines[0], Err(CommandError::LineTooLong));
        assert_eq!(lines[1].as_ref().unwrap().as_str(), "ok");
    }

    #[test]
    fn status_table_layout() {
        let rows = [
            PeerStatus {
                id: PeerId(0),
                address: ADDRESS,
                name: "Kitchen",
                state: PeerState::Active,
                received: 0x1F,
                complete: true,
            },
            PeerStatus {
                id: PeerId(1),
                address: ADDRESS,
                name: "Hall",
                state: PeerState::Connecting,
                received: 0,
                complete: false,
            },
        ];
        let mut out = Reply::new();
        write_status(&mut out, &rows, false).unwrap();
        let lines: std::vec::Vec<&str> = out.split("\r\n").collect();

        assert_eq!(lines[0], "# | Address        | Name    | State       | Readings");
        assert_eq!(lines[1], "--|----------------|---------|-------------|---------");
        assert_eq!(lines[2], "1 | 01c9ac6fd1c5e1 | Kitchen | Active      | 0x1f ✓");
        assert_eq!(lines[3], "2 | 01c9ac6fd1c5e1 | Hall    | Connecting  | 0x0");
        assert_eq!(lines[4], "4 | LOCAL          | Loft    | Error       | 0x0");
    }

    #[test]
    fn healthy_local_row_shows_temperature_and_humidity() {
        let mut out = Reply::new();
        write_status(&mut out, &[], true).unwrap();
        assert!(out.contains("4 | LOCAL          | Loft | Active      | 0x3 ✓"));
    }

    #[test]
    fn readings_csv() {
        let interest = InterestList::new(
            &[SensorKind::Temperature, SensorKind::Humidity, SensorKind::Pressure],
            true,
        )
        .unwrap();
        let mut readings = Readings::new();
        readings.temperature = 25.12;
        readings.humidity = 52.5;
        readings.pressure = 100_270;
        readings.battery_level = 87;
        let reports = [PeerReport {
            id: PeerId(2),
            address: ADDRESS,
            name: "Garage",
            readings,
        }];
        let local = LocalReading {
            temperature: -3.5,
            humidity: 70.25,
        };

        let mut out = Reply::new();
        write_readings(&mut out, &interest, &reports, Some(local)).unwrap();
        assert_eq!(
            out.as_str(),
            "device,address,name,temperature,humidity,pressure,battery\r\n\
             3,01c9ac6fd1c5e1,Garage,25.12,52.50,100270,87\r\n\
             4,LOCAL,Loft,-3.50,70.25,0,0\r\n"
        );
    }

    #[test]
    fn readings_without_local_sample() {
        let interest = InterestList::new(&[SensorKind::DewPoint], false).unwrap();
        let mut out = Reply::new();
        write_readings(&mut out, &interest, &[], None).unwrap();
        assert_eq!(out.as_str(), "device,address,name,dewpoint\r\n");
    }

    #[test]
    fn fan_speed_reply() {
        let mut out = Reply::new();
        write_fan_speed(&mut out, FanSpeed { percent: 35, half: true }, true).unwrap();
        assert_eq!(out.as_str(), "Actual fan speed: 35 (half)\r\n");
    }
}
