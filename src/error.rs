//! Unified error type for esshub.
//!
//! We avoid `alloc` - all error variants carry only fixed-size data.
//! Implements `defmt::Format` for efficient on-target logging.

/// Top-level error type used across the application.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum Error {
    /// A link request could not be submitted or completed.
    Transport(TransportError),

    /// An operator command was rejected.
    Command(CommandError),

    /// The fan output rejected a duty or mode change.
    Drive(DriveError),

    /// The local climate sensor failed.
    Sensor(SensorError),

    /// A notification payload could not be decoded.
    Decode(DecodeError),

    /// Flash read/write failed.
    Storage,
}

/// Link-level failures (keeps the enum `Copy`-friendly).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum TransportError {
    /// The per-peer request queue is full.
    QueueFull,
    /// No such peer or link.
    UnknownLink,
    /// The SoftDevice has no free connection slot.
    NoFreeConnection,
    /// Create-connection or GATT operation timed out.
    Timeout,
    /// The link dropped while the request was in flight.
    Disconnected,
    /// The peer answered a GATT request with an ATT error.
    Att(u8),
    /// The SoftDevice or the peer refused the request.
    Rejected,
    /// GAP / GATT raw error code from the SoftDevice.
    Raw(u32),
}

/// Operator misuse, rejected without changing any state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum CommandError {
    /// `enable` while already enabled.
    AlreadyEnabled,
    /// `disable` while already disabled.
    AlreadyDisabled,
    /// Fan speed outside 0..=100.
    SpeedOutOfRange,
    /// Unrecognised trailing option.
    InvalidOption,
    /// Argument is not a number.
    InvalidNumber,
    /// Command word not recognised.
    UnknownCommand,
    /// Command line too long.
    LineTooLong,
}

/// Fan output failures.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum DriveError {
    /// PWM peripheral rejected the duty or mode change.
    Pwm,
}

/// Local sensor failures.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum SensorError {
    /// The sensor did not answer the start pulse.
    NoResponse,
    /// A bit edge never arrived.
    Timeout,
    /// Frame checksum mismatch.
    Checksum,
    /// Pin I/O failed.
    Pin,
}

/// Notification payload failures.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum DecodeError {
    /// Payload shorter than the characteristic's value.
    TooShort { expected: u8, actual: u8 },
}

// Convenience conversions

impl From<TransportError> for Error {
    fn from(e: TransportError) -> Self {
        Error::Transport(e)
    }
}

impl From<CommandError> for Error {
    fn from(e: CommandError) -> Self {
        Error::Command(e)
    }
}

impl From<DriveError> for Error {
    fn from(e: DriveError) -> Self {
        Error::Drive(e)
    }
}

impl From<SensorError> for Error {
    fn from(e: SensorError) -> Self {
        Error::Sensor(e)
    }
}

impl From<DecodeError> for Error {
    fn from(e: DecodeError) -> Self {
        Error::Decode(e)
    }
}

impl CommandError {
    /// Short operator-facing description.
    pub const fn message(self) -> &'static str {
        match self {
            CommandError::AlreadyEnabled => "already enabled",
            CommandError::AlreadyDisabled => "already disabled",
            CommandError::SpeedOutOfRange => "speed must be 0-100",
            CommandError::InvalidOption => "invalid option",
            CommandError::InvalidNumber => "invalid number",
            CommandError::UnknownCommand => "unknown command",
            CommandError::LineTooLong => "line too long",
        }
    }
}

impl Error {
    /// Short operator-facing description.
    pub const fn message(self) -> &'static str {
        match self {
            Error::Transport(_) => "link error",
            Error::Command(e) => e.message(),
            Error::Drive(_) => "fan drive error",
            Error::Sensor(_) => "sensor error",
            Error::Decode(_) => "decode error",
            Error::Storage => "flash error",
        }
    }
}
