//! Sensor kinds and the interest list.
//!
//! The interest list is built once at startup from [`config`](crate::config)
//! and shared read-only by the discovery sequencer and the reading
//! aggregator. It fixes both which characteristics are read from every peer
//! and the exact order of the discovery steps.

use heapless::Vec;

/// Environmental Sensing Service.
pub const ESS_SERVICE_UUID: u16 = 0x181A;
/// Battery Service.
pub const BATTERY_SERVICE_UUID: u16 = 0x180F;
/// Client Characteristic Configuration descriptor.
pub const CCC_UUID: u16 = 0x2902;

/// Upper bound on the step sequence: ESS service, four characteristics with
/// their CCCs, the battery service/level/CCC and five subscriptions.
pub const MAX_STEPS: usize = 1 + 2 * MAX_ESS_KINDS + 3 + MAX_ESS_KINDS + 1;

/// Number of ESS kinds the hub knows how to decode.
pub const MAX_ESS_KINDS: usize = 4;

/// A characteristic the hub can subscribe to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum SensorKind {
    Temperature,
    Humidity,
    Pressure,
    DewPoint,
    BatteryLevel,
}

impl SensorKind {
    /// Every kind, in bit order.
    pub const ALL: [SensorKind; 5] = [
        SensorKind::Temperature,
        SensorKind::Humidity,
        SensorKind::Pressure,
        SensorKind::DewPoint,
        SensorKind::BatteryLevel,
    ];

    /// Slot used for per-kind tables.
    pub const fn index(self) -> usize {
        match self {
            SensorKind::Temperature => 0,
            SensorKind::Humidity => 1,
            SensorKind::Pressure => 2,
            SensorKind::DewPoint => 3,
            SensorKind::BatteryLevel => 4,
        }
    }

    /// Bit in the per-peer `received` mask.
    pub const fn bit(self) -> u8 {
        1 << self.index()
    }

    /// 16-bit characteristic UUID.
    pub const fn uuid(self) -> u16 {
        match self {
            SensorKind::Temperature => 0x2A6E,
            SensorKind::Humidity => 0x2A6F,
            SensorKind::Pressure => 0x2A6D,
            SensorKind::DewPoint => 0x2A7B,
            SensorKind::BatteryLevel => 0x2A19,
        }
    }

    /// Service that owns this characteristic.
    pub const fn service(self) -> Service {
        match self {
            SensorKind::BatteryLevel => Service::Battery,
            _ => Service::Environmental,
        }
    }

    pub const fn label(self) -> &'static str {
        match self {
            SensorKind::Temperature => "temperature",
            SensorKind::Humidity => "humidity",
            SensorKind::Pressure => "pressure",
            SensorKind::DewPoint => "dew point",
            SensorKind::BatteryLevel => "battery",
        }
    }
}

/// Primary services walked during discovery.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum Service {
    Environmental,
    Battery,
}

impl Service {
    pub const fn uuid(self) -> u16 {
        match self {
            Service::Environmental => ESS_SERVICE_UUID,
            Service::Battery => BATTERY_SERVICE_UUID,
        }
    }
}

/// One GATT operation of the per-peer negotiation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum Step {
    /// Primary service discovery over the full handle range.
    FindService(Service),
    /// Characteristic discovery inside the owning service.
    FindCharacteristic(SensorKind),
    /// CCC descriptor discovery after the characteristic's value handle.
    FindDescriptor(SensorKind),
    /// Enable notifications.
    Subscribe(SensorKind),
}

/// Invalid interest list.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum InterestError {
    /// A kind was listed twice.
    Duplicate(SensorKind),
    /// Battery level belongs to the battery flag, not the ESS list.
    NotEnvironmental(SensorKind),
    /// Nothing to read.
    Empty,
}

/// Enabled characteristics and the step sequence derived from them.
#[derive(Debug, Clone)]
pub struct InterestList {
    ess: Vec<SensorKind, MAX_ESS_KINDS>,
    battery: bool,
    steps: Vec<Step, MAX_STEPS>,
}

impl InterestList {
    /// Validate the enabled kinds and lay out the step sequence.
    pub fn new(ess: &[SensorKind], battery: bool) -> Result<Self, InterestError> {
        if ess.is_empty() && !battery {
            return Err(InterestError::Empty);
        }

        let mut kinds: Vec<SensorKind, MAX_ESS_KINDS> = Vec::new();
        for &kind in ess {
            if kind.service() != Service::Environmental {
                return Err(InterestError::NotEnvironmental(kind));
            }
            if kinds.contains(&kind) {
                return Err(InterestError::Duplicate(kind));
            }
            // Four distinct ESS kinds exist, so this cannot overflow.
            let _ = kinds.push(kind);
        }

        let mut steps: Vec<Step, MAX_STEPS> = Vec::new();
        let _ = steps.push(Step::FindService(Service::Environmental));
        for &kind in &kinds {
            let _ = steps.push(Step::FindCharacteristic(kind));
            let _ = steps.push(Step::FindDescriptor(kind));
        }
        if battery {
            let _ = steps.push(Step::FindService(Service::Battery));
            let _ = steps.push(Step::FindCharacteristic(SensorKind::BatteryLevel));
            let _ = steps.push(Step::FindDescriptor(SensorKind::BatteryLevel));
        }
        for &kind in &kinds {
            let _ = steps.push(Step::Subscribe(kind));
        }
        if battery {
            let _ = steps.push(Step::Subscribe(SensorKind::BatteryLevel));
        }

        Ok(Self {
            ess: kinds,
            battery,
            steps,
        })
    }

    /// The list configured in [`crate::config`].
    pub fn from_config() -> Result<Self, InterestError> {
        Self::new(crate::config::ESS_INTEREST, crate::config::BATTERY_INTEREST)
    }

    /// Full ordered step sequence.
    pub fn steps(&self) -> &[Step] {
        &self.steps
    }

    /// Step at `index`, or `None` once the sequence is exhausted.
    pub fn step(&self, index: u8) -> Option<Step> {
        self.steps.get(usize::from(index)).copied()
    }

    /// Number of steps; a peer whose step index reaches this is Active.
    pub fn step_count(&self) -> u8 {
        self.steps.len() as u8
    }

    /// Enabled kinds, ESS first, battery last.
    pub fn kinds(&self) -> impl Iterator<Item = SensorKind> + '_ {
        self.ess
            .iter()
            .copied()
            .chain(self.battery.then_some(SensorKind::BatteryLevel))
    }

    pub fn contains(&self, kind: SensorKind) -> bool {
        self.kinds().any(|k| k == kind)
    }

    pub fn battery(&self) -> bool {
        self.battery
    }

    /// `received` mask of a peer that has reported every enabled kind.
    pub fn complete_mask(&self) -> u8 {
        self.kinds().fold(0, |mask, kind| mask | kind.bit())
    }
}
