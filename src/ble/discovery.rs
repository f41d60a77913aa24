//! Attribute discovery sequencer.
//!
//! Turns the current [`Step`] of a peer into exactly one GATT request and
//! records the handle each discovery answer yields. The central engine
//! owns the step counter and decides when to advance.

use crate::ble::interest::{SensorKind, Service, Step, CCC_UUID};
use crate::ble::peer::{Handles, Subscription};

/// Lowest valid attribute handle.
pub const HANDLE_FIRST: u16 = 0x0001;
/// Highest valid attribute handle.
pub const HANDLE_LAST: u16 = 0xFFFF;

/// Inclusive attribute handle range.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct HandleRange {
    pub start: u16,
    pub end: u16,
}

impl HandleRange {
    pub const FULL: HandleRange = HandleRange {
        start: HANDLE_FIRST,
        end: HANDLE_LAST,
    };

    /// From just after `handle` to the end of the table.
    pub const fn after(handle: u16) -> Self {
        HandleRange {
            start: handle.saturating_add(1),
            end: HANDLE_LAST,
        }
    }

    pub const fn contains(&self, handle: u16) -> bool {
        handle >= self.start && handle <= self.end
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum DiscoverKind {
    PrimaryService,
    Characteristic,
    Descriptor,
}

/// Find the first attribute of `kind` with 16-bit `uuid` inside `range`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct DiscoverRequest {
    pub kind: DiscoverKind,
    pub uuid: u16,
    pub range: HandleRange,
}

/// A discovery answer.
///
/// For characteristics `handle` is the declaration and `value_handle` the
/// value attribute; for services and descriptors both are the same.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct Attribute {
    pub handle: u16,
    pub value_handle: u16,
}

impl Attribute {
    pub const fn single(handle: u16) -> Self {
        Self {
            handle,
            value_handle: handle,
        }
    }
}

/// Request to enable notifications on one characteristic.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct SubscribeRequest {
    pub kind: SensorKind,
    pub subscription: Subscription,
}

/// The single GATT operation a step issues.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum GattRequest {
    Discover(DiscoverRequest),
    Subscribe(SubscribeRequest),
}

fn service_handle(handles: &Handles, service: Service) -> u16 {
    match service {
        Service::Environmental => handles.ess_service,
        Service::Battery => handles.battery_service,
    }
}

/// Build the request for `step` from the handles found so far.
pub fn request_for(step: Step, handles: &Handles) -> GattRequest {
    match step {
        Step::FindService(service) => GattRequest::Discover(DiscoverRequest {
            kind: DiscoverKind::PrimaryService,
            uuid: service.uuid(),
            range: HandleRange::FULL,
        }),
        Step::FindCharacteristic(kind) => GattRequest::Discover(DiscoverRequest {
            kind: DiscoverKind::Characteristic,
            uuid: kind.uuid(),
            range: HandleRange::after(service_handle(handles, kind.service())),
        }),
        Step::FindDescriptor(kind) => GattRequest::Discover(DiscoverRequest {
            kind: DiscoverKind::Descriptor,
            uuid: CCC_UUID,
            range: HandleRange::after(handles.subscription(kind).value_handle),
        }),
        Step::Subscribe(kind) => GattRequest::Subscribe(SubscribeRequest {
            kind,
            subscription: *handles.subscription(kind),
        }),
    }
}

/// Store the handle `attribute` carries for a discovery `step`. Subscribe
/// steps carry nothing to record.
pub fn record(step: Step, handles: &mut Handles, attribute: &Attribute) {
    match step {
        Step::FindService(Service::Environmental) => handles.ess_service = attribute.handle,
        Step::FindService(Service::Battery) => handles.battery_service = attribute.handle,
        Step::FindCharacteristic(kind) => {
            handles.subscription_mut(kind).value_handle = attribute.value_handle
        }
        Step::FindDescriptor(kind) => handles.subscription_mut(kind).ccc_handle = attribute.handle,
        Step::Subscribe(_) => {}
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn service_discovery_covers_whole_table() {
        let req = request_for(Step::FindService(Service::Battery), &Handles::default());
        assert_eq!(
            req,
            GattRequest::Discover(DiscoverRequest {
                kind: DiscoverKind::PrimaryService,
                uuid: 0x180F,
                range: HandleRange {
                    start: 0x0001,
                    end: 0xFFFF
                },
            })
        );
    }

    #[test]
    fn characteristic_starts_after_owning_service() {
        let mut handles = Handles::default();
        record(
            Step::FindService(Service::Environmental),
            &mut handles,
            &Attribute::single(0x000C),
        );
        record(
            Step::FindService(Service::Battery),
            &mut handles,
            &Attribute::single(0x0030),
        );

        let GattRequest::Discover(ess) =
            request_for(Step::FindCharacteristic(SensorKind::Humidity), &handles)
        else {
            panic!("expected discover");
        };
        assert_eq!(ess.kind, DiscoverKind::Characteristic);
        assert_eq!(ess.uuid, 0x2A6F);
        assert_eq!(ess.range.start, 0x000D);

        let GattRequest::Discover(bas) =
            request_for(Step::FindCharacteristic(SensorKind::BatteryLevel), &handles)
        else {
            panic!("expected discover");
        };
        assert_eq!(bas.uuid, 0x2A19);
        assert_eq!(bas.range.start, 0x0031);
    }

    #[test]
    fn descriptor_starts_after_value_handle() {
        let mut handles = Handles::default();
        let chr = Attribute {
            handle: 0x0010,
            value_handle: 0x0011,
        };
        record(Step::FindCharacteristic(SensorKind::Temperature), &mut handles, &chr);

        let GattRequest::Discover(req) =
            request_for(Step::FindDescriptor(SensorKind::Temperature), &handles)
        else {
            panic!("expected discover");
        };
        assert_eq!(req.kind, DiscoverKind::Descriptor);
        assert_eq!(req.uuid, CCC_UUID);
        assert_eq!(req.range, HandleRange::after(0x0011));
        assert!(req.range.contains(0x0012));
        assert!(!req.range.contains(0x0011));
    }

    #[test]
    fn subscribe_carries_recorded_handles() {
        let mut handles = Handles::default();
        record(
            Step::FindCharacteristic(SensorKind::DewPoint),
            &mut handles,
            &Attribute {
                handle: 0x0020,
                value_handle: 0x0021,
            },
        );
        record(
            Step::FindDescriptor(SensorKind::DewPoint),
            &mut handles,
            &Attribute::single(0x0022),
        );

        assert_eq!(
            request_for(Step::Subscribe(SensorKind::DewPoint), &handles),
            GattRequest::Subscribe(SubscribeRequest {
                kind: SensorKind::DewPoint,
                subscription: Subscription {
                    value_handle: 0x0021,
                    ccc_handle: 0x0022
                },
            })
        );
    }
}
