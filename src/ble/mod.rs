//! Bluetooth Low Energy subsystem.
//!
//! The hub runs the Nordic SoftDevice S140 in **Central** role against a
//! fixed set of Environmental Sensing peripherals:
//!
//! 1. **Scheduler** - picks the next Idle peer round-robin, keeps at most
//!    one negotiation in flight and backs off after repeated failures.
//! 2. **Discovery** - walks the interest list one GATT operation at a time:
//!    service, characteristic and CCC discovery, then subscriptions.
//! 3. **Readings** - decodes notifications and tracks which kinds each
//!    peer has reported since the last read-out.
//! 4. **Radio** - per-peer link tasks that perform the SoftDevice
//!    operations and report completions back as [`LinkEvent`]s.
//!
//! The engine in [`central`] is pure state; it talks to the radio only
//! through the [`GattLink`] trait, so it runs unchanged in host tests.

pub mod central;
pub mod discovery;
pub mod interest;
pub mod link;
pub mod peer;
pub mod readings;
pub mod scheduler;

#[cfg(feature = "embedded")]
pub mod radio;

use embassy_sync::blocking_mutex::raw::CriticalSectionRawMutex;
use embassy_sync::signal::Signal;
use heapless::Vec;

use crate::ble::discovery::{Attribute, DiscoverRequest, SubscribeRequest};
use crate::ble::peer::{LinkHandle, PeerAddress};
use crate::error::TransportError;

/// Largest notification payload kept (ATT MTU 23 minus the 3-byte header).
pub const NOTIFY_PAYLOAD_MAX: usize = 20;

/// Notification value bytes.
pub type Payload = Vec<u8, NOTIFY_PAYLOAD_MAX>;

/// Raised whenever the scheduler should look for an Idle peer.
pub static SCHEDULER_WAKE: Signal<CriticalSectionRawMutex, ()> = Signal::new();

/// Requests the engine sends to a peer's link task.
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum LinkCommand {
    Connect {
        link: LinkHandle,
        address: PeerAddress,
    },
    Disconnect {
        link: LinkHandle,
    },
    Discover {
        link: LinkHandle,
        request: DiscoverRequest,
    },
    Subscribe {
        link: LinkHandle,
        request: SubscribeRequest,
    },
}

impl LinkCommand {
    pub const fn link(&self) -> LinkHandle {
        match self {
            LinkCommand::Connect { link, .. }
            | LinkCommand::Disconnect { link }
            | LinkCommand::Discover { link, .. }
            | LinkCommand::Subscribe { link, .. } => *link,
        }
    }
}

/// Completions reported by link tasks.
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum LinkEvent {
    Connected {
        link: LinkHandle,
        result: Result<(), TransportError>,
    },
    Disconnected {
        link: LinkHandle,
        /// HCI reason when known.
        reason: Option<u8>,
    },
    /// `None` means the range was exhausted without a match.
    Discovered {
        link: LinkHandle,
        attribute: Option<Attribute>,
    },
    Subscribed {
        link: LinkHandle,
        result: Result<(), TransportError>,
    },
    /// `payload` is `None` when the peer dropped the subscription.
    Notification {
        link: LinkHandle,
        value_handle: u16,
        payload: Option<Payload>,
    },
}

/// Synchronous submission side of the BLE transport.
///
/// Every method only queues the request; the outcome arrives later as a
/// [`LinkEvent`] for the same link.
pub trait GattLink {
    fn connect(&mut self, link: LinkHandle, address: PeerAddress) -> Result<(), TransportError>;
    fn disconnect(&mut self, link: LinkHandle) -> Result<(), TransportError>;
    fn discover(&mut self, link: LinkHandle, request: DiscoverRequest)
        -> Result<(), TransportError>;
    fn subscribe(
        &mut self,
        link: LinkHandle,
        request: SubscribeRequest,
    ) -> Result<(), TransportError>;
}
