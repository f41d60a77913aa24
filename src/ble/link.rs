//! Channel-backed [`GattLink`]: each request is queued to the owning
//! peer's link task without waiting.

use embassy_sync::blocking_mutex::raw::CriticalSectionRawMutex;
use embassy_sync::channel::Channel;

use crate::ble::discovery::{DiscoverRequest, SubscribeRequest};
use crate::ble::peer::{LinkHandle, PeerAddress};
use crate::ble::{GattLink, LinkCommand, LinkEvent};
use crate::config::{LINK_COMMAND_DEPTH, LINK_EVENT_DEPTH};
use crate::error::TransportError;

/// Per-peer request queue.
pub type CommandQueue = Channel<CriticalSectionRawMutex, LinkCommand, LINK_COMMAND_DEPTH>;

/// Completions from all link tasks to the central task.
pub type EventQueue = Channel<CriticalSectionRawMutex, LinkEvent, LINK_EVENT_DEPTH>;

pub struct ChannelLink<'a> {
    queues: &'a [CommandQueue],
}

impl<'a> ChannelLink<'a> {
    /// `queues[i]` feeds the link task of peer `i`.
    pub fn new(queues: &'a [CommandQueue]) -> Self {
        Self { queues }
    }

    fn send(&self, link: LinkHandle, command: LinkCommand) -> Result<(), TransportError> {
        let queue = self
            .queues
            .get(link.peer.index())
            .ok_or(TransportError::UnknownLink)?;
        queue
            .try_send(command)
            .map_err(|_| TransportError::QueueFull)
    }
}

impl GattLink for ChannelLink<'_> {
    fn connect(&mut self, link: LinkHandle, address: PeerAddress) -> Result<(), TransportError> {
        self.send(link, LinkCommand::Connect { link, address })
    }

    fn disconnect(&mut self, link: LinkHandle) -> Result<(), TransportError> {
        self.send(link, LinkCommand::Disconnect { link })
    }

    fn discover(
        &mut self,
        link: LinkHandle,
        request: DiscoverRequest,
    ) -> Result<(), TransportError> {
        self.send(link, LinkCommand::Discover { link, request })
    }

    fn subscribe(
        &mut self,
        link: LinkHandle,
        request: SubscribeRequest,
    ) -> Result<(), TransportError> {
        self.send(link, LinkCommand::Subscribe { link, request })
    }
}
