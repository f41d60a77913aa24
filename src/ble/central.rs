//! Central engine - peer registry, scheduler and discovery sequencer
//! driven by link events.
//!
//! The engine never blocks. Connection attempts are split in two so the
//! caller can sleep through the backoff without holding the engine:
//! [`Central::service`] picks a peer and returns a [`ConnectPlan`], and
//! [`Central::begin_connect`] submits it once the delay has passed.

use heapless::Vec;

use crate::ble::discovery::{self, Attribute, GattRequest};
use crate::ble::interest::{InterestList, Step};
use crate::ble::peer::{LinkHandle, PeerAddress, PeerId, PeerRegistry, PeerState};
use crate::ble::readings::{self, Readings};
use crate::ble::scheduler::Scheduler;
use crate::ble::{GattLink, LinkEvent};
use crate::config::PEER_COUNT;
use crate::error::{CommandError, TransportError};

/// A peer reserved by the scheduler, waiting out its backoff.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct ConnectPlan {
    pub link: LinkHandle,
    pub delay_ms: u64,
}

/// One row of `ess status`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PeerStatus {
    pub id: PeerId,
    pub address: PeerAddress,
    pub name: &'static str,
    pub state: PeerState,
    pub received: u8,
    pub complete: bool,
}

/// A full set of readings from one peer.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PeerReport {
    pub id: PeerId,
    pub address: PeerAddress,
    pub name: &'static str,
    pub readings: Readings,
}

pub struct Central<L: GattLink> {
    peers: PeerRegistry,
    scheduler: Scheduler,
    interest: InterestList,
    link: L,
    /// Link reserved by `service` whose connect has not been submitted yet.
    reserved: Option<LinkHandle>,
    wake: bool,
}

impl<L: GattLink> Central<L> {
    /// Engine over the configured peer table. An enabled engine starts with
    /// its wake flag raised.
    pub fn new(interest: InterestList, link: L, enabled: bool) -> Self {
        Self::with_peers(PeerRegistry::from_config(), interest, link, enabled)
    }

    pub fn with_peers(peers: PeerRegistry, interest: InterestList, link: L, enabled: bool) -> Self {
        let scheduler = Scheduler::new(peers.len(), enabled);
        Self {
            peers,
            scheduler,
            interest,
            link,
            reserved: None,
            wake: enabled,
        }
    }

    pub fn peers(&self) -> &PeerRegistry {
        &self.peers
    }

    pub fn scheduler(&self) -> &Scheduler {
        &self.scheduler
    }

    pub fn interest(&self) -> &InterestList {
        &self.interest
    }

    pub fn link_mut(&mut self) -> &mut L {
        &mut self.link
    }

    pub fn is_enabled(&self) -> bool {
        !self.scheduler.is_disabled()
    }

    /// Consume the pending wake, if any.
    pub fn take_wake(&mut self) -> bool {
        core::mem::take(&mut self.wake)
    }

    // ═══════════════════════════════════════════════════════════════════
    // Scheduling
    // ═══════════════════════════════════════════════════════════════════

    /// Wake handler. Reserves the negotiation slot for the next Idle peer
    /// and moves it to Connecting.
    pub fn service(&mut self) -> Option<ConnectPlan> {
        let id = self.scheduler.select(&self.peers)?;
        let Some(peer) = self.peers.get_mut(id) else {
            self.scheduler.release();
            return None;
        };
        let link = peer.begin_connecting();
        self.reserved = Some(link);
        let delay_ms = self.scheduler.backoff_ms();
        info!(
            "connecting to {} ({} failures, backoff {} ms)",
            peer.name,
            self.scheduler.failures(),
            delay_ms
        );
        Some(ConnectPlan { link, delay_ms })
    }

    /// Submit the connection request for a plan returned by `service`.
    /// Plans cancelled by `disable` or `disconnect_all` are dropped.
    pub fn begin_connect(&mut self, plan: ConnectPlan) {
        if self.reserved != Some(plan.link) {
            debug!("connect plan {:?} cancelled", plan.link);
            return;
        }
        self.reserved = None;
        let Some(peer) = self.peers.by_link_mut(plan.link) else {
            warn!("connect plan for a released link");
            return;
        };
        if peer.state() != PeerState::Connecting {
            return;
        }
        if let Err(e) = self.link.connect(plan.link, peer.address) {
            warn!("connect to {} not submitted: {:?}", peer.name, e);
            peer.reset();
            self.scheduler.release();
        }
    }

    // ═══════════════════════════════════════════════════════════════════
    // Link events
    // ═══════════════════════════════════════════════════════════════════

    pub fn handle(&mut self, event: LinkEvent) {
        match event {
            LinkEvent::Connected { link, result } => self.on_connected(link, result),
            LinkEvent::Disconnected { link, reason } => self.on_disconnected(link, reason),
            LinkEvent::Discovered { link, attribute } => self.on_discovered(link, attribute),
            LinkEvent::Subscribed { link, result } => self.on_subscribed(link, result),
            LinkEvent::Notification {
                link,
                value_handle,
                payload,
            } => self.on_notification(link, value_handle, payload.as_deref()),
        }
    }

    pub fn on_connected(&mut self, link: LinkHandle, result: Result<(), TransportError>) {
        let Some(peer) = self.peers.by_link_mut(link) else {
            debug!("stale connect completion {:?}", link);
            return;
        };
        if peer.state() != PeerState::Connecting {
            warn!("{} connected while {:?}", peer.name, peer.state());
            return;
        }

        match result {
            Ok(()) => {
                info!("connected to {}", peer.name);
                peer.mark_connected();
                self.scheduler.on_connect_succeeded();
                self.issue_step(link);
            }
            Err(e) => {
                warn!("failed to connect to {}: {:?}", peer.name, e);
                peer.reset();
                self.scheduler.on_connect_failed();
                self.wake = true;
            }
        }
    }

    pub fn on_disconnected(&mut self, link: LinkHandle, reason: Option<u8>) {
        let Some(peer) = self.peers.by_link_mut(link) else {
            debug!("stale disconnect {:?}", link);
            return;
        };
        info!("disconnected from {} (reason {:?})", peer.name, reason);

        let was_active = peer.state() == PeerState::Active;
        let id = peer.id;
        peer.reset();
        self.scheduler.on_disconnected(id, was_active);
        self.wake = true;
    }

    pub fn on_discovered(&mut self, link: LinkHandle, attribute: Option<Attribute>) {
        let Some(peer) = self.peers.by_link_mut(link) else {
            debug!("stale discovery result {:?}", link);
            return;
        };
        if !matches!(peer.state(), PeerState::Connected | PeerState::Discovering) {
            warn!("{} discovery result while {:?}", peer.name, peer.state());
            return;
        }
        let Some(step) = self.interest.step(peer.step()) else {
            return;
        };
        if let Step::Subscribe(_) = step {
            warn!("{} discovery result during {:?}", peer.name, step);
            return;
        }

        let Some(attribute) = attribute else {
            warn!("{}: {:?} found nothing", peer.name, step);
            self.teardown(link);
            return;
        };

        discovery::record(step, &mut peer.handles, &attribute);
        if let Step::FindService(_) = step {
            peer.mark_discovering();
        }
        debug!("{}: {:?} -> handle {}", peer.name, step, attribute.value_handle);
        peer.advance_step();
        self.issue_step(link);
    }

    pub fn on_subscribed(&mut self, link: LinkHandle, result: Result<(), TransportError>) {
        let Some(peer) = self.peers.by_link_mut(link) else {
            debug!("stale subscribe result {:?}", link);
            return;
        };
        let Some(Step::Subscribe(kind)) = self.interest.step(peer.step()) else {
            warn!("{} unexpected subscribe result", peer.name);
            return;
        };

        match result {
            Ok(()) => {
                debug!("{} subscribed to {}", peer.name, kind.label());
                peer.advance_step();
                self.issue_step(link);
            }
            Err(e) => {
                warn!("{} subscribe to {} failed: {:?}", peer.name, kind.label(), e);
                self.teardown(link);
            }
        }
    }

    pub fn on_notification(&mut self, link: LinkHandle, value_handle: u16, payload: Option<&[u8]>) {
        let Some(peer) = self.peers.by_link_mut(link) else {
            debug!("notification on stale link {:?}", link);
            return;
        };
        let Some(kind) = peer.handles.kind_for_value(value_handle) else {
            warn!("{} notified unknown handle {}", peer.name, value_handle);
            return;
        };
        let Some(payload) = payload else {
            info!("{} unsubscribed {}", peer.name, kind.label());
            return;
        };

        match readings::decode(kind, payload) {
            Ok(reading) => {
                trace!("{}: {:?}", peer.name, reading);
                peer.readings.record(reading);
            }
            Err(e) => warn!("{} bad {} payload: {:?}", peer.name, kind.label(), e),
        }
    }

    /// Submit the request for the peer's current step, or finish the
    /// negotiation when the sequence is exhausted.
    fn issue_step(&mut self, link: LinkHandle) {
        let Some(peer) = self.peers.by_link_mut(link) else {
            return;
        };
        let Some(step) = self.interest.step(peer.step()) else {
            info!("{} active", peer.name);
            let id = peer.id;
            peer.mark_active();
            self.scheduler.on_active(id);
            self.wake = true;
            return;
        };

        let submitted = match discovery::request_for(step, &peer.handles) {
            GattRequest::Discover(request) => self.link.discover(link, request),
            GattRequest::Subscribe(request) => self.link.subscribe(link, request),
        };
        if let Err(e) = submitted {
            warn!("{:?} not submitted: {:?}", step, e);
            self.teardown(link);
        }
    }

    /// Drop the link; the disconnect event resets the peer.
    fn teardown(&mut self, link: LinkHandle) {
        if let Err(e) = self.link.disconnect(link) {
            error!("disconnect not submitted: {:?}", e);
        }
    }

    // ═══════════════════════════════════════════════════════════════════
    // Command surface
    // ═══════════════════════════════════════════════════════════════════

    pub fn enable(&mut self) -> Result<(), CommandError> {
        self.scheduler.enable()?;
        info!("scanning enabled");
        self.wake = true;
        Ok(())
    }

    /// Pause scheduling and drop every link.
    pub fn disable(&mut self) -> Result<(), CommandError> {
        self.scheduler.disable()?;
        info!("scanning disabled");
        self.disconnect_all();
        Ok(())
    }

    /// Request disconnection of every non-Idle peer. Returns the peers whose
    /// request could not be submitted.
    pub fn disconnect_all(&mut self) -> Vec<PeerId, PEER_COUNT> {
        self.cancel_reserved();
        let mut failed = Vec::new();
        for peer in self.peers.iter() {
            let Some(link) = peer.link() else {
                continue;
            };
            if let Err(e) = self.link.disconnect(link) {
                warn!("disconnect from {} not submitted: {:?}", peer.name, e);
                let _ = failed.push(peer.id);
            }
        }
        failed
    }

    /// Return a peer still waiting out its backoff to Idle. Nothing has
    /// been submitted for it, so no disconnect event will follow.
    fn cancel_reserved(&mut self) {
        let Some(link) = self.reserved.take() else {
            return;
        };
        let Some(peer) = self.peers.by_link_mut(link) else {
            return;
        };
        info!("connect to {} cancelled", peer.name);
        peer.reset();
        self.scheduler.release();
        if !self.scheduler.is_disabled() {
            self.wake = true;
        }
    }

    pub fn status(&self) -> Vec<PeerStatus, PEER_COUNT> {
        let mask = self.interest.complete_mask();
        self.peers
            .iter()
            .map(|peer| PeerStatus {
                id: peer.id,
                address: peer.address,
                name: peer.name,
                state: peer.state(),
                received: peer.readings.received(),
                complete: peer.readings.is_complete(mask),
            })
            .collect()
    }

    /// Reports from Active peers that have sent every enabled kind. Their
    /// bitmasks are cleared; incomplete peers are left untouched.
    pub fn take_reports(&mut self) -> Vec<PeerReport, PEER_COUNT> {
        let mask = self.interest.complete_mask();
        let mut reports = Vec::new();
        for peer in self.peers.iter_mut() {
            if peer.state() != PeerState::Active || !peer.readings.is_complete(mask) {
                continue;
            }
            let _ = reports.push(PeerReport {
                id: peer.id,
                address: peer.address,
                name: peer.name,
                readings: peer.readings,
            });
            peer.readings.clear_received();
        }
        reports
    }
}
