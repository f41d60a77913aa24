//! Peer registry - the fixed table of remote sensors and their
//! per-device negotiation state.

use heapless::Vec;

use crate::ble::interest::SensorKind;
use crate::ble::readings::Readings;
use crate::config::{PeerConfig, PEER_COUNT};

/// Link-layer address type.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum AddressKind {
    Public,
    RandomStatic,
}

/// Link-layer identity of a peer. `bytes` is little-endian.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct PeerAddress {
    pub kind: AddressKind,
    pub bytes: [u8; 6],
}

impl PeerAddress {
    pub const fn new(kind: AddressKind, bytes: [u8; 6]) -> Self {
        Self { kind, bytes }
    }
}

impl core::fmt::Display for PeerAddress {
    /// Most significant octet first, as printed on device labels.
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        let b = &self.bytes;
        write!(
            f,
            "{:02X}:{:02X}:{:02X}:{:02X}:{:02X}:{:02X}",
            b[5], b[4], b[3], b[2], b[1], b[0]
        )?;
        match self.kind {
            AddressKind::Public => f.write_str(" (public)"),
            AddressKind::RandomStatic => f.write_str(" (random)"),
        }
    }
}

/// Index of a peer in the registry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct PeerId(pub u8);

impl PeerId {
    pub const fn index(self) -> usize {
        self.0 as usize
    }
}

/// Ownership token for one connection attempt.
///
/// A fresh generation is minted every time a peer leaves Idle, so events
/// from an earlier link can be told apart from the current one.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct LinkHandle {
    pub peer: PeerId,
    pub generation: u16,
}

/// Negotiation state of a peer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum PeerState {
    Idle,
    Connecting,
    Connected,
    Discovering,
    Active,
}

impl PeerState {
    /// Holds the single negotiation slot.
    pub const fn is_negotiating(self) -> bool {
        matches!(
            self,
            PeerState::Connecting | PeerState::Connected | PeerState::Discovering
        )
    }

    pub const fn label(self) -> &'static str {
        match self {
            PeerState::Idle => "Idle",
            PeerState::Connecting => "Connecting",
            PeerState::Connected => "Connected",
            PeerState::Discovering => "Discovering",
            PeerState::Active => "Active",
        }
    }
}

/// Value and CCC handles of one subscribed characteristic.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct Subscription {
    pub value_handle: u16,
    pub ccc_handle: u16,
}

/// Handles discovered on the current link. All zero until found.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Handles {
    pub ess_service: u16,
    pub battery_service: u16,
    subscriptions: [Subscription; SensorKind::ALL.len()],
}

impl Handles {
    pub fn subscription(&self, kind: SensorKind) -> &Subscription {
        &self.subscriptions[kind.index()]
    }

    pub fn subscription_mut(&mut self, kind: SensorKind) -> &mut Subscription {
        &mut self.subscriptions[kind.index()]
    }

    /// Kind whose value handle is `value_handle`, if any was discovered.
    pub fn kind_for_value(&self, value_handle: u16) -> Option<SensorKind> {
        if value_handle == 0 {
            return None;
        }
        SensorKind::ALL
            .into_iter()
            .find(|kind| self.subscription(*kind).value_handle == value_handle)
    }
}

/// One configured remote sensor.
#[derive(Debug, Clone)]
pub struct Peer {
    pub id: PeerId,
    pub address: PeerAddress,
    pub name: &'static str,
    state: PeerState,
    link: Option<LinkHandle>,
    generation: u16,
    step: u8,
    pub handles: Handles,
    pub readings: Readings,
}

impl Peer {
    pub fn new(id: PeerId, config: &PeerConfig) -> Self {
        Self {
            id,
            address: config.address,
            name: config.name,
            state: PeerState::Idle,
            link: None,
            generation: 0,
            step: 0,
            handles: Handles::default(),
            readings: Readings::new(),
        }
    }

    pub fn state(&self) -> PeerState {
        self.state
    }

    pub fn link(&self) -> Option<LinkHandle> {
        self.link
    }

    /// Index of the discovery step in flight.
    pub fn step(&self) -> u8 {
        self.step
    }

    /// `link` is present exactly when the peer is not Idle.
    pub fn is_consistent(&self) -> bool {
        self.link.is_some() == (self.state != PeerState::Idle)
    }

    /// Whether `link` is this peer's current link.
    pub fn owns(&self, link: LinkHandle) -> bool {
        self.link == Some(link)
    }

    /// Idle → Connecting. Mints and takes ownership of a new link handle.
    pub fn begin_connecting(&mut self) -> LinkHandle {
        self.generation = self.generation.wrapping_add(1);
        let link = LinkHandle {
            peer: self.id,
            generation: self.generation,
        };
        self.link = Some(link);
        self.state = PeerState::Connecting;
        self.step = 0;
        link
    }

    /// Connecting → Connected. Starts a fresh discovery.
    pub fn mark_connected(&mut self) {
        self.state = PeerState::Connected;
        self.step = 0;
        self.handles = Handles::default();
    }

    /// Connected → Discovering, once the primary service is known.
    pub fn mark_discovering(&mut self) {
        if self.state == PeerState::Connected {
            self.state = PeerState::Discovering;
        }
    }

    /// Move to the next discovery step.
    pub fn advance_step(&mut self) -> u8 {
        self.step = self.step.saturating_add(1);
        self.step
    }

    /// Discovering → Active.
    pub fn mark_active(&mut self) {
        self.state = PeerState::Active;
    }

    /// Any state → Idle. Releases the link and forgets everything learned
    /// on it.
    pub fn reset(&mut self) -> Option<LinkHandle> {
        self.state = PeerState::Idle;
        self.step = 0;
        self.handles = Handles::default();
        self.readings.clear();
        self.link.take()
    }
}

/// Fixed-size table of all peers.
#[derive(Debug, Clone)]
pub struct PeerRegistry {
    peers: Vec<Peer, PEER_COUNT>,
}

impl PeerRegistry {
    /// Registry built from the configured peer table.
    pub fn from_config() -> Self {
        Self::new(&crate::config::PEERS)
    }

    pub fn new(configs: &[PeerConfig]) -> Self {
        let mut peers = Vec::new();
        for (i, config) in configs.iter().take(PEER_COUNT).enumerate() {
            let _ = peers.push(Peer::new(PeerId(i as u8), config));
        }
        Self { peers }
    }

    pub fn len(&self) -> usize {
        self.peers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.peers.is_empty()
    }

    pub fn get(&self, id: PeerId) -> Option<&Peer> {
        self.peers.get(id.index())
    }

    pub fn get_mut(&mut self, id: PeerId) -> Option<&mut Peer> {
        self.peers.get_mut(id.index())
    }

    /// Peer currently owning `link`; stale handles resolve to `None`.
    pub fn by_link_mut(&mut self, link: LinkHandle) -> Option<&mut Peer> {
        self.peers
            .get_mut(link.peer.index())
            .filter(|peer| peer.owns(link))
    }

    pub fn iter(&self) -> impl Iterator<Item = &Peer> {
        self.peers.iter()
    }

    pub fn iter_mut(&mut self) -> impl Iterator<Item = &mut Peer> {
        self.peers.iter_mut()
    }

    pub fn any_idle(&self) -> bool {
        self.peers.iter().any(|p| p.state() == PeerState::Idle)
    }

    /// Number of peers holding the negotiation slot. Never more than one.
    pub fn negotiating(&self) -> usize {
        self.peers
            .iter()
            .filter(|p| p.state().is_negotiating())
            .count()
    }
}
