//! Integration tests for esshub host-testable logic.
//!
//! A simulated radio answers the engine's link commands from per-peer
//! GATT tables, so whole negotiations run through the public API exactly
//! as the firmware's link tasks would drive them.

use esshub::ble::central::Central;
use esshub::ble::discovery::{Attribute, DiscoverKind, DiscoverRequest};
use esshub::ble::interest::{InterestList, SensorKind, BATTERY_SERVICE_UUID, CCC_UUID, ESS_SERVICE_UUID};
use esshub::ble::link::{ChannelLink, CommandQueue};
use esshub::ble::peer::{LinkHandle, PeerId, PeerState};
use esshub::ble::{LinkCommand, LinkEvent, Payload};
use esshub::config::PEER_COUNT;
use esshub::error::{CommandError, TransportError};
use esshub::shell::{self, Command, Reply};

const HCI_LOCAL_HOST_TERMINATED: u8 = 0x16;

// ═══════════════════════════════════════════════════════════════════════════
// Simulated peripherals
// ═══════════════════════════════════════════════════════════════════════════

#[derive(Clone, Copy)]
struct FakeAttribute {
    kind: DiscoverKind,
    uuid: u16,
    handle: u16,
    value_handle: u16,
}

/// ESS at 0x0010 with four characteristics, battery service at 0x0030.
fn sensor_table() -> Vec<FakeAttribute> {
    let mut table = vec![FakeAttribute {
        kind: DiscoverKind::PrimaryService,
        uuid: ESS_SERVICE_UUID,
        handle: 0x0010,
        value_handle: 0x0010,
    }];
    let ess = [
        SensorKind::Temperature,
        SensorKind::Humidity,
        SensorKind::Pressure,
        SensorKind::DewPoint,
    ];
    for (i, kind) in ess.iter().enumerate() {
        let decl = 0x0011 + 3 * i as u16;
        table.push(characteristic(kind.uuid(), decl));
        table.push(ccc(decl + 2));
    }
    table.push(FakeAttribute {
        kind: DiscoverKind::PrimaryService,
        uuid: BATTERY_SERVICE_UUID,
        handle: 0x0030,
        value_handle: 0x0030,
    });
    table.push(characteristic(SensorKind::BatteryLevel.uuid(), 0x0031));
    table.push(ccc(0x0033));
    table
}

fn characteristic(uuid: u16, decl: u16) -> FakeAttribute {
    FakeAttribute {
        kind: DiscoverKind::Characteristic,
        uuid,
        handle: decl,
        value_handle: decl + 1,
    }
}

fn ccc(handle: u16) -> FakeAttribute {
    FakeAttribute {
        kind: DiscoverKind::Descriptor,
        uuid: CCC_UUID,
        handle,
        value_handle: handle,
    }
}

fn find(table: &[FakeAttribute], request: &DiscoverRequest) -> Option<Attribute> {
    table
        .iter()
        .find(|a| a.kind == request.kind && a.uuid == request.uuid && request.range.contains(a.handle))
        .map(|a| Attribute {
            handle: a.handle,
            value_handle: a.value_handle,
        })
}

/// One simulated remote sensor.
struct FakePeer {
    /// `None` models an out-of-range device: every connect times out.
    table: Option<Vec<FakeAttribute>>,
    link: Option<LinkHandle>,
    subscribed: Vec<(SensorKind, u16)>,
}

struct Hub {
    central: Central<ChannelLink<'static>>,
    queues: &'static [CommandQueue],
    peers: Vec<FakePeer>,
}

impl Hub {
    fn new(tables: Vec<Option<Vec<FakeAttribute>>>) -> Self {
        let queues: &'static [CommandQueue; PEER_COUNT] =
            Box::leak(Box::new([const { CommandQueue::new() }; PEER_COUNT]));
        let interest = InterestList::from_config().unwrap();
        let central = Central::new(interest, ChannelLink::new(queues), true);
        let peers = tables
            .into_iter()
            .map(|table| FakePeer {
                table,
                link: None,
                subscribed: Vec::new(),
            })
            .collect();
        Self {
            central,
            queues,
            peers,
        }
    }

    fn all_reachable() -> Self {
        Self::new((0..PEER_COUNT).map(|_| Some(sensor_table())).collect())
    }

    /// Answer one queued command; returns whether anything was pending.
    fn answer(&mut self, index: usize) -> bool {
        let Ok(command) = self.queues[index].try_receive() else {
            return false;
        };
        let peer = &mut self.peers[index];
        let event = match command {
            LinkCommand::Connect { link, .. } => match peer.table {
                Some(_) => {
                    peer.link = Some(link);
                    peer.subscribed.clear();
                    LinkEvent::Connected { link, result: Ok(()) }
                }
                None => LinkEvent::Connected {
                    link,
                    result: Err(TransportError::Timeout),
                },
            },
            LinkCommand::Disconnect { link } => {
                if peer.link != Some(link) {
                    return true;
                }
                peer.link = None;
                LinkEvent::Disconnected {
                    link,
                    reason: Some(HCI_LOCAL_HOST_TERMINATED),
                }
            }
            LinkCommand::Discover { link, request } => LinkEvent::Discovered {
                link,
                attribute: peer.table.as_deref().and_then(|t| find(t, &request)),
            },
            LinkCommand::Subscribe { link, request } => {
                peer.subscribed
                    .push((request.kind, request.subscription.value_handle));
                LinkEvent::Subscribed { link, result: Ok(()) }
            }
        };
        self.deliver(event);
        true
    }

    fn deliver(&mut self, event: LinkEvent) {
        self.central.handle(event);
        assert!(self.central.peers().negotiating() <= 1, "two negotiations in flight");
        for peer in self.central.peers().iter() {
            assert!(peer.is_consistent(), "{} inconsistent", peer.name);
        }
    }

    /// Serve wake-ups (ignoring backoff delays) and answer commands until
    /// nothing moves or `rounds` is used up.
    fn run(&mut self, rounds: usize) {
        for _ in 0..rounds {
            let mut moved = false;
            if self.central.take_wake() {
                if let Some(plan) = self.central.service() {
                    self.central.begin_connect(plan);
                    moved = true;
                }
            }
            for index in 0..PEER_COUNT {
                while self.answer(index) {
                    moved = true;
                }
            }
            if !moved {
                return;
            }
        }
    }

    /// Notify `kinds` from peer `index` with fixed sample values.
    fn notify(&mut self, index: usize, kinds: &[SensorKind]) {
        let peer = &self.peers[index];
        let link = peer.link.expect("peer not connected");
        let events: Vec<LinkEvent> = kinds
            .iter()
            .map(|kind| {
                let (_, value_handle) = *peer
                    .subscribed
                    .iter()
                    .find(|(k, _)| k == kind)
                    .expect("kind not subscribed");
                LinkEvent::Notification {
                    link,
                    value_handle,
                    payload: Some(Payload::from_slice(&sample(*kind)).unwrap()),
                }
            })
            .collect();
        for event in events {
            self.deliver(event);
        }
    }

    fn states(&self) -> Vec<PeerState> {
        self.central.peers().iter().map(|p| p.state()).collect()
    }
}

fn sample(kind: SensorKind) -> Vec<u8> {
    match kind {
        SensorKind::Temperature => 2512u16.to_le_bytes().to_vec(),
        SensorKind::Humidity => 5204u16.to_le_bytes().to_vec(),
        SensorKind::Pressure => 100_270u32.to_le_bytes().to_vec(),
        SensorKind::DewPoint => vec![8],
        SensorKind::BatteryLevel => vec![91],
    }
}

const EVERY_KIND: [SensorKind; 5] = SensorKind::ALL;

// ═══════════════════════════════════════════════════════════════════════════
// Scenarios
// ═══════════════════════════════════════════════════════════════════════════

#[test]
fn every_peer_becomes_active_one_at_a_time() {
    let mut hub = Hub::all_reachable();
    hub.run(100);

    assert_eq!(hub.states(), vec![PeerState::Active; PEER_COUNT]);
    assert!(!hub.central.scheduler().is_busy());
    assert_eq!(hub.central.scheduler().failures(), 0);

    let steps = hub.central.interest().step_count();
    for peer in hub.central.peers().iter() {
        assert_eq!(peer.step(), steps);
        assert_eq!(hub.peers[peer.id.index()].subscribed.len(), 5);
    }
}

#[test]
fn reports_only_complete_peers_and_clear_them() {
    let mut hub = Hub::all_reachable();
    hub.run(100);

    hub.notify(0, &EVERY_KIND);
    hub.notify(1, &[SensorKind::Temperature, SensorKind::Humidity]);

    let reports = hub.central.take_reports();
    assert_eq!(reports.len(), 1);
    let report = &reports[0];
    assert_eq!(report.id, PeerId(0));
    assert_eq!(report.readings.temperature, 25.12);
    assert_eq!(report.readings.humidity, 52.04);
    assert_eq!(report.readings.pressure, 100_270);
    assert_eq!(report.readings.dew_point, 8);
    assert_eq!(report.readings.battery_level, 91);

    // Peer 0 was cleared, peer 1 kept its partial bitmask.
    assert!(hub.central.take_reports().is_empty());
    let status = hub.central.status();
    assert_eq!(status[0].received, 0);
    assert_eq!(
        status[1].received,
        SensorKind::Temperature.bit() | SensorKind::Humidity.bit()
    );

    // Peer 1 completes later and is reported on its own.
    hub.notify(1, &[SensorKind::Pressure, SensorKind::DewPoint, SensorKind::BatteryLevel]);
    let reports = hub.central.take_reports();
    assert_eq!(reports.len(), 1);
    assert_eq!(reports[0].id, PeerId(1));
}

#[test]
fn readings_command_output() {
    let mut hub = Hub::all_reachable();
    hub.run(100);
    hub.notify(2, &EVERY_KIND);

    assert_eq!(Command::parse("ess readings"), Ok(Command::EssReadings));
    let reports = hub.central.take_reports();
    let mut out = Reply::new();
    shell::write_readings(&mut out, hub.central.interest(), &reports, None).unwrap();

    let lines: Vec<&str> = out.lines().collect();
    assert_eq!(
        lines,
        [
            "device,address,name,temperature,humidity,pressure,dewpoint,battery",
            "3,01e38aa8925505,Northwind area,25.12,52.04,100270,8,91",
        ]
    );
}

#[test]
fn unreachable_peer_backs_off_without_starving_others() {
    let mut hub = Hub::new(vec![Some(sensor_table()), None, Some(sensor_table())]);
    hub.run(40);

    let states = hub.states();
    assert_eq!(states[0], PeerState::Active);
    assert_eq!(states[1], PeerState::Idle);
    assert_eq!(states[2], PeerState::Active);
    assert!(hub.central.scheduler().failures() >= 9);
    assert!(hub.central.scheduler().backoff_ms() > 0);
}

#[test]
fn active_peer_drop_resets_backoff_and_reconnects() {
    let mut hub = Hub::new(vec![Some(sensor_table()), None, Some(sensor_table())]);
    hub.run(40);
    let failures = hub.central.scheduler().failures();
    assert!(failures > 0);

    // Peer 2 drops on its own (supervision timeout).
    let link = hub.peers[2].link.take().unwrap();
    hub.deliver(LinkEvent::Disconnected {
        link,
        reason: Some(0x08),
    });
    assert_eq!(hub.central.peers().get(PeerId(2)).unwrap().state(), PeerState::Idle);
    assert_eq!(hub.central.scheduler().failures(), 0);

    hub.run(40);
    assert_eq!(hub.central.peers().get(PeerId(2)).unwrap().state(), PeerState::Active);
}

#[test]
fn missing_service_tears_down_and_retries() {
    let mut battery_less = sensor_table();
    battery_less.retain(|a| a.handle < 0x0030);
    let mut hub = Hub::new(vec![Some(battery_less), Some(sensor_table()), Some(sensor_table())]);
    hub.run(6);

    // Peer 0 never gets past discovery, the others still make progress.
    let states = hub.states();
    assert_ne!(states[0], PeerState::Active);
    assert!(states[1..].contains(&PeerState::Active));
}

#[test]
fn disable_drops_links_and_enable_resumes() {
    let mut hub = Hub::all_reachable();
    hub.run(100);

    hub.central.disable().unwrap();
    assert_eq!(hub.central.disable(), Err(CommandError::AlreadyDisabled));
    hub.run(100);
    assert_eq!(hub.states(), vec![PeerState::Idle; PEER_COUNT]);

    hub.central.enable().unwrap();
    assert_eq!(hub.central.enable(), Err(CommandError::AlreadyEnabled));
    hub.run(100);
    assert_eq!(hub.states(), vec![PeerState::Active; PEER_COUNT]);
}

#[test]
fn stale_events_from_an_old_link_are_ignored() {
    let mut hub = Hub::all_reachable();
    hub.run(100);

    let old = hub.peers[0].link.unwrap();
    hub.central.disconnect_all();
    hub.run(100);

    // A late notification and a late disconnect from the first link.
    hub.deliver(LinkEvent::Notification {
        link: old,
        value_handle: 0x0012,
        payload: Some(Payload::from_slice(&sample(SensorKind::Temperature)).unwrap()),
    });
    hub.deliver(LinkEvent::Disconnected { link: old, reason: None });

    let peer = hub.central.peers().get(PeerId(0)).unwrap();
    assert_eq!(peer.state(), PeerState::Active);
    assert_ne!(peer.link(), Some(old));
    assert_eq!(peer.readings.received(), 0);
}

#[test]
fn disable_during_backoff_leaves_the_radio_untouched() {
    let mut hub = Hub::all_reachable();
    assert!(hub.central.take_wake());
    let plan = hub.central.service().unwrap();

    // The timer fires after the operator paused the hub.
    hub.central.disable().unwrap();
    hub.central.begin_connect(plan);

    assert!(hub.queues[plan.link.peer.0 as usize].try_receive().is_err());
    assert_eq!(hub.states(), vec![PeerState::Idle; PEER_COUNT]);
    assert!(!hub.central.scheduler().is_busy());
    hub.run(100);
    assert_eq!(hub.states(), vec![PeerState::Idle; PEER_COUNT]);
}
