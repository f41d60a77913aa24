//! SoftDevice side of the BLE link.
//!
//! One [`link_task`] per peer serializes every GATT operation for that
//! peer and reports completions as [`LinkEvent`]s. [`central_task`] owns
//! the engine wake-up loop and the connection backoff timer.

use embassy_futures::select::{select, select3, Either, Either3};
use embassy_sync::blocking_mutex::raw::CriticalSectionRawMutex;
use embassy_sync::channel::{Receiver, Sender};
use embassy_sync::mutex::Mutex;
use embassy_time::{with_timeout, Duration, Instant, Timer};
use heapless::Vec;
use nrf_softdevice::ble::gatt_client::{self, Characteristic, Descriptor, DiscoverError, HvxType};
use nrf_softdevice::ble::{central, Address, AddressType, Connection, Uuid};
use nrf_softdevice::{raw, Softdevice};

use crate::ble::central::{Central, ConnectPlan};
use crate::ble::discovery::{Attribute, DiscoverKind, DiscoverRequest};
use crate::ble::interest::{BATTERY_SERVICE_UUID, CCC_UUID, ESS_SERVICE_UUID};
use crate::ble::link::ChannelLink;
use crate::ble::peer::{AddressKind, LinkHandle, PeerAddress};
use crate::ble::{LinkCommand, LinkEvent, Payload, NOTIFY_PAYLOAD_MAX, SCHEDULER_WAKE};
use crate::config;
use crate::config::{LINK_COMMAND_DEPTH, LINK_EVENT_DEPTH};
use crate::error::TransportError;

/// The engine as shared between the central task and the shell.
pub type SharedCentral = Mutex<CriticalSectionRawMutex, Central<ChannelLink<'static>>>;

pub type CommandReceiver = Receiver<'static, CriticalSectionRawMutex, LinkCommand, LINK_COMMAND_DEPTH>;
pub type EventSender = Sender<'static, CriticalSectionRawMutex, LinkEvent, LINK_EVENT_DEPTH>;
pub type EventReceiver = Receiver<'static, CriticalSectionRawMutex, LinkEvent, LINK_EVENT_DEPTH>;

/// HCI "remote user terminated", reported when we closed the link.
const HCI_LOCAL_HOST_TERMINATED: u8 = 0x16;

/// CCC value enabling notifications.
const CCC_NOTIFY: [u8; 2] = [0x01, 0x00];

const MAX_SERVICE_CHARACTERISTICS: usize = 8;

/// Run `f` on the engine and forward any wake it raised.
pub async fn with_central<R>(
    central: &SharedCentral,
    f: impl FnOnce(&mut Central<ChannelLink<'static>>) -> R,
) -> R {
    let mut c = central.lock().await;
    let result = f(&mut c);
    if c.take_wake() {
        SCHEDULER_WAKE.signal(());
    }
    result
}

// ═══════════════════════════════════════════════════════════════════════════
// Central task
// ═══════════════════════════════════════════════════════════════════════════

/// Drive the engine from wake signals, link events and the backoff timer.
pub async fn central_task(central: &'static SharedCentral, events: EventReceiver) -> ! {
    let mut pending: Option<(ConnectPlan, Instant)> = None;
    with_central(central, |_| ()).await;

    loop {
        let deadline = pending.map(|(_, at)| at);
        let backoff = async move {
            match deadline {
                Some(at) => Timer::at(at).await,
                None => core::future::pending::<()>().await,
            }
        };

        match select3(SCHEDULER_WAKE.wait(), events.receive(), backoff).await {
            Either3::First(()) => {
                if let Some(plan) = with_central(central, |c| c.service()).await {
                    let at = Instant::now() + Duration::from_millis(plan.delay_ms);
                    pending = Some((plan, at));
                }
            }
            Either3::Second(event) => with_central(central, |c| c.handle(event)).await,
            Either3::Third(()) => {
                if let Some((plan, _)) = pending.take() {
                    with_central(central, |c| c.begin_connect(plan)).await;
                }
            }
        }
    }
}

// ═══════════════════════════════════════════════════════════════════════════
// Attribute cache
// ═══════════════════════════════════════════════════════════════════════════

#[derive(Clone, Copy)]
struct CachedCharacteristic {
    uuid: Option<Uuid>,
    decl: u16,
    value: u16,
    ccc: Option<u16>,
}

/// Characteristics of one primary service, filled by `gatt_client::discover`.
struct ServiceTable<const UUID: u16> {
    characteristics: Vec<CachedCharacteristic, MAX_SERVICE_CHARACTERISTICS>,
}

impl<const UUID: u16> gatt_client::Client for ServiceTable<UUID> {
    type Event = ();

    fn on_hvx(&self, _conn: &Connection, _type: HvxType, _handle: u16, _data: &[u8]) -> Option<()> {
        None
    }

    fn uuid() -> Uuid {
        Uuid::new_16(UUID)
    }

    fn new_undiscovered(_conn: Connection) -> Self {
        Self {
            characteristics: Vec::new(),
        }
    }

    fn discovered_characteristic(
        &mut self,
        characteristic: &Characteristic,
        descriptors: &[Descriptor],
    ) {
        let ccc = descriptors
            .iter()
            .find(|d| d.uuid == Some(Uuid::new_16(CCC_UUID)))
            .map(|d| d.handle);
        let entry = CachedCharacteristic {
            uuid: characteristic.uuid,
            decl: characteristic.handle_decl,
            value: characteristic.handle_value,
            ccc,
        };
        if self.characteristics.push(entry).is_err() {
            warn!("service {} has too many characteristics", UUID);
        }
    }

    fn discovery_complete(&mut self) -> Result<(), DiscoverError> {
        Ok(())
    }
}

/// Everything learned on the current link. Characteristic and descriptor
/// steps are answered from here after their service has been discovered.
#[derive(Default)]
struct AttributeCache {
    characteristics: Vec<CachedCharacteristic, { 2 * MAX_SERVICE_CHARACTERISTICS }>,
}

impl AttributeCache {
    async fn resolve(&mut self, conn: &Connection, request: &DiscoverRequest) -> Option<Attribute> {
        match request.kind {
            DiscoverKind::PrimaryService => self.discover_service(conn, request.uuid).await,
            DiscoverKind::Characteristic => {
                let uuid = Some(Uuid::new_16(request.uuid));
                self.characteristics
                    .iter()
                    .find(|c| c.uuid == uuid && request.range.contains(c.decl))
                    .map(|c| Attribute {
                        handle: c.decl,
                        value_handle: c.value,
                    })
            }
            DiscoverKind::Descriptor => self
                .characteristics
                .iter()
                .filter_map(|c| c.ccc)
                .filter(|handle| request.uuid == CCC_UUID && request.range.contains(*handle))
                .min()
                .map(Attribute::single),
        }
    }

    async fn discover_service(&mut self, conn: &Connection, uuid: u16) -> Option<Attribute> {
        let found = match uuid {
            ESS_SERVICE_UUID => gatt_client::discover::<ServiceTable<ESS_SERVICE_UUID>>(conn)
                .await
                .map(|t| t.characteristics),
            BATTERY_SERVICE_UUID => {
                gatt_client::discover::<ServiceTable<BATTERY_SERVICE_UUID>>(conn)
                    .await
                    .map(|t| t.characteristics)
            }
            _ => return None,
        };

        let characteristics = match found {
            Ok(c) => c,
            Err(e) => {
                warn!("service {} discovery failed: {:?}", uuid, e);
                return None;
            }
        };
        let first = characteristics.iter().map(|c| c.decl).min()?;
        for c in characteristics {
            if self.characteristics.push(c).is_err() {
                warn!("attribute cache full");
                break;
            }
        }
        // The service declaration sits right before its first characteristic.
        Some(Attribute::single(first.saturating_sub(1)))
    }
}

// ═══════════════════════════════════════════════════════════════════════════
// Link task
// ═══════════════════════════════════════════════════════════════════════════

/// Notification as delivered by `gatt_client::run`.
struct Notification {
    value_handle: u16,
    payload: Option<Payload>,
}

/// Receives notifications for every handle on the link.
struct NotifyClient;

impl gatt_client::Client for NotifyClient {
    type Event = Notification;

    fn on_hvx(
        &self,
        _conn: &Connection,
        type_: HvxType,
        handle: u16,
        data: &[u8],
    ) -> Option<Notification> {
        if !matches!(type_, HvxType::Notification) {
            return None;
        }
        let payload = (!data.is_empty())
            .then(|| Vec::from_slice(&data[..data.len().min(NOTIFY_PAYLOAD_MAX)]).ok())
            .flatten();
        Some(Notification {
            value_handle: handle,
            payload,
        })
    }

    fn uuid() -> Uuid {
        Uuid::new_16(ESS_SERVICE_UUID)
    }

    fn new_undiscovered(_conn: Connection) -> Self {
        NotifyClient
    }

    fn discovered_characteristic(&mut self, _: &Characteristic, _: &[Descriptor]) {}

    fn discovery_complete(&mut self) -> Result<(), DiscoverError> {
        Ok(())
    }
}

fn softdevice_address(address: &PeerAddress) -> Address {
    let kind = match address.kind {
        AddressKind::Public => AddressType::Public,
        AddressKind::RandomStatic => AddressType::RandomStatic,
    };
    Address::new(kind, address.bytes)
}

fn connect_error(e: central::ConnectError) -> TransportError {
    match e {
        central::ConnectError::Timeout => TransportError::Timeout,
        central::ConnectError::NoFreeConn => TransportError::NoFreeConnection,
        central::ConnectError::Raw(raw) => TransportError::Raw(raw as u32),
    }
}

fn step_timeout() -> Duration {
    Duration::from_millis(config::DISCOVERY_STEP_TIMEOUT_MS)
}

/// Resolves when a disconnect for `link` arrives; other commands are dropped.
async fn disconnect_requested(link: LinkHandle, commands: &CommandReceiver) {
    loop {
        match commands.receive().await {
            LinkCommand::Disconnect { link: l } if l == link => return,
            other => debug!("dropping {:?} while connecting", other),
        }
    }
}

async fn connect(
    sd: &'static Softdevice,
    link: LinkHandle,
    address: &PeerAddress,
    commands: &CommandReceiver,
) -> Result<Connection, TransportError> {
    let address = softdevice_address(address);
    let whitelist = [&address];
    let conn_cfg = central::ConnectConfig {
        scan_config: central::ScanConfig {
            whitelist: Some(&whitelist),
            ..Default::default()
        },
        conn_params: raw::ble_gap_conn_params_t {
            min_conn_interval: config::BLE_CONN_INTERVAL_MIN,
            max_conn_interval: config::BLE_CONN_INTERVAL_MAX,
            slave_latency: config::BLE_SLAVE_LATENCY,
            conn_sup_timeout: config::BLE_SUP_TIMEOUT,
        },
        ..Default::default()
    };

    let attempt = with_timeout(
        Duration::from_millis(config::BLE_CONNECT_TIMEOUT_MS),
        central::connect(sd, &conn_cfg),
    );
    match select(attempt, disconnect_requested(link, commands)).await {
        Either::First(Ok(Ok(conn))) => Ok(conn),
        Either::First(Ok(Err(e))) => Err(connect_error(e)),
        Either::First(Err(_)) => Err(TransportError::Timeout),
        Either::Second(()) => Err(TransportError::Disconnected),
    }
}

/// Serve commands on an open connection until it drops. Returns the HCI
/// reason when known.
async fn serve(
    conn: &Connection,
    link: LinkHandle,
    commands: &CommandReceiver,
    events: &EventSender,
) -> Option<u8> {
    let mut cache = AttributeCache::default();
    let mut closed_locally = false;

    loop {
        let notifications = gatt_client::run(conn, &NotifyClient, |n: Notification| {
            let event = LinkEvent::Notification {
                link,
                value_handle: n.value_handle,
                payload: n.payload,
            };
            if events.try_send(event).is_err() {
                warn!("event queue full - dropping notification");
            }
        });

        let command = match select(commands.receive(), notifications).await {
            Either::First(command) => command,
            Either::Second(_) => return closed_locally.then_some(HCI_LOCAL_HOST_TERMINATED),
        };
        if command.link() != link {
            debug!("dropping command for stale link {:?}", command.link());
            continue;
        }

        match command {
            LinkCommand::Disconnect { .. } => {
                closed_locally = true;
                let _ = conn.disconnect();
            }
            LinkCommand::Discover { request, .. } => {
                match with_timeout(step_timeout(), cache.resolve(conn, &request)).await {
                    Ok(attribute) => events.send(LinkEvent::Discovered { link, attribute }).await,
                    Err(_) => {
                        warn!("discovery step timed out");
                        closed_locally = true;
                        let _ = conn.disconnect();
                    }
                }
            }
            LinkCommand::Subscribe { request, .. } => {
                let write = gatt_client::write(conn, request.subscription.ccc_handle, &CCC_NOTIFY);
                let result = match with_timeout(step_timeout(), write).await {
                    Ok(Ok(())) => Ok(()),
                    Ok(Err(e)) => {
                        warn!("CCC write failed: {:?}", e);
                        Err(TransportError::Rejected)
                    }
                    Err(_) => {
                        warn!("subscribe timed out");
                        closed_locally = true;
                        let _ = conn.disconnect();
                        continue;
                    }
                };
                events.send(LinkEvent::Subscribed { link, result }).await;
            }
            LinkCommand::Connect { .. } => warn!("connect requested on an open link"),
        }
    }
}

/// Per-peer link worker. Runs forever, one connection at a time.
pub async fn link_task(
    sd: &'static Softdevice,
    commands: CommandReceiver,
    events: EventSender,
) -> ! {
    loop {
        let (link, address) = match commands.receive().await {
            LinkCommand::Connect { link, address } => (link, address),
            other => {
                debug!("link idle - dropping {:?}", other);
                continue;
            }
        };

        let conn = match connect(sd, link, &address, &commands).await {
            Ok(conn) => conn,
            Err(e) => {
                events
                    .send(LinkEvent::Connected {
                        link,
                        result: Err(e),
                    })
                    .await;
                continue;
            }
        };

        events
            .send(LinkEvent::Connected {
                link,
                result: Ok(()),
            })
            .await;
        let reason = serve(&conn, link, &commands, &events).await;
        events.send(LinkEvent::Disconnected { link, reason }).await;
    }
}
