mod lifecycle;

use crate::{
    bus::{Bus, Interface, CHARACTERISTIC_INTERFACE, DEVICE_INTERFACE},
    config::{DeviceConfig, Track},
    devices::{
        toothbrush::{self, DecodeError, ToothbrushData},
        DeviceType,
    },
    error::{BluetoothDevicesError, DevicesResult, Stage},
    router::{Property, PropertyMap},
    telemetry::{AdapterEvent, Lifecycle, Telemetry},
};

use std::{
    collections::HashMap,
    fmt::Display,
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc,
    },
    time::Duration,
};
use tokio::sync::{mpsc::UnboundedSender, Mutex};

/// Sessions younger than this (in seconds) count as freshly started.
const RECONNECT_TIME_THRESHOLD: u16 = 5;

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum ConnectionState {
    #[default]
    Disconnected,
    Connecting,
    AwaitingServiceResolution,
    DiscoveringTopology,
    Subscribing,
    Ready,
    Failed,
    Reconnecting,
}

#[derive(Clone)]
struct Link {
    bus: Arc<dyn Bus>,
    device: Interface,
}

pub struct Device {
    pub name: String,
    pub address: String,
    pub path_key: String,
    pub kind: DeviceType,
    tracks: Vec<Track>,
    services: Vec<String>,
    characteristics: Vec<String>,
    services_resolved_timeout: Duration,

    connected: AtomicBool,
    services_resolved: AtomicBool,
    initialized: AtomicBool,
    reconnecting: AtomicBool,

    state: Mutex<ConnectionState>,
    link: Mutex<Option<Link>>,
    characteristics_by_uuid: Mutex<HashMap<String, Interface>>,
    uuids_by_key: Mutex<HashMap<String, String>>,
    telemetry: Mutex<Option<Telemetry>>,

    events: UnboundedSender<AdapterEvent>,
}

impl Device {
    pub fn from_config(
        config: &DeviceConfig,
        events: UnboundedSender<AdapterEvent>,
    ) -> DevicesResult<Self> {
        let kind: DeviceType = config.kind.parse()?;
        let address = parse_address(&config.mac)?;

        Ok(Device {
            name: config.name.clone(),
            path_key: path_key(&address),
            address,
            kind,
            tracks: config.tracks.clone(),
            services: config.services.clone(),
            characteristics: config.characteristics.clone(),
            services_resolved_timeout: Duration::from_millis(config.services_resolved_timeout),
            connected: AtomicBool::new(false),
            services_resolved: AtomicBool::new(false),
            initialized: AtomicBool::new(false),
            reconnecting: AtomicBool::new(false),
            state: Mutex::new(ConnectionState::default()),
            link: Mutex::new(None),
            characteristics_by_uuid: Mutex::new(HashMap::new()),
            uuids_by_key: Mutex::new(HashMap::new()),
            telemetry: Mutex::new(None),
            events,
        })
    }

    pub fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }

    pub fn is_services_resolved(&self) -> bool {
        self.services_resolved.load(Ordering::SeqCst)
    }

    pub fn is_initialized(&self) -> bool {
        self.initialized.load(Ordering::SeqCst)
    }

    pub fn is_reconnecting(&self) -> bool {
        self.reconnecting.load(Ordering::SeqCst)
    }

    pub async fn state(&self) -> ConnectionState {
        *self.state.lock().await
    }

    #[cfg(test)]
    pub async fn telemetry(&self) -> Option<Telemetry> {
        self.telemetry.lock().await.clone()
    }

    pub async fn characteristic(&self, uuid: &str) -> Option<Interface> {
        self.characteristics_by_uuid.lock().await.get(uuid).cloned()
    }

    /// Applies a routed property change. Messages for other devices are ignored.
    pub async fn update(
        self: &Arc<Self>,
        path_key: &str,
        interface: &str,
        properties: &PropertyMap,
    ) {
        if path_key != self.path_key {
            return;
        }

        for (key, value) in properties {
            match (key.as_str(), value) {
                ("Connected", Property::Bool(connected)) => {
                    self.connected.store(*connected, Ordering::SeqCst)
                }
                ("ServicesResolved", Property::Bool(resolved)) => {
                    self.services_resolved.store(*resolved, Ordering::SeqCst)
                }
                _ => {}
            }
        }

        match interface {
            DEVICE_INTERFACE => self.handle_advertising(properties).await,
            CHARACTERISTIC_INTERFACE => self.handle_notification(properties).await,
            _ => {}
        }
    }

    async fn handle_advertising(self: &Arc<Self>, properties: &PropertyMap) {
        let data = match properties.get("ManufacturerData") {
            Some(Property::Bytes(data)) => data,
            _ => return,
        };

        let mut snapshot = match self.decode_advertisement(data) {
            Ok(snapshot) => snapshot,
            Err(err) => {
                log::debug!("Ignoring advertisement from {}: {}", self.name, err);
                return;
            }
        };

        snapshot.rssi = properties
            .get("RSSI")
            .and_then(Property::as_int)
            .and_then(|rssi| i16::try_from(rssi).ok());
        let time = snapshot.time;

        let telemetry = {
            let mut current = self.telemetry.lock().await;
            let battery = current.as_ref().and_then(Telemetry::battery);
            let telemetry = Telemetry::Toothbrush(snapshot).with_battery(battery);
            *current = Some(telemetry.clone());
            telemetry
        };
        self.publish(telemetry);

        if self.should_reconnect(time).await {
            self.spawn_reconnect();
        }
    }

    async fn handle_notification(&self, properties: &PropertyMap) {
        for (key, value) in properties {
            let data = match value {
                Property::Bytes(data) => data,
                _ => continue,
            };

            let uuid = self.uuids_by_key.lock().await.get(key).cloned();
            let uuid = match uuid {
                Some(uuid) => uuid,
                None => {
                    log::debug!("{}: notification from unmapped {}", self.name, key);
                    continue;
                }
            };

            self.apply_notification(&uuid, data).await;
        }
    }

    async fn apply_notification(&self, uuid: &str, data: &[u8]) {
        let update = match self.kind {
            DeviceType::OralBToothbrush => toothbrush::decode_notification(uuid, data),
        };

        let update = match update {
            Some(update) => update,
            None => return,
        };

        let telemetry = {
            let mut current = self.telemetry.lock().await;
            let telemetry = match current.take() {
                Some(mut telemetry) => {
                    telemetry.apply(update);
                    telemetry
                }
                None => Telemetry::from(update),
            };
            *current = Some(telemetry.clone());
            telemetry
        };
        self.publish(telemetry);
    }

    fn decode_advertisement(&self, data: &[u8]) -> Result<ToothbrushData, DecodeError> {
        match self.kind {
            DeviceType::OralBToothbrush => toothbrush::decode_advertisement(data),
        }
    }

    async fn should_reconnect(&self, time: u16) -> bool {
        if !self.tracks.contains(&Track::Battery)
            || self.is_connected()
            || time >= RECONNECT_TIME_THRESHOLD
            || !self.is_initialized()
            || self.is_reconnecting()
        {
            return false;
        }

        if self.state().await != ConnectionState::Ready {
            return false;
        }

        self.link.lock().await.is_some()
    }

    fn spawn_reconnect(self: &Arc<Self>) {
        if self
            .reconnecting
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            return;
        }

        let device = Arc::clone(self);
        tokio::spawn(async move {
            log::info!("{} started a new session, reconnecting", device.name);

            match device.reconnect().await {
                Ok(()) => log::info!("reconnected to: {}", device.name),
                Err(err) => log::warn!("Reconnect failed: {}", err),
            }

            device.reconnecting.store(false, Ordering::SeqCst);
        });
    }

    fn publish(&self, telemetry: Telemetry) {
        log::debug!("{}: {:?}", self.name, telemetry);

        let _ = self.events.send(AdapterEvent::DeviceUpdate {
            device: self.name.clone(),
            address: self.address.clone(),
            telemetry,
        });
    }

    fn notice(&self, notice: Lifecycle) {
        let message = notice.message(&self.name);
        match notice {
            Lifecycle::SetupFailed => log::warn!("{}", message),
            _ => log::info!("{}", message),
        }

        let _ = self.events.send(AdapterEvent::Lifecycle {
            device: self.name.clone(),
            notice,
        });
    }

    async fn set_state(&self, state: ConnectionState) {
        log::debug!("{}: {:?}", self.name, state);
        *self.state.lock().await = state;
    }

    fn failure(&self, stage: Stage, message: impl Display) -> BluetoothDevicesError {
        BluetoothDevicesError::stage(stage, Some(&self.name), message.to_string())
    }
}

/// `AA:BB:CC:DD:EE:FF` becomes `dev_AA_BB_CC_DD_EE_FF`.
pub fn path_key(address: &str) -> String {
    let segment: String = address
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() { c } else { '_' })
        .collect();

    format!("dev_{}", segment)
}

fn parse_address(mac: &str) -> DevicesResult<String> {
    let octets: Vec<&str> = mac.split(':').collect();
    let valid = octets.len() == 6
        && octets
            .iter()
            .all(|octet| octet.len() == 2 && octet.chars().all(|c| c.is_ascii_hexdigit()));

    if !valid {
        return Err(BluetoothDevicesError::InvalidAddress(mac.to_string()));
    }

    Ok(mac.to_ascii_uppercase())
}
