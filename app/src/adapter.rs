use crate::{
    bus::{Bus, BusError, ADAPTER_INTERFACE},
    config::Config,
    device::Device,
    error::{BluetoothDevicesError, DevicesResult, Stage},
    router::Router,
    telemetry::AdapterEvent,
};

use futures::future::join_all;
use std::sync::Arc;
use tokio::{sync::mpsc::UnboundedSender, task::JoinHandle};

pub struct Adapter {
    name: String,
    path: String,
    mode: String,
    max_tries: usize,
    bus: Arc<dyn Bus>,
    devices: Vec<Arc<Device>>,
    router: Option<JoinHandle<()>>,
    events: UnboundedSender<AdapterEvent>,
}

impl Adapter {
    pub fn from_config(
        config: &Config,
        bus: Arc<dyn Bus>,
        events: UnboundedSender<AdapterEvent>,
    ) -> DevicesResult<Self> {
        let devices = config
            .devices
            .iter()
            .map(|device| Device::from_config(device, events.clone()).map(Arc::new))
            .collect::<DevicesResult<Vec<_>>>()?;

        Ok(Adapter {
            name: config.name.clone(),
            path: config.adapter_path(),
            mode: config.mode.clone(),
            max_tries: config.max_tries.max(1),
            bus,
            devices,
            router: None,
            events,
        })
    }

    pub fn devices(&self) -> &[Arc<Device>] {
        &self.devices
    }

    /// Starts routing, restarts discovery and initializes every device.
    /// Device failures are reported through events and never fail the setup.
    pub async fn setup(&mut self) -> DevicesResult<()> {
        log::info!("Setting up {} on {}", self.name, self.path);

        let signals = self.bus.signals().await?;
        let router = Router::new(&self.path, &self.devices, self.events.clone());
        self.router = Some(tokio::spawn(router.run(signals)));

        let adapter = match self.bus.interface(&self.path, ADAPTER_INTERFACE).await {
            Ok(adapter) => adapter,
            Err(err) => return Err(discovery_failure(Stage::AdapterInterface, err)),
        };

        match self.bus.stop_discovery(&adapter).await {
            Ok(()) => {}
            Err(err) if err.is_no_discovery_started() => {
                log::debug!("No discovery running on {}", self.path);
            }
            Err(err) => {
                return Err(discovery_failure(Stage::StopDiscovery, err))
            }
        }

        if let Err(err) = self.bus.set_discovery_filter(&adapter, &self.mode).await {
            return Err(discovery_failure(Stage::StartDiscoveryFilter, err));
        }

        if let Err(err) = self.bus.start_discovery(&adapter).await {
            return Err(discovery_failure(Stage::StartDiscovery, err));
        }

        log::info!("Discovery started on {} ({})", self.path, self.mode);

        let results = join_all(self.devices.iter().map(|device| {
            device.initialize(Arc::clone(&self.bus), &self.path, self.max_tries)
        }))
        .await;

        let ready = results.iter().filter(|result| result.is_ok()).count();
        log::info!("Setup completed: {}/{} devices ready", ready, self.devices.len());

        let _ = self.events.send(AdapterEvent::SetupCompleted);
        Ok(())
    }

    /// Disconnects every device, then stops routing.
    pub async fn destroy(&mut self) {
        log::info!("Shutting down {}", self.name);

        let results = join_all(self.devices.iter().map(|device| device.destroy())).await;
        for (device, result) in self.devices.iter().zip(results) {
            if let Err(err) = result {
                log::warn!("Teardown of {} failed: {}", device.name, err);
            }
        }

        if let Some(router) = self.router.take() {
            router.abort();
        }
    }
}

fn discovery_failure(stage: Stage, err: BusError) -> BluetoothDevicesError {
    BluetoothDevicesError::stage(stage, None, err.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        bus::{
            fake::{connection_abort, test_error, FakeBus},
            BusError, BusMessage, Value, DEVICE_INTERFACE,
        },
        config::DeviceConfig,
        device::ConnectionState,
    };
    use std::time::Duration;
    use tokio::{
        sync::mpsc::{self, UnboundedReceiver},
        time::timeout,
    };

    const ADAPTER: &str = "/org/bluez/hci0";

    fn device_config(name: &str, mac: &str) -> DeviceConfig {
        DeviceConfig {
            kind: "OralBToothbrush".to_string(),
            name: name.to_string(),
            mac: mac.to_string(),
            tracks: Vec::new(),
            services: Vec::new(),
            characteristics: Vec::new(),
            services_resolved_timeout: 1000,
        }
    }

    fn config(max_tries: usize, devices: Vec<DeviceConfig>) -> Config {
        Config {
            name: "raspberrypi".to_string(),
            mode: "le".to_string(),
            hci: "hci0".to_string(),
            max_tries,
            debug_logs: false,
            devices,
        }
    }

    fn adapter(
        config: &Config,
        bus: Arc<FakeBus>,
    ) -> (Adapter, UnboundedReceiver<AdapterEvent>) {
        let (sender, receiver) = mpsc::unbounded_channel();
        (Adapter::from_config(config, bus, sender).unwrap(), receiver)
    }

    fn drain(events: &mut UnboundedReceiver<AdapterEvent>) -> Vec<AdapterEvent> {
        let mut drained = Vec::new();
        while let Ok(event) = events.try_recv() {
            drained.push(event);
        }
        drained
    }

    fn stage(result: DevicesResult<()>) -> Option<Stage> {
        result.unwrap_err().troubleshooting()
    }

    #[tokio::test]
    async fn retried_connect_sets_up_device() {
        let bus = Arc::new(
            FakeBus::new().with_connect_results(vec![Err(connection_abort()), Ok(())]),
        );
        let config = config(2, vec![device_config("Toothbrush", "AA:BB:CC:DD:EE:FF")]);
        let (mut adapter, mut events) = adapter(&config, bus.clone());

        adapter.setup().await.unwrap();

        let events = drain(&mut events);
        let notices: Vec<String> = events
            .iter()
            .filter_map(|event| match event {
                AdapterEvent::Lifecycle { device, notice } => Some(notice.message(device)),
                _ => None,
            })
            .collect();
        assert_eq!(
            notices,
            vec![
                "trying to connect to: Toothbrush 1/2",
                "trying to connect to: Toothbrush 2/2",
                "connected to: Toothbrush after 2 tries",
                "device: Toothbrush fully setup",
            ]
        );
        assert_eq!(events.last(), Some(&AdapterEvent::SetupCompleted));

        let device = &adapter.devices()[0];
        assert!(device.is_initialized());
        assert!(device.is_connected());
        assert_eq!(device.state().await, ConnectionState::Ready);

        assert_eq!(
            &bus.calls()[..4],
            &[
                format!("StopDiscovery {ADAPTER}"),
                format!("SetDiscoveryFilter {ADAPTER}"),
                "Transport le".to_string(),
                format!("StartDiscovery {ADAPTER}"),
            ]
        );
    }

    #[tokio::test]
    async fn idle_adapter_stop_discovery_is_tolerated() {
        let bus = Arc::new(FakeBus::new().with_method_error(
            "StopDiscovery",
            BusError::new("org.bluez.Error.Failed", "No discovery started"),
        ));
        let config = config(1, Vec::new());
        let (mut adapter, mut events) = adapter(&config, bus.clone());

        adapter.setup().await.unwrap();

        assert_eq!(bus.count("StartDiscovery"), 1);
        assert_eq!(drain(&mut events), vec![AdapterEvent::SetupCompleted]);
    }

    #[tokio::test]
    async fn discovery_failures_are_tagged() {
        let config = config(1, Vec::new());

        let bus = Arc::new(FakeBus::new().with_method_error("StopDiscovery", test_error()));
        let (mut failing, _events) = adapter(&config, bus);
        assert_eq!(stage(failing.setup().await), Some(Stage::StopDiscovery));

        let bus = Arc::new(FakeBus::new().with_method_error("SetDiscoveryFilter", test_error()));
        let (mut failing, _events) = adapter(&config, bus);
        assert_eq!(stage(failing.setup().await), Some(Stage::StartDiscoveryFilter));

        let bus = Arc::new(FakeBus::new().with_method_error("StartDiscovery", test_error()));
        let (mut failing, _events) = adapter(&config, bus);
        assert_eq!(stage(failing.setup().await), Some(Stage::StartDiscovery));

        let bus = Arc::new(FakeBus::new().with_failing_interface(ADAPTER, ADAPTER_INTERFACE));
        let (mut failing, _events) = adapter(&config, bus.clone());
        assert_eq!(stage(failing.setup().await), Some(Stage::AdapterInterface));
        assert_eq!(bus.count("StopDiscovery"), 0);
    }

    #[tokio::test]
    async fn one_failing_device_does_not_block_others() {
        let bus = Arc::new(FakeBus::new().with_failing_interface(
            "/org/bluez/hci0/dev_AA_BB_CC_DD_EE_01",
            DEVICE_INTERFACE,
        ));
        let config = config(
            1,
            vec![
                device_config("broken", "AA:BB:CC:DD:EE:01"),
                device_config("working", "AA:BB:CC:DD:EE:02"),
            ],
        );
        let (mut adapter, mut events) = adapter(&config, bus);

        adapter.setup().await.unwrap();

        let devices = adapter.devices();
        assert_eq!(devices[0].state().await, ConnectionState::Failed);
        assert_eq!(devices[1].state().await, ConnectionState::Ready);
        assert!(devices.iter().all(|device| device.is_initialized()));
        assert_eq!(drain(&mut events).last(), Some(&AdapterEvent::SetupCompleted));
    }

    #[tokio::test]
    async fn unknown_device_type_fails_construction() {
        let mut device = device_config("kettle", "AA:BB:CC:DD:EE:01");
        device.kind = "Kettle".to_string();
        let (sender, _receiver) = mpsc::unbounded_channel();

        let bus = Arc::new(FakeBus::new());
        let result = Adapter::from_config(&config(1, vec![device]), bus, sender);

        assert!(matches!(result, Err(BluetoothDevicesError::UnknownDeviceType(_))));
    }

    #[tokio::test]
    async fn routed_signals_reach_devices() {
        let bus = Arc::new(FakeBus::new());
        let config = config(1, vec![device_config("Toothbrush", "AA:BB:CC:DD:EE:FF")]);
        let (mut adapter, mut events) = adapter(&config, bus.clone());
        adapter.setup().await.unwrap();
        drain(&mut events);

        bus.emit(BusMessage::new(
            "/org/bluez/hci0/dev_AA_BB_CC_DD_EE_FF",
            DEVICE_INTERFACE,
            vec![(
                "ManufacturerData",
                Value::Dict(vec![(
                    Value::UInt16(0x00dc),
                    Value::Variant(Box::new(Value::Array(
                        [0u8, 0, 0, 3, 20, 1, 10, 1, 8].into_iter().map(Value::Byte).collect(),
                    ))),
                )]),
            )],
        ));

        let event = timeout(Duration::from_secs(1), events.recv()).await.unwrap();
        match event {
            Some(AdapterEvent::DeviceUpdate { device, address, .. }) => {
                assert_eq!(device, "Toothbrush");
                assert_eq!(address, "AA:BB:CC:DD:EE:FF");
            }
            other => panic!("unexpected event {other:?}"),
        }
    }

    #[tokio::test]
    async fn powered_off_adapter_is_reported() {
        let bus = Arc::new(FakeBus::new());
        let config = config(1, Vec::new());
        let (mut adapter, mut events) = adapter(&config, bus.clone());
        adapter.setup().await.unwrap();
        drain(&mut events);

        bus.emit(BusMessage::new(
            ADAPTER,
            ADAPTER_INTERFACE,
            vec![("Powered", Value::Variant(Box::new(Value::Bool(false))))],
        ));

        let event = timeout(Duration::from_secs(1), events.recv()).await.unwrap();
        assert_eq!(event, Some(AdapterEvent::AdapterDied));
    }

    #[tokio::test]
    async fn teardown_disconnects_devices_and_stops_routing() {
        let bus = Arc::new(FakeBus::new());
        let config = config(
            1,
            vec![
                device_config("first", "AA:BB:CC:DD:EE:01"),
                device_config("second", "AA:BB:CC:DD:EE:02"),
            ],
        );
        let (mut adapter, mut events) = adapter(&config, bus.clone());
        adapter.setup().await.unwrap();
        drain(&mut events);

        adapter.destroy().await;

        assert_eq!(bus.count("Disconnect"), 2);
        assert!(adapter.router.is_none());

        let mut destroyed: Vec<String> = drain(&mut events)
            .into_iter()
            .filter_map(|event| match event {
                AdapterEvent::DeviceDestroyed { device } => Some(device),
                _ => None,
            })
            .collect();
        destroyed.sort();
        assert_eq!(destroyed, vec!["first", "second"]);
    }
}
