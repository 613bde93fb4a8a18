use super::{ConnectionState, Device, Link};
use crate::{
    bus::{
        introspect, Bus, Interface, CHARACTERISTIC_INTERFACE, DEVICE_INTERFACE,
        INTROSPECTABLE_INTERFACE,
    },
    config::Track,
    error::{DevicesResult, Stage},
    telemetry::{tries_word, AdapterEvent, Lifecycle},
};

use std::{
    collections::HashMap,
    sync::{atomic::Ordering, Arc},
    time::Duration,
};
use tokio::time::{sleep, timeout};

const POLLING_INTERVAL: u64 = 100;

impl Device {
    /// One-shot setup: connect, wait for services, walk the GATT tree and subscribe.
    pub async fn initialize(
        &self,
        bus: Arc<dyn Bus>,
        adapter_path: &str,
        max_tries: usize,
    ) -> DevicesResult<()> {
        let result = self.setup(bus, adapter_path, max_tries).await;

        if let Err(err) = &result {
            log::error!("{}", err);
            self.set_state(ConnectionState::Failed).await;
            self.notice(Lifecycle::SetupFailed);
        }

        self.initialized.store(true, Ordering::SeqCst);
        result
    }

    async fn setup(
        &self,
        bus: Arc<dyn Bus>,
        adapter_path: &str,
        max_tries: usize,
    ) -> DevicesResult<()> {
        let path = format!("{}/{}", adapter_path, self.path_key);

        let device = match bus.interface(&path, DEVICE_INTERFACE).await {
            Ok(device) => device,
            Err(err) => return Err(self.failure(Stage::DeviceInterface, err)),
        };

        *self.link.lock().await = Some(Link {
            bus: Arc::clone(&bus),
            device: device.clone(),
        });

        self.connect(bus.as_ref(), &device, max_tries).await?;
        self.await_service_resolution(bus.as_ref(), &device).await?;
        self.discover_topology(bus.as_ref(), &device).await?;
        self.subscribe_characteristics(bus.as_ref()).await?;

        self.set_state(ConnectionState::Ready).await;
        self.notice(Lifecycle::FullySetup);
        Ok(())
    }

    /// Returns the 1-based attempt that succeeded.
    pub async fn connect(
        &self,
        bus: &dyn Bus,
        device: &Interface,
        max_tries: usize,
    ) -> DevicesResult<usize> {
        self.set_state(ConnectionState::Connecting).await;

        for attempt in 1..=max_tries {
            self.notice(Lifecycle::Trying { attempt, max_tries });

            match bus.connect(device).await {
                Ok(()) => {
                    self.connected.store(true, Ordering::SeqCst);
                    self.notice(Lifecycle::Connected { tries: attempt });
                    return Ok(attempt);
                }
                Err(err) if err.is_connection_abort() => {
                    log::debug!("Attempt {}/{} on {}: {}", attempt, max_tries, self.name, err);
                }
                Err(err) => return Err(self.failure(Stage::ConnectError, err)),
            }
        }

        Err(self.failure(
            Stage::CouldNotConnect,
            format!(
                "Couldn't connect to {} after {} {}.",
                self.name,
                max_tries,
                tries_word(max_tries)
            ),
        ))
    }

    /// The poll only observes the local flag, which the router keeps current.
    pub async fn await_service_resolution(
        &self,
        bus: &dyn Bus,
        device: &Interface,
    ) -> DevicesResult<()> {
        self.set_state(ConnectionState::AwaitingServiceResolution).await;

        let resolved = match bus.services_resolved(device).await {
            Ok(resolved) => resolved,
            Err(err) => return Err(self.failure(Stage::ResolveServices, err)),
        };

        if resolved {
            self.services_resolved.store(true, Ordering::SeqCst);
            return Ok(());
        }

        let poll = async {
            while !self.is_services_resolved() {
                sleep(Duration::from_millis(POLLING_INTERVAL)).await;
            }
        };

        match timeout(self.services_resolved_timeout, poll).await {
            Ok(()) => Ok(()),
            Err(_) => Err(self.failure(
                Stage::ResolveServices,
                format!(
                    "services not resolved within {} ms",
                    self.services_resolved_timeout.as_millis()
                ),
            )),
        }
    }

    pub async fn discover_topology(&self, bus: &dyn Bus, device: &Interface) -> DevicesResult<()> {
        self.set_state(ConnectionState::DiscoveringTopology).await;

        if self.services.is_empty() {
            return Ok(());
        }

        let mut by_uuid = HashMap::new();
        let mut by_key = HashMap::new();

        for service in self.child_nodes(bus, &device.path).await? {
            if !self.services.contains(&service) {
                continue;
            }

            let service_path = format!("{}/{}", device.path, service);

            for characteristic in self.child_nodes(bus, &service_path).await? {
                if !self.characteristics.contains(&characteristic) {
                    continue;
                }

                let path = format!("{}/{}", service_path, characteristic);

                let handle = bus
                    .interface(&path, CHARACTERISTIC_INTERFACE)
                    .await
                    .map_err(|err| self.failure(Stage::ServiceCharacteristicInterface, err))?;

                let uuid = bus
                    .uuid(&handle)
                    .await
                    .map_err(|err| self.failure(Stage::ServiceCharacteristicInterface, err))?;

                log::debug!("{}: {} is {}", self.name, path, uuid);
                by_key.insert(format!("{}/{}", service, characteristic), uuid.clone());
                by_uuid.insert(uuid, handle);
            }
        }

        *self.characteristics_by_uuid.lock().await = by_uuid;
        *self.uuids_by_key.lock().await = by_key;
        Ok(())
    }

    async fn child_nodes(&self, bus: &dyn Bus, path: &str) -> DevicesResult<Vec<String>> {
        let node = match bus.interface(path, INTROSPECTABLE_INTERFACE).await {
            Ok(node) => node,
            Err(err) => return Err(self.failure(Stage::ServiceInterface, err)),
        };

        match bus.introspect(&node).await {
            Ok(xml) => Ok(introspect::child_nodes(&xml)),
            Err(err) => Err(self.failure(Stage::ServiceInterface, err)),
        }
    }

    pub async fn subscribe_characteristics(&self, bus: &dyn Bus) -> DevicesResult<()> {
        self.set_state(ConnectionState::Subscribing).await;

        if !self.tracks.contains(&Track::Battery) {
            return Ok(());
        }

        let uuid = self.kind.battery_characteristic();
        let characteristic = match self.characteristic(uuid).await {
            Some(characteristic) => characteristic,
            None => {
                return Err(self.failure(
                    Stage::Subscribe,
                    format!("battery characteristic {} not found", uuid),
                ))
            }
        };

        let notifying = bus
            .notifying(&characteristic)
            .await
            .map_err(|err| self.failure(Stage::Subscribe, err))?;

        if !notifying {
            bus.start_notify(&characteristic)
                .await
                .map_err(|err| self.failure(Stage::Subscribe, err))?;
        }

        let value = bus
            .read_value(&characteristic)
            .await
            .map_err(|err| self.failure(Stage::Subscribe, err))?;

        self.apply_notification(uuid, &value).await;
        Ok(())
    }

    /// Single attempt over the link kept from `initialize`.
    pub async fn reconnect(&self) -> DevicesResult<()> {
        let link = self.link.lock().await.clone();
        let link = match link {
            Some(link) => link,
            None => return Ok(()),
        };

        self.set_state(ConnectionState::Reconnecting).await;
        let result = self.restore(&link).await;

        // A failed attempt leaves the device ready for the next session.
        self.set_state(ConnectionState::Ready).await;
        result
    }

    async fn restore(&self, link: &Link) -> DevicesResult<()> {
        let bus = link.bus.as_ref();

        self.connect(bus, &link.device, 1).await?;
        self.await_service_resolution(bus, &link.device).await?;

        let discovered = !self.characteristics_by_uuid.lock().await.is_empty();
        if !discovered {
            self.discover_topology(bus, &link.device).await?;
        }

        self.subscribe_characteristics(bus).await
    }

    /// Emits `DeviceDestroyed` whatever the outcome.
    pub async fn destroy(&self) -> DevicesResult<()> {
        let result = self.teardown().await;

        if let Err(err) = &result {
            log::error!("{}", err);
        }

        log::info!("device: {} destroyed", self.name);
        let _ = self.events.send(AdapterEvent::DeviceDestroyed {
            device: self.name.clone(),
        });

        result
    }

    async fn teardown(&self) -> DevicesResult<()> {
        let link = self.link.lock().await.clone();
        let link = match link {
            Some(link) => link,
            None => return Ok(()),
        };

        let subscribed: Vec<Interface> = self
            .characteristics_by_uuid
            .lock()
            .await
            .values()
            .cloned()
            .collect();

        let mut first_error = None;

        for characteristic in subscribed.iter() {
            if let Err(err) = self.stop_notifications(link.bus.as_ref(), characteristic).await {
                log::warn!("{}: {}", self.name, err);
                first_error.get_or_insert(err);
            }
        }

        if let Err(err) = link.bus.disconnect(&link.device).await {
            return Err(first_error.unwrap_or_else(|| self.failure(Stage::Destroy, err)));
        }

        self.connected.store(false, Ordering::SeqCst);
        self.set_state(ConnectionState::Disconnected).await;

        match first_error {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }

    async fn stop_notifications(
        &self,
        bus: &dyn Bus,
        characteristic: &Interface,
    ) -> DevicesResult<()> {
        let notifying = bus
            .notifying(characteristic)
            .await
            .map_err(|err| self.failure(Stage::Destroy, err))?;

        if notifying {
            bus.stop_notify(characteristic)
                .await
                .map_err(|err| self.failure(Stage::Destroy, err))?;
        }

        Ok(())
    }
}
