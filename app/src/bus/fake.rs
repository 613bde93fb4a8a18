use super::{Bus, BusError, BusMessage, BusResult, Interface, SignalStream};

use async_trait::async_trait;
use futures::StreamExt;
use std::{
    collections::{HashMap, VecDeque},
    sync::{
        atomic::{AtomicBool, Ordering},
        Mutex,
    },
};
use tokio::sync::mpsc::{self, UnboundedReceiver, UnboundedSender};

pub const TEST_ERROR: &str = "Unexpected test error";

pub fn test_error() -> BusError {
    BusError::new("org.bluez.Error.Failed", TEST_ERROR)
}

pub fn connection_abort() -> BusError {
    BusError::new("org.bluez.Error.Failed", "Software caused connection abort")
}

/// Scripted in-memory bus. Unscripted calls succeed.
pub struct FakeBus {
    calls: Mutex<Vec<String>>,
    failing_interfaces: Mutex<Vec<(String, &'static str)>>,
    method_errors: Mutex<HashMap<&'static str, BusError>>,
    connect_results: Mutex<VecDeque<BusResult<()>>>,
    services_resolved: AtomicBool,
    introspections: Mutex<HashMap<String, BusResult<String>>>,
    uuids: Mutex<HashMap<String, BusResult<String>>>,
    notifying: AtomicBool,
    value: Mutex<Vec<u8>>,
    sender: UnboundedSender<BusMessage>,
    receiver: Mutex<Option<UnboundedReceiver<BusMessage>>>,
}

impl FakeBus {
    pub fn new() -> Self {
        let (sender, receiver) = mpsc::unbounded_channel();

        FakeBus {
            calls: Mutex::new(Vec::new()),
            failing_interfaces: Mutex::new(Vec::new()),
            method_errors: Mutex::new(HashMap::new()),
            connect_results: Mutex::new(VecDeque::new()),
            services_resolved: AtomicBool::new(true),
            introspections: Mutex::new(HashMap::new()),
            uuids: Mutex::new(HashMap::new()),
            notifying: AtomicBool::new(false),
            value: Mutex::new(Vec::new()),
            sender,
            receiver: Mutex::new(Some(receiver)),
        }
    }

    pub fn with_connect_results(self, results: Vec<BusResult<()>>) -> Self {
        self.connect_results.lock().unwrap().extend(results);
        self
    }

    pub fn with_services_resolved(self, resolved: bool) -> Self {
        self.services_resolved.store(resolved, Ordering::SeqCst);
        self
    }

    pub fn with_failing_interface(self, path: &str, name: &'static str) -> Self {
        self.failing_interfaces
            .lock()
            .unwrap()
            .push((path.to_string(), name));
        self
    }

    pub fn with_method_error(self, method: &'static str, error: BusError) -> Self {
        self.method_errors.lock().unwrap().insert(method, error);
        self
    }

    pub fn with_introspection(self, path: &str, reply: BusResult<&str>) -> Self {
        self.introspections
            .lock()
            .unwrap()
            .insert(path.to_string(), reply.map(str::to_string));
        self
    }

    pub fn with_uuid(self, path: &str, reply: BusResult<&str>) -> Self {
        self.uuids
            .lock()
            .unwrap()
            .insert(path.to_string(), reply.map(str::to_string));
        self
    }

    pub fn with_notifying(self, notifying: bool) -> Self {
        self.notifying.store(notifying, Ordering::SeqCst);
        self
    }

    pub fn with_value(self, value: &[u8]) -> Self {
        *self.value.lock().unwrap() = value.to_vec();
        self
    }

    pub fn emit(&self, message: BusMessage) {
        self.sender.send(message).unwrap();
    }

    pub fn calls(&self) -> Vec<String> {
        self.calls.lock().unwrap().clone()
    }

    pub fn count(&self, method: &str) -> usize {
        self.calls()
            .iter()
            .filter(|call| call.split(' ').next() == Some(method))
            .count()
    }

    fn record(&self, method: &'static str, target: &Interface) -> BusResult<()> {
        self.calls
            .lock()
            .unwrap()
            .push(format!("{} {}", method, target.path));

        match self.method_errors.lock().unwrap().get(method) {
            Some(err) => Err(err.clone()),
            None => Ok(()),
        }
    }
}

#[async_trait]
impl Bus for FakeBus {
    async fn interface(&self, path: &str, name: &'static str) -> BusResult<Interface> {
        if self
            .failing_interfaces
            .lock()
            .unwrap()
            .contains(&(path.to_string(), name))
        {
            return Err(test_error());
        }
        Ok(Interface::new(path, name))
    }

    async fn connect(&self, device: &Interface) -> BusResult<()> {
        self.record("Connect", device)?;
        self.connect_results
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or(Ok(()))
    }

    async fn disconnect(&self, device: &Interface) -> BusResult<()> {
        self.record("Disconnect", device)
    }

    async fn services_resolved(&self, device: &Interface) -> BusResult<bool> {
        self.record("ServicesResolved", device)?;
        Ok(self.services_resolved.load(Ordering::SeqCst))
    }

    async fn stop_discovery(&self, adapter: &Interface) -> BusResult<()> {
        self.record("StopDiscovery", adapter)
    }

    async fn set_discovery_filter(&self, adapter: &Interface, transport: &str) -> BusResult<()> {
        self.record("SetDiscoveryFilter", adapter)?;
        self.calls
            .lock()
            .unwrap()
            .push(format!("Transport {transport}"));
        Ok(())
    }

    async fn start_discovery(&self, adapter: &Interface) -> BusResult<()> {
        self.record("StartDiscovery", adapter)
    }

    async fn introspect(&self, node: &Interface) -> BusResult<String> {
        self.record("Introspect", node)?;
        self.introspections
            .lock()
            .unwrap()
            .get(&node.path)
            .cloned()
            .unwrap_or_else(|| Ok("<node></node>".to_string()))
    }

    async fn uuid(&self, characteristic: &Interface) -> BusResult<String> {
        self.record("UUID", characteristic)?;
        self.uuids
            .lock()
            .unwrap()
            .get(&characteristic.path)
            .cloned()
            .unwrap_or_else(|| Err(test_error()))
    }

    async fn notifying(&self, characteristic: &Interface) -> BusResult<bool> {
        self.record("Notifying", characteristic)?;
        Ok(self.notifying.load(Ordering::SeqCst))
    }

    async fn start_notify(&self, characteristic: &Interface) -> BusResult<()> {
        self.record("StartNotify", characteristic)?;
        self.notifying.store(true, Ordering::SeqCst);
        Ok(())
    }

    async fn stop_notify(&self, characteristic: &Interface) -> BusResult<()> {
        self.record("StopNotify", characteristic)?;
        self.notifying.store(false, Ordering::SeqCst);
        Ok(())
    }

    async fn read_value(&self, characteristic: &Interface) -> BusResult<Vec<u8>> {
        self.record("ReadValue", characteristic)?;
        Ok(self.value.lock().unwrap().clone())
    }

    async fn signals(&self) -> BusResult<SignalStream> {
        let receiver = self.receiver.lock().unwrap().take().ok_or_else(test_error)?;

        Ok(futures::stream::unfold(receiver, |mut receiver| async move {
            receiver.recv().await.map(|message| (message, receiver))
        })
        .boxed())
    }
}
