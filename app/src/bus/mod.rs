pub mod introspect;
pub mod system;
pub mod types;

#[cfg(test)]
pub mod fake;

pub use system::SystemBus;
pub use types::{BusError, BusMessage, BusResult, Interface, Value};

use async_trait::async_trait;
use futures::stream::BoxStream;

pub const BLUEZ_SERVICE: &str = "org.bluez";
pub const BLUEZ_ROOT: &str = "/org/bluez";

pub const ADAPTER_INTERFACE: &str = "org.bluez.Adapter1";
pub const DEVICE_INTERFACE: &str = "org.bluez.Device1";
pub const CHARACTERISTIC_INTERFACE: &str = "org.bluez.GattCharacteristic1";
pub const INTROSPECTABLE_INTERFACE: &str = "org.freedesktop.DBus.Introspectable";

pub type SignalStream = BoxStream<'static, BusMessage>;

/// Method calls and signals the daemon needs from the platform Bluetooth stack.
///
/// Every call suspends the caller until the remote side answers. Property reads
/// (`ServicesResolved`, `UUID`, `Notifying`) go through here as well so the state
/// machine never talks to the transport directly.
#[async_trait]
pub trait Bus: Send + Sync {
    async fn interface(&self, path: &str, name: &'static str) -> BusResult<Interface>;

    async fn connect(&self, device: &Interface) -> BusResult<()>;
    async fn disconnect(&self, device: &Interface) -> BusResult<()>;
    async fn services_resolved(&self, device: &Interface) -> BusResult<bool>;

    async fn stop_discovery(&self, adapter: &Interface) -> BusResult<()>;
    async fn set_discovery_filter(&self, adapter: &Interface, transport: &str) -> BusResult<()>;
    async fn start_discovery(&self, adapter: &Interface) -> BusResult<()>;

    async fn introspect(&self, node: &Interface) -> BusResult<String>;

    async fn uuid(&self, characteristic: &Interface) -> BusResult<String>;
    async fn notifying(&self, characteristic: &Interface) -> BusResult<bool>;
    async fn start_notify(&self, characteristic: &Interface) -> BusResult<()>;
    async fn stop_notify(&self, characteristic: &Interface) -> BusResult<()>;
    async fn read_value(&self, characteristic: &Interface) -> BusResult<Vec<u8>>;

    /// Property change signals for everything below the BlueZ root, in arrival order.
    async fn signals(&self) -> BusResult<SignalStream>;
}
