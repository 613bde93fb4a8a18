use crate::{
    bus::{
        BusMessage, SignalStream, Value, ADAPTER_INTERFACE, CHARACTERISTIC_INTERFACE,
        DEVICE_INTERFACE,
    },
    device::Device,
    telemetry::AdapterEvent,
};

use futures::StreamExt;
use std::{collections::HashMap, sync::Arc};
use tokio::sync::mpsc::UnboundedSender;

/// Flattened property value as handed to a device.
#[derive(Clone, Debug, PartialEq)]
pub enum Property {
    Bool(bool),
    Int(i64),
    Text(String),
    Bytes(Vec<u8>),
    ServiceData { uuid: String, data: Vec<u8> },
    Raw(Value),
}

impl Property {
    pub fn as_int(&self) -> Option<i64> {
        match self {
            Property::Int(value) => Some(*value),
            _ => None,
        }
    }
}

pub type PropertyMap = HashMap<String, Property>;

#[derive(Debug, PartialEq, Eq)]
pub enum Route {
    Ignored,
    Delivered(String),
    UnknownDevice(String),
    AdapterDied,
    Dropped,
}

pub struct Router {
    adapter_path: String,
    devices: HashMap<String, Arc<Device>>,
    events: UnboundedSender<AdapterEvent>,
}

impl Router {
    pub fn new(
        adapter_path: &str,
        devices: &[Arc<Device>],
        events: UnboundedSender<AdapterEvent>,
    ) -> Self {
        Router {
            adapter_path: adapter_path.to_string(),
            devices: devices
                .iter()
                .map(|device| (device.path_key.clone(), Arc::clone(device)))
                .collect(),
            events,
        }
    }

    pub async fn run(self, mut signals: SignalStream) {
        log::debug!("Routing signals for {}", self.adapter_path);

        while let Some(message) = signals.next().await {
            self.route(&message).await;
        }

        log::warn!("Signal stream for {} closed", self.adapter_path);
    }

    pub async fn route(&self, message: &BusMessage) -> Route {
        let relative = match self.relative_path(&message.path) {
            Some(relative) => relative,
            None => return Route::Ignored,
        };

        match message.interface.as_str() {
            DEVICE_INTERFACE => {
                let key = match message.path.rsplit('/').next() {
                    Some(key) if !key.is_empty() => key,
                    _ => return Route::Dropped,
                };

                let properties = flatten_properties(&message.properties);
                self.deliver(key, DEVICE_INTERFACE, &properties).await
            }
            CHARACTERISTIC_INTERFACE => {
                let segments: Vec<&str> = relative.split('/').collect();
                let (key, service, characteristic) = match segments.as_slice() {
                    [key, service, characteristic] => (*key, *service, *characteristic),
                    _ => {
                        log::debug!("Unhandled characteristic path: {}", message.path);
                        return Route::Dropped;
                    }
                };

                let value = match message.properties.as_slice() {
                    [(name, value)] if name == "Value" => value,
                    _ => return Route::Dropped,
                };

                let data = match value.as_bytes() {
                    Some(data) => data,
                    None => {
                        log::debug!("Characteristic value on {} is not a byte array", message.path);
                        return Route::Dropped;
                    }
                };

                let mut properties = PropertyMap::new();
                properties.insert(format!("{service}/{characteristic}"), Property::Bytes(data));
                self.deliver(key, CHARACTERISTIC_INTERFACE, &properties).await
            }
            ADAPTER_INTERFACE if relative.is_empty() => {
                if powered_off(&message.properties) {
                    log::error!("Adapter {} was powered off", self.adapter_path);
                    let _ = self.events.send(AdapterEvent::AdapterDied);
                    return Route::AdapterDied;
                }

                log::debug!("Adapter message: {:?}", message.properties);
                Route::Dropped
            }
            _ => {
                log::debug!("Unhandled message: {} {}", message.interface, message.path);
                Route::Dropped
            }
        }
    }

    /// Path below the adapter, `Some("")` for the adapter itself.
    fn relative_path<'a>(&self, path: &'a str) -> Option<&'a str> {
        let rest = path.strip_prefix(self.adapter_path.as_str())?;

        match rest.strip_prefix('/') {
            Some(relative) => Some(relative),
            None if rest.is_empty() => Some(rest),
            None => None,
        }
    }

    async fn deliver(&self, key: &str, interface: &str, properties: &PropertyMap) -> Route {
        match self.devices.get(key) {
            Some(device) => {
                device.update(key, interface, properties).await;
                Route::Delivered(key.to_string())
            }
            None => {
                log::debug!("No device registered for {key}");
                Route::UnknownDevice(key.to_string())
            }
        }
    }
}

fn powered_off(properties: &[(String, Value)]) -> bool {
    properties
        .iter()
        .any(|(key, value)| key == "Powered" && *value.unwrap_variant() == Value::Bool(false))
}

pub fn flatten_properties(properties: &[(String, Value)]) -> PropertyMap {
    properties
        .iter()
        .map(|(key, value)| {
            let unpacked = match key.as_str() {
                "ManufacturerData" => unpack_manufacturer_data(value),
                "ServiceData" => unpack_service_data(value),
                _ => Ok(flatten(value)),
            };

            let property = unpacked.unwrap_or_else(|e| {
                log::error!("Could not unpack {key}: {e}");
                Property::Raw(value.clone())
            });

            (key.clone(), property)
        })
        .collect()
}

fn flatten(value: &Value) -> Property {
    match value.unwrap_variant() {
        Value::Bool(flag) => Property::Bool(*flag),
        Value::Str(text) => Property::Text(text.clone()),
        Value::Array(items) => match value.as_bytes() {
            Some(bytes) => Property::Bytes(bytes),
            None if items.len() == 1 => flatten(&items[0]),
            None => Property::Raw(value.clone()),
        },
        other => other
            .as_int()
            .map(Property::Int)
            .unwrap_or_else(|| Property::Raw(other.clone())),
    }
}

/// `a{qv}` keyed by company id; the first entry's payload is kept.
fn unpack_manufacturer_data(value: &Value) -> Result<Property, &'static str> {
    let (_, payload) = first_entry(value)?;

    payload
        .as_bytes()
        .map(Property::Bytes)
        .ok_or("manufacturer payload is not a byte array")
}

/// `a{sv}` keyed by service uuid; the first entry is kept.
fn unpack_service_data(value: &Value) -> Result<Property, &'static str> {
    let (uuid, payload) = first_entry(value)?;

    let uuid = match uuid.unwrap_variant() {
        Value::Str(uuid) => uuid.clone(),
        _ => return Err("service data key is not a uuid"),
    };

    let data = payload
        .as_bytes()
        .ok_or("service data payload is not a byte array")?;

    Ok(Property::ServiceData { uuid, data })
}

fn first_entry(value: &Value) -> Result<&(Value, Value), &'static str> {
    match value.unwrap_variant() {
        Value::Dict(entries) => entries.first().ok_or("empty dictionary"),
        _ => Err("expected a dictionary"),
    }
}
