use crate::bus::BusError;

use std::{fmt::Display, io, result::Result};

pub type DevicesResult<T> = Result<T, BluetoothDevicesError>;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Stage {
    AdapterInterface,
    StopDiscovery,
    StartDiscoveryFilter,
    StartDiscovery,
    DeviceInterface,
    ConnectError,
    CouldNotConnect,
    ResolveServices,
    ServiceInterface,
    ServiceCharacteristicInterface,
    Subscribe,
    Destroy,
}

impl Stage {
    pub fn troubleshooting(&self) -> &'static str {
        match self {
            Stage::AdapterInterface => "dongle#interface",
            Stage::StopDiscovery => "dongle#stop-discovery",
            Stage::StartDiscoveryFilter => "dongle#start-discovery-filter",
            Stage::StartDiscovery => "dongle#start-discovery",
            Stage::DeviceInterface => "dongle#device-interface",
            Stage::ConnectError => "devices#connect-error",
            Stage::CouldNotConnect => "devices#could-not-connect",
            Stage::ResolveServices => "devices#resolve-services",
            Stage::ServiceInterface => "devices#service-interface",
            Stage::ServiceCharacteristicInterface => "devices#service-characteristic-interface",
            Stage::Subscribe => "devices#subscribe",
            Stage::Destroy => "devices#destroy",
        }
    }
}

impl Display for Stage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.troubleshooting())
    }
}

#[derive(Debug)]
pub enum BluetoothDevicesError {
    IoError(io::Error),
    JsonError(serde_json::Error),
    LoggerError,
    Bus(BusError),
    UnknownDeviceType(String),
    InvalidAddress(String),
    AdapterDied,
    Stage {
        stage: Stage,
        device: Option<String>,
        message: String,
    },
}

impl BluetoothDevicesError {
    pub fn stage(stage: Stage, device: Option<&str>, message: impl Into<String>) -> Self {
        BluetoothDevicesError::Stage {
            stage,
            device: device.map(str::to_string),
            message: message.into(),
        }
    }

    #[cfg(test)]
    pub fn troubleshooting(&self) -> Option<Stage> {
        match self {
            BluetoothDevicesError::Stage { stage, .. } => Some(*stage),
            _ => None,
        }
    }
}

impl From<io::Error> for BluetoothDevicesError {
    fn from(value: io::Error) -> Self {
        BluetoothDevicesError::IoError(value)
    }
}

impl From<serde_json::Error> for BluetoothDevicesError {
    fn from(value: serde_json::Error) -> Self {
        BluetoothDevicesError::JsonError(value)
    }
}

impl From<fern::InitError> for BluetoothDevicesError {
    fn from(_: fern::InitError) -> Self {
        BluetoothDevicesError::LoggerError
    }
}

impl From<BusError> for BluetoothDevicesError {
    fn from(value: BusError) -> Self {
        BluetoothDevicesError::Bus(value)
    }
}

impl Display for BluetoothDevicesError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            BluetoothDevicesError::IoError(err) => write!(f, "IO error: {}", err),
            BluetoothDevicesError::JsonError(err) => write!(f, "Serde json error: {}", err),
            BluetoothDevicesError::LoggerError => write!(f, "Cannot init logger"),
            BluetoothDevicesError::Bus(err) => write!(f, "Bus error: {}", err),
            BluetoothDevicesError::UnknownDeviceType(kind) => write!(f, "unknown device: {}", kind),
            BluetoothDevicesError::InvalidAddress(mac) => write!(f, "Invalid address: {}", mac),
            BluetoothDevicesError::AdapterDied => write!(f, "Bluetooth adapter is gone"),
            BluetoothDevicesError::Stage {
                stage,
                device: Some(device),
                message,
            } => write!(f, "[{}] {}: {}", stage, device, message),
            BluetoothDevicesError::Stage {
                stage,
                device: None,
                message,
            } => write!(f, "[{}] {}", stage, message),
        }
    }
}

impl std::error::Error for BluetoothDevicesError {}
