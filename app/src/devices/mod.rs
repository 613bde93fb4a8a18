pub mod toothbrush;

use crate::error::BluetoothDevicesError;

use std::{fmt::Display, str::FromStr};

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum DeviceType {
    OralBToothbrush,
}

impl DeviceType {
    pub fn battery_characteristic(&self) -> &'static str {
        match self {
            DeviceType::OralBToothbrush => toothbrush::BATTERY_UUID,
        }
    }
}

impl FromStr for DeviceType {
    type Err = BluetoothDevicesError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value {
            "OralBToothbrush" => Ok(DeviceType::OralBToothbrush),
            _ => Err(BluetoothDevicesError::UnknownDeviceType(value.to_string())),
        }
    }
}

impl Display for DeviceType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            DeviceType::OralBToothbrush => write!(f, "OralBToothbrush"),
        }
    }
}
