use crate::{bus::BLUEZ_ROOT, error::DevicesResult};

use serde::Deserialize;
use std::{fs, path::Path};

const DEFAULT_SERVICES_RESOLVED_TIMEOUT: u64 = 15000;

#[derive(Clone, Copy, Debug, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum Track {
    Battery,
}

#[derive(Clone, Debug, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct DeviceConfig {
    #[serde(rename = "type")]
    pub kind: String,
    pub name: String,
    pub mac: String,
    #[serde(default)]
    pub tracks: Vec<Track>,
    /// Object names (e.g. `service0021`) of the GATT services to walk.
    #[serde(default)]
    pub services: Vec<String>,
    #[serde(default)]
    pub characteristics: Vec<String>,
    #[serde(default = "default_services_resolved_timeout")]
    pub services_resolved_timeout: u64,
}

#[derive(Clone, Debug, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Config {
    #[serde(default = "default_name")]
    pub name: String,
    #[serde(default = "default_mode")]
    pub mode: String,
    #[serde(default = "default_hci")]
    pub hci: String,
    #[serde(default = "default_max_tries")]
    pub max_tries: usize,
    #[serde(default)]
    pub debug_logs: bool,
    #[serde(default)]
    pub devices: Vec<DeviceConfig>,
}

impl Config {
    pub fn load(path: &Path) -> DevicesResult<Self> {
        let content = fs::read_to_string(path)?;
        let config = serde_json::from_str(&content)?;
        Ok(config)
    }

    pub fn adapter_path(&self) -> String {
        format!("{}/{}", BLUEZ_ROOT, self.hci)
    }
}

fn default_name() -> String {
    "raspberrypi".to_string()
}

fn default_mode() -> String {
    "le".to_string()
}

fn default_hci() -> String {
    "hci0".to_string()
}

fn default_max_tries() -> usize {
    1
}

fn default_services_resolved_timeout() -> u64 {
    DEFAULT_SERVICES_RESOLVED_TIMEOUT
}
