use crate::devices::toothbrush::{ToothbrushData, ToothbrushUpdate};

use serde::Serialize;

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
#[serde(untagged)]
pub enum Telemetry {
    Toothbrush(ToothbrushData),
}

impl Telemetry {
    pub fn battery(&self) -> Option<u8> {
        match self {
            Telemetry::Toothbrush(data) => data.battery,
        }
    }

    pub fn apply(&mut self, update: ToothbrushUpdate) {
        match self {
            Telemetry::Toothbrush(data) => data.apply(update),
        }
    }

    pub fn with_battery(self, battery: Option<u8>) -> Self {
        match self {
            Telemetry::Toothbrush(data) => {
                Telemetry::Toothbrush(ToothbrushData { battery, ..data })
            }
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case", tag = "notice")]
pub enum Lifecycle {
    Trying { attempt: usize, max_tries: usize },
    Connected { tries: usize },
    FullySetup,
    SetupFailed,
}

impl Lifecycle {
    pub fn message(&self, device: &str) -> String {
        match self {
            Lifecycle::Trying { attempt, max_tries } => {
                format!("trying to connect to: {device} {attempt}/{max_tries}")
            }
            Lifecycle::Connected { tries } => {
                format!("connected to: {device} after {tries} {}", tries_word(*tries))
            }
            Lifecycle::FullySetup => format!("device: {device} fully setup"),
            Lifecycle::SetupFailed => format!("could not setup device: {device}"),
        }
    }
}

pub fn tries_word(tries: usize) -> &'static str {
    if tries == 1 {
        "try"
    } else {
        "tries"
    }
}

/// Everything the adapter reports to its consumer.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case", tag = "event")]
pub enum AdapterEvent {
    DeviceUpdate {
        device: String,
        address: String,
        telemetry: Telemetry,
    },
    Lifecycle {
        device: String,
        notice: Lifecycle,
    },
    DeviceDestroyed {
        device: String,
    },
    SetupCompleted,
    AdapterDied,
}

impl From<ToothbrushUpdate> for Telemetry {
    fn from(update: ToothbrushUpdate) -> Self {
        let mut data = ToothbrushData::default();
        data.apply(update);
        Telemetry::Toothbrush(data)
    }
}
