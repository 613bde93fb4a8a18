use serde::Serialize;
use std::fmt::Display;

/// Shortest manufacturer payload carrying every field decoded below.
pub const ADVERTISEMENT_LEN: usize = 9;

pub const BATTERY_UUID: &str = "a0f0ff05-5047-4d53-8208-4f72616c2d42";

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Status {
    Online,
    #[default]
    Offline,
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum BrushState {
    #[default]
    Unknown,
    Initializing,
    Idle,
    Running,
    Charging,
    Setup,
    FlightMenu,
    FinalTest,
    PcbTest,
    Sleeping,
    Transport,
}

impl From<u8> for BrushState {
    fn from(code: u8) -> Self {
        match code {
            1 => BrushState::Initializing,
            2 => BrushState::Idle,
            3 => BrushState::Running,
            4 => BrushState::Charging,
            5 => BrushState::Setup,
            6 => BrushState::FlightMenu,
            113 => BrushState::FinalTest,
            114 => BrushState::PcbTest,
            115 => BrushState::Sleeping,
            116 => BrushState::Transport,
            _ => BrushState::Unknown,
        }
    }
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Mode {
    Off,
    DailyClean,
    Sensitive,
    Massage,
    Whitening,
    DeepClean,
    TongueCleaning,
    Turbo,
    #[default]
    Unknown,
}

impl From<u8> for Mode {
    fn from(code: u8) -> Self {
        match code {
            0 => Mode::Off,
            1 => Mode::DailyClean,
            2 => Mode::Sensitive,
            3 => Mode::Massage,
            4 => Mode::Whitening,
            5 => Mode::DeepClean,
            6 => Mode::TongueCleaning,
            7 => Mode::Turbo,
            _ => Mode::Unknown,
        }
    }
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize)]
pub enum Sector {
    #[serde(rename = "sector_1")]
    Sector1,
    #[serde(rename = "sector_2")]
    Sector2,
    #[serde(rename = "sector_3")]
    Sector3,
    #[serde(rename = "sector_4")]
    Sector4,
    #[serde(rename = "sector_5")]
    Sector5,
    #[serde(rename = "sector_6")]
    Sector6,
    #[serde(rename = "sector_7")]
    Sector7,
    #[serde(rename = "sector_8")]
    Sector8,
    #[serde(rename = "unknown_1")]
    Unknown1,
    #[serde(rename = "unknown_2")]
    Unknown2,
    #[serde(rename = "unknown_3")]
    Unknown3,
    #[serde(rename = "unknown_4")]
    Unknown4,
    #[serde(rename = "unknown_5")]
    Unknown5,
    #[serde(rename = "last_sector")]
    LastSector,
    #[default]
    #[serde(rename = "no_sector")]
    NoSector,
}

impl From<u8> for Sector {
    fn from(code: u8) -> Self {
        match code {
            1 => Sector::Sector1,
            2 => Sector::Sector2,
            3 => Sector::Sector3,
            4 => Sector::Sector4,
            5 => Sector::Sector5,
            6 => Sector::Sector6,
            7 => Sector::Sector7,
            8 => Sector::Sector8,
            15 => Sector::Unknown1,
            31 => Sector::Unknown2,
            23 => Sector::Unknown3,
            47 => Sector::Unknown4,
            55 => Sector::Unknown5,
            254 => Sector::LastSector,
            _ => Sector::NoSector,
        }
    }
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize)]
pub struct ToothbrushData {
    pub status: Status,
    pub state: BrushState,
    pub rssi: Option<i16>,
    pub pressure: u8,
    /// Seconds since the brushing session started.
    pub time: u16,
    pub mode: Mode,
    pub sector: Sector,
    pub battery: Option<u8>,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ToothbrushUpdate {
    Battery(u8),
}

impl ToothbrushData {
    pub fn apply(&mut self, update: ToothbrushUpdate) {
        match update {
            ToothbrushUpdate::Battery(level) => self.battery = Some(level),
        }
    }
}

#[derive(Debug, PartialEq, Eq)]
pub enum DecodeError {
    TooShort { expected: usize, actual: usize },
}

impl Display for DecodeError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            DecodeError::TooShort { expected, actual } => write!(
                f,
                "advertisement too short: expected {} bytes, got {}",
                expected, actual
            ),
        }
    }
}

pub fn decode_advertisement(data: &[u8]) -> Result<ToothbrushData, DecodeError> {
    if data.len() < ADVERTISEMENT_LEN {
        return Err(DecodeError::TooShort {
            expected: ADVERTISEMENT_LEN,
            actual: data.len(),
        });
    }

    let state = data[3];

    Ok(ToothbrushData {
        status: if state > 0 {
            Status::Online
        } else {
            Status::Offline
        },
        state: BrushState::from(state),
        rssi: None,
        pressure: data[4],
        time: data[5] as u16 * 60 + data[6] as u16,
        mode: Mode::from(data[7]),
        sector: Sector::from(data[8]),
        battery: None,
    })
}

pub fn decode_notification(uuid: &str, data: &[u8]) -> Option<ToothbrushUpdate> {
    match uuid {
        BATTERY_UUID => data.first().copied().map(ToothbrushUpdate::Battery),
        _ => None,
    }
}
