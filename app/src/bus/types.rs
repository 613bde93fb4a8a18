use std::fmt::Display;

pub type BusResult<T> = Result<T, BusError>;

const CONNECTION_ABORT: &str = "Software caused connection abort";
const NO_DISCOVERY_STARTED: &str = "No discovery started";

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct BusError {
    pub name: String,
    pub message: String,
}

impl BusError {
    pub fn new(name: impl Into<String>, message: impl Into<String>) -> Self {
        BusError {
            name: name.into(),
            message: message.into(),
        }
    }

    /// BlueZ reports an aborted link setup this way; it is worth another attempt.
    pub fn is_connection_abort(&self) -> bool {
        self.message == CONNECTION_ABORT
    }

    pub fn is_no_discovery_started(&self) -> bool {
        self.message == NO_DISCOVERY_STARTED
    }
}

impl Display for BusError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.message)
    }
}

impl std::error::Error for BusError {}

/// Handle on one interface of a remote object.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Interface {
    pub path: String,
    pub name: &'static str,
}

impl Interface {
    pub fn new(path: &str, name: &'static str) -> Self {
        Interface {
            path: path.to_string(),
            name,
        }
    }
}

/// Self-describing value as carried in signal bodies.
#[derive(Clone, Debug, PartialEq)]
pub enum Value {
    Bool(bool),
    Byte(u8),
    Int16(i16),
    UInt16(u16),
    Int32(i32),
    UInt32(u32),
    Int64(i64),
    UInt64(u64),
    Double(f64),
    Str(String),
    Array(Vec<Value>),
    Dict(Vec<(Value, Value)>),
    Struct(Vec<Value>),
    Variant(Box<Value>),
    Unsupported,
}

impl Value {
    pub fn unwrap_variant(&self) -> &Value {
        match self {
            Value::Variant(inner) => inner.unwrap_variant(),
            value => value,
        }
    }

    pub fn as_int(&self) -> Option<i64> {
        match self.unwrap_variant() {
            Value::Byte(v) => Some(*v as i64),
            Value::Int16(v) => Some(*v as i64),
            Value::UInt16(v) => Some(*v as i64),
            Value::Int32(v) => Some(*v as i64),
            Value::UInt32(v) => Some(*v as i64),
            Value::Int64(v) => Some(*v),
            Value::UInt64(v) => i64::try_from(*v).ok(),
            _ => None,
        }
    }

    pub fn as_bytes(&self) -> Option<Vec<u8>> {
        match self.unwrap_variant() {
            Value::Array(items) => items
                .iter()
                .map(|item| match item.unwrap_variant() {
                    Value::Byte(byte) => Some(*byte),
                    _ => None,
                })
                .collect(),
            _ => None,
        }
    }
}

/// One `PropertiesChanged` signal.
#[derive(Clone, Debug, PartialEq)]
pub struct BusMessage {
    pub path: String,
    pub interface: String,
    pub properties: Vec<(String, Value)>,
}

impl BusMessage {
    #[cfg(test)]
    pub fn new(path: &str, interface: &str, properties: Vec<(&str, Value)>) -> Self {
        BusMessage {
            path: path.to_string(),
            interface: interface.to_string(),
            properties: properties
                .into_iter()
                .map(|(key, value)| (key.to_string(), value))
                .collect(),
        }
    }
}
