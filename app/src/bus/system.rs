use super::{
    introspect, Bus, BusError, BusMessage, BusResult, Interface, SignalStream, Value, BLUEZ_ROOT,
    BLUEZ_SERVICE, INTROSPECTABLE_INTERFACE,
};

use async_trait::async_trait;
use futures::StreamExt;
use std::collections::HashMap;
use zbus::{
    zvariant::{self, DynamicType, ObjectPath, OwnedValue},
    Connection, MatchRule, Message, MessageStream,
};

const PROPERTIES_INTERFACE: &str = "org.freedesktop.DBus.Properties";
const UNKNOWN_INTERFACE: &str = "org.freedesktop.DBus.Error.UnknownInterface";

/// `Bus` over the D-Bus system bus.
#[derive(Clone)]
pub struct SystemBus {
    conn: Connection,
}

impl SystemBus {
    pub async fn new() -> BusResult<Self> {
        let conn = match Connection::system().await {
            Ok(conn) => conn,
            Err(e) => {
                log::error!("Failed to connect to the system bus.");
                return Err(e.into());
            }
        };

        log::debug!("Connected to the system bus as {:?}", conn.unique_name());
        Ok(SystemBus { conn })
    }

    async fn call<B>(&self, target: &Interface, method: &str, body: &B) -> BusResult<Message>
    where
        B: serde::ser::Serialize + DynamicType,
    {
        log::trace!("{} {}.{}", target.path, target.name, method);

        self.conn
            .call_method(
                Some(BLUEZ_SERVICE),
                target.path.as_str(),
                Some(target.name),
                method,
                body,
            )
            .await
            .map_err(BusError::from)
    }

    async fn property(&self, target: &Interface, name: &str) -> BusResult<OwnedValue> {
        let reply = self
            .conn
            .call_method(
                Some(BLUEZ_SERVICE),
                target.path.as_str(),
                Some(PROPERTIES_INTERFACE),
                "Get",
                &(target.name, name),
            )
            .await?;

        let body = reply.body();
        let value: OwnedValue = body.deserialize()?;
        Ok(value)
    }
}

#[async_trait]
impl Bus for SystemBus {
    async fn interface(&self, path: &str, name: &'static str) -> BusResult<Interface> {
        ObjectPath::try_from(path)?;

        let xml = self
            .introspect(&Interface::new(path, INTROSPECTABLE_INTERFACE))
            .await?;
        if !introspect::interface_names(&xml).iter().any(|found| found == name) {
            log::debug!("{} does not implement {}", path, name);
            return Err(BusError::new(
                UNKNOWN_INTERFACE,
                format!("{} not found on {}", name, path),
            ));
        }

        Ok(Interface::new(path, name))
    }

    async fn connect(&self, device: &Interface) -> BusResult<()> {
        self.call(device, "Connect", &()).await.map(|_| ())
    }

    async fn disconnect(&self, device: &Interface) -> BusResult<()> {
        self.call(device, "Disconnect", &()).await.map(|_| ())
    }

    async fn services_resolved(&self, device: &Interface) -> BusResult<bool> {
        let value = self.property(device, "ServicesResolved").await?;
        as_bool(&value)
    }

    async fn stop_discovery(&self, adapter: &Interface) -> BusResult<()> {
        self.call(adapter, "StopDiscovery", &()).await.map(|_| ())
    }

    async fn set_discovery_filter(&self, adapter: &Interface, transport: &str) -> BusResult<()> {
        let mut filter: HashMap<&str, zvariant::Value<'_>> = HashMap::new();
        filter.insert("Transport", zvariant::Value::from(transport));

        self.call(adapter, "SetDiscoveryFilter", &(filter,))
            .await
            .map(|_| ())
    }

    async fn start_discovery(&self, adapter: &Interface) -> BusResult<()> {
        self.call(adapter, "StartDiscovery", &()).await.map(|_| ())
    }

    async fn introspect(&self, node: &Interface) -> BusResult<String> {
        let reply = self.call(node, "Introspect", &()).await?;
        let body = reply.body();
        let xml: String = body.deserialize()?;
        Ok(xml)
    }

    async fn uuid(&self, characteristic: &Interface) -> BusResult<String> {
        match &*self.property(characteristic, "UUID").await? {
            zvariant::Value::Str(uuid) => Ok(uuid.to_string()),
            other => Err(unexpected("UUID", other)),
        }
    }

    async fn notifying(&self, characteristic: &Interface) -> BusResult<bool> {
        let value = self.property(characteristic, "Notifying").await?;
        as_bool(&value)
    }

    async fn start_notify(&self, characteristic: &Interface) -> BusResult<()> {
        self.call(characteristic, "StartNotify", &()).await.map(|_| ())
    }

    async fn stop_notify(&self, characteristic: &Interface) -> BusResult<()> {
        self.call(characteristic, "StopNotify", &()).await.map(|_| ())
    }

    async fn read_value(&self, characteristic: &Interface) -> BusResult<Vec<u8>> {
        let options: HashMap<&str, zvariant::Value<'_>> = HashMap::new();
        let reply = self.call(characteristic, "ReadValue", &(options,)).await?;
        let body = reply.body();
        let value: Vec<u8> = body.deserialize()?;
        Ok(value)
    }

    async fn signals(&self) -> BusResult<SignalStream> {
        let rule = MatchRule::builder()
            .msg_type(zbus::message::Type::Signal)
            .sender(BLUEZ_SERVICE)?
            .interface(PROPERTIES_INTERFACE)?
            .member("PropertiesChanged")?
            .path_namespace(BLUEZ_ROOT)?
            .build();

        let stream = MessageStream::for_match_rule(rule, &self.conn, None).await?;
        log::info!("Listening to property changes below {BLUEZ_ROOT}");

        Ok(stream
            .filter_map(|message| async move {
                match message {
                    Ok(message) => parse_properties_changed(&message),
                    Err(e) => {
                        log::debug!("Dropped unreadable signal: {e}");
                        None
                    }
                }
            })
            .boxed())
    }
}

fn as_bool(value: &zvariant::Value<'_>) -> BusResult<bool> {
    match value {
        zvariant::Value::Bool(flag) => Ok(*flag),
        other => Err(unexpected("bool", other)),
    }
}

fn unexpected(expected: &str, value: &zvariant::Value<'_>) -> BusError {
    BusError::new(
        "zvariant",
        format!("expected {}, got {}", expected, value.value_signature()),
    )
}

fn parse_properties_changed(message: &Message) -> Option<BusMessage> {
    let header = message.header();
    let path = header.path()?.to_string();

    let body = message.body();
    let (interface, changed, _invalidated): (String, HashMap<String, OwnedValue>, Vec<String>) =
        match body.deserialize() {
            Ok(body) => body,
            Err(e) => {
                log::debug!("Unexpected PropertiesChanged body on {path}: {e}");
                return None;
            }
        };

    let properties = changed
        .iter()
        .map(|(key, value)| (key.clone(), from_zvariant(value)))
        .collect();

    Some(BusMessage {
        path,
        interface,
        properties,
    })
}

fn from_zvariant(value: &zvariant::Value<'_>) -> Value {
    match value {
        zvariant::Value::U8(v) => Value::Byte(*v),
        zvariant::Value::Bool(v) => Value::Bool(*v),
        zvariant::Value::I16(v) => Value::Int16(*v),
        zvariant::Value::U16(v) => Value::UInt16(*v),
        zvariant::Value::I32(v) => Value::Int32(*v),
        zvariant::Value::U32(v) => Value::UInt32(*v),
        zvariant::Value::I64(v) => Value::Int64(*v),
        zvariant::Value::U64(v) => Value::UInt64(*v),
        zvariant::Value::F64(v) => Value::Double(*v),
        zvariant::Value::Str(v) => Value::Str(v.to_string()),
        zvariant::Value::ObjectPath(v) => Value::Str(v.to_string()),
        zvariant::Value::Value(inner) => Value::Variant(Box::new(from_zvariant(inner))),
        zvariant::Value::Array(array) => Value::Array(array.iter().map(from_zvariant).collect()),
        zvariant::Value::Dict(dict) => Value::Dict(
            dict.iter()
                .map(|(key, value)| (from_zvariant(key), from_zvariant(value)))
                .collect(),
        ),
        zvariant::Value::Structure(structure) => {
            Value::Struct(structure.fields().iter().map(from_zvariant).collect())
        }
        _ => Value::Unsupported,
    }
}

impl From<zbus::Error> for BusError {
    fn from(value: zbus::Error) -> Self {
        match value {
            zbus::Error::MethodError(name, description, _) => {
                BusError::new(name.to_string(), description.unwrap_or_default())
            }
            err => BusError::new("zbus", err.to_string()),
        }
    }
}

impl From<zvariant::Error> for BusError {
    fn from(value: zvariant::Error) -> Self {
        BusError::new("zvariant", value.to_string())
    }
}
