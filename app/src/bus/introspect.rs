use once_cell::sync::Lazy;
use regex::Regex;

static NODE_NAME: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r#"<node\s+name\s*=\s*"([^"]+)""#).expect("node name pattern is valid")
});

static INTERFACE_NAME: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r#"<interface\s+name\s*=\s*"([^"]+)""#).expect("interface name pattern is valid")
});

/// Interfaces an object implements, as listed in its `Introspect` reply.
pub fn interface_names(xml: &str) -> Vec<String> {
    INTERFACE_NAME
        .captures_iter(xml)
        .filter_map(|caps| caps.get(1))
        .map(|name| name.as_str().to_string())
        .collect()
}

/// Names of the direct children listed in an `Introspect` reply.
///
/// BlueZ lists children as empty `<node name="..."/>` elements; the root element may
/// carry its own (absolute) name, which is skipped.
pub fn child_nodes(xml: &str) -> Vec<String> {
    let root = xml.find("<node");

    NODE_NAME
        .captures_iter(xml)
        .filter(|caps| caps.get(0).map(|m| Some(m.start())) != Some(root))
        .filter_map(|caps| caps.get(1))
        .map(|name| name.as_str())
        .filter(|name| !name.contains('/'))
        .map(str::to_string)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn lists_direct_children() {
        let xml = r#"<node>
  <node name="fake-service-001"></node>
  <node name="fake-service-002"></node>
</node>"#;
        assert_eq!(child_nodes(xml), vec!["fake-service-001", "fake-service-002"]);
    }

    #[test]
    fn skips_named_root() {
        let xml = r#"<!DOCTYPE node PUBLIC "-//freedesktop//DTD D-BUS Object Introspection 1.0//EN"
"http://www.freedesktop.org/standards/dbus/1.0/introspect.dtd">
<node name="/org/bluez/hci0/dev_AA_BB_CC_DD_EE_FF">
  <interface name="org.bluez.Device1"></interface>
  <node name="service000a"/>
  <node name="service0021"/>
</node>"#;
        assert_eq!(child_nodes(xml), vec!["service000a", "service0021"]);
    }

    #[test]
    fn lists_implemented_interfaces() {
        let xml = r#"<node>
  <interface name="org.freedesktop.DBus.Introspectable"><method name="Introspect"/></interface>
  <interface name="org.bluez.GattCharacteristic1"></interface>
  <node name="desc002a"/>
</node>"#;
        assert_eq!(
            interface_names(xml),
            vec![
                "org.freedesktop.DBus.Introspectable",
                "org.bluez.GattCharacteristic1"
            ]
        );
        assert!(interface_names("<node></node>").is_empty());
    }

    #[test]
    fn empty_document_has_no_children() {
        assert!(child_nodes("").is_empty());
        assert!(child_nodes("<node></node>").is_empty());
    }
}
