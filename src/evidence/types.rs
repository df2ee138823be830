//! Evidence types
//!
//! The common attribute vocabulary every probe output is mapped onto, the raw
//! per-technique output shapes, and the immutable evidence record.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::net::IpAddr;
use std::str::FromStr;

/// Attribute kind in the common vocabulary
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum AttributeKind {
    Manufacturer,
    DeviceClass,
    ModelIdentifier,
    ProtocolCapability,
    OpenServicePort,
    AddressBinding,
    DisplayName,
}

impl AttributeKind {
    pub const ALL: [AttributeKind; 7] = [
        AttributeKind::Manufacturer,
        AttributeKind::DeviceClass,
        AttributeKind::ModelIdentifier,
        AttributeKind::ProtocolCapability,
        AttributeKind::OpenServicePort,
        AttributeKind::AddressBinding,
        AttributeKind::DisplayName,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            AttributeKind::Manufacturer => "manufacturer",
            AttributeKind::DeviceClass => "device-class",
            AttributeKind::ModelIdentifier => "model-identifier",
            AttributeKind::ProtocolCapability => "protocol-capability",
            AttributeKind::OpenServicePort => "open-service-port",
            AttributeKind::AddressBinding => "address-binding",
            AttributeKind::DisplayName => "display-name",
        }
    }

    /// Kinds a device can carry several instances of (one per qualifier)
    pub fn is_multi_instance(&self) -> bool {
        matches!(
            self,
            AttributeKind::OpenServicePort | AttributeKind::ProtocolCapability
        )
    }
}

impl fmt::Display for AttributeKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for AttributeKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        AttributeKind::ALL
            .iter()
            .copied()
            .find(|k| k.as_str() == s)
            .ok_or_else(|| format!("unknown attribute kind: {}", s))
    }
}

/// Attribute key: the kind plus an optional qualifier for multi-instance
/// kinds (`open-service-port/554`). Candidates only compete within a key.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(into = "String", try_from = "String")]
pub struct AttributeKey {
    pub kind: AttributeKind,
    pub qualifier: Option<String>,
}

impl AttributeKey {
    pub fn new(kind: AttributeKind) -> Self {
        Self {
            kind,
            qualifier: None,
        }
    }

    pub fn qualified(kind: AttributeKind, qualifier: impl Into<String>) -> Self {
        Self {
            kind,
            qualifier: Some(qualifier.into()),
        }
    }

    pub fn port(port: u16) -> Self {
        Self::qualified(AttributeKind::OpenServicePort, port.to_string())
    }
}

impl fmt::Display for AttributeKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.qualifier {
            Some(q) => write!(f, "{}/{}", self.kind, q),
            None => write!(f, "{}", self.kind),
        }
    }
}

impl From<AttributeKey> for String {
    fn from(key: AttributeKey) -> Self {
        key.to_string()
    }
}

impl TryFrom<String> for AttributeKey {
    type Error = String;

    fn try_from(s: String) -> Result<Self, Self::Error> {
        match s.split_once('/') {
            Some((kind, qualifier)) => Ok(AttributeKey::qualified(kind.parse()?, qualifier)),
            None => Ok(AttributeKey::new(s.parse()?)),
        }
    }
}

/// Native output of one probe technique for one address.
/// The normalizer maps each shape onto the common vocabulary.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "shape", rename_all = "snake_case")]
pub enum RawProbeOutput {
    /// DNS-SD style service advertisement
    ServiceAdvertisement {
        service_type: String,
        instance_name: String,
        port: Option<u16>,
        #[serde(default)]
        properties: BTreeMap<String, String>,
    },
    /// Address-resolution result (IP -> MAC)
    AddressBinding { mac: String },
    /// Hardware vendor resolved from a MAC prefix
    VendorLookup { mac: String, vendor: Option<String> },
    /// Banner / HTTP fingerprint of one port
    Banner {
        port: u16,
        status: Option<u16>,
        server_header: Option<String>,
        body_preview: Option<String>,
    },
    /// UPnP-style device announcement
    Announcement {
        location: Option<String>,
        server: Option<String>,
        manufacturer: Option<String>,
        model_name: Option<String>,
        device_type: Option<String>,
        friendly_name: Option<String>,
    },
    /// TCP connect results
    OpenPorts { ports: Vec<u16> },
    /// Output already expressed in the common vocabulary
    Attributes(BTreeMap<AttributeKey, String>),
}

/// One raw output as it comes back from a probe
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RawObservation {
    pub probe_name: String,
    pub trust_weight: f64,
    pub address: IpAddr,
    pub observed_at: DateTime<Utc>,
    pub output: RawProbeOutput,
}

/// Evidence record: one probe's normalized observations for one address
/// at one point in time. Never mutated after creation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EvidenceRecord {
    pub device_address: IpAddr,
    pub probe_name: String,
    pub attributes: BTreeMap<AttributeKey, String>,
    pub observed_at: DateTime<Utc>,
    pub probe_trust_weight: f64,
}

impl EvidenceRecord {
    pub fn new(
        device_address: IpAddr,
        probe_name: &str,
        probe_trust_weight: f64,
        observed_at: DateTime<Utc>,
    ) -> Self {
        Self {
            device_address,
            probe_name: probe_name.to_string(),
            attributes: BTreeMap::new(),
            observed_at,
            probe_trust_weight,
        }
    }

    pub fn with_attribute(mut self, key: AttributeKey, value: impl Into<String>) -> Self {
        self.attributes.insert(key, value.into());
        self
    }

    pub fn is_empty(&self) -> bool {
        self.attributes.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_attribute_key_string_form() {
        let key = AttributeKey::port(554);
        assert_eq!(key.to_string(), "open-service-port/554");
        let back = AttributeKey::try_from(key.to_string()).unwrap();
        assert_eq!(back, key);

        let plain = AttributeKey::try_from("manufacturer".to_string()).unwrap();
        assert_eq!(plain, AttributeKey::new(AttributeKind::Manufacturer));
        assert!(AttributeKey::try_from("colour".to_string()).is_err());
    }

    #[test]
    fn test_attribute_key_as_json_map_key() {
        let mut attrs = BTreeMap::new();
        attrs.insert(AttributeKey::new(AttributeKind::DeviceClass), "hub".to_string());
        let json = serde_json::to_string(&attrs).unwrap();
        assert_eq!(json, r#"{"device-class":"hub"}"#);
    }

    #[test]
    fn test_multi_instance_kinds() {
        assert!(AttributeKind::OpenServicePort.is_multi_instance());
        assert!(!AttributeKind::Manufacturer.is_multi_instance());
    }
}
