//! Evidence normalizer
//!
//! Maps each probe technique's native output onto the common attribute
//! vocabulary. Outputs that carry nothing mappable become `None` and are
//! dropped: absence of evidence is not a low-confidence attribute.

use std::collections::BTreeMap;
use std::sync::LazyLock;

use regex::Regex;

use super::signatures::{service_name, HTTP_SIGNATURES, SERVICE_SIGNATURES};
use super::types::{AttributeKey, AttributeKind, EvidenceRecord, RawObservation, RawProbeOutput};

static XML_MANUFACTURER: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)<manufacturer>\s*([^<]+?)\s*</manufacturer>").expect("static regex")
});

static XML_MODEL_NAME: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)<modelName>\s*([^<]+?)\s*</modelName>").expect("static regex")
});

/// `Product/version (comment)` token of a `Server` header
static SERVER_PRODUCT: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"([A-Za-z][\w.-]*)/\S+\s+\(([^)]+)\)").expect("static regex")
});

/// Normalize one raw observation into an evidence record
pub fn normalize(raw: &RawObservation) -> Option<EvidenceRecord> {
    if !(raw.trust_weight.is_finite() && raw.trust_weight > 0.0) {
        tracing::debug!(
            probe = %raw.probe_name,
            weight = raw.trust_weight,
            "Dropping observation with unusable trust weight"
        );
        return None;
    }

    let attributes = match &raw.output {
        RawProbeOutput::ServiceAdvertisement {
            service_type,
            port,
            properties,
            ..
        } => map_service_advertisement(service_type, *port, properties),
        RawProbeOutput::AddressBinding { mac } => map_address_binding(mac),
        RawProbeOutput::VendorLookup { vendor, .. } => map_vendor(vendor.as_deref()),
        RawProbeOutput::Banner {
            port,
            status,
            server_header,
            body_preview,
        } => map_banner(*port, *status, server_header.as_deref(), body_preview.as_deref()),
        RawProbeOutput::Announcement {
            server,
            manufacturer,
            model_name,
            device_type,
            friendly_name,
            ..
        } => map_announcement(
            server.as_deref(),
            manufacturer.as_deref(),
            model_name.as_deref(),
            device_type.as_deref(),
            friendly_name.as_deref(),
        ),
        RawProbeOutput::OpenPorts { ports } => map_open_ports(ports),
        RawProbeOutput::Attributes(map) => {
            let mut attrs = BTreeMap::new();
            for (key, value) in map {
                insert_clean(&mut attrs, key.clone(), value);
            }
            attrs
        }
    };

    if attributes.is_empty() {
        return None;
    }

    Some(EvidenceRecord {
        device_address: raw.address,
        probe_name: raw.probe_name.clone(),
        attributes,
        observed_at: raw.observed_at,
        probe_trust_weight: raw.trust_weight,
    })
}

/// Trim and collapse internal whitespace
pub fn clean_value(value: &str) -> Option<String> {
    let cleaned = value.split_whitespace().collect::<Vec<_>>().join(" ");
    if cleaned.is_empty() {
        None
    } else {
        Some(cleaned)
    }
}

/// Canonical MAC form `AA:BB:CC:DD:EE:FF`
pub fn canonical_mac(mac: &str) -> Option<String> {
    let hex: String = mac
        .chars()
        .filter(|c| !matches!(c, ':' | '-' | '.'))
        .collect::<String>()
        .to_uppercase();
    if hex.len() != 12 || !hex.chars().all(|c| c.is_ascii_hexdigit()) {
        return None;
    }
    let octets: Vec<&str> = (0..6).map(|i| &hex[i * 2..i * 2 + 2]).collect();
    Some(octets.join(":"))
}

fn insert_clean(attrs: &mut BTreeMap<AttributeKey, String>, key: AttributeKey, value: &str) {
    let cleaned = match key.kind {
        AttributeKind::DeviceClass => clean_value(value).map(|v| v.to_lowercase().replace(' ', "-")),
        AttributeKind::AddressBinding => canonical_mac(value),
        _ => clean_value(value),
    };
    if let Some(v) = cleaned {
        attrs.insert(key, v);
    }
}

fn map_service_advertisement(
    service_type: &str,
    port: Option<u16>,
    properties: &BTreeMap<String, String>,
) -> BTreeMap<AttributeKey, String> {
    let mut attrs = BTreeMap::new();
    let service = service_type.trim().trim_end_matches('.').trim_end_matches(".local");
    if service.is_empty() {
        return attrs;
    }

    match SERVICE_SIGNATURES
        .iter()
        .find(|sig| service.eq_ignore_ascii_case(sig.service_type))
    {
        Some(sig) => {
            insert_clean(
                &mut attrs,
                AttributeKey::qualified(AttributeKind::ProtocolCapability, sig.service_type),
                sig.capability,
            );
            if let Some(manufacturer) = sig.manufacturer {
                insert_clean(&mut attrs, AttributeKey::new(AttributeKind::Manufacturer), manufacturer);
            }
            if let Some(class) = sig.device_class {
                insert_clean(&mut attrs, AttributeKey::new(AttributeKind::DeviceClass), class);
            }
            if let Some(model) = sig.model_property.and_then(|p| properties.get(p)) {
                insert_clean(&mut attrs, AttributeKey::new(AttributeKind::ModelIdentifier), model);
            }
            if let Some(p) = port {
                insert_clean(&mut attrs, AttributeKey::port(p), sig.capability);
            }
        }
        None => {
            let label = service
                .split('.')
                .next()
                .unwrap_or(service)
                .trim_start_matches('_');
            insert_clean(
                &mut attrs,
                AttributeKey::qualified(AttributeKind::ProtocolCapability, service),
                label,
            );
            if let Some(p) = port {
                insert_clean(&mut attrs, AttributeKey::port(p), label);
            }
        }
    }

    attrs
}

fn map_address_binding(mac: &str) -> BTreeMap<AttributeKey, String> {
    let mut attrs = BTreeMap::new();
    insert_clean(&mut attrs, AttributeKey::new(AttributeKind::AddressBinding), mac);
    attrs
}

fn map_vendor(vendor: Option<&str>) -> BTreeMap<AttributeKey, String> {
    let mut attrs = BTreeMap::new();
    if let Some(v) = vendor {
        if !v.trim().eq_ignore_ascii_case("unknown") {
            insert_clean(&mut attrs, AttributeKey::new(AttributeKind::Manufacturer), v);
        }
    }
    attrs
}

fn map_banner(
    port: u16,
    status: Option<u16>,
    server_header: Option<&str>,
    body_preview: Option<&str>,
) -> BTreeMap<AttributeKey, String> {
    let mut attrs = BTreeMap::new();
    if status.is_none() && server_header.is_none() && body_preview.is_none() {
        return attrs;
    }

    let port_service = match service_name(port) {
        "unknown" => "http",
        name => name,
    };
    insert_clean(&mut attrs, AttributeKey::port(port), port_service);

    let header = server_header.unwrap_or_default().to_lowercase();
    let body = body_preview.unwrap_or_default();
    let body_lower = body.to_lowercase();

    if let Some(sig) = HTTP_SIGNATURES.iter().find(|sig| {
        sig.header_tokens.iter().any(|t| header.contains(t))
            || sig.content_tokens.iter().any(|t| body_lower.contains(t))
    }) {
        tracing::debug!(signature = sig.name, port, "HTTP signature matched");
        insert_clean(&mut attrs, AttributeKey::new(AttributeKind::Manufacturer), sig.manufacturer);
        insert_clean(&mut attrs, AttributeKey::new(AttributeKind::DeviceClass), sig.device_class);
        if let Some(model) = server_model(server_header.unwrap_or_default(), sig.header_tokens) {
            insert_clean(&mut attrs, AttributeKey::new(AttributeKind::ModelIdentifier), model);
        }
    } else if let Some(caps) = XML_MANUFACTURER.captures(body) {
        insert_clean(&mut attrs, AttributeKey::new(AttributeKind::Manufacturer), &caps[1]);
    }

    // Device description beats the header comment
    if let Some(caps) = XML_MODEL_NAME.captures(body) {
        insert_clean(&mut attrs, AttributeKey::new(AttributeKind::ModelIdentifier), &caps[1]);
    }

    attrs
}

/// Comment of the product token naming the matched vendor:
/// `Linux UPnP/1.0 Sonos/63.2-88230 (ZPS12)` -> `ZPS12`
fn server_model<'a>(server: &'a str, tokens: &[&str]) -> Option<&'a str> {
    SERVER_PRODUCT.captures_iter(server).find_map(|caps| {
        let product = caps.get(1)?.as_str().to_lowercase();
        if tokens.iter().any(|t| product.contains(t)) {
            caps.get(2).map(|m| m.as_str())
        } else {
            None
        }
    })
}

fn map_announcement(
    server: Option<&str>,
    manufacturer: Option<&str>,
    model_name: Option<&str>,
    device_type: Option<&str>,
    friendly_name: Option<&str>,
) -> BTreeMap<AttributeKey, String> {
    let mut attrs = BTreeMap::new();

    if let Some(m) = manufacturer {
        insert_clean(&mut attrs, AttributeKey::new(AttributeKind::Manufacturer), m);
    }
    if let Some(m) = model_name {
        insert_clean(&mut attrs, AttributeKey::new(AttributeKind::ModelIdentifier), m);
    }
    if let Some(name) = friendly_name {
        insert_clean(&mut attrs, AttributeKey::new(AttributeKind::DisplayName), name);
    }

    let is_smartthings = manufacturer.is_some_and(|m| m.to_lowercase().contains("samsung"))
        && model_name.is_some_and(|m| m.to_lowercase().contains("smartthings"));
    if is_smartthings {
        insert_clean(&mut attrs, AttributeKey::new(AttributeKind::DeviceClass), "smart-home-hub");
    } else if let Some(class) = device_type.and_then(device_class_from_urn) {
        insert_clean(&mut attrs, AttributeKey::new(AttributeKind::DeviceClass), &class);
    }

    // Nothing identifying: a bare announcement still proves UPnP support
    if !attrs.is_empty() || server.is_some_and(|s| !s.trim().is_empty()) {
        insert_clean(
            &mut attrs,
            AttributeKey::qualified(AttributeKind::ProtocolCapability, "upnp"),
            "upnp",
        );
    }

    attrs
}

/// `urn:schemas-upnp-org:device:MediaRenderer:1` -> `mediarenderer`
fn device_class_from_urn(urn: &str) -> Option<String> {
    let parts: Vec<&str> = urn.split(':').collect();
    match parts.iter().position(|p| p.eq_ignore_ascii_case("device")) {
        Some(idx) if idx + 1 < parts.len() => clean_value(parts[idx + 1]).map(|v| v.to_lowercase()),
        _ => clean_value(urn).map(|v| v.to_lowercase()),
    }
}

fn map_open_ports(ports: &[u16]) -> BTreeMap<AttributeKey, String> {
    let mut attrs = BTreeMap::new();
    for &port in ports {
        insert_clean(&mut attrs, AttributeKey::port(port), service_name(port));
    }
    attrs
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeZone, Utc};
    use std::net::IpAddr;

    fn observation(output: RawProbeOutput) -> RawObservation {
        RawObservation {
            probe_name: "test".to_string(),
            trust_weight: 0.5,
            address: "192.168.1.20".parse::<IpAddr>().unwrap(),
            observed_at: Utc.with_ymd_and_hms(2026, 1, 1, 12, 0, 0).unwrap(),
            output,
        }
    }

    fn attr(record: &EvidenceRecord, key: AttributeKey) -> Option<&str> {
        record.attributes.get(&key).map(String::as_str)
    }

    #[test]
    fn test_service_advertisement_hue() {
        let mut props = BTreeMap::new();
        props.insert("modelid".to_string(), "BSB002".to_string());
        let record = normalize(&observation(RawProbeOutput::ServiceAdvertisement {
            service_type: "_hue._tcp.local.".to_string(),
            instance_name: "Philips Hue - 1A2B3C".to_string(),
            port: Some(443),
            properties: props,
        }))
        .unwrap();

        assert_eq!(attr(&record, AttributeKey::new(AttributeKind::Manufacturer)), Some("Philips"));
        assert_eq!(attr(&record, AttributeKey::new(AttributeKind::DeviceClass)), Some("hue-bridge"));
        assert_eq!(attr(&record, AttributeKey::new(AttributeKind::ModelIdentifier)), Some("BSB002"));
        assert_eq!(attr(&record, AttributeKey::port(443)), Some("hue"));
        assert_eq!(
            attr(&record, AttributeKey::qualified(AttributeKind::ProtocolCapability, "_hue._tcp")),
            Some("hue")
        );
    }

    #[test]
    fn test_unknown_service_type_still_yields_capability() {
        let record = normalize(&observation(RawProbeOutput::ServiceAdvertisement {
            service_type: "_octoprint._tcp.local.".to_string(),
            instance_name: "printer".to_string(),
            port: None,
            properties: BTreeMap::new(),
        }))
        .unwrap();
        assert_eq!(record.attributes.len(), 1);
        assert_eq!(
            attr(&record, AttributeKey::qualified(AttributeKind::ProtocolCapability, "_octoprint._tcp")),
            Some("octoprint")
        );
    }

    #[test]
    fn test_address_binding_canonical_mac() {
        let record = normalize(&observation(RawProbeOutput::AddressBinding {
            mac: "6c-c8-40-8c-a3-e0".to_string(),
        }))
        .unwrap();
        assert_eq!(
            attr(&record, AttributeKey::new(AttributeKind::AddressBinding)),
            Some("6C:C8:40:8C:A3:E0")
        );
    }

    #[test]
    fn test_malformed_mac_is_dropped() {
        assert!(normalize(&observation(RawProbeOutput::AddressBinding {
            mac: "incomplete".to_string(),
        }))
        .is_none());
    }

    #[test]
    fn test_unknown_vendor_is_dropped() {
        assert!(normalize(&observation(RawProbeOutput::VendorLookup {
            mac: "00:00:00:00:00:00".to_string(),
            vendor: Some("Unknown".to_string()),
        }))
        .is_none());
        assert!(normalize(&observation(RawProbeOutput::VendorLookup {
            mac: "00:00:00:00:00:00".to_string(),
            vendor: None,
        }))
        .is_none());
    }

    #[test]
    fn test_banner_signature_and_model() {
        let record = normalize(&observation(RawProbeOutput::Banner {
            port: 1400,
            status: Some(200),
            server_header: Some("Linux UPnP/1.0 Sonos/63.2-88230 (ZPS12)".to_string()),
            body_preview: Some("<root><device><modelName>Sonos One</modelName></device></root>".to_string()),
        }))
        .unwrap();
        assert_eq!(attr(&record, AttributeKey::new(AttributeKind::Manufacturer)), Some("Sonos"));
        assert_eq!(attr(&record, AttributeKey::new(AttributeKind::DeviceClass)), Some("smart-speaker"));
        assert_eq!(attr(&record, AttributeKey::new(AttributeKind::ModelIdentifier)), Some("Sonos One"));
        assert_eq!(attr(&record, AttributeKey::port(1400)), Some("sonos-upnp"));
    }

    #[test]
    fn test_banner_model_from_server_header() {
        let record = normalize(&observation(RawProbeOutput::Banner {
            port: 1400,
            status: Some(200),
            server_header: Some("Linux UPnP/1.0 Sonos/63.2-88230 (ZPS12)".to_string()),
            body_preview: None,
        }))
        .unwrap();
        assert_eq!(attr(&record, AttributeKey::new(AttributeKind::ModelIdentifier)), Some("ZPS12"));

        // Comment of an unrelated product is not a model
        let record = normalize(&observation(RawProbeOutput::Banner {
            port: 80,
            status: Some(200),
            server_header: Some("Apache/2.4.41 (Ubuntu)".to_string()),
            body_preview: None,
        }))
        .unwrap();
        assert_eq!(attr(&record, AttributeKey::new(AttributeKind::ModelIdentifier)), None);
    }

    #[test]
    fn test_empty_banner_is_dropped() {
        assert!(normalize(&observation(RawProbeOutput::Banner {
            port: 80,
            status: None,
            server_header: None,
            body_preview: None,
        }))
        .is_none());
    }

    #[test]
    fn test_announcement_device_type_urn() {
        let record = normalize(&observation(RawProbeOutput::Announcement {
            location: Some("http://192.168.1.20:49152/desc.xml".to_string()),
            server: Some("Linux/4.9 UPnP/1.0".to_string()),
            manufacturer: Some("  Roku,   Inc. ".to_string()),
            model_name: Some("Roku Ultra".to_string()),
            device_type: Some("urn:schemas-upnp-org:device:MediaRenderer:1".to_string()),
            friendly_name: Some("Living Room".to_string()),
        }))
        .unwrap();
        assert_eq!(attr(&record, AttributeKey::new(AttributeKind::Manufacturer)), Some("Roku, Inc."));
        assert_eq!(attr(&record, AttributeKey::new(AttributeKind::DeviceClass)), Some("mediarenderer"));
        assert_eq!(attr(&record, AttributeKey::new(AttributeKind::DisplayName)), Some("Living Room"));
    }

    #[test]
    fn test_announcement_smartthings_hub() {
        let record = normalize(&observation(RawProbeOutput::Announcement {
            location: None,
            server: None,
            manufacturer: Some("Samsung Electronics".to_string()),
            model_name: Some("SmartThings Hub v3".to_string()),
            device_type: Some("urn:schemas-upnp-org:device:Basic:1".to_string()),
            friendly_name: None,
        }))
        .unwrap();
        assert_eq!(attr(&record, AttributeKey::new(AttributeKind::DeviceClass)), Some("smart-home-hub"));
    }

    #[test]
    fn test_empty_announcement_is_dropped() {
        assert!(normalize(&observation(RawProbeOutput::Announcement {
            location: Some("http://192.168.1.20/".to_string()),
            server: None,
            manufacturer: None,
            model_name: None,
            device_type: None,
            friendly_name: None,
        }))
        .is_none());
    }

    #[test]
    fn test_open_ports() {
        let record = normalize(&observation(RawProbeOutput::OpenPorts { ports: vec![554, 80] })).unwrap();
        assert_eq!(attr(&record, AttributeKey::port(554)), Some("rtsp"));
        assert_eq!(attr(&record, AttributeKey::port(80)), Some("http"));
        assert!(normalize(&observation(RawProbeOutput::OpenPorts { ports: vec![] })).is_none());
    }

    #[test]
    fn test_blank_attribute_values_are_dropped() {
        let mut map = BTreeMap::new();
        map.insert(AttributeKey::new(AttributeKind::Manufacturer), "   ".to_string());
        assert!(normalize(&observation(RawProbeOutput::Attributes(map))).is_none());
    }

    #[test]
    fn test_non_positive_weight_is_dropped() {
        let mut raw = observation(RawProbeOutput::OpenPorts { ports: vec![80] });
        raw.trust_weight = 0.0;
        assert!(normalize(&raw).is_none());
    }
}
