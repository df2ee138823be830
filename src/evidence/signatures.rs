//! Static signature tables used by normalization and the vendor probe

/// OUI prefixes for common IoT vendors ("XX:XX:XX", vendor)
pub const OUI_VENDORS: &[(&str, &str)] = &[
    ("00:17:88", "Philips"),
    ("EC:B5:FA", "Philips"),
    ("24:FD:5B", "Samsung SmartThings"),
    ("D0:52:A8", "Samsung SmartThings"),
    ("28:6D:97", "Samsung"),
    ("00:0E:58", "Sonos"),
    ("48:A6:B8", "Sonos"),
    ("5C:AA:FD", "Sonos"),
    ("18:B4:30", "Google Nest"),
    ("64:16:66", "Google Nest"),
    ("F4:F5:D8", "Google"),
    ("30:FD:38", "Google"),
    ("3C:22:FB", "Google"),
    ("44:65:0D", "Amazon"),
    ("F0:27:2D", "Amazon"),
    ("70:5A:0F", "TP-LINK"),
    ("54:AF:97", "TP-LINK"),
    ("B0:A7:B9", "TP-LINK"),
    ("6C:5A:B0", "TP-LINK"),
    ("18:D6:C7", "TP-LINK"),
    ("28:57:BE", "Hikvision"),
    ("BC:AD:28", "Hikvision"),
    ("3C:EF:8C", "Dahua"),
    ("00:40:8C", "Axis"),
    ("F0:18:98", "Apple"),
];

/// Known IoT manufacturers (lowercase substrings)
pub const IOT_MANUFACTURERS: &[&str] = &[
    "samsung", "philips", "sonos", "nest", "google", "amazon", "apple", "tp-link",
];

/// Service capabilities that mark a device as IoT (lowercase substrings)
pub const IOT_SERVICES: &[&str] = &[
    "smartthings", "hue", "homekit", "matter", "airplay", "googlecast",
];

/// HTTP fingerprint signature
#[derive(Debug, Clone, Copy)]
pub struct HttpSignature {
    pub name: &'static str,
    pub header_tokens: &'static [&'static str],
    pub content_tokens: &'static [&'static str],
    pub manufacturer: &'static str,
    pub device_class: &'static str,
}

pub const HTTP_SIGNATURES: &[HttpSignature] = &[
    HttpSignature {
        name: "smartthings",
        header_tokens: &["smartthings"],
        content_tokens: &["smartthings"],
        manufacturer: "Samsung SmartThings",
        device_class: "smart-home-hub",
    },
    HttpSignature {
        name: "philips_hue",
        header_tokens: &["hue"],
        content_tokens: &["philips hue", "hue bridge"],
        manufacturer: "Philips",
        device_class: "hue-bridge",
    },
    HttpSignature {
        name: "sonos",
        header_tokens: &["sonos"],
        content_tokens: &["sonos"],
        manufacturer: "Sonos",
        device_class: "smart-speaker",
    },
    HttpSignature {
        name: "nest",
        header_tokens: &["nest"],
        content_tokens: &["google nest"],
        manufacturer: "Google Nest",
        device_class: "thermostat",
    },
    HttpSignature {
        name: "hikvision",
        header_tokens: &["hikvision", "dnvrs-webs"],
        content_tokens: &["hikvision"],
        manufacturer: "Hikvision",
        device_class: "ip-camera",
    },
    HttpSignature {
        name: "tp_link",
        header_tokens: &["tp-link"],
        content_tokens: &["tp-link", "tapo"],
        manufacturer: "TP-LINK",
        device_class: "network-appliance",
    },
];

/// Service advertisement type mapping
#[derive(Debug, Clone, Copy)]
pub struct ServiceSignature {
    /// Service type prefix (`_hue._tcp`)
    pub service_type: &'static str,
    pub capability: &'static str,
    pub manufacturer: Option<&'static str>,
    pub device_class: Option<&'static str>,
    /// TXT property carrying a model / device type, if any
    pub model_property: Option<&'static str>,
}

pub const SERVICE_SIGNATURES: &[ServiceSignature] = &[
    ServiceSignature {
        service_type: "_smartthings._tcp",
        capability: "smartthings",
        manufacturer: Some("Samsung SmartThings"),
        device_class: Some("smart-home-hub"),
        model_property: Some("deviceType"),
    },
    ServiceSignature {
        service_type: "_hue._tcp",
        capability: "hue",
        manufacturer: Some("Philips"),
        device_class: Some("hue-bridge"),
        model_property: Some("modelid"),
    },
    ServiceSignature {
        service_type: "_hap._tcp",
        capability: "homekit",
        manufacturer: None,
        device_class: None,
        model_property: Some("md"),
    },
    ServiceSignature {
        service_type: "_googlecast._tcp",
        capability: "googlecast",
        manufacturer: Some("Google"),
        device_class: Some("media-streamer"),
        model_property: Some("md"),
    },
    ServiceSignature {
        service_type: "_sonos._tcp",
        capability: "sonos",
        manufacturer: Some("Sonos"),
        device_class: Some("smart-speaker"),
        model_property: None,
    },
    ServiceSignature {
        service_type: "_matter._tcp",
        capability: "matter",
        manufacturer: None,
        device_class: None,
        model_property: None,
    },
    ServiceSignature {
        service_type: "_airplay._tcp",
        capability: "airplay",
        manufacturer: None,
        device_class: Some("media-receiver"),
        model_property: Some("model"),
    },
    ServiceSignature {
        service_type: "_ipp._tcp",
        capability: "ipp",
        manufacturer: None,
        device_class: Some("printer"),
        model_property: Some("ty"),
    },
    ServiceSignature {
        service_type: "_spotify-connect._tcp",
        capability: "spotify-connect",
        manufacturer: None,
        device_class: None,
        model_property: None,
    },
    ServiceSignature {
        service_type: "_http._tcp",
        capability: "http",
        manufacturer: None,
        device_class: None,
        model_property: None,
    },
];

/// Well-known service names by port
pub const WELL_KNOWN_PORTS: &[(u16, &str)] = &[
    (22, "ssh"),
    (23, "telnet"),
    (80, "http"),
    (443, "https"),
    (554, "rtsp"),
    (1400, "sonos-upnp"),
    (1883, "mqtt"),
    (2020, "onvif"),
    (5683, "coap"),
    (8000, "http-alt"),
    (8008, "googlecast"),
    (8080, "http-alt"),
    (8443, "https-alt"),
    (8554, "rtsp-alt"),
    (8883, "mqtts"),
    (39500, "smartthings"),
];

pub fn service_name(port: u16) -> &'static str {
    WELL_KNOWN_PORTS
        .iter()
        .find(|(p, _)| *p == port)
        .map(|(_, name)| *name)
        .unwrap_or("unknown")
}

/// Extract OUI prefix from MAC address ("XX:XX:XX", uppercase)
pub fn extract_oui_prefix(mac: &str) -> Option<String> {
    let hex = mac.to_uppercase().replace(['-', ':', '.'], "");
    if hex.len() >= 6 && hex.chars().take(6).all(|c| c.is_ascii_hexdigit()) {
        Some(format!("{}:{}:{}", &hex[0..2], &hex[2..4], &hex[4..6]))
    } else {
        None
    }
}

/// Locally administered MACs (randomized by phones etc.) carry no vendor
pub fn is_locally_administered(mac: &str) -> bool {
    let hex = mac.replace(['-', ':', '.'], "");
    hex.get(0..2)
        .and_then(|first| u8::from_str_radix(first, 16).ok())
        .is_some_and(|first_byte| first_byte & 0x02 != 0)
}

/// Lookup vendor from MAC address
pub fn lookup_oui(mac: &str) -> Option<&'static str> {
    if is_locally_administered(mac) {
        return None;
    }
    let oui = extract_oui_prefix(mac)?;
    OUI_VENDORS
        .iter()
        .find(|(prefix, _)| *prefix == oui)
        .map(|(_, vendor)| *vendor)
}
