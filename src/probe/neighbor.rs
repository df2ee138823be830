//! Neighbor-table probes
//!
//! Both read the OS neighbor (ARP/NDP) cache instead of sending packets:
//! `neighbor_table` reports the IP→MAC binding, `oui_vendor` resolves the
//! hardware vendor from the MAC prefix.

use std::net::IpAddr;
use std::process::Stdio;
use std::time::Duration;

use async_trait::async_trait;
use tokio::process::Command;

use super::{Probe, ProbeDescriptor, ProbeSink, Scope};
use crate::error::{Error, Result};
use crate::evidence::signatures::lookup_oui;
use crate::evidence::{canonical_mac, AttributeKind, RawProbeOutput};

pub const NEIGHBOR_TABLE_PROBE: &str = "neighbor_table";
pub const OUI_VENDOR_PROBE: &str = "oui_vendor";

/// One resolved neighbor
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NeighborEntry {
    pub ip: IpAddr,
    pub mac: String,
}

/// Parse `ip neigh show` output.
/// Lines without a link-layer address (FAILED, INCOMPLETE) are skipped.
pub fn parse_neighbor_table(output: &str) -> Vec<NeighborEntry> {
    // Format: "192.168.1.20 dev eth0 lladdr 18:b4:30:aa:bb:cc REACHABLE"
    let mut entries = Vec::new();
    for line in output.lines() {
        let mut parts = line.split_whitespace();
        let Some(ip) = parts.next().and_then(|p| p.parse::<IpAddr>().ok()) else {
            continue;
        };
        let mut mac = None;
        while let Some(part) = parts.next() {
            if part == "lladdr" {
                mac = parts.next().and_then(canonical_mac);
                break;
            }
        }
        if let Some(mac) = mac {
            if mac != "00:00:00:00:00:00" {
                entries.push(NeighborEntry { ip, mac });
            }
        }
    }
    entries
}

async fn read_neighbor_table(budget: Duration, probe: &str) -> Result<Vec<NeighborEntry>> {
    let output = tokio::time::timeout(
        budget,
        Command::new("ip")
            .args(["neigh", "show"])
            .stdout(Stdio::piped())
            .stderr(Stdio::null())
            .output(),
    )
    .await
    .map_err(|_| Error::probe(probe, "neighbor table read timed out"))??;

    if !output.status.success() {
        return Err(Error::probe(
            probe,
            format!("ip neigh exited with {}", output.status),
        ));
    }

    Ok(parse_neighbor_table(&String::from_utf8_lossy(&output.stdout)))
}

fn in_scope(entries: Vec<NeighborEntry>, scope: &Scope) -> impl Iterator<Item = NeighborEntry> + '_ {
    entries.into_iter().filter(move |e| scope.contains(&e.ip))
}

/// IP→MAC bindings from the neighbor cache
pub struct NeighborTableProbe {
    descriptor: ProbeDescriptor,
}

impl NeighborTableProbe {
    pub fn new() -> Self {
        Self {
            descriptor: ProbeDescriptor::new(NEIGHBOR_TABLE_PROBE, 0.9, Duration::from_secs(5))
                .producing(&[AttributeKind::AddressBinding]),
        }
    }
}

impl Default for NeighborTableProbe {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Probe for NeighborTableProbe {
    fn descriptor(&self) -> &ProbeDescriptor {
        &self.descriptor
    }

    async fn run(&self, scope: &Scope, sink: &ProbeSink) -> Result<()> {
        let entries = read_neighbor_table(sink.budget(), self.name()).await?;
        for entry in in_scope(entries, scope) {
            sink.emit(entry.ip, RawProbeOutput::AddressBinding { mac: entry.mac });
        }
        Ok(())
    }
}

/// Hardware vendor from the OUI prefix of each neighbor's MAC
pub struct OuiVendorProbe {
    descriptor: ProbeDescriptor,
}

impl OuiVendorProbe {
    pub fn new() -> Self {
        Self {
            descriptor: ProbeDescriptor::new(OUI_VENDOR_PROBE, 0.6, Duration::from_secs(5))
                .producing(&[AttributeKind::Manufacturer]),
        }
    }
}

impl Default for OuiVendorProbe {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Probe for OuiVendorProbe {
    fn descriptor(&self) -> &ProbeDescriptor {
        &self.descriptor
    }

    async fn run(&self, scope: &Scope, sink: &ProbeSink) -> Result<()> {
        let entries = read_neighbor_table(sink.budget(), self.name()).await?;
        let mut resolved = 0usize;
        for entry in in_scope(entries, scope) {
            let vendor = lookup_oui(&entry.mac).map(str::to_string);
            if vendor.is_some() {
                resolved += 1;
            }
            sink.emit(entry.ip, RawProbeOutput::VendorLookup { mac: entry.mac, vendor });
        }
        tracing::debug!(resolved = resolved, "OUI vendor lookup complete");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE: &str = "\
192.168.1.1 dev eth0 lladdr 18:b4:30:00:11:22 REACHABLE
192.168.1.20 dev eth0 lladdr 00-17-88-AA-BB-CC STALE
192.168.1.30 dev eth0  FAILED
192.168.1.40 dev eth0 lladdr 00:00:00:00:00:00 NOARP
fe80::1 dev eth0 lladdr 3c:5a:b4:01:02:03 router REACHABLE
garbage line
";

    #[test]
    fn test_parse_neighbor_table() {
        let entries = parse_neighbor_table(SAMPLE);
        assert_eq!(entries.len(), 3);
        assert_eq!(entries[0].mac, "18:B4:30:00:11:22");
        assert_eq!(entries[1].ip, "192.168.1.20".parse::<IpAddr>().unwrap());
        assert_eq!(entries[1].mac, "00:17:88:AA:BB:CC");
        assert!(entries[2].ip.is_ipv6());
    }

    #[test]
    fn test_scope_filter() {
        let scope = Scope::parse("192.168.1.16/28").unwrap();
        let kept: Vec<_> = in_scope(parse_neighbor_table(SAMPLE), &scope).collect();
        assert_eq!(kept.len(), 1);
        assert_eq!(kept[0].ip.to_string(), "192.168.1.20");
    }

    #[test]
    fn test_descriptors() {
        assert_eq!(NeighborTableProbe::new().descriptor().trust_weight, 0.9);
        assert_eq!(OuiVendorProbe::new().name(), OUI_VENDOR_PROBE);
    }
}
