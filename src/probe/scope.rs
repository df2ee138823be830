//! Discovery scope: a single address or an IPv4 CIDR range

use std::net::{IpAddr, Ipv4Addr};

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// Largest range accepted (a /16)
pub const MAX_SCOPE_HOSTS: usize = 65_536;

/// Target scope of one discovery call
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum Scope {
    Single { address: IpAddr },
    Range { network: Ipv4Addr, prefix: u8 },
}

impl Scope {
    /// Parse `192.168.1.7` or `192.168.1.0/24`
    pub fn parse(input: &str) -> Result<Self> {
        let input = input.trim();
        if input.is_empty() {
            return Err(Error::InvalidScope("empty scope".to_string()));
        }

        // Handle single IP
        if !input.contains('/') {
            return input
                .parse::<IpAddr>()
                .map(|address| Scope::Single { address })
                .map_err(|e| Error::InvalidScope(format!("{}: {}", input, e)));
        }

        let (base, prefix) = input
            .split_once('/')
            .ok_or_else(|| Error::InvalidScope(format!("Invalid CIDR format: {}", input)))?;

        let base_ip: Ipv4Addr = base
            .parse()
            .map_err(|e| Error::InvalidScope(format!("Invalid IP {}: {}", base, e)))?;
        let prefix: u8 = prefix
            .parse()
            .map_err(|e| Error::InvalidScope(format!("Invalid prefix {}: {}", prefix, e)))?;

        if prefix > 32 {
            return Err(Error::InvalidScope(format!(
                "Invalid prefix: {} (must be 0-32)",
                prefix
            )));
        }

        let host_bits = 32 - u32::from(prefix);
        if (1u64 << host_bits) > MAX_SCOPE_HOSTS as u64 {
            return Err(Error::InvalidScope(format!(
                "{} covers more than {} addresses",
                input, MAX_SCOPE_HOSTS
            )));
        }

        let network = Ipv4Addr::from(u32::from(base_ip) & mask(prefix));
        if prefix == 32 {
            return Ok(Scope::Single {
                address: IpAddr::V4(network),
            });
        }

        Ok(Scope::Range { network, prefix })
    }

    /// Addresses covered by the scope (network/broadcast skipped for /24 and smaller)
    pub fn hosts(&self) -> Vec<IpAddr> {
        match self {
            Scope::Single { address } => vec![*address],
            Scope::Range { network, prefix } => {
                let network_u32 = u32::from(*network);
                let broadcast = network_u32 | !mask(*prefix);
                let (start, end) = if *prefix >= 24 && *prefix < 31 {
                    (network_u32 + 1, broadcast - 1)
                } else {
                    (network_u32, broadcast)
                };
                (start..=end)
                    .map(|ip| IpAddr::V4(Ipv4Addr::from(ip)))
                    .collect()
            }
        }
    }

    /// `hosts().len()` without materializing the list
    pub fn host_count(&self) -> usize {
        match self {
            Scope::Single { .. } => 1,
            Scope::Range { prefix, .. } => {
                let total = 1usize << (32 - u32::from(*prefix));
                if *prefix >= 24 && *prefix < 31 {
                    total - 2
                } else {
                    total
                }
            }
        }
    }

    pub fn contains(&self, ip: &IpAddr) -> bool {
        match (self, ip) {
            (Scope::Single { address }, _) => address == ip,
            (Scope::Range { network, prefix }, IpAddr::V4(v4)) => {
                (u32::from(*v4) & mask(*prefix)) == u32::from(*network)
            }
            (Scope::Range { .. }, IpAddr::V6(_)) => false,
        }
    }
}

impl std::fmt::Display for Scope {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Scope::Single { address } => write!(f, "{}", address),
            Scope::Range { network, prefix } => write!(f, "{}/{}", network, prefix),
        }
    }
}

fn mask(prefix: u8) -> u32 {
    if prefix == 0 {
        0
    } else {
        !((1u32 << (32 - u32::from(prefix))) - 1)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_single_ip() {
        let scope = Scope::parse("192.168.1.1").unwrap();
        assert_eq!(scope.hosts().len(), 1);
    }

    #[test]
    fn test_parse_ipv6_single() {
        let scope = Scope::parse("fe80::1").unwrap();
        assert!(scope.contains(&"fe80::1".parse().unwrap()));
    }

    #[test]
    fn test_parse_cidr_24() {
        let scope = Scope::parse("192.168.1.0/24").unwrap();
        assert_eq!(scope.hosts().len(), 254); // Excluding network and broadcast
    }

    #[test]
    fn test_parse_cidr_30() {
        let scope = Scope::parse("192.168.1.0/30").unwrap();
        assert_eq!(scope.hosts().len(), 2); // 2 usable IPs
    }

    #[test]
    fn test_host_count_matches_hosts() {
        for input in ["10.0.0.7", "10.0.0.0/16", "10.0.0.0/23", "10.0.0.0/24", "10.0.0.0/30", "10.0.0.0/31"] {
            let scope = Scope::parse(input).unwrap();
            assert_eq!(scope.host_count(), scope.hosts().len(), "{}", input);
        }
    }

    #[test]
    fn test_unaligned_base_is_masked() {
        let scope = Scope::parse("10.0.5.77/24").unwrap();
        assert_eq!(scope.to_string(), "10.0.5.0/24");
        assert!(scope.contains(&"10.0.5.200".parse().unwrap()));
        assert!(!scope.contains(&"10.0.6.1".parse().unwrap()));
    }

    #[test]
    fn test_invalid_scopes() {
        assert!(Scope::parse("").is_err());
        assert!(Scope::parse("not-an-ip").is_err());
        assert!(Scope::parse("192.168.1.0/33").is_err());
        assert!(Scope::parse("10.0.0.0/8").is_err());
        assert!(Scope::parse("fe80::/64").is_err());
    }
}
