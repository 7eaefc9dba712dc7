//! Exclusion of neighbors by address range and interface name

use ipnetwork::Ipv4Network;
use std::collections::BTreeSet;
use std::net::Ipv4Addr;

use crate::config::ConfigError;

/// First configured range containing `address`
///
/// Addresses that do not parse as IPv4 never match.
pub fn matching_network(address: &str, networks: &[Ipv4Network]) -> Option<Ipv4Network> {
    let ip: Ipv4Addr = address.trim().parse().ok()?;
    networks.iter().find(|net| net.contains(ip)).copied()
}

/// True if `address` is IPv4 and falls inside any of `networks`
pub fn is_excluded(address: &str, networks: &[Ipv4Network]) -> bool {
    matching_network(address, networks).is_some()
}

/// Parse a space-separated list of IPv4 ranges (`10.0.0.0/8 192.168.1.0/24`)
///
/// A bare address is a /32. Ranges with host bits set are rejected.
pub fn parse_networks(list: &str) -> Result<Vec<Ipv4Network>, ConfigError> {
    list.split_whitespace()
        .map(|item| {
            let net: Ipv4Network = item
                .parse()
                .map_err(|_| ConfigError::InvalidNetwork(item.to_string()))?;
            if net.network() != net.ip() {
                return Err(ConfigError::InvalidNetwork(item.to_string()));
            }
            Ok(net)
        })
        .collect()
}

/// Networks and interface names whose connections are never recorded
#[derive(Debug, Clone, Default)]
pub struct ExclusionPolicy {
    networks: Vec<Ipv4Network>,
    interfaces: BTreeSet<String>,
}

impl ExclusionPolicy {
    pub fn new(networks: Vec<Ipv4Network>, interfaces: impl IntoIterator<Item = String>) -> Self {
        Self {
            networks,
            interfaces: interfaces.into_iter().collect(),
        }
    }

    /// Build from the space-separated forms used on the command line
    pub fn parse(networks: &str, interfaces: &str) -> Result<Self, ConfigError> {
        Ok(Self::new(
            parse_networks(networks)?,
            interfaces.split_whitespace().map(str::to_string),
        ))
    }

    pub fn networks(&self) -> &[Ipv4Network] {
        &self.networks
    }

    pub fn excludes_interface(&self, name: &str) -> bool {
        self.interfaces.contains(name)
    }

    /// First address in `addresses` that is excluded, with the range it hit
    pub fn first_excluded<'a, I>(&self, addresses: I) -> Option<(&'a str, Ipv4Network)>
    where
        I: IntoIterator<Item = &'a str>,
    {
        if self.networks.is_empty() {
            return None;
        }
        addresses
            .into_iter()
            .find_map(|addr| matching_network(addr, &self.networks).map(|net| (addr, net)))
    }
}
