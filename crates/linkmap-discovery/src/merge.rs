//! Merging of one device's neighbor reports into discovery state
//!
//! Each kept neighbor produces two things: an update to the run-wide
//! [`DiscoveredDevices`] accumulator, keyed by canonical device name, and an
//! entry in the discovering device's [`ConnectionRecord`], keyed by local
//! interface.

use linkmap_core::{interface_type, DeviceId, OsTag, Topology, TopologyError};
use std::collections::{BTreeMap, BTreeSet};
use tracing::{debug, info};

use crate::filter::ExclusionPolicy;
use crate::naming::normalize;
use crate::neighbor::{CdpNeighbor, LldpNeighbor, NeighborReport};
use crate::os::classify;

/// The device that first reported a neighbor, and the neighbor's interface
/// addresses it saw that can be used to reach the neighbor through it
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Finder {
    pub device: DeviceId,
    pub addresses: BTreeSet<String>,
}

/// What is known about a neighbor device across the whole run
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DiscoveredDevice {
    /// Remote ports the device was seen on
    pub ports: BTreeSet<String>,
    /// Management addresses
    pub addresses: BTreeSet<String>,
    /// First classification that was not unknown
    pub os: Option<OsTag>,
    pub finder: Finder,
}

/// Run-wide accumulator of discovered devices
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DiscoveredDevices {
    devices: BTreeMap<DeviceId, DiscoveredDevice>,
}

impl DiscoveredDevices {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a sighting of `host` on `port`
    ///
    /// Interface addresses already claimed as management addresses are
    /// dropped. The finder is fixed by the first sighting; the OS is only
    /// filled in while still unknown.
    pub fn record(
        &mut self,
        host: &DeviceId,
        port: &str,
        mut interface_addresses: BTreeSet<String>,
        management_addresses: BTreeSet<String>,
        os: Option<OsTag>,
        finder: &DeviceId,
    ) {
        interface_addresses.retain(|addr| !management_addresses.contains(addr));

        match self.devices.get_mut(host) {
            Some(existing) => {
                if existing.os.is_none() {
                    existing.os = os;
                }
                existing.ports.insert(port.to_string());
                existing.addresses.extend(management_addresses);
            }
            None => {
                self.devices.insert(
                    host.clone(),
                    DiscoveredDevice {
                        ports: BTreeSet::from([port.to_string()]),
                        addresses: management_addresses,
                        os,
                        finder: Finder {
                            device: finder.clone(),
                            addresses: interface_addresses,
                        },
                    },
                );
            }
        }
    }

    pub fn get(&self, host: &DeviceId) -> Option<&DiscoveredDevice> {
        self.devices.get(host)
    }

    pub fn contains(&self, host: &DeviceId) -> bool {
        self.devices.contains_key(host)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&DeviceId, &DiscoveredDevice)> {
        self.devices.iter()
    }

    pub fn len(&self) -> usize {
        self.devices.len()
    }

    pub fn is_empty(&self) -> bool {
        self.devices.is_empty()
    }
}

/// Far end of a connection
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct RemoteEndpoint {
    pub device: DeviceId,
    pub port: String,
}

/// Connections found on one device, keyed by local interface
///
/// Each interface keeps its remote endpoints unique and in the order they
/// were first seen.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ConnectionRecord {
    entries: BTreeMap<String, Vec<RemoteEndpoint>>,
}

impl ConnectionRecord {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns false if the endpoint was already recorded for this interface
    pub fn add(&mut self, local_interface: &str, remote: RemoteEndpoint) -> bool {
        let endpoints = self
            .entries
            .entry(local_interface.to_string())
            .or_default();
        if endpoints.contains(&remote) {
            return false;
        }
        endpoints.push(remote);
        true
    }

    pub fn endpoints(&self, local_interface: &str) -> &[RemoteEndpoint] {
        self.entries
            .get(local_interface)
            .map(Vec::as_slice)
            .unwrap_or_default()
    }

    pub fn interfaces(&self) -> impl Iterator<Item = &str> {
        self.entries.keys().map(String::as_str)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &[RemoteEndpoint])> {
        self.entries
            .iter()
            .map(|(local, remotes)| (local.as_str(), remotes.as_slice()))
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Total number of (local interface, remote endpoint) pairs
    pub fn connection_count(&self) -> usize {
        self.entries.values().map(Vec::len).sum()
    }
}

/// Connection records of every device processed in a round
pub type RoundConnections = BTreeMap<DeviceId, ConnectionRecord>;

/// Applies exclusions, normalization and classification to neighbor reports
pub struct NeighborMerger<'a> {
    topology: &'a Topology,
    exclusions: &'a ExclusionPolicy,
    only_links: bool,
}

impl<'a> NeighborMerger<'a> {
    pub fn new(topology: &'a Topology, exclusions: &'a ExclusionPolicy, only_links: bool) -> Self {
        Self {
            topology,
            exclusions,
            only_links,
        }
    }

    /// Merge everything `device` reported, CDP first, then LLDP
    pub fn merge(
        &self,
        device: &DeviceId,
        report: &NeighborReport,
        discovered: &mut DiscoveredDevices,
    ) -> ConnectionRecord {
        let mut record = ConnectionRecord::new();
        for neighbor in &report.cdp {
            self.merge_cdp(device, neighbor, discovered, &mut record);
        }
        for neighbor in &report.lldp {
            self.merge_lldp(device, neighbor, discovered, &mut record);
        }
        record
    }

    fn merge_cdp(
        &self,
        device: &DeviceId,
        neighbor: &CdpNeighbor,
        discovered: &mut DiscoveredDevices,
        record: &mut ConnectionRecord,
    ) {
        let host = DeviceId::new(normalize(neighbor.host_name()));
        if !self.admits_host(&host) {
            return;
        }
        if !self.admits_interfaces(&neighbor.local_interface, &neighbor.port_id) {
            return;
        }

        let addresses = neighbor
            .interface_addresses
            .iter()
            .chain(neighbor.management_addresses.iter())
            .map(String::as_str);
        if let Some((addr, net)) = self.exclusions.first_excluded(addresses) {
            info!(
                address = %addr,
                network = %net,
                host = %host,
                "Address in excluded network, skipping connection"
            );
            return;
        }

        let os = classify(&neighbor.software_version, &neighbor.platform);
        self.keep(
            device,
            &neighbor.local_interface,
            &host,
            &neighbor.port_id,
            neighbor.interface_addresses.clone(),
            neighbor.management_addresses.clone(),
            os,
            discovered,
            record,
        );
    }

    fn merge_lldp(
        &self,
        device: &DeviceId,
        neighbor: &LldpNeighbor,
        discovered: &mut DiscoveredDevices,
        record: &mut ConnectionRecord,
    ) {
        let host = DeviceId::new(normalize(&neighbor.system_name));
        if !self.admits_host(&host) {
            return;
        }
        if !self.admits_interfaces(&neighbor.local_interface, &neighbor.port_id) {
            return;
        }

        if let Some((addr, net)) = self
            .exclusions
            .first_excluded(neighbor.management_address.as_deref())
        {
            info!(
                address = %addr,
                network = %net,
                host = %host,
                "Address in excluded network, skipping connection"
            );
            return;
        }

        let os = classify(&neighbor.system_description, "");
        let management: BTreeSet<String> = neighbor.management_address.iter().cloned().collect();
        self.keep(
            device,
            &neighbor.local_interface,
            &host,
            &neighbor.port_id,
            management.clone(),
            management,
            os,
            discovered,
            record,
        );
    }

    fn admits_host(&self, host: &DeviceId) -> bool {
        if self.only_links && !self.topology.contains_device(host.as_str()) {
            info!(host = %host, "Device is not in the initial testbed, skipping connection");
            return false;
        }
        true
    }

    fn admits_interfaces(&self, local: &str, remote: &str) -> bool {
        if self.exclusions.excludes_interface(local) {
            info!(interface = %local, "Local interface is excluded, skipping connection");
            return false;
        }
        if self.exclusions.excludes_interface(remote) {
            info!(interface = %remote, "Destination interface is excluded, skipping connection");
            return false;
        }
        true
    }

    #[allow(clippy::too_many_arguments)]
    fn keep(
        &self,
        device: &DeviceId,
        local_interface: &str,
        host: &DeviceId,
        port: &str,
        interface_addresses: BTreeSet<String>,
        management_addresses: BTreeSet<String>,
        os: Option<OsTag>,
        discovered: &mut DiscoveredDevices,
        record: &mut ConnectionRecord,
    ) {
        debug!(
            device = %device,
            interface = %local_interface,
            host = %host,
            port = %port,
            "Neighbor kept"
        );
        discovered.record(host, port, interface_addresses, management_addresses, os, device);
        let added = record.add(
            local_interface,
            RemoteEndpoint {
                device: host.clone(),
                port: port.to_string(),
            },
        );
        if added {
            info!(
                device = %device,
                interface = %local_interface,
                host = %host,
                port = %port,
                "Connection found"
            );
        }
    }
}

/// Create the local interfaces a device reported connections on but does not own yet
pub fn adopt_local_interfaces(
    topology: &mut Topology,
    device: &DeviceId,
    record: &ConnectionRecord,
) -> Result<usize, TopologyError> {
    let mut added = 0;
    for name in record.interfaces() {
        let owner = topology
            .device(device.as_str())
            .ok_or_else(|| TopologyError::UnknownDevice(device.to_string()))?;
        if owner.has_interface(name) {
            continue;
        }
        topology.add_interface(device.as_str(), name, interface_type(name))?;
        added += 1;
    }
    Ok(added)
}
