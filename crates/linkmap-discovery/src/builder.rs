//! Graph construction from merged discovery results
//!
//! New devices are instantiated from [`DiscoveredDevices`], existing devices
//! gain the interfaces they were seen on, and the round's connection records
//! are committed as links.

use linkmap_core::{
    interface_type, ConnectionSpec, Device, DeviceId, LinkId, Proxy, ProxyHop, Topology,
    TopologyError, DISCOVERED_DEVICE_TYPE,
};
use std::collections::{BTreeMap, BTreeSet};
use tracing::{debug, info, warn};

use crate::merge::{DiscoveredDevice, DiscoveredDevices, RoundConnections};

/// Connection key of the connection that proxies through the finder
pub const FINDER_PROXY_CONNECTION: &str = "finder_proxy";

/// Connection key prefix for connections to a management address
pub const DIRECT_CONNECTION: &str = "ssh";

/// Names of every device used as a single-hop proxy anywhere in the graph
pub fn known_proxies(topology: &Topology) -> BTreeSet<String> {
    topology
        .devices()
        .flat_map(|device| device.connections.values())
        .filter_map(|conn| match &conn.proxy {
            Some(Proxy::Device(name)) => Some(name.clone()),
            _ => None,
        })
        .collect()
}

fn ssh_command(username: Option<&str>, ip: &str) -> String {
    match username {
        Some(user) => format!("ssh {}@{}", user, ip),
        None => format!("ssh {}", ip),
    }
}

/// Proxy that reaches `target_ip` through `finder`
///
/// When the finder is reached through a proxy itself, the route to the finder
/// is extended by one hop: a chain gets its last hop pointed at the finder,
/// a single jump host becomes a two-hop chain. Otherwise the finder alone is
/// the proxy.
pub fn proxy_chain(finder: &Device, target_ip: &str) -> Proxy {
    let username = finder.default_username();
    let Some((conn_ip, proxy)) = finder
        .proxied_ssh_connection()
        .and_then(|conn| conn.proxy.as_ref().map(|p| (conn.ip.as_deref().unwrap_or_default(), p)))
    else {
        return Proxy::Device(finder.name().to_string());
    };

    let final_hop = ProxyHop {
        device: finder.name().to_string(),
        command: ssh_command(username, target_ip),
    };

    match proxy {
        Proxy::Chain(hops) => {
            let mut hops = hops.clone();
            if let Some(last) = hops.last_mut() {
                last.command = ssh_command(username, conn_ip);
            }
            hops.push(final_hop);
            Proxy::Chain(hops)
        }
        Proxy::Device(jump) => Proxy::Chain(vec![
            ProxyHop {
                device: jump.clone(),
                command: format!("ssh {}", conn_ip),
            },
            final_hop,
        ]),
    }
}

/// `base` for the first address, `base_<i>` for later ones
fn indexed(base: &str, i: usize) -> String {
    if i == 0 {
        base.to_string()
    } else {
        format!("{}_{}", base, i)
    }
}

/// Build a device for a discovered neighbor, reachable the way its finder is
///
/// Without any known proxy the management addresses are reached directly.
pub fn build_device(
    finder: &Device,
    host: &DeviceId,
    discovered: &DiscoveredDevice,
    proxies: &BTreeSet<String>,
) -> Device {
    let mut device = Device::new(host.clone(), DISCOVERED_DEVICE_TYPE);
    device.os = discovered.os.clone();
    device.credentials = finder.credentials.clone();

    let mut connections = BTreeMap::new();
    for (i, ip) in discovered.addresses.iter().enumerate() {
        if proxies.is_empty() {
            connections.insert(indexed(DIRECT_CONNECTION, i), ConnectionSpec::ssh(ip, None));
        }
        for proxy in proxies {
            connections.insert(
                indexed(&format!("{}_{}", DIRECT_CONNECTION, proxy), i),
                ConnectionSpec::ssh(ip, Some(Proxy::Device(proxy.clone()))),
            );
        }
    }

    if let Some(hop_ip) = discovered.finder.addresses.iter().next() {
        let ip = discovered.addresses.iter().next().unwrap_or(hop_ip);
        connections.insert(
            FINDER_PROXY_CONNECTION.to_string(),
            ConnectionSpec::ssh(ip, Some(proxy_chain(finder, hop_ip))),
        );
    }

    device.connections = connections;
    device
}

/// Add any of `names` the device does not own yet
pub fn add_interfaces<'a>(
    topology: &mut Topology,
    device: &DeviceId,
    names: impl IntoIterator<Item = &'a str>,
) -> Result<usize, TopologyError> {
    let mut added = 0;
    for name in names {
        let owner = topology
            .device(device.as_str())
            .ok_or_else(|| TopologyError::UnknownDevice(device.to_string()))?;
        if owner.has_interface(name) {
            continue;
        }
        topology.add_interface(device.as_str(), name, interface_type(name))?;
        debug!(device = %device, interface = %name, "Interface added");
        added += 1;
    }
    Ok(added)
}

/// Add every discovered device the graph does not have yet
///
/// Each new device gets one interface per remote port it was seen on.
/// Returns the ids of the devices added.
pub fn instantiate_devices(
    topology: &mut Topology,
    discovered: &DiscoveredDevices,
    proxies: &BTreeSet<String>,
) -> Result<Vec<DeviceId>, TopologyError> {
    let mut added = Vec::new();
    for (host, record) in discovered.iter() {
        if topology.contains_device(host.as_str()) {
            continue;
        }
        let finder = topology
            .device(record.finder.device.as_str())
            .ok_or_else(|| TopologyError::UnknownDevice(record.finder.device.to_string()))?;
        let device = build_device(finder, host, record, proxies);

        info!(
            device = %host,
            finder = %record.finder.device,
            connections = device.connections.len(),
            "New device found, adding to graph"
        );
        topology.add_device(device);
        add_interfaces(topology, host, record.ports.iter().map(String::as_str))?;
        added.push(host.clone());
    }
    Ok(added)
}

/// Links touched by a commit
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LinkStats {
    pub created: Vec<LinkId>,
    pub extended: BTreeSet<LinkId>,
}

/// Commit a round's connection records as links
///
/// An unlinked local interface and its remote interfaces form a new link. If
/// the local interface (or failing that, one of the remotes) already belongs
/// to a link, the others join it. Remote interfaces already in a different
/// link are skipped so that no interface is ever in two links. Committing the
/// same records twice changes nothing the second time.
///
/// Every referenced interface must exist; a missing one is a structural error.
pub fn commit_links(
    topology: &mut Topology,
    connections: &RoundConnections,
) -> Result<LinkStats, TopologyError> {
    let mut stats = LinkStats::default();

    for (device, record) in connections {
        for (local, remotes) in record.iter() {
            let local_id = topology.require_interface(device.as_str(), local)?;

            let mut remote_ids = Vec::with_capacity(remotes.len());
            for remote in remotes {
                let id = topology.require_interface(remote.device.as_str(), &remote.port)?;
                if id != local_id && !remote_ids.contains(&id) {
                    remote_ids.push(id);
                }
            }

            let existing = topology
                .link_of(local_id)
                .or_else(|| remote_ids.iter().find_map(|id| topology.link_of(*id)));

            let Some(link) = existing else {
                if remote_ids.is_empty() {
                    continue;
                }
                let mut members = vec![local_id];
                members.extend(remote_ids);
                let link = topology.create_link(&members)?;
                info!(
                    link = %topology.link(link).name,
                    interface = %topology.qualified_name(local_id),
                    members = members.len(),
                    "Link created"
                );
                stats.created.push(link);
                continue;
            };

            let mut changed = topology.connect_interface(link, local_id)?;
            for id in remote_ids {
                match topology.link_of(id) {
                    Some(current) if current == link => {}
                    Some(current) => {
                        warn!(
                            interface = %topology.qualified_name(id),
                            link = %topology.link(current).name,
                            target = %topology.link(link).name,
                            "Interface already belongs to another link, not joining"
                        );
                    }
                    None => {
                        changed |= topology.connect_interface(link, id)?;
                    }
                }
            }

            if changed && !stats.created.contains(&link) {
                debug!(link = %topology.link(link).name, "Link extended");
                stats.extended.insert(link);
            }
        }
    }

    Ok(stats)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::merge::{ConnectionRecord, Finder, RemoteEndpoint};
    use linkmap_core::{Credential, OsTag};
    use proptest::prelude::*;

    fn router(name: &str) -> Device {
        let mut device = Device::new(DeviceId::from(name), "router");
        device.credentials.insert(
            "default".to_string(),
            Credential {
                username: Some("admin".to_string()),
                password: None,
                extra: BTreeMap::new(),
            },
        );
        device
    }

    /// SSH connection through the `jump` host
    fn jumped(ip: &str) -> ConnectionSpec {
        ConnectionSpec::ssh(ip, Some(Proxy::Device("jump".to_string())))
    }

    fn endpoint(device: &str, port: &str) -> RemoteEndpoint {
        RemoteEndpoint {
            device: DeviceId::from(device),
            port: port.to_string(),
        }
    }

    fn record(entries: &[(&str, &str, &str)]) -> ConnectionRecord {
        let mut record = ConnectionRecord::new();
        for (local, device, port) in entries {
            record.add(local, endpoint(device, port));
        }
        record
    }

    fn discovered(addresses: &[&str], finder_addresses: &[&str]) -> DiscoveredDevice {
        DiscoveredDevice {
            ports: BTreeSet::from(["Gi0/2".to_string()]),
            addresses: addresses.iter().map(|s| s.to_string()).collect(),
            os: Some(OsTag::Iosxe),
            finder: Finder {
                device: DeviceId::from("A"),
                addresses: finder_addresses.iter().map(|s| s.to_string()).collect(),
            },
        }
    }

    /// A, B and C each with Gi0/1..Gi0/3
    fn triangle() -> Topology {
        let mut topology = Topology::new();
        for name in ["A", "B", "C"] {
            topology.add_device(router(name));
            for port in ["Gi0/1", "Gi0/2", "Gi0/3"] {
                topology.add_interface(name, port, "gi").unwrap();
            }
        }
        topology
    }

    fn assert_single_membership(topology: &Topology) {
        let mut seen = BTreeSet::new();
        for link in topology.links() {
            for member in link.members() {
                assert!(seen.insert(*member), "interface in two links");
                assert_eq!(topology.link_of(*member), Some(link.id));
            }
        }
    }

    #[test]
    fn test_known_proxies() {
        let mut topology = Topology::new();
        let mut a = router("A");
        a.connections
            .insert("cli".to_string(), jumped("10.0.0.1"));
        let mut b = router("B");
        b.connections.insert(
            "cli".to_string(),
            ConnectionSpec::ssh(
                "10.0.0.2",
                Some(Proxy::Chain(vec![ProxyHop {
                    device: "bastion".to_string(),
                    command: "ssh x".to_string(),
                }])),
            ),
        );
        topology.add_device(a);
        topology.add_device(b);
        assert_eq!(known_proxies(&topology), BTreeSet::from(["jump".to_string()]));
    }

    #[test]
    fn test_proxy_chain_without_proxied_finder() {
        let finder = router("A");
        assert_eq!(proxy_chain(&finder, "10.1.0.2"), Proxy::Device("A".to_string()));
    }

    #[test]
    fn test_proxy_chain_through_jump_host() {
        let mut finder = router("A");
        finder
            .connections
            .insert("cli".to_string(), jumped("10.0.0.1"));

        assert_eq!(
            proxy_chain(&finder, "10.1.0.2"),
            Proxy::Chain(vec![
                ProxyHop {
                    device: "jump".to_string(),
                    command: "ssh 10.0.0.1".to_string(),
                },
                ProxyHop {
                    device: "A".to_string(),
                    command: "ssh admin@10.1.0.2".to_string(),
                },
            ])
        );
    }

    #[test]
    fn test_proxy_chain_extends_chain() {
        let mut finder = router("A");
        finder.connections.insert(
            "cli".to_string(),
            ConnectionSpec::ssh(
                "10.0.0.1",
                Some(Proxy::Chain(vec![
                    ProxyHop {
                        device: "bastion".to_string(),
                        command: "ssh 192.0.2.10".to_string(),
                    },
                    ProxyHop {
                        device: "jump".to_string(),
                        command: "ssh placeholder".to_string(),
                    },
                ])),
            ),
        );

        let Proxy::Chain(hops) = proxy_chain(&finder, "10.1.0.2") else {
            panic!("expected a chain");
        };
        assert_eq!(hops.len(), 3);
        assert_eq!(hops[0].command, "ssh 192.0.2.10");
        assert_eq!(hops[1].command, "ssh admin@10.0.0.1");
        assert_eq!(hops[2].device, "A");
        assert_eq!(hops[2].command, "ssh admin@10.1.0.2");
    }

    #[test]
    fn test_build_device_connections() {
        let finder = router("A");
        let proxies = BTreeSet::from(["jump".to_string()]);
        let device = build_device(
            &finder,
            &DeviceId::from("edge1"),
            &discovered(&["10.0.0.5", "10.0.0.6"], &["10.1.0.2"]),
            &proxies,
        );

        assert_eq!(device.device_type, DISCOVERED_DEVICE_TYPE);
        assert_eq!(device.os, Some(OsTag::Iosxe));
        assert_eq!(device.default_username(), Some("admin"));
        assert_eq!(
            device.connections.keys().collect::<Vec<_>>(),
            vec!["finder_proxy", "ssh_jump", "ssh_jump_1"]
        );
        assert_eq!(device.connections["ssh_jump"].ip.as_deref(), Some("10.0.0.5"));
        assert_eq!(device.connections["ssh_jump_1"].ip.as_deref(), Some("10.0.0.6"));
        let finder_proxy = &device.connections[FINDER_PROXY_CONNECTION];
        assert_eq!(finder_proxy.ip.as_deref(), Some("10.0.0.5"));
        assert_eq!(finder_proxy.proxy, Some(Proxy::Device("A".to_string())));
    }

    #[test]
    fn test_build_device_without_finder_addresses() {
        let finder = router("A");
        let device = build_device(
            &finder,
            &DeviceId::from("edge1"),
            &discovered(&["10.0.0.5"], &[]),
            &BTreeSet::from(["jump".to_string()]),
        );
        assert_eq!(device.connections.keys().collect::<Vec<_>>(), vec!["ssh_jump"]);
        assert!(!device.connections.contains_key(FINDER_PROXY_CONNECTION));
    }

    #[test]
    fn test_build_device_without_proxies_connects_directly() {
        let finder = router("A");
        let device = build_device(
            &finder,
            &DeviceId::from("edge1"),
            &discovered(&["10.0.0.5", "10.0.0.6"], &[]),
            &BTreeSet::new(),
        );
        assert_eq!(device.connections.keys().collect::<Vec<_>>(), vec!["ssh", "ssh_1"]);
        assert_eq!(device.connections["ssh"].ip.as_deref(), Some("10.0.0.5"));
        assert_eq!(device.connections["ssh"].proxy, None);
        assert_eq!(device.connections["ssh_1"].ip.as_deref(), Some("10.0.0.6"));

        let no_address = build_device(
            &finder,
            &DeviceId::from("edge2"),
            &discovered(&[], &[]),
            &BTreeSet::new(),
        );
        assert!(no_address.connections.is_empty());
    }

    #[test]
    fn test_instantiate_devices() {
        let mut topology = Topology::new();
        topology.add_device(router("A"));
        let mut devices = DiscoveredDevices::new();
        devices.record(
            &DeviceId::from("A"),
            "Gi0/9",
            BTreeSet::new(),
            BTreeSet::new(),
            None,
            &DeviceId::from("A"),
        );
        devices.record(
            &DeviceId::from("edge1"),
            "Gi0/2",
            BTreeSet::new(),
            BTreeSet::from(["10.0.0.5".to_string()]),
            Some(OsTag::Iosxe),
            &DeviceId::from("A"),
        );

        let proxies = BTreeSet::from(["jump".to_string()]);
        let added = instantiate_devices(&mut topology, &devices, &proxies).unwrap();
        assert_eq!(added, vec![DeviceId::from("edge1")]);
        assert!(topology.interface_id("edge1", "Gi0/2").is_some());
        assert_eq!(
            topology.device("edge1").unwrap().connections["ssh_jump"].ip.as_deref(),
            Some("10.0.0.5")
        );
        // existing devices are left to interface reconciliation
        assert!(topology.interface_id("A", "Gi0/9").is_none());

        let again = instantiate_devices(&mut topology, &devices, &proxies).unwrap();
        assert!(again.is_empty());
    }

    #[test]
    fn test_commit_creates_link() {
        let mut topology = triangle();
        let connections =
            RoundConnections::from([(DeviceId::from("A"), record(&[("Gi0/1", "B", "Gi0/2")]))]);

        let stats = commit_links(&mut topology, &connections).unwrap();
        assert_eq!(stats.created.len(), 1);
        let link = topology.link(stats.created[0]);
        assert_eq!(link.name, "Link_0");
        assert_eq!(link.members().len(), 2);
        assert!(link.contains(topology.interface_id("B", "Gi0/2").unwrap()));
    }

    #[test]
    fn test_commit_both_directions_single_link() {
        let mut topology = triangle();
        let connections = RoundConnections::from([
            (DeviceId::from("A"), record(&[("Gi0/1", "B", "Gi0/2")])),
            (DeviceId::from("B"), record(&[("Gi0/2", "A", "Gi0/1")])),
        ]);

        let stats = commit_links(&mut topology, &connections).unwrap();
        assert_eq!(stats.created.len(), 1);
        assert!(stats.extended.is_empty());
        assert_eq!(topology.link_count(), 1);
    }

    #[test]
    fn test_commit_multi_access_segment() {
        let mut topology = triangle();
        let connections = RoundConnections::from([
            (
                DeviceId::from("A"),
                record(&[("Gi0/1", "B", "Gi0/1"), ("Gi0/1", "C", "Gi0/1")]),
            ),
            (DeviceId::from("C"), record(&[("Gi0/1", "B", "Gi0/1")])),
        ]);

        commit_links(&mut topology, &connections).unwrap();
        assert_eq!(topology.link_count(), 1);
        let link = topology.links().next().unwrap();
        assert_eq!(link.members().len(), 3);
        assert_single_membership(&topology);
    }

    #[test]
    fn test_commit_extends_existing_link() {
        let mut topology = triangle();
        let a = topology.interface_id("A", "Gi0/1").unwrap();
        let b = topology.interface_id("B", "Gi0/1").unwrap();
        let existing = topology.insert_link("lab-link", &[a, b]).unwrap();

        let connections =
            RoundConnections::from([(DeviceId::from("A"), record(&[("Gi0/1", "C", "Gi0/3")]))]);
        let stats = commit_links(&mut topology, &connections).unwrap();
        assert!(stats.created.is_empty());
        assert_eq!(stats.extended, BTreeSet::from([existing]));
        assert_eq!(topology.link(existing).members().len(), 3);
    }

    #[test]
    fn test_commit_skips_remote_in_other_link() {
        let mut topology = triangle();
        let b = topology.interface_id("B", "Gi0/1").unwrap();
        let c = topology.interface_id("C", "Gi0/1").unwrap();
        let a2 = topology.interface_id("A", "Gi0/2").unwrap();
        let a3 = topology.interface_id("A", "Gi0/3").unwrap();
        topology.insert_link("first", &[a2, b]).unwrap();
        let second = topology.insert_link("second", &[a3, c]).unwrap();

        // A:Gi0/3 is in "second", B:Gi0/1 is in "first"
        let connections =
            RoundConnections::from([(DeviceId::from("A"), record(&[("Gi0/3", "B", "Gi0/1")]))]);
        let stats = commit_links(&mut topology, &connections).unwrap();
        assert!(stats.extended.is_empty());
        assert_eq!(topology.link(second).members().len(), 2);
        assert_single_membership(&topology);
    }

    #[test]
    fn test_commit_missing_remote_interface_is_fatal() {
        let mut topology = triangle();
        let connections =
            RoundConnections::from([(DeviceId::from("A"), record(&[("Gi0/1", "B", "Gi9/9")]))]);
        assert!(matches!(
            commit_links(&mut topology, &connections),
            Err(TopologyError::UnknownInterface { .. })
        ));
        assert_eq!(topology.link_count(), 0);
    }

    #[test]
    fn test_link_names_skip_loaded_names() {
        let mut topology = triangle();
        let a = topology.interface_id("A", "Gi0/3").unwrap();
        let c = topology.interface_id("C", "Gi0/3").unwrap();
        topology.insert_link("Link_1", &[a, c]).unwrap();

        let connections =
            RoundConnections::from([(DeviceId::from("A"), record(&[("Gi0/1", "B", "Gi0/1")]))]);
        let stats = commit_links(&mut topology, &connections).unwrap();
        assert_eq!(topology.link(stats.created[0]).name, "Link_2");
    }

    fn arb_connections() -> impl Strategy<Value = RoundConnections> {
        let device = prop::sample::select(vec!["A", "B", "C"]);
        let port = prop::sample::select(vec!["Gi0/1", "Gi0/2", "Gi0/3"]);
        let entry = (device.clone(), port.clone(), device, port);
        prop::collection::vec(entry, 0..12).prop_map(|entries| {
            let mut connections = RoundConnections::new();
            for (local_dev, local_port, remote_dev, remote_port) in entries {
                connections
                    .entry(DeviceId::from(local_dev))
                    .or_default()
                    .add(local_port, endpoint(remote_dev, remote_port));
            }
            connections
        })
    }

    fn link_snapshot(topology: &Topology) -> Vec<(String, Vec<String>)> {
        topology
            .links()
            .map(|link| {
                let members = link
                    .members()
                    .iter()
                    .map(|id| topology.qualified_name(*id))
                    .collect();
                (link.name.clone(), members)
            })
            .collect()
    }

    proptest! {
        #[test]
        fn prop_commit_is_idempotent(connections in arb_connections()) {
            let mut topology = triangle();
            commit_links(&mut topology, &connections).unwrap();
            let once = link_snapshot(&topology);

            let stats = commit_links(&mut topology, &connections).unwrap();
            prop_assert!(stats.created.is_empty());
            prop_assert!(stats.extended.is_empty());
            prop_assert_eq!(link_snapshot(&topology), once);
            assert_single_membership(&topology);
        }
    }
}
