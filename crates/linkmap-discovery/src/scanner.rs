//! Discovery loop: repeatedly query the unvisited part of the graph until it stops growing

use linkmap_core::{Device, DeviceId, Topology, TopologyError};
use std::collections::BTreeSet;
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::broadcast;
use tracing::{debug, info, warn};

use crate::agent::{AgentError, ConnectPolicy, DeviceAgent, DESCRIBE_INTERFACE_COMMANDS};
use crate::builder::{add_interfaces, commit_links, instantiate_devices, known_proxies};
use crate::config::{ConfigError, ScannerConfig};
use crate::fanout::fan_out;
use crate::merge::{adopt_local_interfaces, DiscoveredDevices, NeighborMerger, RoundConnections};
use crate::neighbor::NeighborReport;

#[derive(Error, Debug)]
pub enum DiscoveryError {
    #[error("Graph inconsistency: {0}")]
    Structural(#[from] TopologyError),
    #[error("Invalid configuration: {0}")]
    Config(#[from] ConfigError),
}

/// How a run ended
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    /// Every device in the graph was visited
    Converged,
    /// Stopped after one round because only links were requested
    LinksOnlyStop,
}

/// Summary of a discovery run
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DiscoveryReport {
    pub outcome: Outcome,
    pub rounds: usize,
    pub devices_added: Vec<DeviceId>,
    pub links_created: usize,
    pub links_extended: usize,
    pub devices_visited: usize,
    pub addresses_resolved: usize,
}

/// Discovery event for observers
#[derive(Debug, Clone)]
pub enum DiscoveryEvent {
    /// A round began with this many unvisited devices
    RoundStarted { round: usize, frontier: usize },
    /// New device added to the graph
    DeviceAdded(DeviceId),
    /// Link created or extended
    LinkCommitted { name: String, members: usize },
    /// Round finished and its results are in the graph
    RoundCompleted {
        round: usize,
        devices_added: usize,
        links_created: usize,
        links_extended: usize,
    },
    /// Run finished
    Finished(DiscoveryReport),
}

/// State threaded through the rounds of one run
#[derive(Debug, Default)]
struct DiscoveryState {
    visited: BTreeSet<DeviceId>,
    discovered: DiscoveredDevices,
    /// Devices whose interfaces were already listed
    described: BTreeSet<DeviceId>,
    /// Devices on which discovery protocols were switched on
    toggled: BTreeSet<DeviceId>,
    proxies: BTreeSet<String>,
}

/// Discovery scanner service
pub struct DiscoveryScanner {
    config: ScannerConfig,
    agent: Arc<dyn DeviceAgent>,
    event_tx: broadcast::Sender<DiscoveryEvent>,
}

impl DiscoveryScanner {
    /// Create a new scanner with the given configuration and device agent
    pub fn new(config: ScannerConfig, agent: Arc<dyn DeviceAgent>) -> Self {
        let (event_tx, _) = broadcast::channel(100);
        Self {
            config,
            agent,
            event_tx,
        }
    }

    pub fn config(&self) -> &ScannerConfig {
        &self.config
    }

    /// Subscribe to discovery events
    pub fn subscribe(&self) -> broadcast::Receiver<DiscoveryEvent> {
        self.event_tx.subscribe()
    }

    /// Discover devices and links starting from the devices already in `topology`
    ///
    /// Per-device failures are logged and treated as "no data". Only graph
    /// inconsistencies abort the run.
    pub async fn run(&self, topology: &mut Topology) -> Result<DiscoveryReport, DiscoveryError> {
        if self.config.timeout.is_zero() {
            return Err(ConfigError::ZeroTimeout.into());
        }

        let mut state = DiscoveryState {
            proxies: known_proxies(topology),
            ..Default::default()
        };
        let mut report = DiscoveryReport {
            outcome: Outcome::Converged,
            rounds: 0,
            devices_added: Vec::new(),
            links_created: 0,
            links_extended: 0,
            devices_visited: 0,
            addresses_resolved: 0,
        };

        info!(
            devices = topology.device_count(),
            proxies = state.proxies.len(),
            only_links = self.config.only_links,
            "Starting discovery"
        );

        loop {
            let frontier: Vec<Device> = topology
                .devices()
                .filter(|device| !state.visited.contains(&device.id))
                .cloned()
                .collect();
            if frontier.is_empty() {
                break;
            }

            report.rounds += 1;
            let round = report.rounds;
            let _ = self.event_tx.send(DiscoveryEvent::RoundStarted {
                round,
                frontier: frontier.len(),
            });
            info!(round, frontier = frontier.len(), "Discovery round started");

            state
                .visited
                .extend(frontier.iter().map(|device| device.id.clone()));
            self.process_round(topology, &mut state, frontier, round, &mut report)
                .await?;

            if self.config.only_links {
                report.outcome = Outcome::LinksOnlyStop;
                break;
            }
            debug!(round, "Looping to check newly discovered devices");
        }

        report.addresses_resolved = self.resolve_addresses(topology).await;
        self.restore_discovery(topology, &state).await;
        report.devices_visited = state.visited.len();

        info!(
            rounds = report.rounds,
            added = report.devices_added.len(),
            links_created = report.links_created,
            links_extended = report.links_extended,
            outcome = ?report.outcome,
            "Discovery finished"
        );
        let _ = self.event_tx.send(DiscoveryEvent::Finished(report.clone()));
        Ok(report)
    }

    async fn process_round(
        &self,
        topology: &mut Topology,
        state: &mut DiscoveryState,
        frontier: Vec<Device>,
        round: usize,
        report: &mut DiscoveryReport,
    ) -> Result<(), DiscoveryError> {
        let reachable = self.connect(frontier).await;
        if self.config.config_discovery {
            self.enable_discovery(&reachable, state).await;
        }
        let reports = self.fetch_neighbors(reachable).await;

        // Single-threaded merge: every fetch of the round is in
        let mut connections = RoundConnections::new();
        {
            let merger =
                NeighborMerger::new(topology, &self.config.exclusions, self.config.only_links);
            for (device, neighbors) in &reports {
                let record = merger.merge(device, neighbors, &mut state.discovered);
                if !record.is_empty() {
                    connections.insert(device.clone(), record);
                }
            }
        }
        for (device, record) in &connections {
            adopt_local_interfaces(topology, device, record)?;
        }

        let added = instantiate_devices(topology, &state.discovered, &state.proxies)?;
        for device in &added {
            let _ = self.event_tx.send(DiscoveryEvent::DeviceAdded(device.clone()));
        }
        self.reconcile_interfaces(topology, state, &added).await?;

        let stats = commit_links(topology, &connections)?;
        for link in stats.created.iter().chain(stats.extended.iter()) {
            let link = topology.link(*link);
            let _ = self.event_tx.send(DiscoveryEvent::LinkCommitted {
                name: link.name.clone(),
                members: link.members().len(),
            });
        }

        info!(
            round,
            connections = connections.values().map(|r| r.connection_count()).sum::<usize>(),
            added = added.len(),
            links_created = stats.created.len(),
            links_extended = stats.extended.len(),
            "Discovery round completed"
        );
        let _ = self.event_tx.send(DiscoveryEvent::RoundCompleted {
            round,
            devices_added: added.len(),
            links_created: stats.created.len(),
            links_extended: stats.extended.len(),
        });

        report.links_created += stats.created.len();
        report.links_extended += stats.extended.len();
        report.devices_added.extend(added);
        Ok(())
    }

    /// Open sessions; devices that cannot be reached contribute nothing this run
    async fn connect(&self, frontier: Vec<Device>) -> Vec<Device> {
        let aliases = self.config.aliases.clone();
        let protocol = self.config.connection_protocol.clone();
        let results = fan_out(&self.agent, frontier, self.config.timeout, move |agent, device| {
            let policy = ConnectPolicy {
                alias: aliases.get(device.name()).cloned(),
                protocol: protocol.clone(),
            };
            async move {
                agent.connect(&device, &policy).await?;
                Ok::<_, AgentError>(device)
            }
        })
        .await;

        let mut reachable = Vec::with_capacity(results.len());
        for (id, result) in results {
            match result {
                Ok(device) => reachable.push(device),
                Err(e) => warn!(device = %id, error = %e, "Failed to connect, skipping device"),
            }
        }
        reachable.sort_by(|a, b| a.id.cmp(&b.id));
        reachable
    }

    async fn enable_discovery(&self, devices: &[Device], state: &mut DiscoveryState) {
        let limit = self.config.timeout;
        let results = fan_out(&self.agent, devices.to_vec(), limit, |agent, device| async move {
            agent.enable_discovery(&device).await
        })
        .await;

        for (id, result) in results {
            match result {
                Ok(true) => {
                    debug!(device = %id, "Discovery protocols enabled");
                    state.toggled.insert(id);
                }
                Ok(false) => {}
                Err(e) => warn!(device = %id, error = %e, "Failed to enable discovery protocols"),
            }
        }
    }

    /// Neighbor reports of the reachable devices, in device order
    async fn fetch_neighbors(&self, devices: Vec<Device>) -> Vec<(DeviceId, NeighborReport)> {
        let limit = self.config.timeout;
        let results = fan_out(&self.agent, devices, limit, |agent, device| async move {
            let raw = agent.neighbor_data(&device).await?;
            let report = NeighborReport::parse(&raw)?;
            Ok::<_, AgentError>(report)
        })
        .await;

        let mut reports: Vec<(DeviceId, NeighborReport)> = results
            .into_iter()
            .map(|(id, result)| match result {
                Ok(report) => (id, report),
                Err(e) => {
                    warn!(device = %id, error = %e, "No neighbor data, treating as no connections");
                    (id, NeighborReport::default())
                }
            })
            .collect();
        reports.sort_by(|a, b| a.0.cmp(&b.0));
        reports
    }

    /// Give devices already in the graph the interfaces they were seen on
    ///
    /// With `add_unconnected_interfaces`, every interface the device lists is
    /// added once per run as well.
    async fn reconcile_interfaces(
        &self,
        topology: &mut Topology,
        state: &mut DiscoveryState,
        added: &[DeviceId],
    ) -> Result<(), TopologyError> {
        let existing: Vec<DeviceId> = state
            .discovered
            .iter()
            .map(|(id, _)| id)
            .filter(|id| !added.contains(*id) && topology.contains_device(id.as_str()))
            .cloned()
            .collect();

        if self.config.add_unconnected_interfaces {
            let to_describe: Vec<Device> = existing
                .iter()
                .filter(|id| !state.described.contains(*id))
                .filter_map(|id| topology.device(id.as_str()).cloned())
                .collect();
            let limit = self.config.timeout;
            let results = fan_out(&self.agent, to_describe, limit, |agent, device| async move {
                describe_interfaces(agent.as_ref(), &device).await
            })
            .await;

            for (id, result) in results {
                match result {
                    Ok(names) => {
                        let names = names.iter().map(String::as_str);
                        let count = add_interfaces(topology, &id, names)?;
                        debug!(device = %id, added = count, "Interfaces listed");
                    }
                    Err(e) => warn!(
                        device = %id,
                        error = %e,
                        "Failed to list interfaces, using discovered ports"
                    ),
                }
                state.described.insert(id);
            }
        }

        for id in &existing {
            if let Some(record) = state.discovered.get(id) {
                add_interfaces(topology, id, record.ports.iter().map(String::as_str))?;
            }
        }
        Ok(())
    }

    /// Final pass: interface IPv4 addresses for every device in the graph
    async fn resolve_addresses(&self, topology: &mut Topology) -> usize {
        let devices: Vec<Device> = topology.devices().cloned().collect();
        let limit = self.config.timeout;
        let results = fan_out(&self.agent, devices, limit, |agent, device| async move {
            agent.interface_ipv4(&device).await
        })
        .await;

        let mut resolved = 0;
        for (id, result) in results {
            match result {
                Ok(addresses) => {
                    for (name, address) in addresses {
                        match topology.interface_id(id.as_str(), &name) {
                            Some(interface) => {
                                topology.set_ipv4(interface, address);
                                resolved += 1;
                            }
                            None => debug!(
                                device = %id,
                                interface = %name,
                                "Address on unknown interface, ignoring"
                            ),
                        }
                    }
                }
                Err(e) => warn!(device = %id, error = %e, "Failed to resolve interface addresses"),
            }
        }
        resolved
    }

    async fn restore_discovery(&self, topology: &Topology, state: &DiscoveryState) {
        if state.toggled.is_empty() {
            return;
        }
        let devices: Vec<Device> = state
            .toggled
            .iter()
            .filter_map(|id| topology.device(id.as_str()).cloned())
            .collect();
        let limit = self.config.timeout;
        let results = fan_out(&self.agent, devices, limit, |agent, device| async move {
            agent.restore_discovery(&device).await
        })
        .await;

        for (id, result) in results {
            match result {
                Ok(()) => debug!(device = %id, "Discovery protocols restored"),
                Err(e) => warn!(device = %id, error = %e, "Failed to restore discovery protocols"),
            }
        }
    }
}

/// List interfaces with the first describe command that works
async fn describe_interfaces(
    agent: &dyn DeviceAgent,
    device: &Device,
) -> Result<Vec<String>, AgentError> {
    let [first, second] = DESCRIBE_INTERFACE_COMMANDS;
    match agent.describe_interfaces(device, first).await {
        Ok(names) => Ok(names),
        Err(e) => {
            debug!(
                device = %device.id,
                command = first,
                error = %e,
                "Describe failed, trying alternative"
            );
            agent.describe_interfaces(device, second).await
        }
    }
}
