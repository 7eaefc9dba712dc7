//! Testbed document parsing, projection into the graph and merge-back
//!
//! A testbed is a YAML document with a `devices` section (how to reach each
//! device) and an optional `topology` section (interfaces and the links they
//! belong to). Sections and keys this crate does not model are kept as-is so
//! the document can be written back without losing anything.

use ipnetwork::Ipv4Network;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::Path;
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::device::{ConnectionSpec, Credentials, Device, DeviceId, OsTag};
use crate::topology::{interface_type, InterfaceId, Topology, TopologyError};

/// Connection key holding the default connection selection
pub const DEFAULTS_CONNECTION: &str = "defaults";

#[derive(Error, Debug)]
pub enum TestbedError {
    #[error("Failed to parse testbed: {0}")]
    ParseError(#[from] serde_yaml::Error),
    #[error("Failed to serialize testbed: {0}")]
    SerializeError(String),
    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),
    #[error("Invalid testbed structure: {0}")]
    ValidationError(String),
}

impl From<TopologyError> for TestbedError {
    fn from(err: TopologyError) -> Self {
        Self::ValidationError(err.to_string())
    }
}

/// A device entry under `devices:`
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DeviceEntry {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub os: Option<OsTag>,
    #[serde(rename = "type", default, skip_serializing_if = "Option::is_none")]
    pub device_type: Option<String>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub credentials: Credentials,
    #[serde(default)]
    pub connections: BTreeMap<String, ConnectionSpec>,
    #[serde(flatten)]
    pub extra: BTreeMap<String, serde_yaml::Value>,
}

/// An interface entry under `topology.<device>.interfaces:`
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct InterfaceEntry {
    #[serde(rename = "type", default, skip_serializing_if = "Option::is_none")]
    pub kind: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub link: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ipv4: Option<String>,
    #[serde(flatten)]
    pub extra: BTreeMap<String, serde_yaml::Value>,
}

/// Per-device entry under `topology:`
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TopologyEntry {
    #[serde(default)]
    pub interfaces: BTreeMap<String, InterfaceEntry>,
    #[serde(flatten)]
    pub extra: BTreeMap<String, serde_yaml::Value>,
}

/// A testbed document
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TestbedDocument {
    #[serde(default)]
    pub devices: BTreeMap<String, DeviceEntry>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub topology: Option<BTreeMap<String, TopologyEntry>>,
    /// `testbed:` and any other top-level section
    #[serde(flatten)]
    pub extra: BTreeMap<String, serde_yaml::Value>,
}

impl TestbedDocument {
    /// Parse a testbed from a YAML string
    pub fn from_yaml(yaml: &str) -> Result<Self, TestbedError> {
        Ok(serde_yaml::from_str(yaml)?)
    }

    /// Parse a testbed from a file
    pub fn from_file(path: &Path) -> Result<Self, TestbedError> {
        let content = std::fs::read_to_string(path)?;
        let document = Self::from_yaml(&content)?;
        info!(
            path = %path.display(),
            devices = document.devices.len(),
            "Loaded testbed"
        );
        Ok(document)
    }

    /// Serialize to a YAML string
    pub fn to_yaml(&self) -> Result<String, TestbedError> {
        serde_yaml::to_string(self).map_err(|e| TestbedError::SerializeError(e.to_string()))
    }

    /// Write to file
    pub fn to_file(&self, path: &Path) -> Result<(), TestbedError> {
        let yaml = self.to_yaml()?;
        std::fs::write(path, yaml)?;
        Ok(())
    }

    /// Build the graph described by this document
    pub fn to_topology(&self) -> Result<Topology, TestbedError> {
        let mut topology = Topology::new();

        for (name, entry) in &self.devices {
            let mut device = Device::new(
                DeviceId::new(name.clone()),
                entry.device_type.clone().unwrap_or_default(),
            );
            device.os = entry.os.clone();
            device.credentials = entry.credentials.clone();
            device.connections = entry
                .connections
                .iter()
                .filter(|(key, _)| key.as_str() != DEFAULTS_CONNECTION)
                .map(|(key, conn)| (key.clone(), conn.clone()))
                .collect();
            topology.add_device(device);
        }

        let Some(sections) = &self.topology else {
            return Ok(topology);
        };

        // Interfaces first, then links grouped by the name each interface refers to
        let mut members: BTreeMap<&str, Vec<InterfaceId>> = BTreeMap::new();
        for (device, section) in sections {
            if !topology.contains_device(device) {
                return Err(TestbedError::ValidationError(format!(
                    "topology references unknown device {}",
                    device
                )));
            }
            for (name, entry) in &section.interfaces {
                let kind = entry
                    .kind
                    .clone()
                    .unwrap_or_else(|| interface_type(name));
                let id = topology.add_interface(device, name, kind)?;

                if let Some(ipv4) = &entry.ipv4 {
                    match ipv4.parse::<Ipv4Network>() {
                        Ok(address) => topology.set_ipv4(id, address),
                        Err(e) => warn!(
                            device = %device,
                            interface = %name,
                            error = %e,
                            "Ignoring unparseable ipv4 address"
                        ),
                    }
                }
                if let Some(link) = &entry.link {
                    members.entry(link.as_str()).or_default().push(id);
                }
            }
        }

        for (link, ids) in members {
            topology.insert_link(link, &ids)?;
        }

        debug!(
            devices = topology.device_count(),
            interfaces = topology.interface_count(),
            links = topology.link_count(),
            "Projected testbed into topology"
        );
        Ok(topology)
    }

    /// Merge a graph into this document without overwriting anything present
    ///
    /// Devices missing from `devices:` are added with their type, os,
    /// credentials and connections. Interfaces missing from `topology:` are
    /// added; existing interface entries only gain fields they lack.
    pub fn merge_topology(&mut self, topology: &Topology) {
        for device in topology.devices() {
            if !self.devices.contains_key(device.name()) {
                info!(device = %device.id, "Adding device to testbed");
                self.devices
                    .insert(device.name().to_string(), device_entry(device));
            }

            let sections = self.topology.get_or_insert_with(BTreeMap::new);
            let section = sections.entry(device.name().to_string()).or_default();
            for interface in topology.interfaces_of(device.name()) {
                let discovered = InterfaceEntry {
                    kind: Some(interface.kind.clone()),
                    link: interface
                        .link
                        .map(|link| topology.link(link).name.clone()),
                    ipv4: interface.ipv4.map(|net| net.to_string()),
                    extra: BTreeMap::new(),
                };
                let entry = section
                    .interfaces
                    .entry(interface.name.clone())
                    .or_default();
                fill_missing(entry, discovered);
            }
        }
    }
}

fn device_entry(device: &Device) -> DeviceEntry {
    let mut connections = device.connections.clone();
    if let Some(last) = device.connections.keys().next_back() {
        let mut defaults = ConnectionSpec::default();
        defaults.extra.insert(
            "via".to_string(),
            serde_yaml::Value::String(last.clone()),
        );
        connections.insert(DEFAULTS_CONNECTION.to_string(), defaults);
    }

    DeviceEntry {
        os: device.os.clone(),
        device_type: Some(device.device_type.clone()),
        credentials: device.credentials.clone(),
        connections,
        extra: BTreeMap::new(),
    }
}

fn fill_missing(entry: &mut InterfaceEntry, discovered: InterfaceEntry) {
    if entry.kind.is_none() {
        entry.kind = discovered.kind;
    }
    if entry.link.is_none() {
        entry.link = discovered.link;
    }
    if entry.ipv4.is_none() {
        entry.ipv4 = discovered.ipv4;
    }
}
