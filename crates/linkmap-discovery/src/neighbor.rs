//! CDP and LLDP neighbor records
//!
//! Collaborators hand over parser output as loosely shaped JSON. It is
//! validated once here into strict records; everything downstream works on
//! [`CdpNeighbor`] and [`LldpNeighbor`] only.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::{BTreeMap, BTreeSet};
use thiserror::Error;
use tracing::warn;

#[derive(Error, Debug)]
pub enum NeighborError {
    #[error("Malformed CDP neighbor data: {0}")]
    Cdp(serde_json::Error),
    #[error("Malformed LLDP neighbor data: {0}")]
    Lldp(serde_json::Error),
}

/// Neighbor data as returned by a device agent
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RawNeighborData {
    #[serde(default)]
    pub cdp: Option<Value>,
    #[serde(default)]
    pub lldp: Option<Value>,
}

/// One CDP neighbor entry
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CdpNeighbor {
    pub device_id: String,
    pub system_name: Option<String>,
    pub local_interface: String,
    pub port_id: String,
    pub platform: String,
    pub software_version: String,
    pub management_addresses: BTreeSet<String>,
    pub interface_addresses: BTreeSet<String>,
}

impl CdpNeighbor {
    /// Advertised host name: the system name when present, otherwise the device id
    pub fn host_name(&self) -> &str {
        match self.system_name.as_deref() {
            Some(name) if !name.is_empty() => name,
            _ => &self.device_id,
        }
    }
}

/// One LLDP neighbor seen on a local interface
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LldpNeighbor {
    pub local_interface: String,
    pub port_id: String,
    /// Neighbor system name, as advertised
    pub system_name: String,
    pub system_description: String,
    pub management_address: Option<String>,
}

/// Validated neighbor data for one device
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct NeighborReport {
    pub cdp: Vec<CdpNeighbor>,
    pub lldp: Vec<LldpNeighbor>,
}

impl NeighborReport {
    /// Validate raw collaborator data
    ///
    /// Missing or null protocol sections and an LLDP table reporting zero
    /// entries yield no neighbors for that protocol.
    pub fn parse(raw: &RawNeighborData) -> Result<Self, NeighborError> {
        let cdp = match &raw.cdp {
            Some(value) if !is_empty(value) => {
                let table: RawCdpTable =
                    serde_json::from_value(value.clone()).map_err(NeighborError::Cdp)?;
                table.into_neighbors()
            }
            _ => Vec::new(),
        };

        let lldp = match &raw.lldp {
            Some(value) if !is_empty(value) && !reports_no_entries(value) => {
                let table: RawLldpTable =
                    serde_json::from_value(value.clone()).map_err(NeighborError::Lldp)?;
                table.into_neighbors()
            }
            _ => Vec::new(),
        };

        Ok(Self { cdp, lldp })
    }

    pub fn is_empty(&self) -> bool {
        self.cdp.is_empty() && self.lldp.is_empty()
    }
}

fn is_empty(value: &Value) -> bool {
    match value {
        Value::Null => true,
        Value::Object(map) => map.is_empty(),
        Value::Array(items) => items.is_empty(),
        _ => false,
    }
}

/// LLDP tables announce an explicit `total_entries: 0` when there are no neighbors
fn reports_no_entries(value: &Value) -> bool {
    value.get("total_entries").and_then(Value::as_u64) == Some(0)
}

/// Addresses come either as a list or as a map keyed by address
#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum AddressField {
    List(Vec<String>),
    Keys(BTreeMap<String, Value>),
}

impl From<AddressField> for BTreeSet<String> {
    fn from(field: AddressField) -> Self {
        match field {
            AddressField::List(items) => items.into_iter().collect(),
            AddressField::Keys(map) => map.into_keys().collect(),
        }
    }
}

#[derive(Debug, Deserialize)]
struct RawCdpTable {
    #[serde(default)]
    index: BTreeMap<u64, RawCdpEntry>,
}

#[derive(Debug, Deserialize)]
struct RawCdpEntry {
    device_id: String,
    #[serde(default)]
    system_name: Option<String>,
    local_interface: String,
    port_id: String,
    #[serde(default)]
    platform: Option<String>,
    #[serde(default)]
    software_version: Option<String>,
    #[serde(default)]
    management_addresses: Option<AddressField>,
    #[serde(default)]
    interface_addresses: Option<AddressField>,
}

impl RawCdpTable {
    fn into_neighbors(self) -> Vec<CdpNeighbor> {
        self.index
            .into_values()
            .map(|entry| CdpNeighbor {
                device_id: entry.device_id,
                system_name: entry.system_name,
                local_interface: entry.local_interface,
                port_id: entry.port_id,
                platform: entry.platform.unwrap_or_default(),
                software_version: entry.software_version.unwrap_or_default(),
                management_addresses: entry
                    .management_addresses
                    .map(Into::into)
                    .unwrap_or_default(),
                interface_addresses: entry.interface_addresses.map(Into::into).unwrap_or_default(),
            })
            .collect()
    }
}

#[derive(Debug, Deserialize)]
struct RawLldpTable {
    #[serde(default)]
    interfaces: BTreeMap<String, RawLldpInterface>,
}

#[derive(Debug, Deserialize)]
struct RawLldpInterface {
    #[serde(default)]
    port_id: BTreeMap<String, RawLldpPort>,
}

#[derive(Debug, Deserialize)]
struct RawLldpPort {
    #[serde(default)]
    neighbors: BTreeMap<String, RawLldpNeighbor>,
}

#[derive(Debug, Deserialize)]
struct RawLldpNeighbor {
    #[serde(default)]
    system_description: Option<String>,
    #[serde(default)]
    management_address_v4: Option<String>,
    #[serde(default)]
    management_address: Option<String>,
}

impl RawLldpTable {
    fn into_neighbors(self) -> Vec<LldpNeighbor> {
        let mut neighbors = Vec::new();
        for (local_interface, interface) in self.interfaces {
            for (port_id, port) in interface.port_id {
                if port.neighbors.len() > 1 {
                    warn!(
                        interface = %local_interface,
                        port = %port_id,
                        count = port.neighbors.len(),
                        "Expected one LLDP neighbor per port, using the first"
                    );
                }
                let Some((system_name, neighbor)) = port.neighbors.into_iter().next() else {
                    warn!(
                        interface = %local_interface,
                        port = %port_id,
                        "LLDP port without neighbor, skipping"
                    );
                    continue;
                };
                neighbors.push(LldpNeighbor {
                    local_interface: local_interface.clone(),
                    port_id,
                    system_name,
                    system_description: neighbor.system_description.unwrap_or_default(),
                    management_address: neighbor
                        .management_address_v4
                        .or(neighbor.management_address),
                });
            }
        }
        neighbors
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_parse_cdp() {
        let raw = RawNeighborData {
            cdp: Some(json!({
                "total_entries_displayed": 2,
                "index": {
                    "2": {
                        "device_id": "leaf2(FOC123)",
                        "local_interface": "GigabitEthernet0/2",
                        "port_id": "Ethernet1/1",
                        "platform": "N9K-C9300",
                        "software_version": "Cisco Nexus Operating System (NX-OS) Software",
                        "management_addresses": ["10.0.0.7"]
                    },
                    "1": {
                        "device_id": "edge1.example.com",
                        "system_name": "",
                        "local_interface": "GigabitEthernet0/1",
                        "port_id": "GigabitEthernet0/2",
                        "platform": "cisco ISR4451",
                        "software_version": "Cisco IOS Software [IOS-XE]",
                        "management_addresses": {"10.0.0.5": {}},
                        "interface_addresses": {"10.0.0.5": {}, "10.1.0.1": {}}
                    }
                }
            })),
            lldp: None,
        };

        let report = NeighborReport::parse(&raw).unwrap();
        assert_eq!(report.cdp.len(), 2);
        assert!(report.lldp.is_empty());

        let first = &report.cdp[0];
        assert_eq!(first.host_name(), "edge1.example.com");
        assert_eq!(first.management_addresses.len(), 1);
        assert!(first.interface_addresses.contains("10.1.0.1"));

        let second = &report.cdp[1];
        assert_eq!(second.local_interface, "GigabitEthernet0/2");
        assert!(second.interface_addresses.is_empty());
    }

    #[test]
    fn test_cdp_missing_required_field() {
        let raw = RawNeighborData {
            cdp: Some(json!({"index": {"1": {"device_id": "x"}}})),
            lldp: None,
        };
        assert!(matches!(
            NeighborReport::parse(&raw),
            Err(NeighborError::Cdp(_))
        ));
    }

    #[test]
    fn test_parse_lldp() {
        let raw = RawNeighborData {
            cdp: None,
            lldp: Some(json!({
                "total_entries": 1,
                "interfaces": {
                    "Ethernet1/1": {
                        "port_id": {
                            "Gi0/3": {
                                "neighbors": {
                                    "spine1.lab": {
                                        "system_description": "Cisco IOS XR Software",
                                        "management_address": "192.0.2.1",
                                        "management_address_v4": "10.9.9.9"
                                    }
                                }
                            },
                            "Gi0/4": {"neighbors": {}}
                        }
                    }
                }
            })),
        };

        let report = NeighborReport::parse(&raw).unwrap();
        assert_eq!(
            report.lldp,
            vec![LldpNeighbor {
                local_interface: "Ethernet1/1".to_string(),
                port_id: "Gi0/3".to_string(),
                system_name: "spine1.lab".to_string(),
                system_description: "Cisco IOS XR Software".to_string(),
                management_address: Some("10.9.9.9".to_string()),
            }]
        );
    }

    #[test]
    fn test_lldp_zero_entries() {
        let raw = RawNeighborData {
            cdp: None,
            lldp: Some(json!({"total_entries": 0, "interfaces": {"bogus": 5}})),
        };
        let report = NeighborReport::parse(&raw).unwrap();
        assert!(report.is_empty());
    }

    #[test]
    fn test_empty_sections() {
        let raw = RawNeighborData {
            cdp: Some(json!({})),
            lldp: Some(Value::Null),
        };
        assert!(NeighborReport::parse(&raw).unwrap().is_empty());
    }
}
