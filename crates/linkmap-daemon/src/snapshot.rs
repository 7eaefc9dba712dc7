//! Device agent that replays captured device output
//!
//! Each device is served from `<dir>/<device>.json`:
//!
//! ```json
//! {
//!   "cdp": { "index": { ... } },
//!   "lldp": { "total_entries": 0 },
//!   "ipv4": { "GigabitEthernet0/1": "10.1.0.1/30" },
//!   "interfaces": ["GigabitEthernet0/1", "Loopback0"]
//! }
//! ```
//!
//! Every field is optional. A device without a snapshot file is unreachable.

use async_trait::async_trait;
use ipnetwork::Ipv4Network;
use linkmap_core::Device;
use linkmap_discovery::{AgentError, ConnectPolicy, DeviceAgent, RawNeighborData};
use serde::Deserialize;
use serde_json::Value;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

#[derive(Debug, Default, Deserialize)]
struct DeviceSnapshot {
    #[serde(default)]
    cdp: Option<Value>,
    #[serde(default)]
    lldp: Option<Value>,
    #[serde(default)]
    ipv4: BTreeMap<String, String>,
    #[serde(default)]
    interfaces: Option<Vec<String>>,
}

pub struct SnapshotAgent {
    dir: PathBuf,
}

impl SnapshotAgent {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn snapshot_path(&self, device: &Device) -> PathBuf {
        self.dir.join(format!("{}.json", device.name()))
    }

    async fn load(&self, device: &Device) -> Result<DeviceSnapshot, AgentError> {
        let path = self.snapshot_path(device);
        let content = tokio::fs::read_to_string(&path).await.map_err(|e| {
            AgentError::Unreachable(device.name().to_string(), format!("{}: {}", path.display(), e))
        })?;
        serde_json::from_str(&content).map_err(|e| AgentError::CommandFailed {
            device: device.name().to_string(),
            command: "load snapshot".to_string(),
            reason: e.to_string(),
        })
    }
}

#[async_trait]
impl DeviceAgent for SnapshotAgent {
    async fn connect(&self, device: &Device, policy: &ConnectPolicy) -> Result<(), AgentError> {
        if let Some(protocol) = &policy.protocol {
            let usable = device.connections.is_empty()
                || device
                    .connections
                    .values()
                    .any(|conn| conn.protocol.as_deref() == Some(protocol.as_str()));
            if !usable {
                return Err(AgentError::Unreachable(
                    device.name().to_string(),
                    format!("no {} connection", protocol),
                ));
            }
        }
        if let Some(alias) = &policy.alias {
            if !device.connections.contains_key(alias) {
                warn!(
                    device = %device.id,
                    alias = %alias,
                    "Connection alias not found, using default"
                );
            }
        }

        let path = self.snapshot_path(device);
        if !tokio::fs::try_exists(&path).await.unwrap_or(false) {
            return Err(AgentError::Unreachable(
                device.name().to_string(),
                format!("no snapshot at {}", path.display()),
            ));
        }
        debug!(device = %device.id, path = %path.display(), "Snapshot session opened");
        Ok(())
    }

    async fn neighbor_data(&self, device: &Device) -> Result<RawNeighborData, AgentError> {
        let snapshot = self.load(device).await?;
        if snapshot.cdp.is_none() && snapshot.lldp.is_none() {
            return Err(AgentError::NoData(device.name().to_string()));
        }
        Ok(RawNeighborData {
            cdp: snapshot.cdp,
            lldp: snapshot.lldp,
        })
    }

    async fn interface_ipv4(
        &self,
        device: &Device,
    ) -> Result<BTreeMap<String, Ipv4Network>, AgentError> {
        let snapshot = self.load(device).await?;
        let mut addresses = BTreeMap::new();
        for (interface, raw) in snapshot.ipv4 {
            match raw.parse::<Ipv4Network>() {
                Ok(address) => {
                    addresses.insert(interface, address);
                }
                Err(e) => warn!(
                    device = %device.id,
                    interface = %interface,
                    value = %raw,
                    error = %e,
                    "Invalid IPv4 address in snapshot"
                ),
            }
        }
        Ok(addresses)
    }

    async fn describe_interfaces(
        &self,
        device: &Device,
        command: &str,
    ) -> Result<Vec<String>, AgentError> {
        self.load(device)
            .await?
            .interfaces
            .ok_or_else(|| AgentError::CommandFailed {
                device: device.name().to_string(),
                command: command.to_string(),
                reason: "no interface list captured".to_string(),
            })
    }

    /// Snapshots are read-only: nothing to enable
    async fn enable_discovery(&self, _device: &Device) -> Result<bool, AgentError> {
        Ok(false)
    }

    async fn restore_discovery(&self, _device: &Device) -> Result<(), AgentError> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use linkmap_core::{ConnectionSpec, DeviceId};
    use linkmap_discovery::DESCRIBE_INTERFACE_COMMANDS;
    use tempfile::TempDir;

    fn write(dir: &TempDir, name: &str, content: &str) {
        std::fs::write(dir.path().join(format!("{}.json", name)), content).unwrap();
    }

    fn device(name: &str) -> Device {
        Device::new(DeviceId::from(name), "router")
    }

    #[tokio::test]
    async fn test_missing_snapshot_is_unreachable() {
        let dir = TempDir::new().unwrap();
        let agent = SnapshotAgent::new(dir.path());
        assert!(matches!(
            agent.connect(&device("r1"), &ConnectPolicy::default()).await,
            Err(AgentError::Unreachable(..))
        ));
    }

    #[tokio::test]
    async fn test_serves_neighbor_data() {
        let dir = TempDir::new().unwrap();
        write(
            &dir,
            "r1",
            r#"{"cdp": {"index": {}}, "lldp": {"total_entries": 0}, "interfaces": ["Gi0/1"]}"#,
        );
        write(&dir, "r2", r#"{"interfaces": []}"#);
        let agent = SnapshotAgent::new(dir.path());

        agent.connect(&device("r1"), &ConnectPolicy::default()).await.unwrap();
        let raw = agent.neighbor_data(&device("r1")).await.unwrap();
        assert!(raw.cdp.is_some());
        assert!(raw.lldp.is_some());

        assert!(matches!(
            agent.neighbor_data(&device("r2")).await,
            Err(AgentError::NoData(_))
        ));
        assert_eq!(
            agent
                .describe_interfaces(&device("r1"), DESCRIBE_INTERFACE_COMMANDS[0])
                .await
                .unwrap(),
            vec!["Gi0/1".to_string()]
        );
    }

    #[tokio::test]
    async fn test_ipv4_skips_invalid_entries() {
        let dir = TempDir::new().unwrap();
        write(
            &dir,
            "r1",
            r#"{"ipv4": {"Gi0/1": "10.1.0.1/30", "Gi0/2": "banana"}}"#,
        );
        let agent = SnapshotAgent::new(dir.path());

        let addresses = agent.interface_ipv4(&device("r1")).await.unwrap();
        assert_eq!(addresses.len(), 1);
        assert_eq!(addresses["Gi0/1"].prefix(), 30);
        assert!(agent.describe_interfaces(&device("r1"), "show x").await.is_err());
    }

    #[tokio::test]
    async fn test_protocol_restriction() {
        let dir = TempDir::new().unwrap();
        write(&dir, "r1", "{}");
        let agent = SnapshotAgent::new(dir.path());
        let policy = ConnectPolicy {
            alias: None,
            protocol: Some("ssh".to_string()),
        };

        let mut telnet_only = device("r1");
        let mut telnet = ConnectionSpec::default();
        telnet.protocol = Some("telnet".to_string());
        telnet_only.connections.insert("console".to_string(), telnet);
        assert!(agent.connect(&telnet_only, &policy).await.is_err());

        let mut with_ssh = telnet_only.clone();
        with_ssh
            .connections
            .insert("cli".to_string(), ConnectionSpec::ssh("10.0.0.1", None));
        assert!(agent.connect(&with_ssh, &policy).await.is_ok());
    }

    #[tokio::test]
    async fn test_malformed_snapshot() {
        let dir = TempDir::new().unwrap();
        write(&dir, "r1", "not json");
        let agent = SnapshotAgent::new(dir.path());
        assert!(matches!(
            agent.neighbor_data(&device("r1")).await,
            Err(AgentError::CommandFailed { .. })
        ));
    }
}
