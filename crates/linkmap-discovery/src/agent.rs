//! Device agent: the seam between discovery and live (or replayed) devices
//!
//! Discovery never talks to devices directly. Every device interaction goes
//! through an implementation of [`DeviceAgent`], which keeps the discovery
//! loop testable against in-memory fakes and captured snapshots.

use async_trait::async_trait;
use ipnetwork::Ipv4Network;
use linkmap_core::Device;
use std::collections::BTreeMap;
use thiserror::Error;

use crate::neighbor::{NeighborError, RawNeighborData};

/// Commands accepted for listing a device's interfaces, in the order tried
pub const DESCRIBE_INTERFACE_COMMANDS: [&str; 2] =
    ["show interfaces description", "show interface description"];

#[derive(Error, Debug)]
pub enum AgentError {
    #[error("Device {0} is unreachable: {1}")]
    Unreachable(String, String),
    #[error("Command '{command}' failed on {device}: {reason}")]
    CommandFailed {
        device: String,
        command: String,
        reason: String,
    },
    #[error("No neighbor data available on {0}")]
    NoData(String),
    #[error("Operation on {0} timed out")]
    Timeout(String),
    #[error("Operation not supported on {0}")]
    Unsupported(String),
    #[error(transparent)]
    Neighbor(#[from] NeighborError),
}

/// How to pick a connection when opening a session to a device
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ConnectPolicy {
    /// Preferred connection alias
    pub alias: Option<String>,
    /// Only use connections of this protocol
    pub protocol: Option<String>,
}

/// Operations discovery needs from a device
///
/// Every method receives a snapshot of the device as it is in the graph.
/// Implementations must be safe to call concurrently for different devices.
#[async_trait]
pub trait DeviceAgent: Send + Sync {
    /// Open (or reuse) a session to the device
    async fn connect(&self, device: &Device, policy: &ConnectPolicy) -> Result<(), AgentError>;

    /// Raw CDP and LLDP neighbor data
    async fn neighbor_data(&self, device: &Device) -> Result<RawNeighborData, AgentError>;

    /// IPv4 address of each interface that has one
    async fn interface_ipv4(
        &self,
        device: &Device,
    ) -> Result<BTreeMap<String, Ipv4Network>, AgentError>;

    /// Interface names reported by one of [`DESCRIBE_INTERFACE_COMMANDS`]
    async fn describe_interfaces(
        &self,
        device: &Device,
        command: &str,
    ) -> Result<Vec<String>, AgentError>;

    /// Turn CDP and LLDP on. Returns true if the device configuration changed.
    async fn enable_discovery(&self, device: &Device) -> Result<bool, AgentError>;

    /// Undo what [`enable_discovery`](Self::enable_discovery) changed
    async fn restore_discovery(&self, device: &Device) -> Result<(), AgentError>;
}
