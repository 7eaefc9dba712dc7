//! Device types for the topology graph

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use crate::topology::InterfaceId;

/// Unique identifier for a device: its canonical host name
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct DeviceId(pub String);

impl DeviceId {
    pub fn new(name: impl Into<String>) -> Self {
        Self(name.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for DeviceId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<&str> for DeviceId {
    fn from(name: &str) -> Self {
        Self(name.to_string())
    }
}

/// Operating system tag of a device
///
/// Discovery only ever produces the four supported tags. Devices loaded from a
/// testbed may carry any other value, which is kept verbatim in `Other`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum OsTag {
    Nxos,
    Iosxr,
    Iosxe,
    Ios,
    Other(String),
}

impl OsTag {
    pub fn as_str(&self) -> &str {
        match self {
            Self::Nxos => "nxos",
            Self::Iosxr => "iosxr",
            Self::Iosxe => "iosxe",
            Self::Ios => "ios",
            Self::Other(os) => os,
        }
    }
}

impl From<String> for OsTag {
    fn from(os: String) -> Self {
        match os.as_str() {
            "nxos" => Self::Nxos,
            "iosxr" => Self::Iosxr,
            "iosxe" => Self::Iosxe,
            "ios" => Self::Ios,
            _ => Self::Other(os),
        }
    }
}

impl From<OsTag> for String {
    fn from(os: OsTag) -> Self {
        os.as_str().to_string()
    }
}

impl std::fmt::Display for OsTag {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A single named credential (`default`, `enable`, ...)
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Credential {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub username: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub password: Option<serde_yaml::Value>,
    /// Anything else the testbed carries for this credential
    #[serde(flatten)]
    pub extra: BTreeMap<String, serde_yaml::Value>,
}

/// Credentials keyed by their name
pub type Credentials = BTreeMap<String, Credential>;

/// One hop of a multi-hop proxy chain
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProxyHop {
    pub device: String,
    pub command: String,
}

/// How a connection is proxied: through a single named device or a chain of hops
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Proxy {
    Device(String),
    Chain(Vec<ProxyHop>),
}

/// A way of reaching a device
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ConnectionSpec {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub protocol: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ip: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub port: Option<u16>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub proxy: Option<Proxy>,
    #[serde(flatten)]
    pub extra: BTreeMap<String, serde_yaml::Value>,
}

impl ConnectionSpec {
    /// SSH connection to `ip`, optionally through `proxy`
    pub fn ssh(ip: impl Into<String>, proxy: Option<Proxy>) -> Self {
        Self {
            protocol: Some("ssh".to_string()),
            ip: Some(ip.into()),
            port: None,
            proxy,
            extra: BTreeMap::new(),
        }
    }

    pub fn is_ssh(&self) -> bool {
        self.protocol.as_deref() == Some("ssh")
    }
}

/// Type assigned to devices created by discovery
pub const DISCOVERED_DEVICE_TYPE: &str = "device";

/// A device (graph node)
///
/// Interfaces live in the owning [`Topology`](crate::Topology) arena; the
/// device only keeps their ids keyed by interface name.
#[derive(Debug, Clone)]
pub struct Device {
    /// Canonical device name
    pub id: DeviceId,
    /// Operating system, when known
    pub os: Option<OsTag>,
    /// Device type (`router`, `switch`, `device`, ...)
    pub device_type: String,
    /// Credentials used to log in
    pub credentials: Credentials,
    /// Named connection specs, in name order
    pub connections: BTreeMap<String, ConnectionSpec>,
    pub(crate) interfaces: BTreeMap<String, InterfaceId>,
}

impl Device {
    /// Create a device without interfaces or connections
    pub fn new(id: DeviceId, device_type: impl Into<String>) -> Self {
        Self {
            id,
            os: None,
            device_type: device_type.into(),
            credentials: Credentials::new(),
            connections: BTreeMap::new(),
            interfaces: BTreeMap::new(),
        }
    }

    pub fn name(&self) -> &str {
        self.id.as_str()
    }

    /// Id of the named interface, if the device owns it
    pub fn interface(&self, name: &str) -> Option<InterfaceId> {
        self.interfaces.get(name).copied()
    }

    pub fn has_interface(&self, name: &str) -> bool {
        self.interfaces.contains_key(name)
    }

    /// Names of all owned interfaces, sorted
    pub fn interface_names(&self) -> impl Iterator<Item = &str> {
        self.interfaces.keys().map(String::as_str)
    }

    pub fn interface_ids(&self) -> impl Iterator<Item = InterfaceId> + '_ {
        self.interfaces.values().copied()
    }

    /// Username of the `default` credential
    pub fn default_username(&self) -> Option<&str> {
        self.credentials
            .get("default")
            .and_then(|c| c.username.as_deref())
    }

    /// First SSH connection that is itself proxied
    pub fn proxied_ssh_connection(&self) -> Option<&ConnectionSpec> {
        self.connections
            .values()
            .find(|c| c.is_ssh() && c.proxy.is_some())
    }
}
