//! linkmap Core - Graph types and testbed handling
//!
//! This crate provides the foundational types for linkmap:
//! - Device model (OS tag, credentials, connection specs and proxy chains)
//! - Topology graph of devices, interfaces and links
//! - Testbed document parsing, projection into the graph and merge-back

pub mod device;
pub mod testbed;
pub mod topology;

pub use device::{
    ConnectionSpec, Credential, Credentials, Device, DeviceId, OsTag, Proxy, ProxyHop,
    DISCOVERED_DEVICE_TYPE,
};
pub use testbed::{TestbedDocument, TestbedError};
pub use topology::{interface_type, Interface, InterfaceId, Link, LinkId, Topology, TopologyError};
