//! Linkmap Discovery - CDP/LLDP driven topology discovery
//!
//! Starting from the devices already in a [`Topology`](linkmap_core::Topology),
//! the scanner asks each unvisited device for its neighbors, merges what they
//! report, adds newly found devices and commits links, and repeats until no
//! unvisited device is left.
//!
//! Device access goes through the [`DeviceAgent`] trait.

pub mod agent;
pub mod builder;
pub mod config;
pub mod fanout;
pub mod filter;
pub mod merge;
pub mod naming;
pub mod neighbor;
pub mod os;
pub mod scanner;

pub use agent::{AgentError, ConnectPolicy, DeviceAgent, DESCRIBE_INTERFACE_COMMANDS};
pub use builder::{commit_links, instantiate_devices, known_proxies, proxy_chain, LinkStats};
pub use config::{parse_aliases, ConfigError, ScannerConfig, DEFAULT_TIMEOUT_SECS};
pub use filter::{is_excluded, parse_networks, ExclusionPolicy};
pub use merge::{
    ConnectionRecord, DiscoveredDevices, NeighborMerger, RemoteEndpoint, RoundConnections,
};
pub use naming::normalize;
pub use neighbor::{CdpNeighbor, LldpNeighbor, NeighborError, NeighborReport, RawNeighborData};
pub use os::classify;
pub use scanner::{DiscoveryError, DiscoveryEvent, DiscoveryReport, DiscoveryScanner, Outcome};
