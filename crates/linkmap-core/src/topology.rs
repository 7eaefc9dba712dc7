//! Topology graph: devices, interfaces and links
//!
//! Interfaces and links are stored in arenas and addressed by id. A link
//! holds the ids of its member interfaces and each interface holds the id of
//! the link it belongs to, so neither owns the other.

use ipnetwork::Ipv4Network;
use std::collections::BTreeMap;
use thiserror::Error;

use crate::device::{Device, DeviceId};

/// Type tag derived from an interface name: the lower-cased part before the
/// first digit (ignoring a leading digit). `Ethernet0/3` becomes `ethernet`.
pub fn interface_type(name: &str) -> String {
    let end = name
        .char_indices()
        .skip(1)
        .find(|(_, c)| c.is_ascii_digit())
        .map(|(i, _)| i)
        .unwrap_or(name.len());
    name[..end].to_lowercase()
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum TopologyError {
    #[error("Unknown device: {0}")]
    UnknownDevice(String),
    #[error("Device {device} has no interface {interface}")]
    UnknownInterface { device: String, interface: String },
    #[error("Interface {interface} already belongs to link {link}")]
    AlreadyLinked { interface: String, link: String },
}

/// Arena index of an interface
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct InterfaceId(usize);

/// Arena index of a link
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct LinkId(usize);

/// An interface, owned by exactly one device
#[derive(Debug, Clone)]
pub struct Interface {
    pub id: InterfaceId,
    /// Owning device
    pub device: DeviceId,
    /// Interface name as reported by the device
    pub name: String,
    /// Type tag (`gigabitethernet`, `ethernet`, ...)
    pub kind: String,
    /// Link this interface is a member of
    pub link: Option<LinkId>,
    /// IPv4 address with prefix, when resolved
    pub ipv4: Option<Ipv4Network>,
}

/// A link joining two or more interfaces
#[derive(Debug, Clone)]
pub struct Link {
    pub id: LinkId,
    pub name: String,
    members: Vec<InterfaceId>,
}

impl Link {
    /// Member interfaces in the order they joined
    pub fn members(&self) -> &[InterfaceId] {
        &self.members
    }

    pub fn contains(&self, interface: InterfaceId) -> bool {
        self.members.contains(&interface)
    }
}

/// Device/interface/link graph
#[derive(Debug, Clone, Default)]
pub struct Topology {
    /// All devices indexed by name
    devices: BTreeMap<String, Device>,
    interfaces: Vec<Interface>,
    links: Vec<Link>,
}

impl Topology {
    /// Create a new empty topology
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a device. Returns false and leaves the graph untouched when a
    /// device with the same name already exists.
    pub fn add_device(&mut self, mut device: Device) -> bool {
        if self.devices.contains_key(device.id.as_str()) {
            return false;
        }
        device.interfaces.clear();
        self.devices.insert(device.id.0.clone(), device);
        true
    }

    pub fn contains_device(&self, name: &str) -> bool {
        self.devices.contains_key(name)
    }

    pub fn device(&self, name: &str) -> Option<&Device> {
        self.devices.get(name)
    }

    pub fn device_mut(&mut self, name: &str) -> Option<&mut Device> {
        self.devices.get_mut(name)
    }

    /// All devices in name order
    pub fn devices(&self) -> impl Iterator<Item = &Device> {
        self.devices.values()
    }

    pub fn device_count(&self) -> usize {
        self.devices.len()
    }

    /// Add an interface to a device, returning the existing one if the device
    /// already owns an interface with that name
    pub fn add_interface(
        &mut self,
        device: &str,
        name: &str,
        kind: impl Into<String>,
    ) -> Result<InterfaceId, TopologyError> {
        let owner = self
            .devices
            .get_mut(device)
            .ok_or_else(|| TopologyError::UnknownDevice(device.to_string()))?;

        if let Some(id) = owner.interfaces.get(name) {
            return Ok(*id);
        }

        let id = InterfaceId(self.interfaces.len());
        owner.interfaces.insert(name.to_string(), id);
        self.interfaces.push(Interface {
            id,
            device: owner.id.clone(),
            name: name.to_string(),
            kind: kind.into(),
            link: None,
            ipv4: None,
        });
        Ok(id)
    }

    /// Look up an interface by device and interface name
    pub fn interface_id(&self, device: &str, name: &str) -> Option<InterfaceId> {
        self.devices.get(device).and_then(|d| d.interface(name))
    }

    /// Like [`interface_id`](Self::interface_id) but a missing device or
    /// interface is an error
    pub fn require_interface(
        &self,
        device: &str,
        name: &str,
    ) -> Result<InterfaceId, TopologyError> {
        let owner = self
            .devices
            .get(device)
            .ok_or_else(|| TopologyError::UnknownDevice(device.to_string()))?;
        owner
            .interface(name)
            .ok_or_else(|| TopologyError::UnknownInterface {
                device: device.to_string(),
                interface: name.to_string(),
            })
    }

    pub fn interface(&self, id: InterfaceId) -> &Interface {
        &self.interfaces[id.0]
    }

    /// Interfaces of a device in name order
    pub fn interfaces_of<'a>(&'a self, device: &str) -> impl Iterator<Item = &'a Interface> + 'a {
        self.devices
            .get(device)
            .into_iter()
            .flat_map(move |d| d.interface_ids().map(move |id| &self.interfaces[id.0]))
    }

    pub fn interface_count(&self) -> usize {
        self.interfaces.len()
    }

    pub fn set_ipv4(&mut self, id: InterfaceId, address: Ipv4Network) {
        self.interfaces[id.0].ipv4 = Some(address);
    }

    /// `device:interface` label used in logs and errors
    pub fn qualified_name(&self, id: InterfaceId) -> String {
        let interface = &self.interfaces[id.0];
        format!("{}:{}", interface.device, interface.name)
    }

    pub fn link(&self, id: LinkId) -> &Link {
        &self.links[id.0]
    }

    pub fn links(&self) -> impl Iterator<Item = &Link> {
        self.links.iter()
    }

    pub fn link_count(&self) -> usize {
        self.links.len()
    }

    pub fn link_by_name(&self, name: &str) -> Option<LinkId> {
        self.links.iter().find(|l| l.name == name).map(|l| l.id)
    }

    /// Link the interface belongs to
    pub fn link_of(&self, interface: InterfaceId) -> Option<LinkId> {
        self.interfaces[interface.0].link
    }

    /// Next sequential link name, `Link_<n>` with n the current link count,
    /// skipping names already taken by links loaded from a testbed
    fn next_link_name(&self) -> String {
        let mut n = self.links.len();
        loop {
            let name = format!("Link_{}", n);
            if self.link_by_name(&name).is_none() {
                return name;
            }
            n += 1;
        }
    }

    /// Create a sequentially named link joining `members`
    ///
    /// Fails without modifying the graph if any member already belongs to a link.
    pub fn create_link(&mut self, members: &[InterfaceId]) -> Result<LinkId, TopologyError> {
        let name = self.next_link_name();
        self.insert_link(name, members)
    }

    /// Create a link with an explicit name (used when loading a testbed)
    pub fn insert_link(
        &mut self,
        name: impl Into<String>,
        members: &[InterfaceId],
    ) -> Result<LinkId, TopologyError> {
        let name = name.into();
        for &member in members {
            if let Some(existing) = self.interfaces[member.0].link {
                return Err(TopologyError::AlreadyLinked {
                    interface: self.qualified_name(member),
                    link: self.links[existing.0].name.clone(),
                });
            }
        }

        let id = LinkId(self.links.len());
        let mut unique: Vec<InterfaceId> = Vec::with_capacity(members.len());
        for &member in members {
            if !unique.contains(&member) {
                unique.push(member);
                self.interfaces[member.0].link = Some(id);
            }
        }
        self.links.push(Link {
            id,
            name,
            members: unique,
        });
        Ok(id)
    }

    /// Add an interface to an existing link
    ///
    /// Returns `Ok(false)` if it is already a member, and an error if it is a
    /// member of a different link.
    pub fn connect_interface(
        &mut self,
        link: LinkId,
        interface: InterfaceId,
    ) -> Result<bool, TopologyError> {
        match self.interfaces[interface.0].link {
            Some(current) if current == link => Ok(false),
            Some(current) => Err(TopologyError::AlreadyLinked {
                interface: self.qualified_name(interface),
                link: self.links[current.0].name.clone(),
            }),
            None => {
                self.interfaces[interface.0].link = Some(link);
                self.links[link.0].members.push(interface);
                Ok(true)
            }
        }
    }
}
