//! Node Registry.
//!
//! Exclusively owns `NodeState`, which exclusively owns its sources. A node
//! is created on first packet from a new UUID, mutated by the router and
//! scheduler, and destroyed when silence exceeds the silence threshold.

use std::collections::HashMap;
use std::net::SocketAddr;
use std::time::Instant;

use uuid::Uuid;

use crate::source::PositionalSource;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RegistryError {
    UnknownNode,
}

/// Per-node audio + liveness state. Sources are released atomically with
/// the owning `NodeState` on eviction.
pub struct NodeState {
    pub uuid: Uuid,
    pub public_addr: Option<SocketAddr>,
    pub local_addr: Option<SocketAddr>,
    pub active_addr: Option<SocketAddr>,
    pub last_heard: Instant,
    pub microphone: Option<PositionalSource>,
    pub loopback_self: bool,
    pub injectors: HashMap<Uuid, PositionalSource>,
    pub linked: bool,
}

impl NodeState {
    fn new(uuid: Uuid, now: Instant) -> Self {
        Self {
            uuid,
            public_addr: None,
            local_addr: None,
            active_addr: None,
            last_heard: now,
            microphone: None,
            loopback_self: false,
            injectors: HashMap::new(),
            linked: true,
        }
    }

    /// Whether this node is a listener: a Microphone source and a known
    /// active return address to mix a personalized stream back to.
    pub fn is_listener(&self) -> bool {
        self.microphone.is_some() && self.active_addr.is_some()
    }
}

/// Maps UUID → `NodeState`; additionally maps a socket address back to a
/// UUID for fast inbound dispatch.
pub struct NodeRegistry {
    nodes: HashMap<Uuid, NodeState>,
    by_address: HashMap<SocketAddr, Uuid>,
}

impl NodeRegistry {
    pub fn new() -> Self {
        Self {
            nodes: HashMap::new(),
            by_address: HashMap::new(),
        }
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    pub fn get(&self, uuid: &Uuid) -> Result<&NodeState, RegistryError> {
        self.nodes.get(uuid).ok_or(RegistryError::UnknownNode)
    }

    pub fn get_mut(&mut self, uuid: &Uuid) -> Result<&mut NodeState, RegistryError> {
        self.nodes.get_mut(uuid).ok_or(RegistryError::UnknownNode)
    }

    /// Looks up a node by UUID, creating it (with an empty audio bundle) if
    /// it is not yet known.
    pub fn lookup_or_create(&mut self, uuid: Uuid, now: Instant) -> &mut NodeState {
        self.nodes.entry(uuid).or_insert_with(|| NodeState::new(uuid, now))
    }

    pub fn find_by_address(&self, addr: SocketAddr) -> Option<Uuid> {
        self.by_address.get(&addr).copied()
    }

    /// Records the effective return address for a node; promotes it to
    /// "active" if none was yet considered active. A duplicate bind from a
    /// distinct address is last-writer-wins, with the caller expected to
    /// log a warning.
    pub fn bind_address(&mut self, uuid: &Uuid, addr: SocketAddr) -> Result<bool, RegistryError> {
        let node = self.get_mut(uuid)?;
        let promoted = node.active_addr.is_none();
        if node.active_addr != Some(addr) {
            node.active_addr = Some(addr);
        }
        self.by_address.insert(addr, *uuid);
        Ok(promoted)
    }

    pub fn touch(&mut self, uuid: &Uuid, now: Instant) -> Result<(), RegistryError> {
        self.get_mut(uuid)?.last_heard = now;
        Ok(())
    }

    /// Evicts nodes whose silence exceeds `silent_timeout`, returning their
    /// UUIDs. Sources are dropped as part of `NodeState`'s removal.
    pub fn sweep_silent(&mut self, now: Instant, silent_timeout: std::time::Duration) -> Vec<Uuid> {
        let stale: Vec<Uuid> = self
            .nodes
            .iter()
            .filter(|(_, node)| now.duration_since(node.last_heard) > silent_timeout)
            .map(|(uuid, _)| *uuid)
            .collect();

        for uuid in &stale {
            if let Some(node) = self.nodes.remove(uuid) {
                if let Some(addr) = node.active_addr {
                    self.by_address.remove(&addr);
                }
                if let Some(addr) = node.public_addr {
                    self.by_address.remove(&addr);
                }
                if let Some(addr) = node.local_addr {
                    self.by_address.remove(&addr);
                }
            }
        }
        stale
    }

    /// Snapshot-safe enumeration for scheduler use: nodes are visited in an
    /// arbitrary but stable-for-the-duration-of-the-call order.
    pub fn iter(&self) -> impl Iterator<Item = &NodeState> {
        self.nodes.values()
    }

    pub fn iter_mut(&mut self) -> impl Iterator<Item = &mut NodeState> {
        self.nodes.values_mut()
    }

    pub fn uuids(&self) -> Vec<Uuid> {
        self.nodes.keys().copied().collect()
    }
}

impl Default for NodeRegistry {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    fn addr(port: u16) -> SocketAddr {
        SocketAddr::from(([127, 0, 0, 1], port))
    }

    #[test]
    fn lookup_or_create_attaches_empty_bundle() {
        let mut reg = NodeRegistry::new();
        let uuid = Uuid::from_bytes([1u8; 16]);
        let now = Instant::now();
        let node = reg.lookup_or_create(uuid, now);
        assert!(node.microphone.is_none());
        assert!(node.injectors.is_empty());
        assert_eq!(reg.len(), 1);
    }

    #[test]
    fn unknown_node_lookup_fails() {
        let reg = NodeRegistry::new();
        let uuid = Uuid::from_bytes([2u8; 16]);
        assert_eq!(reg.get(&uuid).unwrap_err(), RegistryError::UnknownNode);
    }

    #[test]
    fn bind_address_promotes_first_address_only() {
        let mut reg = NodeRegistry::new();
        let uuid = Uuid::from_bytes([3u8; 16]);
        reg.lookup_or_create(uuid, Instant::now());

        let promoted_first = reg.bind_address(&uuid, addr(9000)).unwrap();
        assert!(promoted_first);

        let promoted_second = reg.bind_address(&uuid, addr(9001)).unwrap();
        assert!(!promoted_second, "address already active, no promotion");
        assert_eq!(reg.get(&uuid).unwrap().active_addr, Some(addr(9001)));
    }

    #[test]
    fn silence_sweep_removes_stale_nodes() {
        let mut reg = NodeRegistry::new();
        let uuid = Uuid::from_bytes([4u8; 16]);
        let t0 = Instant::now();
        reg.lookup_or_create(uuid, t0);

        let later = t0 + Duration::from_secs(10);
        let removed = reg.sweep_silent(later, Duration::from_secs(5));
        assert_eq!(removed, vec![uuid]);
        assert!(reg.get(&uuid).is_err());
        assert_eq!(reg.len(), 0);
    }

    #[test]
    fn address_lookup_cleared_on_eviction() {
        let mut reg = NodeRegistry::new();
        let uuid = Uuid::from_bytes([5u8; 16]);
        let t0 = Instant::now();
        reg.lookup_or_create(uuid, t0);
        reg.bind_address(&uuid, addr(9010)).unwrap();

        reg.sweep_silent(t0 + Duration::from_secs(10), Duration::from_secs(5));
        assert!(reg.find_by_address(addr(9010)).is_none());
    }
}
