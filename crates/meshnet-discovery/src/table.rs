//! Discovered-node bookkeeping.

use std::collections::HashMap;
use std::net::{IpAddr, SocketAddr};

use meshnet_protocol::{DiscoveryMessage, NodeId, NodeIdentity, DEFAULT_MESH_PORT};
use serde::{Deserialize, Serialize};

/// A node seen on the discovery channel.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DiscoveredNode {
    pub node_id: NodeId,
    /// Observed source address of the last datagram.
    pub address: IpAddr,
    /// Mesh port the node announced.
    pub port: u16,
    /// Local receive time of the last datagram (ms since epoch).
    pub last_seen: u64,
    /// Sender's own timestamp from the last datagram.
    pub timestamp: u64,
}

impl DiscoveredNode {
    /// Stream address to dial.
    pub fn mesh_addr(&self) -> SocketAddr {
        SocketAddr::new(self.address, self.port)
    }
}

/// Outcome of feeding one datagram to the table.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Observation {
    /// Our own datagram, or one from another network.
    Ignored,
    /// First sighting of this node id.
    Discovered(DiscoveredNode),
    /// Refresh of a known node id.
    Updated(DiscoveredNode),
}

/// Known nodes keyed by node id.
#[derive(Debug, Clone)]
pub struct DiscoveryTable {
    identity: NodeIdentity,
    nodes: HashMap<NodeId, DiscoveredNode>,
}

impl DiscoveryTable {
    pub fn new(identity: NodeIdentity) -> Self {
        Self {
            identity,
            nodes: HashMap::new(),
        }
    }

    /// Record a datagram received from `source` at `now` (ms since epoch).
    pub fn observe(&mut self, message: &DiscoveryMessage, source: SocketAddr, now: u64) -> Observation {
        if message.node_id() == self.identity.node_id {
            return Observation::Ignored;
        }
        if !self.identity.same_network(message.network_id()) {
            return Observation::Ignored;
        }

        let node = DiscoveredNode {
            node_id: message.node_id().to_string(),
            address: source.ip(),
            port: message.port().unwrap_or(DEFAULT_MESH_PORT),
            last_seen: now,
            timestamp: message.timestamp(),
        };

        match self.nodes.insert(node.node_id.clone(), node.clone()) {
            None => Observation::Discovered(node),
            Some(_) => Observation::Updated(node),
        }
    }

    /// Remove and return every node last seen more than `stale_after_ms` before `now`.
    pub fn sweep(&mut self, now: u64, stale_after_ms: u64) -> Vec<DiscoveredNode> {
        let stale: Vec<NodeId> = self
            .nodes
            .values()
            .filter(|n| now.saturating_sub(n.last_seen) > stale_after_ms)
            .map(|n| n.node_id.clone())
            .collect();

        stale
            .iter()
            .filter_map(|id| self.nodes.remove(id))
            .collect()
    }

    pub fn get(&self, node_id: &str) -> Option<&DiscoveredNode> {
        self.nodes.get(node_id)
    }

    /// Snapshot ordered by node id.
    pub fn nodes(&self) -> Vec<DiscoveredNode> {
        let mut nodes: Vec<_> = self.nodes.values().cloned().collect();
        nodes.sort_by(|a, b| a.node_id.cmp(&b.node_id));
        nodes
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    pub fn clear(&mut self) {
        self.nodes.clear();
    }
}
