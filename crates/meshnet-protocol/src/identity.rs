//! Node identity.

use std::time::{SystemTime, UNIX_EPOCH};

/// Opaque node identifier.
pub type NodeId = String;

/// Identity of the local node: who we are and which mesh we belong to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NodeIdentity {
    /// Unique id, generated once per process.
    pub node_id: NodeId,
    /// Mesh namespace. Peers must match it exactly.
    pub network_id: String,
}

impl NodeIdentity {
    /// Create an identity with a fresh random node id.
    pub fn generate(network_id: impl Into<String>) -> Self {
        Self {
            node_id: uuid::Uuid::new_v4().to_string(),
            network_id: network_id.into(),
        }
    }

    /// Create an identity with a known node id.
    pub fn new(node_id: impl Into<NodeId>, network_id: impl Into<String>) -> Self {
        Self {
            node_id: node_id.into(),
            network_id: network_id.into(),
        }
    }

    /// Whether a remote node's network id admits it to our mesh.
    pub fn same_network(&self, network_id: &str) -> bool {
        self.network_id == network_id
    }
}

/// Milliseconds since the Unix epoch.
///
/// Clocks before 1970 read as 0 rather than failing.
pub fn now_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}
