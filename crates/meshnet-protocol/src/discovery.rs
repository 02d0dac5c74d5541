//! Discovery datagrams.

use serde::{Deserialize, Serialize};

use crate::identity::{now_millis, NodeId, NodeIdentity};

/// A discovery datagram, multicast announcement or unicast reply.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum DiscoveryMessage {
    /// "I am here", sent to the multicast group or as a direct probe.
    #[serde(rename = "discovery", rename_all = "camelCase")]
    Announce {
        node_id: NodeId,
        network_id: String,
        timestamp: u64,
        /// Mesh port the sender accepts stream connections on.
        #[serde(default, skip_serializing_if = "Option::is_none")]
        port: Option<u16>,
    },

    /// Reply to an announcement. Never answered.
    #[serde(rename = "discovery:response", rename_all = "camelCase")]
    Response {
        node_id: NodeId,
        network_id: String,
        timestamp: u64,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        port: Option<u16>,
    },
}

impl DiscoveryMessage {
    pub fn announce(identity: &NodeIdentity, port: Option<u16>) -> Self {
        DiscoveryMessage::Announce {
            node_id: identity.node_id.clone(),
            network_id: identity.network_id.clone(),
            timestamp: now_millis(),
            port,
        }
    }

    pub fn response(identity: &NodeIdentity, port: Option<u16>) -> Self {
        DiscoveryMessage::Response {
            node_id: identity.node_id.clone(),
            network_id: identity.network_id.clone(),
            timestamp: now_millis(),
            port,
        }
    }

    pub fn node_id(&self) -> &str {
        match self {
            DiscoveryMessage::Announce { node_id, .. } | DiscoveryMessage::Response { node_id, .. } => node_id,
        }
    }

    pub fn network_id(&self) -> &str {
        match self {
            DiscoveryMessage::Announce { network_id, .. }
            | DiscoveryMessage::Response { network_id, .. } => network_id,
        }
    }

    pub fn timestamp(&self) -> u64 {
        match self {
            DiscoveryMessage::Announce { timestamp, .. } | DiscoveryMessage::Response { timestamp, .. } => {
                *timestamp
            }
        }
    }

    pub fn port(&self) -> Option<u16> {
        match self {
            DiscoveryMessage::Announce { port, .. } | DiscoveryMessage::Response { port, .. } => *port,
        }
    }

    pub fn is_announce(&self) -> bool {
        matches!(self, DiscoveryMessage::Announce { .. })
    }
}
