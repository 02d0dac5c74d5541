//! Peer records and topology snapshots.

use std::net::IpAddr;

use meshnet_protocol::NodeId;
use serde::{Deserialize, Serialize};

/// Who opened the connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Direction {
    Inbound,
    Outbound,
}

/// Handshake progress of a connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum ConnectionState {
    Connecting,
    AwaitingHandshake,
    Established,
    Closed,
}

/// A connection's view of its remote end.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Peer {
    /// Local connection id until the handshake, then the remote node id.
    pub id: NodeId,
    pub address: IpAddr,
    /// Remote socket port. For inbound connections this is the remote's
    /// ephemeral port, not its mesh port.
    pub port: u16,
    pub direction: Direction,
    pub state: ConnectionState,
    pub connected: bool,
    /// Ms since epoch the handshake completed (0 before).
    pub connected_at: u64,
    /// Ms since epoch of the last heartbeat (handshake time until one arrives).
    pub last_heartbeat: u64,
    /// TCP connect round trip for outbound connections.
    pub latency_ms: Option<u64>,
}

/// Snapshot of the local star: self plus every established peer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Topology {
    pub nodes: Vec<TopologyNode>,
    pub edges: Vec<TopologyEdge>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TopologyNode {
    pub id: NodeId,
    /// `self` or `peer`.
    #[serde(rename = "type")]
    pub kind: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub address: Option<IpAddr>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub port: Option<u16>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TopologyEdge {
    pub from: NodeId,
    pub to: NodeId,
    /// Milliseconds, 0 when unmeasured.
    pub latency: u64,
}

impl Topology {
    pub(crate) fn build<'a>(self_id: &str, peers: impl IntoIterator<Item = &'a Peer>) -> Self {
        let mut nodes = vec![TopologyNode {
            id: self_id.to_string(),
            kind: "self".to_string(),
            address: None,
            port: None,
        }];
        let mut edges = Vec::new();

        for peer in peers {
            nodes.push(TopologyNode {
                id: peer.id.clone(),
                kind: "peer".to_string(),
                address: Some(peer.address),
                port: Some(peer.port),
            });
            edges.push(TopologyEdge {
                from: self_id.to_string(),
                to: peer.id.clone(),
                latency: peer.latency_ms.unwrap_or(0),
            });
        }

        Self { nodes, edges }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn peer(id: &str, latency_ms: Option<u64>) -> Peer {
        Peer {
            id: id.into(),
            address: "127.0.0.1".parse().unwrap(),
            port: 8001,
            direction: Direction::Outbound,
            state: ConnectionState::Established,
            connected: true,
            connected_at: 1,
            last_heartbeat: 1,
            latency_ms,
        }
    }

    #[test]
    fn topology_is_star_around_self() {
        let peers = [peer("a", Some(12)), peer("b", None)];
        let topo = Topology::build("me", &peers);

        assert_eq!(topo.nodes.len(), 3);
        assert_eq!(topo.nodes[0].kind, "self");
        assert_eq!(topo.edges.len(), 2);
        assert_eq!(topo.edges[0].latency, 12);
        assert_eq!(topo.edges[1].latency, 0);
        assert!(topo.edges.iter().all(|e| e.from == "me"));
    }

    #[test]
    fn topology_json_shape() {
        let topo = Topology::build("me", &[]);
        assert_eq!(
            serde_json::to_value(&topo).unwrap(),
            json!({"nodes": [{"id": "me", "type": "self"}], "edges": []})
        );
    }
}
