//! Stream envelopes exchanged between connected peers.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::agreement::PeeringAgreement;
use crate::identity::{now_millis, NodeId, NodeIdentity};

/// Link cost. Lower is better.
pub type Cost = u64;

/// A node's advertised neighbor costs (neighbor id -> cost).
pub type LinkStateAdvertisement = BTreeMap<NodeId, Cost>;

/// A packet handed to the mesh for forwarding.
///
/// Only `destination` is interpreted; every other field rides along untouched.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Packet {
    /// Destination node id.
    pub destination: NodeId,
    /// Application fields.
    #[serde(flatten)]
    pub fields: serde_json::Map<String, serde_json::Value>,
}

impl Packet {
    /// Packet with no application fields.
    pub fn new(destination: impl Into<NodeId>) -> Self {
        Self {
            destination: destination.into(),
            fields: serde_json::Map::new(),
        }
    }

    /// Attach an application field.
    pub fn with_field(mut self, key: impl Into<String>, value: serde_json::Value) -> Self {
        self.fields.insert(key.into(), value);
        self
    }
}

/// Payload of `peering:revoked`: the node that revoked.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RevocationNotice {
    pub peer_id: NodeId,
}

/// A framed stream message.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum Envelope {
    /// Identity exchange sent by both ends right after connecting.
    #[serde(rename = "handshake", rename_all = "camelCase")]
    Handshake {
        node_id: NodeId,
        network_id: String,
        timestamp: u64,
    },

    /// Liveness beacon.
    #[serde(rename = "heartbeat", rename_all = "camelCase")]
    Heartbeat {
        node_id: NodeId,
        timestamp: u64,
        peers: usize,
    },

    /// Link-state advertisement from the sending peer.
    #[serde(rename = "route:update")]
    RouteUpdate { payload: LinkStateAdvertisement },

    /// Free-form peer status report.
    #[serde(rename = "peer:status")]
    PeerStatus { payload: serde_json::Value },

    /// Packet in transit.
    #[serde(rename = "data:forward")]
    DataForward { payload: Packet },

    /// Peering agreement offered by the sender.
    #[serde(rename = "peering:agreement")]
    PeeringAgreement { payload: PeeringAgreement },

    /// Sender revoked its agreement with us.
    #[serde(rename = "peering:revoked")]
    PeeringRevoked { payload: RevocationNotice },
}

impl Envelope {
    /// Handshake for the given identity, stamped now.
    pub fn handshake(identity: &NodeIdentity) -> Self {
        Envelope::Handshake {
            node_id: identity.node_id.clone(),
            network_id: identity.network_id.clone(),
            timestamp: now_millis(),
        }
    }

    /// Heartbeat stamped now.
    pub fn heartbeat(node_id: impl Into<NodeId>, peers: usize) -> Self {
        Envelope::Heartbeat {
            node_id: node_id.into(),
            timestamp: now_millis(),
            peers,
        }
    }

    /// The wire `type` tag.
    pub fn kind(&self) -> &'static str {
        match self {
            Envelope::Handshake { .. } => "handshake",
            Envelope::Heartbeat { .. } => "heartbeat",
            Envelope::RouteUpdate { .. } => "route:update",
            Envelope::PeerStatus { .. } => "peer:status",
            Envelope::DataForward { .. } => "data:forward",
            Envelope::PeeringAgreement { .. } => "peering:agreement",
            Envelope::PeeringRevoked { .. } => "peering:revoked",
        }
    }

    /// Whether the transport consumes this message itself.
    ///
    /// Everything else is handed upward as an application message.
    pub fn is_control(&self) -> bool {
        matches!(self, Envelope::Handshake { .. } | Envelope::Heartbeat { .. })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn handshake_wire_shape() {
        let env = Envelope::Handshake {
            node_id: "n1".into(),
            network_id: "mesh".into(),
            timestamp: 42,
        };
        let value = serde_json::to_value(&env).unwrap();
        assert_eq!(
            value,
            json!({"type": "handshake", "nodeId": "n1", "networkId": "mesh", "timestamp": 42})
        );
    }

    #[test]
    fn heartbeat_wire_shape() {
        let env = Envelope::Heartbeat {
            node_id: "n1".into(),
            timestamp: 7,
            peers: 3,
        };
        let value = serde_json::to_value(&env).unwrap();
        assert_eq!(
            value,
            json!({"type": "heartbeat", "nodeId": "n1", "timestamp": 7, "peers": 3})
        );
    }

    #[test]
    fn route_update_parses_from_wire() {
        let raw = r#"{"type":"route:update","payload":{"b":1,"c":4}}"#;
        let env: Envelope = serde_json::from_str(raw).unwrap();
        match env {
            Envelope::RouteUpdate { payload } => {
                assert_eq!(payload.get("b"), Some(&1));
                assert_eq!(payload.get("c"), Some(&4));
            }
            other => panic!("unexpected envelope {other:?}"),
        }
    }

    #[test]
    fn data_forward_keeps_extra_fields() {
        let raw = r#"{"type":"data:forward","payload":{"destination":"z","body":"hi","seq":9}}"#;
        let env: Envelope = serde_json::from_str(raw).unwrap();
        let Envelope::DataForward { payload } = env else {
            panic!("expected data:forward");
        };
        assert_eq!(payload.destination, "z");
        assert_eq!(payload.fields.get("body"), Some(&json!("hi")));
        assert_eq!(payload.fields.get("seq"), Some(&json!(9)));
    }

    #[test]
    fn revoked_wire_shape() {
        let env = Envelope::PeeringRevoked {
            payload: RevocationNotice { peer_id: "n1".into() },
        };
        let value = serde_json::to_value(&env).unwrap();
        assert_eq!(value, json!({"type": "peering:revoked", "payload": {"peerId": "n1"}}));
    }

    #[test]
    fn unknown_type_is_rejected() {
        let raw = r#"{"type":"gossip","payload":{}}"#;
        assert!(serde_json::from_str::<Envelope>(raw).is_err());
    }

    #[test]
    fn control_messages() {
        let id = NodeIdentity::new("n1", "mesh");
        assert!(Envelope::handshake(&id).is_control());
        assert!(Envelope::heartbeat("n1", 0).is_control());
        assert!(!Envelope::PeerStatus { payload: json!(null) }.is_control());
        assert_eq!(Envelope::heartbeat("n1", 0).kind(), "heartbeat");
    }
}
