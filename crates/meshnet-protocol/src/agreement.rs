//! Peering agreements.
//!
//! An agreement is an informational record of the terms two nodes peer under.
//! It is not negotiated: the creator's copy is valid whether or not the
//! remote side acknowledges it.

use serde::{Deserialize, Serialize};

use crate::identity::{now_millis, NodeId};

/// Traffic priority requested by an agreement.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Priority {
    Low,
    #[default]
    Normal,
    High,
}

/// Terms attached to an agreement.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AgreementTerms {
    /// Bytes per second, unlimited when absent.
    pub bandwidth_limit: Option<u64>,
    /// Total bytes, unlimited when absent.
    pub data_limit: Option<u64>,
    pub priority: Priority,
    /// Whether the peer may use our link-state advertisements.
    pub route_sharing: bool,
}

impl Default for AgreementTerms {
    fn default() -> Self {
        Self {
            bandwidth_limit: None,
            data_limit: None,
            priority: Priority::Normal,
            route_sharing: true,
        }
    }
}

/// Lifecycle of an agreement.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AgreementStatus {
    Active,
    Revoked,
}

/// A peering agreement between the local node and one peer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PeeringAgreement {
    /// The peer the agreement is with.
    pub peer_id: NodeId,
    /// The node that created it.
    pub node_id: NodeId,
    pub terms: AgreementTerms,
    pub status: AgreementStatus,
    pub created_at: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub revoked_at: Option<u64>,
}

impl PeeringAgreement {
    /// New active agreement stamped now.
    pub fn new(peer_id: impl Into<NodeId>, node_id: impl Into<NodeId>, terms: AgreementTerms) -> Self {
        Self {
            peer_id: peer_id.into(),
            node_id: node_id.into(),
            terms,
            status: AgreementStatus::Active,
            created_at: now_millis(),
            revoked_at: None,
        }
    }

    /// Mark revoked, stamping the revocation time.
    pub fn revoke(&mut self) {
        self.status = AgreementStatus::Revoked;
        self.revoked_at = Some(now_millis());
    }

    pub fn is_active(&self) -> bool {
        self.status == AgreementStatus::Active
    }
}
