//! Peering manager.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use meshnet_protocol::{now_millis, AgreementTerms, Envelope, NodeId, PeeringAgreement, RevocationNotice};
use meshnet_transport::Transport;
use serde::{Deserialize, Serialize};
use tokio::sync::{broadcast, Mutex, RwLock};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::config::PeeringConfig;
use crate::error::{Error, Result};

/// Liveness record for a tracked peer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PeerInfo {
    pub peer_id: NodeId,
    /// Ms since epoch of the last status report (or of tracking).
    pub last_seen: u64,
    /// Last `peer:status` payload, if any.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub status: Option<serde_json::Value>,
}

/// Combined view of one peer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PeerStatistics {
    pub peer_id: NodeId,
    pub info: Option<PeerInfo>,
    pub agreement: Option<PeeringAgreement>,
    pub has_agreement: bool,
    /// `active`, `revoked` or `none`.
    pub agreement_status: String,
}

/// Events published by the peering manager.
#[derive(Debug, Clone, PartialEq)]
pub enum PeeringEvent {
    AgreementCreated(PeeringAgreement),
    AgreementRevoked(PeeringAgreement),
    PeerBlacklisted { address: String, port: u16 },
    PeerUnblacklisted { address: String, port: u16 },
    PeerRemoved(NodeId),
}

#[derive(Default)]
struct PeeringState {
    peer_info: HashMap<NodeId, PeerInfo>,
    /// Agreements we created, keyed by peer.
    agreements: HashMap<NodeId, PeeringAgreement>,
    /// Agreements peers sent us, keyed by sender.
    remote_agreements: HashMap<NodeId, PeeringAgreement>,
    /// `address:port` keys.
    blacklist: HashSet<String>,
}

fn address_key(address: &str, port: u16) -> String {
    format!("{address}:{port}")
}

/// Admission, liveness and agreements on top of a [`Transport`].
pub struct PeeringManager {
    node_id: NodeId,
    config: PeeringConfig,
    transport: Arc<Transport>,
    state: RwLock<PeeringState>,
    event_tx: broadcast::Sender<PeeringEvent>,
    tasks: Mutex<Vec<JoinHandle<()>>>,
}

impl PeeringManager {
    pub fn new(transport: Arc<Transport>, config: PeeringConfig) -> Self {
        let (event_tx, _) = broadcast::channel(256);
        Self {
            node_id: transport.node_id().to_string(),
            config,
            transport,
            state: RwLock::new(PeeringState::default()),
            event_tx,
            tasks: Mutex::new(Vec::new()),
        }
    }

    pub fn config(&self) -> &PeeringConfig {
        &self.config
    }

    pub fn subscribe(&self) -> broadcast::Receiver<PeeringEvent> {
        self.event_tx.subscribe()
    }

    /// Start the heartbeat and cleanup tasks. Calling it twice is a no-op.
    pub async fn start(self: &Arc<Self>) {
        let mut tasks = self.tasks.lock().await;
        if !tasks.is_empty() {
            return;
        }
        info!(
            "Peering manager starting (heartbeat {:?}, cleanup {:?})",
            self.config.heartbeat_interval, self.config.cleanup_interval
        );

        let this = Arc::clone(self);
        tasks.push(tokio::spawn(async move {
            let mut ticker = tokio::time::interval(this.config.heartbeat_interval);
            ticker.tick().await;
            loop {
                ticker.tick().await;
                this.send_heartbeats().await;
            }
        }));

        let this = Arc::clone(self);
        tasks.push(tokio::spawn(async move {
            let mut ticker = tokio::time::interval(this.config.cleanup_interval);
            ticker.tick().await;
            loop {
                ticker.tick().await;
                this.cleanup_stale_peers().await;
            }
        }));
    }

    /// Cancel both tasks, revoke every local agreement and forget peer
    /// records and remote agreements. Idempotent.
    pub async fn stop(&self) {
        let handles: Vec<_> = self.tasks.lock().await.drain(..).collect();
        for handle in &handles {
            handle.abort();
        }

        let peer_ids: Vec<NodeId> = self.state.read().await.agreements.keys().cloned().collect();
        for peer_id in peer_ids {
            self.revoke_peering_agreement(&peer_id).await;
        }
        {
            let mut state = self.state.write().await;
            state.peer_info.clear();
            state.remote_agreements.clear();
        }

        if !handles.is_empty() {
            info!("Peering manager stopped");
        }
    }

    /// Broadcast a heartbeat to every established peer.
    pub async fn send_heartbeats(&self) -> usize {
        let peers = self.transport.peer_count().await;
        match self.transport.broadcast(&Envelope::heartbeat(self.node_id.clone(), peers)).await {
            Ok(sent) => {
                debug!("Heartbeat sent to {} peers", sent);
                sent
            }
            Err(e) => {
                warn!("Heartbeat broadcast failed: {}", e);
                0
            }
        }
    }

    /// Remove peers silent for longer than `peer_timeout`, closing their
    /// connections. Returns the removed ids.
    pub async fn cleanup_stale_peers(&self) -> Vec<NodeId> {
        let now = now_millis();
        let timeout = self.config.peer_timeout.as_millis() as u64;
        let tracked: Vec<(NodeId, u64)> = self
            .state
            .read()
            .await
            .peer_info
            .values()
            .map(|info| (info.peer_id.clone(), info.last_seen))
            .collect();

        let mut removed = Vec::new();
        for (peer_id, last_seen) in tracked {
            let heartbeat = self.transport.last_heartbeat(&peer_id).await.unwrap_or(0);
            let effective = last_seen.max(heartbeat);
            if now.saturating_sub(effective) <= timeout {
                continue;
            }

            info!("Removing stale peer: {}", peer_id);
            self.remove_peer(&peer_id).await;
            self.transport.disconnect_peer(&peer_id).await;
            removed.push(peer_id);
        }
        removed
    }

    /// Admit and dial a peer.
    pub async fn connect_to_peer(&self, address: &str, port: u16) -> Result<()> {
        let key = address_key(address, port);
        if self.state.read().await.blacklist.contains(&key) {
            warn!("Peer {} is blacklisted", key);
            return Err(Error::PeerBlacklisted(key));
        }
        if self.transport.peer_count().await >= self.config.max_peers {
            warn!("Max peers reached, not connecting to {}", key);
            return Err(Error::MaxPeersReached(self.config.max_peers));
        }

        info!("Connecting to peer: {}", key);
        self.transport.connect_to_peer(address, port).await.map_err(|e| {
            warn!("Failed to connect to {}: {}", key, e);
            Error::from(e)
        })
    }

    /// Record an active agreement with `peer_id` and offer it to the peer.
    ///
    /// Replaces any earlier agreement with the same peer.
    pub async fn create_peering_agreement(&self, peer_id: &str, terms: Option<AgreementTerms>) -> PeeringAgreement {
        let agreement = PeeringAgreement::new(peer_id, self.node_id.clone(), terms.unwrap_or_default());
        self.state
            .write()
            .await
            .agreements
            .insert(peer_id.to_string(), agreement.clone());

        let offer = Envelope::PeeringAgreement {
            payload: agreement.clone(),
        };
        if !self.transport.send_to_peer(peer_id, &offer).await {
            debug!("Agreement with {} recorded but not delivered", peer_id);
        }

        info!("Peering agreement created with {}", peer_id);
        let _ = self.event_tx.send(PeeringEvent::AgreementCreated(agreement.clone()));
        agreement
    }

    /// Revoke and forget the agreement with `peer_id`, notifying the peer.
    pub async fn revoke_peering_agreement(&self, peer_id: &str) -> Option<PeeringAgreement> {
        let mut agreement = self.state.write().await.agreements.remove(peer_id)?;
        agreement.revoke();

        let notice = Envelope::PeeringRevoked {
            payload: RevocationNotice {
                peer_id: self.node_id.clone(),
            },
        };
        self.transport.send_to_peer(peer_id, &notice).await;

        info!("Peering agreement revoked with {}", peer_id);
        let _ = self.event_tx.send(PeeringEvent::AgreementRevoked(agreement.clone()));
        Some(agreement)
    }

    /// Record an agreement offered by `from`.
    pub async fn handle_remote_agreement(&self, from: &str, agreement: PeeringAgreement) {
        if agreement.peer_id != self.node_id {
            debug!("Agreement from {} names {} as peer", from, agreement.peer_id);
        }
        debug!("Recorded peering agreement offered by {}", from);
        self.state
            .write()
            .await
            .remote_agreements
            .insert(from.to_string(), agreement);
    }

    /// Forget the agreement `from` offered us.
    pub async fn handle_remote_revocation(&self, from: &str) {
        if self.state.write().await.remote_agreements.remove(from).is_some() {
            debug!("Peer {} revoked its agreement", from);
        }
    }

    pub async fn blacklist_peer(&self, address: &str, port: u16) {
        let key = address_key(address, port);
        self.state.write().await.blacklist.insert(key.clone());
        info!("Blacklisted peer: {}", key);
        let _ = self.event_tx.send(PeeringEvent::PeerBlacklisted {
            address: address.to_string(),
            port,
        });
    }

    /// Returns whether the entry was present.
    pub async fn remove_from_blacklist(&self, address: &str, port: u16) -> bool {
        let key = address_key(address, port);
        let removed = self.state.write().await.blacklist.remove(&key);
        if removed {
            info!("Removed peer from blacklist: {}", key);
            let _ = self.event_tx.send(PeeringEvent::PeerUnblacklisted {
                address: address.to_string(),
                port,
            });
        }
        removed
    }

    pub async fn is_blacklisted(&self, address: &str, port: u16) -> bool {
        self.state.read().await.blacklist.contains(&address_key(address, port))
    }

    /// Sorted `address:port` entries.
    pub async fn blacklist(&self) -> Vec<String> {
        let mut entries: Vec<String> = self.state.read().await.blacklist.iter().cloned().collect();
        entries.sort();
        entries
    }

    /// Start tracking a newly connected peer.
    pub async fn track_peer(&self, peer_id: &str) {
        self.state
            .write()
            .await
            .peer_info
            .entry(peer_id.to_string())
            .or_insert_with(|| PeerInfo {
                peer_id: peer_id.to_string(),
                last_seen: now_millis(),
                status: None,
            });
    }

    /// Refresh a peer from its `peer:status` report.
    pub async fn update_peer_status(&self, peer_id: &str, status: serde_json::Value) {
        let info = PeerInfo {
            peer_id: peer_id.to_string(),
            last_seen: now_millis(),
            status: Some(status),
        };
        self.state.write().await.peer_info.insert(peer_id.to_string(), info);
    }

    /// Drop everything known about a peer. No-op for unknown ids.
    pub async fn remove_peer(&self, peer_id: &str) -> bool {
        let removed = {
            let mut state = self.state.write().await;
            let info = state.peer_info.remove(peer_id).is_some();
            let agreement = state.agreements.remove(peer_id).is_some();
            let remote = state.remote_agreements.remove(peer_id).is_some();
            info || agreement || remote
        };
        if removed {
            info!("Removed peer: {}", peer_id);
            let _ = self.event_tx.send(PeeringEvent::PeerRemoved(peer_id.to_string()));
        }
        removed
    }

    pub async fn peer_info(&self, peer_id: &str) -> Option<PeerInfo> {
        self.state.read().await.peer_info.get(peer_id).cloned()
    }

    /// Local agreements ordered by peer id.
    pub async fn peering_agreements(&self) -> Vec<PeeringAgreement> {
        let mut agreements: Vec<_> = self.state.read().await.agreements.values().cloned().collect();
        agreements.sort_by(|a, b| a.peer_id.cmp(&b.peer_id));
        agreements
    }

    /// Agreements received from peers, keyed by sender.
    pub async fn remote_agreements(&self) -> HashMap<NodeId, PeeringAgreement> {
        self.state.read().await.remote_agreements.clone()
    }

    pub async fn peer_statistics(&self, peer_id: &str) -> PeerStatistics {
        let state = self.state.read().await;
        let agreement = state.agreements.get(peer_id).cloned();
        let agreement_status = match &agreement {
            Some(a) if a.is_active() => "active",
            Some(_) => "revoked",
            None => "none",
        };
        PeerStatistics {
            peer_id: peer_id.to_string(),
            info: state.peer_info.get(peer_id).cloned(),
            has_agreement: agreement.is_some(),
            agreement_status: agreement_status.to_string(),
            agreement,
        }
    }

    /// Statistics for every established transport peer.
    pub async fn all_peer_statistics(&self) -> Vec<PeerStatistics> {
        let mut stats = Vec::new();
        for peer in self.transport.peers().await {
            stats.push(self.peer_statistics(&peer.id).await);
        }
        stats
    }
}
