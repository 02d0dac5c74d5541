//! Mesh node - wires the four components together.
//!
//! Event flow:
//!
//! ```text
//! discovery ──PeerDiscovered/PeerUpdated──▶ peering.connect_to_peer (unless connected, with backoff)
//! transport ──PeerConnected───▶ router.update_neighbor, peering.track_peer, flood LSA
//! transport ──PeerDisconnected▶ router.remove_peer_route, peering.remove_peer, flood LSA
//! transport ──MessageReceived─▶ router / peering / local delivery, by type
//! router ─────PacketForward───▶ transport.send_to_peer(next_hop, data:forward)
//! ```

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Instant;

use meshnet_discovery::{DiscoveredNode, Discovery, DiscoveryEvent};
use meshnet_peering::PeeringManager;
use meshnet_protocol::{Envelope, NodeId, NodeIdentity, Packet};
use meshnet_routing::{Router, RouterEvent};
use meshnet_transport::{Transport, TransportEvent};
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast::error::RecvError;
use tokio::sync::{broadcast, Mutex, RwLock};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::config::NodeConfig;
use crate::error::Result;

/// Events published by the node.
#[derive(Debug, Clone, PartialEq)]
pub enum NodeEvent {
    /// A packet addressed to this node arrived (or was sent to self).
    PacketDelivered { from: NodeId, packet: Packet },
    /// A packet could not be routed.
    PacketDropped(Packet),
}

/// Snapshot served by `/api/status`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NodeStatus {
    pub node_id: NodeId,
    pub network_id: String,
    pub is_running: bool,
    pub peers_connected: usize,
    pub routes: usize,
    pub uptime_secs: u64,
}

/// A mesh node instance.
pub struct MeshNode {
    identity: NodeIdentity,
    config: NodeConfig,
    transport: Arc<Transport>,
    discovery: Arc<Discovery>,
    peering: Arc<PeeringManager>,
    router: Arc<Router>,
    event_tx: broadcast::Sender<NodeEvent>,
    tasks: Mutex<Vec<JoinHandle<()>>>,
    started_at: RwLock<Option<Instant>>,
    /// Last dial attempt per discovered node id.
    dial_attempts: Mutex<HashMap<NodeId, Instant>>,
}

impl MeshNode {
    /// Create a node with a freshly generated id.
    pub fn new(config: NodeConfig) -> Self {
        let identity = NodeIdentity::generate(config.network_id.clone());
        Self::with_identity(identity, config)
    }

    /// Create a node with a known identity.
    pub fn with_identity(identity: NodeIdentity, config: NodeConfig) -> Self {
        let transport = Arc::new(Transport::new(identity.clone(), config.transport_config()));
        let discovery = Arc::new(Discovery::new(identity.clone(), config.discovery_config()));
        let peering = Arc::new(PeeringManager::new(Arc::clone(&transport), config.peering_config()));
        let router = Arc::new(Router::new(config.router_config(&identity.node_id)));
        let (event_tx, _) = broadcast::channel(1024);

        Self {
            identity,
            config,
            transport,
            discovery,
            peering,
            router,
            event_tx,
            tasks: Mutex::new(Vec::new()),
            started_at: RwLock::new(None),
            dial_attempts: Mutex::new(HashMap::new()),
        }
    }

    pub fn identity(&self) -> &NodeIdentity {
        &self.identity
    }

    pub fn node_id(&self) -> &str {
        &self.identity.node_id
    }

    pub fn config(&self) -> &NodeConfig {
        &self.config
    }

    pub fn transport(&self) -> &Arc<Transport> {
        &self.transport
    }

    pub fn discovery(&self) -> &Arc<Discovery> {
        &self.discovery
    }

    pub fn peering(&self) -> &Arc<PeeringManager> {
        &self.peering
    }

    pub fn router(&self) -> &Arc<Router> {
        &self.router
    }

    pub fn subscribe(&self) -> broadcast::Receiver<NodeEvent> {
        self.event_tx.subscribe()
    }

    pub async fn is_running(&self) -> bool {
        self.started_at.read().await.is_some()
    }

    /// Start every component and the event pumps. Calling it twice is a no-op.
    pub async fn start(self: &Arc<Self>) -> Result<()> {
        let mut tasks = self.tasks.lock().await;
        if !tasks.is_empty() {
            return Ok(());
        }
        info!("Mesh node {} starting (network {})", self.identity.node_id, self.identity.network_id);

        // Subscribe before anything can publish.
        let transport_rx = self.transport.subscribe();
        let router_rx = self.router.subscribe();
        let discovery_rx = self.discovery.subscribe();

        self.transport.start().await?;

        let this = Arc::clone(self);
        tasks.push(tokio::spawn(async move {
            this.run_transport_events(transport_rx).await;
        }));
        let this = Arc::clone(self);
        tasks.push(tokio::spawn(async move {
            this.run_router_events(router_rx).await;
        }));
        let this = Arc::clone(self);
        tasks.push(tokio::spawn(async move {
            this.run_discovery_events(discovery_rx).await;
        }));

        self.router.start().await;
        self.peering.start().await;

        if self.config.discovery_enabled {
            if let Err(e) = self.discovery.start().await {
                // Abort the pumps and the other components before bailing out.
                drop(tasks);
                self.stop().await;
                return Err(e.into());
            }
        } else {
            info!("Multicast discovery disabled");
        }

        let this = Arc::clone(self);
        tasks.push(tokio::spawn(async move {
            let mut ticker = tokio::time::interval(this.config.routing_interval);
            ticker.tick().await;
            loop {
                ticker.tick().await;
                this.flood_link_state().await;
            }
        }));

        *self.started_at.write().await = Some(Instant::now());
        if let Some(addr) = self.transport.local_addr().await {
            info!("Mesh node {} listening on {}", self.identity.node_id, addr);
        }
        Ok(())
    }

    /// Stop discovery, router, peering and transport, in that order. Idempotent.
    pub async fn stop(&self) {
        let handles: Vec<_> = self.tasks.lock().await.drain(..).collect();
        for handle in &handles {
            handle.abort();
        }

        self.discovery.stop().await;
        self.router.stop().await;
        self.peering.stop().await;
        self.transport.stop().await;
        self.dial_attempts.lock().await.clear();

        if self.started_at.write().await.take().is_some() {
            info!("Mesh node {} stopped", self.identity.node_id);
        }
    }

    /// Start, serve the control API until Ctrl-C, then stop.
    pub async fn run(self: Arc<Self>) -> Result<()> {
        self.start().await?;

        let app = crate::api::build_router(Arc::clone(&self));
        let listener = match tokio::net::TcpListener::bind(self.config.api_addr).await {
            Ok(l) => l,
            Err(e) => {
                self.stop().await;
                return Err(e.into());
            }
        };
        info!("HTTP control API listening on {}", self.config.api_addr);

        let served = axum::serve(listener, app)
            .with_graceful_shutdown(async {
                if let Err(e) = tokio::signal::ctrl_c().await {
                    warn!("Failed to listen for Ctrl-C: {}", e);
                }
                info!("Shutdown requested");
            })
            .await;

        self.stop().await;
        served?;
        Ok(())
    }

    /// Send a packet into the mesh. Packets for this node are delivered locally.
    pub async fn send_packet(&self, packet: Packet) -> bool {
        if packet.destination == self.identity.node_id {
            self.deliver(self.identity.node_id.clone(), packet);
            return true;
        }
        self.router.forward_packet(packet).await
    }

    /// Broadcast our neighbor map as a `route:update`. Returns the number of
    /// peers it was queued to.
    pub async fn flood_link_state(&self) -> usize {
        let payload = self.router.local_advertisement().await;
        match self.transport.broadcast(&Envelope::RouteUpdate { payload }).await {
            Ok(sent) => {
                debug!("Link state flooded to {} peers", sent);
                sent
            }
            Err(e) => {
                warn!("Link state flood failed: {}", e);
                0
            }
        }
    }

    /// Dial a node seen by discovery, unless it is already connected,
    /// blacklisted, or was tried less than `redial_backoff` ago.
    ///
    /// Returns whether a dial was attempted. Every sighting of a known node
    /// comes through here, so peers lost to a disconnect or a failed first
    /// dial are picked up again on a later announcement.
    pub async fn dial_discovered(&self, node: &DiscoveredNode) -> bool {
        if self.transport.is_connected(&node.node_id).await {
            return false;
        }
        let address = node.address.to_string();
        if self.peering.is_blacklisted(&address, node.port).await {
            debug!("Not dialing blacklisted node {} at {}", node.node_id, node.mesh_addr());
            return false;
        }

        {
            let mut attempts = self.dial_attempts.lock().await;
            let now = Instant::now();
            if let Some(last) = attempts.get(&node.node_id) {
                if now.duration_since(*last) < self.config.redial_backoff {
                    return false;
                }
            }
            attempts.insert(node.node_id.clone(), now);
        }

        if let Err(e) = self.peering.connect_to_peer(&address, node.port).await {
            warn!("Could not connect to discovered node {}: {}", node.node_id, e);
        }
        true
    }

    pub async fn status(&self) -> NodeStatus {
        let started_at = *self.started_at.read().await;
        let uptime_secs = started_at.map(|t| t.elapsed().as_secs()).unwrap_or(0);
        NodeStatus {
            node_id: self.identity.node_id.clone(),
            network_id: self.identity.network_id.clone(),
            is_running: self.is_running().await,
            peers_connected: self.transport.peer_count().await,
            routes: self.router.routing_table().await.len(),
            uptime_secs,
        }
    }

    fn deliver(&self, from: NodeId, packet: Packet) {
        info!("Packet delivered from {}", from);
        let _ = self.event_tx.send(NodeEvent::PacketDelivered { from, packet });
    }

    async fn run_transport_events(&self, mut rx: broadcast::Receiver<TransportEvent>) {
        loop {
            match rx.recv().await {
                Ok(event) => self.handle_transport_event(event).await,
                Err(RecvError::Lagged(n)) => warn!("Transport event pump lagged by {} events", n),
                Err(RecvError::Closed) => break,
            }
        }
    }

    async fn handle_transport_event(&self, event: TransportEvent) {
        match event {
            TransportEvent::PeerConnected(peer) => {
                self.router
                    .update_neighbor(&peer.id, self.router.config().default_link_cost)
                    .await;
                self.peering.track_peer(&peer.id).await;
                self.flood_link_state().await;
            }
            TransportEvent::PeerDisconnected(peer_id) => {
                self.router.remove_peer_route(&peer_id).await;
                self.peering.remove_peer(&peer_id).await;
                self.flood_link_state().await;
            }
            TransportEvent::MessageReceived { from, envelope } => {
                self.dispatch(from, envelope).await;
            }
        }
    }

    async fn dispatch(&self, from: NodeId, envelope: Envelope) {
        match envelope {
            Envelope::RouteUpdate { payload } => {
                self.router.update_route(&from, payload).await;
            }
            Envelope::PeerStatus { payload } => {
                self.peering.update_peer_status(&from, payload).await;
            }
            Envelope::DataForward { payload } => {
                if payload.destination == self.identity.node_id {
                    self.deliver(from, payload);
                } else {
                    self.router.forward_packet(payload).await;
                }
            }
            Envelope::PeeringAgreement { payload } => {
                self.peering.handle_remote_agreement(&from, payload).await;
            }
            Envelope::PeeringRevoked { .. } => {
                self.peering.handle_remote_revocation(&from).await;
            }
            other => debug!("Ignoring {} from {}", other.kind(), from),
        }
    }

    async fn run_router_events(&self, mut rx: broadcast::Receiver<RouterEvent>) {
        loop {
            match rx.recv().await {
                Ok(RouterEvent::PacketForward { packet, next_hop }) => {
                    let envelope = Envelope::DataForward { payload: packet };
                    if !self.transport.send_to_peer(&next_hop, &envelope).await {
                        warn!("Next hop {} unavailable", next_hop);
                    }
                }
                Ok(RouterEvent::PacketDropped(packet)) => {
                    debug!("No route to {}", packet.destination);
                    let _ = self.event_tx.send(NodeEvent::PacketDropped(packet));
                }
                Ok(RouterEvent::RoutesUpdated(routes)) => {
                    debug!("Routing table now has {} entries", routes.len());
                }
                Err(RecvError::Lagged(n)) => warn!("Router event pump lagged by {} events", n),
                Err(RecvError::Closed) => break,
            }
        }
    }

    async fn run_discovery_events(&self, mut rx: broadcast::Receiver<DiscoveryEvent>) {
        loop {
            match rx.recv().await {
                Ok(DiscoveryEvent::PeerDiscovered(node)) | Ok(DiscoveryEvent::PeerUpdated(node)) => {
                    self.dial_discovered(&node).await;
                }
                Ok(DiscoveryEvent::PeerLost(node)) => {
                    debug!("Discovery lost sight of {}", node.node_id);
                }
                Err(RecvError::Lagged(n)) => warn!("Discovery event pump lagged by {} events", n),
                Err(RecvError::Closed) => break,
            }
        }
    }
}
