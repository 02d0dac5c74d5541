//! Async routing service.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use meshnet_protocol::{Cost, LinkStateAdvertisement, NodeId, Packet};
use tokio::sync::{broadcast, Mutex, RwLock};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::algorithm::Algorithm;
use crate::table::{LinkStateDb, Route, RoutingTable};

/// Router configuration.
#[derive(Debug, Clone)]
pub struct RouterConfig {
    /// Local node id. Never appears as a destination.
    pub node_id: NodeId,
    pub algorithm: Algorithm,
    /// Period of the background recomputation.
    pub update_interval: Duration,
    /// Cost assigned to a freshly connected neighbor.
    pub default_link_cost: Cost,
}

impl RouterConfig {
    #[must_use]
    pub fn new(node_id: impl Into<NodeId>) -> Self {
        Self {
            node_id: node_id.into(),
            algorithm: Algorithm::default(),
            update_interval: Duration::from_secs(15),
            default_link_cost: 1,
        }
    }

    #[must_use]
    pub fn with_algorithm(mut self, algorithm: Algorithm) -> Self {
        self.algorithm = algorithm;
        self
    }

    #[must_use]
    pub fn with_update_interval(mut self, interval: Duration) -> Self {
        self.update_interval = interval;
        self
    }

    #[must_use]
    pub fn with_default_link_cost(mut self, cost: Cost) -> Self {
        self.default_link_cost = cost;
        self
    }
}

/// Events published by the router.
#[derive(Debug, Clone)]
pub enum RouterEvent {
    /// The table was rebuilt. Carries every route in destination order.
    RoutesUpdated(Vec<Route>),
    /// A packet should be sent to `next_hop`.
    PacketForward { packet: Packet, next_hop: NodeId },
    /// No route to the packet's destination.
    PacketDropped(Packet),
}

struct RouterState {
    db: LinkStateDb,
    table: RoutingTable,
}

/// Routing engine.
///
/// Every mutation rebuilds the table in full. A background task also
/// rebuilds it every `update_interval` while started.
pub struct Router {
    config: RouterConfig,
    state: RwLock<RouterState>,
    event_tx: broadcast::Sender<RouterEvent>,
    tasks: Mutex<Vec<JoinHandle<()>>>,
}

impl Router {
    pub fn new(config: RouterConfig) -> Self {
        let (event_tx, _) = broadcast::channel(1024);
        let db = LinkStateDb::new(config.node_id.clone());
        Self {
            config,
            state: RwLock::new(RouterState {
                db,
                table: RoutingTable::new(),
            }),
            event_tx,
            tasks: Mutex::new(Vec::new()),
        }
    }

    pub fn config(&self) -> &RouterConfig {
        &self.config
    }

    pub fn node_id(&self) -> &str {
        &self.config.node_id
    }

    pub fn algorithm(&self) -> Algorithm {
        self.config.algorithm
    }

    pub fn subscribe(&self) -> broadcast::Receiver<RouterEvent> {
        self.event_tx.subscribe()
    }

    /// Start periodic recomputation. Calling it twice is a no-op.
    pub async fn start(self: &Arc<Self>) {
        let mut tasks = self.tasks.lock().await;
        if !tasks.is_empty() {
            return;
        }

        info!(
            "Router starting ({}, every {:?})",
            self.config.algorithm, self.config.update_interval
        );

        let router = Arc::clone(self);
        tasks.push(tokio::spawn(async move {
            let mut ticker = tokio::time::interval(router.config.update_interval);
            // First tick fires immediately.
            ticker.tick().await;
            loop {
                ticker.tick().await;
                router.recompute().await;
            }
        }));
    }

    /// Stop the timer and clear neighbors, link state, and routes.
    pub async fn stop(&self) {
        let handles: Vec<_> = self.tasks.lock().await.drain(..).collect();
        for handle in &handles {
            handle.abort();
        }

        let mut state = self.state.write().await;
        state.db.clear();
        state.table.clear();
        if !handles.is_empty() {
            info!("Router stopped");
        }
    }

    /// Rebuild the table from the current graph.
    pub async fn recompute(&self) {
        let routes: Vec<Route> = {
            let mut state = self.state.write().await;
            state.table = state.db.compute(self.config.algorithm);
            state.table.values().cloned().collect()
        };
        debug!("Routing table rebuilt: {} routes", routes.len());
        let _ = self.event_tx.send(RouterEvent::RoutesUpdated(routes));
    }

    /// Store the latest LSA from `from` and recompute.
    pub async fn update_route(&self, from: &str, lsa: LinkStateAdvertisement) {
        let accepted = self.state.write().await.db.update_link_state(from, lsa);
        if !accepted {
            warn!("Ignoring link-state advertisement attributed to local node {}", from);
            return;
        }
        debug!("Link state updated from {}", from);
        self.recompute().await;
    }

    /// Set the cost of a direct link and recompute.
    pub async fn update_neighbor(&self, neighbor: &str, cost: Cost) {
        let accepted = self.state.write().await.db.update_neighbor(neighbor, cost);
        if !accepted {
            warn!("Ignoring neighbor entry for local node {}", neighbor);
            return;
        }
        debug!("Neighbor {} cost {}", neighbor, cost);
        self.recompute().await;
    }

    /// Drop a direct neighbor (and its LSA) and recompute.
    pub async fn remove_neighbor(&self, neighbor: &str) {
        self.state.write().await.db.remove_neighbor(neighbor);
        self.recompute().await;
    }

    /// Forget everything learned through a departed peer and recompute.
    pub async fn remove_peer_route(&self, peer: &str) {
        {
            let mut state = self.state.write().await;
            state.db.remove_neighbor(peer);
            state.table.remove(peer);
        }
        info!("Removed routes via {}", peer);
        self.recompute().await;
    }

    pub async fn next_hop(&self, destination: &str) -> Option<NodeId> {
        self.state
            .read()
            .await
            .table
            .get(destination)
            .map(|route| route.next_hop.clone())
    }

    /// Decide what to do with `packet`. Publishes exactly one of
    /// [`RouterEvent::PacketForward`] or [`RouterEvent::PacketDropped`] and
    /// returns whether a route was found.
    pub async fn forward_packet(&self, packet: Packet) -> bool {
        match self.next_hop(&packet.destination).await {
            Some(next_hop) => {
                debug!("Forwarding packet for {} via {}", packet.destination, next_hop);
                let _ = self.event_tx.send(RouterEvent::PacketForward { packet, next_hop });
                true
            }
            None => {
                debug!("No route to {}, dropping packet", packet.destination);
                let _ = self.event_tx.send(RouterEvent::PacketDropped(packet));
                false
            }
        }
    }

    pub async fn routing_table(&self) -> RoutingTable {
        self.state.read().await.table.clone()
    }

    pub async fn routes(&self) -> Vec<Route> {
        self.state.read().await.table.values().cloned().collect()
    }

    pub async fn neighbors(&self) -> BTreeMap<NodeId, Cost> {
        self.state.read().await.db.neighbors().clone()
    }

    pub async fn link_state(&self) -> BTreeMap<NodeId, LinkStateAdvertisement> {
        self.state.read().await.db.link_state().clone()
    }

    /// The local node's own advertisement: its direct neighbor costs.
    pub async fn local_advertisement(&self) -> LinkStateAdvertisement {
        self.neighbors().await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::sync::broadcast::error::TryRecvError;

    fn router(id: &str) -> Arc<Router> {
        Arc::new(Router::new(RouterConfig::new(id)))
    }

    fn drain(rx: &mut broadcast::Receiver<RouterEvent>) -> Vec<RouterEvent> {
        let mut events = Vec::new();
        loop {
            match rx.try_recv() {
                Ok(ev) => events.push(ev),
                Err(TryRecvError::Lagged(_)) => continue,
                Err(_) => break,
            }
        }
        events
    }

    #[tokio::test]
    async fn forward_miss_emits_single_drop() {
        let r = router("S");
        let mut rx = r.subscribe();

        let found = r.forward_packet(Packet::new("nowhere")).await;
        assert!(!found);

        let events = drain(&mut rx);
        assert_eq!(events.len(), 1);
        match &events[0] {
            RouterEvent::PacketDropped(p) => assert_eq!(p.destination, "nowhere"),
            other => panic!("unexpected event {other:?}"),
        }
    }

    #[tokio::test]
    async fn forward_hit_names_next_hop() {
        let r = router("S");
        r.update_neighbor("A", 1).await;
        r.update_route("A", [("B".to_string(), 1)].into_iter().collect()).await;

        let mut rx = r.subscribe();
        assert!(r.forward_packet(Packet::new("B")).await);

        let events = drain(&mut rx);
        assert_eq!(events.len(), 1);
        match &events[0] {
            RouterEvent::PacketForward { packet, next_hop } => {
                assert_eq!(packet.destination, "B");
                assert_eq!(next_hop, "A");
            }
            other => panic!("unexpected event {other:?}"),
        }
    }

    #[tokio::test]
    async fn disconnect_cleanup_round_trip() {
        let r = router("S");
        let before_neighbors = r.neighbors().await;
        let before_table = r.routing_table().await;

        r.update_neighbor("A", 1).await;
        r.update_route("A", [("B".to_string(), 2)].into_iter().collect()).await;
        assert_eq!(r.next_hop("B").await.as_deref(), Some("A"));

        r.remove_peer_route("A").await;
        assert_eq!(r.neighbors().await, before_neighbors);
        assert_eq!(r.routing_table().await, before_table);
        assert!(r.link_state().await.is_empty());
    }

    #[tokio::test]
    async fn every_mutation_publishes_routes() {
        let r = router("S");
        let mut rx = r.subscribe();
        r.update_neighbor("A", 3).await;

        let events = drain(&mut rx);
        assert!(matches!(
            events.as_slice(),
            [RouterEvent::RoutesUpdated(routes)] if routes.len() == 1 && routes[0].cost == 3
        ));
    }

    #[tokio::test]
    async fn self_attributed_lsa_is_ignored() {
        let r = router("S");
        let mut rx = r.subscribe();
        r.update_route("S", [("X".to_string(), 1)].into_iter().collect()).await;
        assert!(r.link_state().await.is_empty());
        assert!(drain(&mut rx).is_empty());
    }

    #[tokio::test]
    async fn local_advertisement_tracks_neighbors() {
        let r = router("S");
        r.update_neighbor("A", 1).await;
        r.update_neighbor("B", 4).await;
        let adv = r.local_advertisement().await;
        assert_eq!(adv.get("A"), Some(&1));
        assert_eq!(adv.get("B"), Some(&4));

        r.remove_neighbor("A").await;
        assert!(!r.local_advertisement().await.contains_key("A"));
    }

    #[tokio::test]
    async fn distance_vector_router() {
        let r = Arc::new(Router::new(
            RouterConfig::new("S").with_algorithm(Algorithm::DistanceVector),
        ));
        r.update_neighbor("A", 1).await;
        r.update_neighbor("B", 5).await;
        r.update_route("A", [("C".to_string(), 1)].into_iter().collect()).await;

        let table = r.routing_table().await;
        assert_eq!(table.len(), 2);
        assert!(table.values().all(|route| route.hops == 1));
    }

    #[tokio::test]
    async fn stop_is_idempotent_and_clears_state() {
        let r = router("S");
        r.stop().await;

        r.start().await;
        r.start().await;
        r.update_neighbor("A", 1).await;
        r.stop().await;
        r.stop().await;

        assert!(r.neighbors().await.is_empty());
        assert!(r.routing_table().await.is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn periodic_recompute_fires() {
        let r = Arc::new(Router::new(
            RouterConfig::new("S").with_update_interval(Duration::from_secs(15)),
        ));
        let mut rx = r.subscribe();
        r.start().await;

        tokio::time::sleep(Duration::from_secs(16)).await;
        let events = drain(&mut rx);
        assert!(events
            .iter()
            .any(|e| matches!(e, RouterEvent::RoutesUpdated(_))));
        r.stop().await;
    }
}
