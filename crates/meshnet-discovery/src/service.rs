//! Discovery service: multicast socket, announcer and sweeper.

use std::net::{SocketAddr, SocketAddrV4};
use std::sync::Arc;

use meshnet_protocol::{decode_datagram, encode_datagram, now_millis, DiscoveryMessage, NodeIdentity};
use socket2::{Domain, Protocol, Socket, Type};
use tokio::net::UdpSocket;
use tokio::sync::{broadcast, Mutex, RwLock};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::config::DiscoveryConfig;
use crate::error::Result;
use crate::table::{DiscoveredNode, DiscoveryTable, Observation};

/// Events published by discovery.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DiscoveryEvent {
    PeerDiscovered(DiscoveredNode),
    PeerUpdated(DiscoveredNode),
    PeerLost(DiscoveredNode),
}

/// Multicast discovery service.
pub struct Discovery {
    config: DiscoveryConfig,
    identity: NodeIdentity,
    table: RwLock<DiscoveryTable>,
    socket: RwLock<Option<Arc<UdpSocket>>>,
    event_tx: broadcast::Sender<DiscoveryEvent>,
    tasks: Mutex<Vec<JoinHandle<()>>>,
}

impl Discovery {
    pub fn new(identity: NodeIdentity, config: DiscoveryConfig) -> Self {
        let (event_tx, _) = broadcast::channel(256);
        Self {
            table: RwLock::new(DiscoveryTable::new(identity.clone())),
            config,
            identity,
            socket: RwLock::new(None),
            event_tx,
            tasks: Mutex::new(Vec::new()),
        }
    }

    pub fn config(&self) -> &DiscoveryConfig {
        &self.config
    }

    pub fn subscribe(&self) -> broadcast::Receiver<DiscoveryEvent> {
        self.event_tx.subscribe()
    }

    /// Bind the group socket and start the receive, announce and sweep tasks.
    ///
    /// A bind failure is returned. Calling `start` on a running service is a no-op.
    pub async fn start(self: &Arc<Self>) -> Result<()> {
        let mut tasks = self.tasks.lock().await;
        if !tasks.is_empty() {
            return Ok(());
        }

        let socket = Arc::new(self.bind_multicast()?);
        *self.socket.write().await = Some(Arc::clone(&socket));
        info!(
            "Discovery listening on {}:{} (group {})",
            self.config.interface, self.config.multicast_port, self.config.multicast_group
        );

        let this = Arc::clone(self);
        let recv_socket = Arc::clone(&socket);
        tasks.push(tokio::spawn(async move {
            this.run_receiver(recv_socket).await;
        }));

        let this = Arc::clone(self);
        let announce_socket = Arc::clone(&socket);
        tasks.push(tokio::spawn(async move {
            let mut ticker = tokio::time::interval(this.config.announce_interval);
            loop {
                ticker.tick().await;
                this.announce(&announce_socket).await;
            }
        }));

        let this = Arc::clone(self);
        tasks.push(tokio::spawn(async move {
            let mut ticker = tokio::time::interval(this.config.cleanup_interval);
            ticker.tick().await;
            loop {
                ticker.tick().await;
                this.sweep().await;
            }
        }));

        Ok(())
    }

    /// Leave the group, cancel timers and forget every discovered node.
    /// Safe to call repeatedly or before `start`.
    pub async fn stop(&self) {
        let handles: Vec<_> = self.tasks.lock().await.drain(..).collect();
        for handle in &handles {
            handle.abort();
        }
        self.table.write().await.clear();

        if let Some(socket) = self.socket.write().await.take() {
            if let Err(e) = socket.leave_multicast_v4(self.config.multicast_group, self.config.interface) {
                debug!("Leaving multicast group failed: {}", e);
            }
            info!("Discovery stopped");
        }
    }

    /// Snapshot of currently known nodes.
    pub async fn discovered_nodes(&self) -> Vec<DiscoveredNode> {
        self.table.read().await.nodes()
    }

    /// Process one received datagram.
    ///
    /// Returns the reply to send back to `source`, if any. Malformed
    /// datagrams are dropped.
    pub async fn handle_datagram(&self, data: &[u8], source: SocketAddr) -> Option<DiscoveryMessage> {
        let message = match decode_datagram(data) {
            Ok(m) => m,
            Err(e) => {
                debug!("Dropping malformed discovery datagram from {}: {}", source, e);
                return None;
            }
        };

        let observation = self.table.write().await.observe(&message, source, now_millis());
        match observation {
            Observation::Ignored => return None,
            Observation::Discovered(node) => {
                info!("Discovered node {} at {}", node.node_id, node.mesh_addr());
                let _ = self.event_tx.send(DiscoveryEvent::PeerDiscovered(node));
            }
            Observation::Updated(node) => {
                debug!("Refreshed node {} at {}", node.node_id, node.mesh_addr());
                let _ = self.event_tx.send(DiscoveryEvent::PeerUpdated(node));
            }
        }

        message
            .is_announce()
            .then(|| DiscoveryMessage::response(&self.identity, Some(self.config.mesh_port)))
    }

    /// Drop nodes that have gone silent and publish `PeerLost` for each.
    pub async fn sweep(&self) -> Vec<DiscoveredNode> {
        let stale_after = self.config.stale_after.as_millis() as u64;
        let lost = self.table.write().await.sweep(now_millis(), stale_after);
        for node in &lost {
            info!("Lost node {}", node.node_id);
            let _ = self.event_tx.send(DiscoveryEvent::PeerLost(node.clone()));
        }
        lost
    }

    fn bind_multicast(&self) -> Result<UdpSocket> {
        let socket = Socket::new(Domain::IPV4, Type::DGRAM, Some(Protocol::UDP))?;

        // Several nodes on one host share the group port.
        socket.set_reuse_address(true)?;

        let bind_addr = SocketAddrV4::new(self.config.interface, self.config.multicast_port);
        socket.bind(&SocketAddr::V4(bind_addr).into())?;

        socket.set_multicast_ttl_v4(self.config.ttl)?;
        socket.set_multicast_loop_v4(true)?;
        socket.join_multicast_v4(&self.config.multicast_group, &self.config.interface)?;
        socket.set_nonblocking(true)?;

        let std_socket: std::net::UdpSocket = socket.into();
        Ok(UdpSocket::from_std(std_socket)?)
    }

    async fn announce(&self, socket: &UdpSocket) {
        let message = DiscoveryMessage::announce(&self.identity, Some(self.config.mesh_port));
        let group = SocketAddr::from((self.config.multicast_group, self.config.multicast_port));
        match encode_datagram(&message) {
            Ok(bytes) => {
                if let Err(e) = socket.send_to(&bytes, group).await {
                    warn!("Discovery announce failed: {}", e);
                } else {
                    debug!("Announced to {}", group);
                }
            }
            Err(e) => warn!("Failed to encode announce: {}", e),
        }
    }

    async fn run_receiver(&self, socket: Arc<UdpSocket>) {
        let mut buf = vec![0u8; 64 * 1024];
        loop {
            let (len, source) = match socket.recv_from(&mut buf).await {
                Ok(r) => r,
                Err(e) => {
                    warn!("Discovery receive error: {}", e);
                    continue;
                }
            };

            let Some(reply) = self.handle_datagram(&buf[..len], source).await else {
                continue;
            };
            match encode_datagram(&reply) {
                Ok(bytes) => {
                    if let Err(e) = socket.send_to(&bytes, source).await {
                        warn!("Discovery reply to {} failed: {}", source, e);
                    }
                }
                Err(e) => warn!("Failed to encode discovery reply: {}", e),
            }
        }
    }
}
