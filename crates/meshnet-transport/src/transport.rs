//! Transport service: listeners, connection tasks and the peer map.

use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Instant;

use meshnet_protocol::codec::TERMINATOR;
use meshnet_protocol::{
    decode_datagram, decode_frame, encode_datagram, encode_line, now_millis, DiscoveryMessage, Envelope, NodeId,
    NodeIdentity, MAX_FRAME_LEN,
};
use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncReadExt, AsyncWriteExt, BufReader};
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::{TcpListener, TcpStream, UdpSocket};
use tokio::sync::{broadcast, mpsc, Mutex, RwLock};
use tokio::task::{AbortHandle, JoinHandle};
use tracing::{debug, info, warn};

use crate::config::TransportConfig;
use crate::error::{Error, Result};
use crate::peer::{ConnectionState, Direction, Peer, Topology};

/// Events published by the transport.
#[derive(Debug, Clone)]
pub enum TransportEvent {
    /// Handshake completed; the peer is in the map under its node id.
    PeerConnected(Peer),
    /// An established peer left the map.
    PeerDisconnected(NodeId),
    /// Application message from an established peer.
    MessageReceived { from: NodeId, envelope: Envelope },
}

enum Outgoing {
    Frame(Vec<u8>),
    Close,
}

/// Handle to a connection's tasks.
struct Link {
    conn_id: u64,
    outbound: mpsc::UnboundedSender<Outgoing>,
    reader: Option<AbortHandle>,
}

impl Link {
    fn send(&self, frame: Vec<u8>) -> bool {
        self.outbound.send(Outgoing::Frame(frame)).is_ok()
    }

    /// Flush queued frames, close the write half and stop reading.
    fn shutdown(&self) {
        let _ = self.outbound.send(Outgoing::Close);
        if let Some(reader) = &self.reader {
            reader.abort();
        }
    }
}

struct Connection {
    peer: Peer,
    link: Link,
}

#[derive(Default)]
struct TransportState {
    /// Established connections keyed by remote node id.
    peers: HashMap<NodeId, Connection>,
    /// Connections still waiting for the remote handshake.
    pending: HashMap<u64, Connection>,
    local_addr: Option<SocketAddr>,
    probe_addr: Option<SocketAddr>,
}

impl TransportState {
    fn link_mut(&mut self, conn_id: u64) -> Option<&mut Link> {
        if let Some(conn) = self.pending.get_mut(&conn_id) {
            return Some(&mut conn.link);
        }
        self.peers
            .values_mut()
            .find(|c| c.link.conn_id == conn_id)
            .map(|c| &mut c.link)
    }

    fn take_by_conn(&mut self, conn_id: u64) -> Option<Connection> {
        let id = self
            .peers
            .iter()
            .find(|(_, c)| c.link.conn_id == conn_id)
            .map(|(id, _)| id.clone())?;
        self.peers.remove(&id)
    }
}

/// Read one `\n`-terminated frame into `buf`. Returns 0 at end of stream.
///
/// Reads at most one byte past [`MAX_FRAME_LEN`], so an unterminated flood
/// is cut off instead of buffered.
async fn read_frame<R>(reader: &mut R, buf: &mut Vec<u8>) -> Result<usize>
where
    R: AsyncBufRead + Unpin,
{
    let read = reader
        .take(MAX_FRAME_LEN as u64 + 1)
        .read_until(TERMINATOR, buf)
        .await?;
    if buf.len() > MAX_FRAME_LEN {
        return Err(Error::FrameTooLarge(buf.len()));
    }
    Ok(read)
}

/// When both nodes dial each other, the connection dialled by the node with
/// the smaller id survives. Returns true if `candidate` should replace
/// `existing` for a connection to `remote`.
fn supersedes<'a>(local: &'a str, remote: &'a str, candidate: Direction, existing: Direction) -> bool {
    let dialler = |direction| match direction {
        Direction::Outbound => local,
        Direction::Inbound => remote,
    };
    let preferred = local.min(remote);
    dialler(candidate) != dialler(existing) && dialler(candidate) == preferred
}

/// Stream transport and peer registry.
pub struct Transport {
    identity: NodeIdentity,
    config: TransportConfig,
    state: RwLock<TransportState>,
    next_conn_id: AtomicU64,
    event_tx: broadcast::Sender<TransportEvent>,
    tasks: Mutex<Vec<JoinHandle<()>>>,
}

impl Transport {
    pub fn new(identity: NodeIdentity, config: TransportConfig) -> Self {
        let (event_tx, _) = broadcast::channel(1024);
        Self {
            identity,
            config,
            state: RwLock::new(TransportState::default()),
            next_conn_id: AtomicU64::new(1),
            event_tx,
            tasks: Mutex::new(Vec::new()),
        }
    }

    pub fn identity(&self) -> &NodeIdentity {
        &self.identity
    }

    pub fn node_id(&self) -> &str {
        &self.identity.node_id
    }

    pub fn config(&self) -> &TransportConfig {
        &self.config
    }

    pub fn subscribe(&self) -> broadcast::Receiver<TransportEvent> {
        self.event_tx.subscribe()
    }

    /// Bind the mesh listener and the probe responder and start accepting.
    pub async fn start(self: &Arc<Self>) -> Result<()> {
        let mut tasks = self.tasks.lock().await;
        if !tasks.is_empty() {
            return Ok(());
        }

        let listener = TcpListener::bind(self.config.listen_addr()).await?;
        let local_addr = listener.local_addr()?;
        let probe = UdpSocket::bind(self.config.probe_addr()).await?;
        let probe_addr = probe.local_addr()?;

        {
            let mut state = self.state.write().await;
            state.local_addr = Some(local_addr);
            state.probe_addr = Some(probe_addr);
        }
        info!("Mesh transport (TCP) listening on {}", local_addr);
        info!("Probe responder (UDP) listening on {}", probe_addr);

        let this = Arc::clone(self);
        tasks.push(tokio::spawn(async move {
            this.run_acceptor(listener).await;
        }));

        let this = Arc::clone(self);
        let mesh_port = local_addr.port();
        tasks.push(tokio::spawn(async move {
            this.run_probe_responder(probe, mesh_port).await;
        }));

        Ok(())
    }

    /// Close every connection and both listeners. Safe to call repeatedly or
    /// before `start`.
    pub async fn stop(&self) {
        let handles: Vec<_> = self.tasks.lock().await.drain(..).collect();
        for handle in &handles {
            handle.abort();
        }

        let (peers, pending) = {
            let mut state = self.state.write().await;
            state.local_addr = None;
            state.probe_addr = None;
            (std::mem::take(&mut state.peers), std::mem::take(&mut state.pending))
        };

        for conn in pending.values() {
            conn.link.shutdown();
        }
        for (id, conn) in peers {
            conn.link.shutdown();
            let _ = self.event_tx.send(TransportEvent::PeerDisconnected(id));
        }

        if !handles.is_empty() {
            info!("Transport stopped");
        }
    }

    /// Dial a peer. Returns once the TCP connection is up; the peer is
    /// announced by [`TransportEvent::PeerConnected`] after the handshake.
    pub async fn connect_to_peer(self: &Arc<Self>, address: &str, port: u16) -> Result<()> {
        if self.is_full().await {
            return Err(Error::MaxPeersReached(self.config.max_peers));
        }

        debug!("Connecting to {}:{}", address, port);
        let started = Instant::now();
        let stream = match tokio::time::timeout(self.config.connect_timeout, TcpStream::connect((address, port))).await
        {
            Ok(result) => result?,
            Err(_) => return Err(Error::Timeout("connect")),
        };
        let latency_ms = started.elapsed().as_millis() as u64;
        let remote = stream.peer_addr()?;

        self.attach(stream, remote, Direction::Outbound, Some(latency_ms)).await?;
        info!("Connected to {} ({}ms)", remote, latency_ms);
        Ok(())
    }

    /// Close an established peer. Returns false if it was not connected.
    pub async fn disconnect_peer(&self, peer_id: &str) -> bool {
        let removed = self.state.write().await.peers.remove(peer_id);
        match removed {
            Some(conn) => {
                info!("Disconnecting peer {}", peer_id);
                conn.link.shutdown();
                let _ = self.event_tx.send(TransportEvent::PeerDisconnected(conn.peer.id));
                true
            }
            None => false,
        }
    }

    /// Queue `envelope` to every established peer. Returns how many accepted it.
    pub async fn broadcast(&self, envelope: &Envelope) -> Result<usize> {
        let frame = encode_line(envelope)?;
        let state = self.state.read().await;
        let mut sent = 0;
        for (id, conn) in &state.peers {
            if conn.link.send(frame.clone()) {
                sent += 1;
            } else {
                warn!("Broadcast of {} to {} failed", envelope.kind(), id);
            }
        }
        Ok(sent)
    }

    /// Queue `envelope` to one peer.
    pub async fn send_to_peer(&self, peer_id: &str, envelope: &Envelope) -> bool {
        let frame = match encode_line(envelope) {
            Ok(f) => f,
            Err(e) => {
                warn!("Failed to encode {}: {}", envelope.kind(), e);
                return false;
            }
        };
        let state = self.state.read().await;
        match state.peers.get(peer_id) {
            Some(conn) => conn.link.send(frame),
            None => {
                debug!("Cannot send {} to {}: not connected", envelope.kind(), peer_id);
                false
            }
        }
    }

    /// Established peers ordered by id.
    pub async fn peers(&self) -> Vec<Peer> {
        let state = self.state.read().await;
        let mut peers: Vec<Peer> = state.peers.values().map(|c| c.peer.clone()).collect();
        peers.sort_by(|a, b| a.id.cmp(&b.id));
        peers
    }

    pub async fn peer(&self, peer_id: &str) -> Option<Peer> {
        self.state.read().await.peers.get(peer_id).map(|c| c.peer.clone())
    }

    pub async fn peer_count(&self) -> usize {
        self.state.read().await.peers.len()
    }

    /// Connections that have not completed the handshake.
    pub async fn pending_count(&self) -> usize {
        self.state.read().await.pending.len()
    }

    pub async fn is_full(&self) -> bool {
        self.peer_count().await >= self.config.max_peers
    }

    pub async fn is_connected(&self, peer_id: &str) -> bool {
        self.state.read().await.peers.contains_key(peer_id)
    }

    pub async fn last_heartbeat(&self, peer_id: &str) -> Option<u64> {
        self.state.read().await.peers.get(peer_id).map(|c| c.peer.last_heartbeat)
    }

    pub async fn local_addr(&self) -> Option<SocketAddr> {
        self.state.read().await.local_addr
    }

    pub async fn probe_addr(&self) -> Option<SocketAddr> {
        self.state.read().await.probe_addr
    }

    pub async fn topology(&self) -> Topology {
        let peers = self.peers().await;
        Topology::build(&self.identity.node_id, &peers)
    }

    async fn run_acceptor(self: Arc<Self>, listener: TcpListener) {
        loop {
            match listener.accept().await {
                Ok((stream, addr)) => {
                    debug!("Incoming mesh connection from {}", addr);
                    if let Err(e) = self.attach(stream, addr, Direction::Inbound, None).await {
                        warn!("Failed to set up connection from {}: {}", addr, e);
                    }
                }
                Err(e) => {
                    warn!("Accept error: {}", e);
                }
            }
        }
    }

    async fn run_probe_responder(&self, socket: UdpSocket, mesh_port: u16) {
        let mut buf = vec![0u8; 64 * 1024];
        loop {
            let (len, source) = match socket.recv_from(&mut buf).await {
                Ok(r) => r,
                Err(e) => {
                    warn!("Probe receive error: {}", e);
                    continue;
                }
            };

            let Some(reply) = self.probe_reply(&buf[..len], mesh_port) else {
                continue;
            };
            match encode_datagram(&reply) {
                Ok(bytes) => {
                    if let Err(e) = socket.send_to(&bytes, source).await {
                        warn!("Probe reply to {} failed: {}", source, e);
                    } else {
                        debug!("Answered probe from {}", source);
                    }
                }
                Err(e) => warn!("Failed to encode probe reply: {}", e),
            }
        }
    }

    /// Reply for a direct `discovery` probe, if it deserves one.
    fn probe_reply(&self, data: &[u8], mesh_port: u16) -> Option<DiscoveryMessage> {
        let message = match decode_datagram(data) {
            Ok(m) => m,
            Err(e) => {
                debug!("Dropping malformed probe: {}", e);
                return None;
            }
        };
        let wanted = message.is_announce()
            && message.node_id() != self.identity.node_id
            && self.identity.same_network(message.network_id());
        wanted.then(|| DiscoveryMessage::response(&self.identity, Some(mesh_port)))
    }

    /// Register a fresh stream as a pending connection, queue our handshake
    /// and spawn its reader and writer.
    async fn attach(
        self: &Arc<Self>,
        stream: TcpStream,
        remote: SocketAddr,
        direction: Direction,
        latency_ms: Option<u64>,
    ) -> Result<()> {
        if let Err(e) = stream.set_nodelay(true) {
            debug!("set_nodelay failed for {}: {}", remote, e);
        }

        let conn_id = self.next_conn_id.fetch_add(1, Ordering::Relaxed);
        let handshake = encode_line(&Envelope::handshake(&self.identity))?;
        let (read_half, write_half) = stream.into_split();
        let (tx, rx) = mpsc::unbounded_channel();
        let _ = tx.send(Outgoing::Frame(handshake));

        let peer = Peer {
            id: format!("conn-{conn_id}"),
            address: remote.ip(),
            port: remote.port(),
            direction,
            state: ConnectionState::AwaitingHandshake,
            connected: false,
            connected_at: 0,
            last_heartbeat: 0,
            latency_ms,
        };
        self.state.write().await.pending.insert(
            conn_id,
            Connection {
                peer,
                link: Link {
                    conn_id,
                    outbound: tx,
                    reader: None,
                },
            },
        );

        let writer = Arc::clone(self);
        tokio::spawn(async move {
            writer.write_loop(conn_id, write_half, rx).await;
        });

        let reader = Arc::clone(self);
        let handle = tokio::spawn(async move {
            match reader.read_loop(conn_id, read_half).await {
                Ok(()) => debug!("Connection {} reached end of stream", conn_id),
                Err(e) => warn!("Connection {} closed: {}", conn_id, e),
            }
            reader.close_connection(conn_id).await;
        });

        if let Some(link) = self.state.write().await.link_mut(conn_id) {
            link.reader = Some(handle.abort_handle());
        }
        Ok(())
    }

    async fn write_loop(&self, conn_id: u64, mut writer: OwnedWriteHalf, mut rx: mpsc::UnboundedReceiver<Outgoing>) {
        while let Some(item) = rx.recv().await {
            match item {
                Outgoing::Frame(bytes) => {
                    if let Err(e) = writer.write_all(&bytes).await {
                        warn!("Write on connection {} failed: {}", conn_id, e);
                        self.close_connection(conn_id).await;
                        break;
                    }
                }
                Outgoing::Close => break,
            }
        }
        let _ = writer.shutdown().await;
    }

    /// Read frames until end of stream. The first handshake must arrive
    /// within `handshake_timeout`.
    async fn read_loop(&self, conn_id: u64, read_half: OwnedReadHalf) -> Result<()> {
        let mut reader = BufReader::new(read_half);
        let mut buf = Vec::new();
        let deadline = tokio::time::Instant::now() + self.config.handshake_timeout;
        let mut remote_id: Option<NodeId> = None;

        loop {
            buf.clear();
            let read = match remote_id {
                Some(_) => read_frame(&mut reader, &mut buf).await?,
                None => match tokio::time::timeout_at(deadline, read_frame(&mut reader, &mut buf)).await {
                    Ok(result) => result?,
                    Err(_) => return Err(Error::Timeout("handshake")),
                },
            };
            if read == 0 {
                return Ok(());
            }

            let envelope = match decode_frame(&buf) {
                Ok(env) => env,
                Err(meshnet_protocol::Error::EmptyFrame) => continue,
                Err(e) => {
                    warn!("Skipping undecodable frame on connection {}: {}", conn_id, e);
                    continue;
                }
            };

            let Some(id) = remote_id.as_deref() else {
                match envelope {
                    Envelope::Handshake { node_id, network_id, .. } => {
                        match self.complete_handshake(conn_id, node_id, network_id).await? {
                            Some(id) => remote_id = Some(id),
                            None => return Ok(()),
                        }
                    }
                    other => {
                        debug!("Dropping {} received before handshake on connection {}", other.kind(), conn_id);
                    }
                }
                continue;
            };

            match envelope {
                Envelope::Handshake { .. } => debug!("Ignoring repeated handshake from {}", id),
                Envelope::Heartbeat { .. } => self.touch_heartbeat(id).await,
                envelope => {
                    debug!("Received {} from {}", envelope.kind(), id);
                    let _ = self.event_tx.send(TransportEvent::MessageReceived {
                        from: id.to_string(),
                        envelope,
                    });
                }
            }
        }
    }

    /// Promote a pending connection to an established peer.
    ///
    /// Returns the remote id, or `None` when the connection lost a duplicate
    /// race and should close quietly.
    async fn complete_handshake(&self, conn_id: u64, node_id: NodeId, network_id: String) -> Result<Option<NodeId>> {
        let mut state = self.state.write().await;
        let Some(mut conn) = state.pending.remove(&conn_id) else {
            return Err(Error::ConnectionClosed);
        };

        if !self.identity.same_network(&network_id) {
            return Err(Error::NetworkIdMismatch {
                expected: self.identity.network_id.clone(),
                actual: network_id,
            });
        }
        if node_id == self.identity.node_id {
            return Err(Error::SelfConnection);
        }

        let now = now_millis();
        conn.peer.id = node_id.clone();
        conn.peer.state = ConnectionState::Established;
        conn.peer.connected = true;
        conn.peer.connected_at = now;
        conn.peer.last_heartbeat = now;

        if let Some(existing) = state.peers.get(&node_id) {
            if !supersedes(&self.identity.node_id, &node_id, conn.peer.direction, existing.peer.direction) {
                debug!("Closing duplicate connection {} to {}", conn_id, node_id);
                return Ok(None);
            }
            debug!("Connection {} replaces existing link to {}", conn_id, node_id);
            if let Some(old) = state.peers.insert(node_id.clone(), conn) {
                old.link.shutdown();
            }
            return Ok(Some(node_id));
        }

        if state.peers.len() >= self.config.max_peers {
            return Err(Error::MaxPeersReached(self.config.max_peers));
        }

        let peer = conn.peer.clone();
        state.peers.insert(node_id.clone(), conn);
        drop(state);

        info!("Peer {} connected ({}:{}, {:?})", node_id, peer.address, peer.port, peer.direction);
        let _ = self.event_tx.send(TransportEvent::PeerConnected(peer));
        Ok(Some(node_id))
    }

    async fn touch_heartbeat(&self, peer_id: &str) {
        if let Some(conn) = self.state.write().await.peers.get_mut(peer_id) {
            conn.peer.last_heartbeat = now_millis();
        }
    }

    /// Remove whatever record `conn_id` belongs to. No-op if already gone.
    async fn close_connection(&self, conn_id: u64) {
        let removed = {
            let mut state = self.state.write().await;
            if let Some(conn) = state.pending.remove(&conn_id) {
                debug!("Pending connection {} closed", conn.link.conn_id);
                return;
            }
            state.take_by_conn(conn_id)
        };

        if let Some(conn) = removed {
            info!("Peer {} disconnected", conn.peer.id);
            let _ = self.event_tx.send(TransportEvent::PeerDisconnected(conn.peer.id.clone()));
            conn.link.shutdown();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn transport(id: &str, network: &str) -> Arc<Transport> {
        let config = TransportConfig::default()
            .with_host("127.0.0.1".parse().unwrap())
            .with_port(0);
        Arc::new(Transport::new(NodeIdentity::new(id, network), config))
    }

    #[test]
    fn smaller_id_dialler_wins() {
        // Local "a" < remote "b": keep what "a" dialled (our outbound).
        assert!(supersedes("a", "b", Direction::Outbound, Direction::Inbound));
        assert!(!supersedes("a", "b", Direction::Inbound, Direction::Outbound));
        // Local "b" > remote "a": keep what "a" dialled (our inbound).
        assert!(supersedes("b", "a", Direction::Inbound, Direction::Outbound));
        assert!(!supersedes("b", "a", Direction::Outbound, Direction::Inbound));
        // Same dialler twice: the existing connection stays.
        assert!(!supersedes("a", "b", Direction::Outbound, Direction::Outbound));
    }

    #[test]
    fn probe_reply_rules() {
        let t = transport("me", "mesh");
        let probe = |id: &str, net: &str| {
            encode_datagram(&DiscoveryMessage::announce(&NodeIdentity::new(id, net), None)).unwrap()
        };

        let reply = t.probe_reply(&probe("n1", "mesh"), 8123).unwrap();
        assert!(!reply.is_announce());
        assert_eq!(reply.node_id(), "me");
        assert_eq!(reply.port(), Some(8123));

        assert!(t.probe_reply(&probe("n1", "other"), 8123).is_none());
        assert!(t.probe_reply(&probe("me", "mesh"), 8123).is_none());
        assert!(t.probe_reply(b"garbage", 8123).is_none());

        let response = encode_datagram(&DiscoveryMessage::response(&NodeIdentity::new("n1", "mesh"), None)).unwrap();
        assert!(t.probe_reply(&response, 8123).is_none());
    }

    #[tokio::test]
    async fn stop_before_start_and_twice() {
        let t = transport("me", "mesh");
        t.stop().await;
        t.start().await.unwrap();
        assert!(t.local_addr().await.is_some());
        t.stop().await;
        t.stop().await;
        assert!(t.local_addr().await.is_none());
    }

    #[tokio::test]
    async fn zero_ceiling_rejects_without_dialing() {
        let config = TransportConfig::default().with_max_peers(0);
        let t = Arc::new(Transport::new(NodeIdentity::new("me", "mesh"), config));
        let err = t.connect_to_peer("127.0.0.1", 1).await.unwrap_err();
        assert!(matches!(err, Error::MaxPeersReached(0)));
        assert_eq!(t.peer_count().await, 0);
        assert_eq!(t.pending_count().await, 0);
    }

    #[tokio::test]
    async fn send_to_unknown_peer_is_false() {
        let t = transport("me", "mesh");
        assert!(!t.send_to_peer("ghost", &Envelope::heartbeat("me", 0)).await);
        assert!(!t.disconnect_peer("ghost").await);
        assert_eq!(t.broadcast(&Envelope::heartbeat("me", 0)).await.unwrap(), 0);
    }

    #[tokio::test]
    async fn loopback_handshake_rekeys_both_sides() {
        let a = transport("node-a", "mesh");
        let b = transport("node-b", "mesh");
        a.start().await.unwrap();
        b.start().await.unwrap();
        let mut a_rx = a.subscribe();
        let mut b_rx = b.subscribe();

        let port = b.local_addr().await.unwrap().port();
        a.connect_to_peer("127.0.0.1", port).await.unwrap();

        let wait = std::time::Duration::from_secs(5);
        let ev = tokio::time::timeout(wait, a_rx.recv()).await.unwrap().unwrap();
        assert!(matches!(ev, TransportEvent::PeerConnected(ref p) if p.id == "node-b" && p.latency_ms.is_some()));
        let ev = tokio::time::timeout(wait, b_rx.recv()).await.unwrap().unwrap();
        assert!(matches!(ev, TransportEvent::PeerConnected(ref p) if p.id == "node-a" && p.direction == Direction::Inbound));

        assert!(a.is_connected("node-b").await);
        assert!(b.is_connected("node-a").await);
        assert_eq!(a.topology().await.edges.len(), 1);

        a.stop().await;
        b.stop().await;
    }
}
