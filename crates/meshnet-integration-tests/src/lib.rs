//! Shared harness for multi-node tests over loopback.
//!
//! Everything binds `127.0.0.1` on ephemeral ports, so tests can run in
//! parallel. Multicast discovery is left off; nodes are joined explicitly.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use meshnet_node::{MeshNode, NodeConfig};
use meshnet_protocol::NodeIdentity;
use meshnet_transport::{Transport, TransportConfig};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::TcpStream;

/// Upper bound for anything a test waits on.
pub const WAIT: Duration = Duration::from_secs(5);

/// Poll `$cond` until it holds, panicking after [`WAIT`].
#[macro_export]
macro_rules! wait_until {
    ($what:expr, $cond:expr) => {{
        let deadline = tokio::time::Instant::now() + $crate::WAIT;
        loop {
            if $cond {
                break;
            }
            if tokio::time::Instant::now() >= deadline {
                panic!("timed out waiting for {}", $what);
            }
            tokio::time::sleep(std::time::Duration::from_millis(25)).await;
        }
    }};
}

pub fn loopback_config() -> TransportConfig {
    TransportConfig::default()
        .with_host("127.0.0.1".parse().expect("loopback literal"))
        .with_port(0)
}

/// A started transport on loopback.
pub async fn start_transport(id: &str, network: &str, config: TransportConfig) -> Arc<Transport> {
    let transport = Arc::new(Transport::new(NodeIdentity::new(id, network), config));
    transport.start().await.expect("transport start");
    transport
}

pub async fn mesh_port(transport: &Transport) -> u16 {
    transport.local_addr().await.expect("transport is started").port()
}

/// Loopback node config with discovery off and a short routing timer.
pub fn node_config(network: &str) -> NodeConfig {
    NodeConfig::default()
        .with_network_id(network)
        .with_listen("127.0.0.1".parse().expect("loopback literal"), 0)
        .with_discovery(false)
        .with_routing_interval(Duration::from_secs(1))
}

/// A started mesh node using [`node_config`].
pub async fn start_node(id: &str, network: &str) -> Arc<MeshNode> {
    start_node_with(id, node_config(network)).await
}

pub async fn start_node_with(id: &str, config: NodeConfig) -> Arc<MeshNode> {
    let identity = NodeIdentity::new(id, config.network_id.clone());
    let node = Arc::new(MeshNode::with_identity(identity, config));
    node.start().await.expect("node start");
    node
}

/// Connect `from` to `to` through the peering manager.
pub async fn join(from: &MeshNode, to: &MeshNode) {
    let port = mesh_port(to.transport()).await;
    from.peering()
        .connect_to_peer("127.0.0.1", port)
        .await
        .expect("connect");
}

/// Plain TCP client that speaks the line protocol by hand.
pub struct RawPeer {
    reader: BufReader<OwnedReadHalf>,
    writer: OwnedWriteHalf,
}

impl RawPeer {
    pub async fn connect(addr: SocketAddr) -> Self {
        let stream = TcpStream::connect(addr).await.expect("raw connect");
        let (read_half, writer) = stream.into_split();
        Self {
            reader: BufReader::new(read_half),
            writer,
        }
    }

    pub async fn send_line(&mut self, line: &str) {
        self.writer.write_all(line.as_bytes()).await.expect("raw write");
        self.writer.write_all(b"\n").await.expect("raw write");
    }

    /// Write raw bytes, reporting failures instead of panicking.
    pub async fn send_bytes(&mut self, bytes: &[u8]) -> std::io::Result<()> {
        self.writer.write_all(bytes).await
    }

    pub async fn send_json(&mut self, value: serde_json::Value) {
        self.send_line(&value.to_string()).await;
    }

    /// Next line, or `None` at end of stream.
    pub async fn read_line(&mut self) -> Option<String> {
        let mut line = String::new();
        let read = tokio::time::timeout(WAIT, self.reader.read_line(&mut line))
            .await
            .expect("raw read timed out")
            .ok()?;
        (read > 0).then_some(line)
    }
}
