//! Transport configuration.

use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::time::Duration;

use meshnet_protocol::DEFAULT_MESH_PORT;

/// Transport configuration
#[derive(Debug, Clone)]
pub struct TransportConfig {
    /// Interface to bind both listeners to
    pub host: IpAddr,
    /// Mesh (TCP) port; the probe responder uses port + 1. Zero binds
    /// ephemeral ports for both.
    pub port: u16,
    /// Ceiling on established peers
    pub max_peers: usize,
    /// Time allowed for the remote handshake to arrive
    pub handshake_timeout: Duration,
    /// Time allowed for an outbound TCP connect
    pub connect_timeout: Duration,
}

impl Default for TransportConfig {
    fn default() -> Self {
        Self {
            host: IpAddr::V4(Ipv4Addr::UNSPECIFIED),
            port: DEFAULT_MESH_PORT,
            max_peers: 50,
            handshake_timeout: Duration::from_secs(10),
            connect_timeout: Duration::from_secs(10),
        }
    }
}

impl TransportConfig {
    #[must_use]
    pub fn with_host(mut self, host: IpAddr) -> Self {
        self.host = host;
        self
    }

    #[must_use]
    pub fn with_port(mut self, port: u16) -> Self {
        self.port = port;
        self
    }

    #[must_use]
    pub fn with_max_peers(mut self, max_peers: usize) -> Self {
        self.max_peers = max_peers;
        self
    }

    #[must_use]
    pub fn with_handshake_timeout(mut self, timeout: Duration) -> Self {
        self.handshake_timeout = timeout;
        self
    }

    #[must_use]
    pub fn with_connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = timeout;
        self
    }

    pub fn listen_addr(&self) -> SocketAddr {
        SocketAddr::new(self.host, self.port)
    }

    /// Address for the UDP probe responder.
    pub fn probe_addr(&self) -> SocketAddr {
        let port = if self.port == 0 { 0 } else { self.port.wrapping_add(1) };
        SocketAddr::new(self.host, port)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn probe_port_follows_mesh_port() {
        let cfg = TransportConfig::default().with_port(9000);
        assert_eq!(cfg.probe_addr().port(), 9001);

        let ephemeral = TransportConfig::default().with_port(0);
        assert_eq!(ephemeral.probe_addr().port(), 0);
    }
}
