//! Node configuration.

use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::str::FromStr;
use std::time::Duration;

use meshnet_discovery::DiscoveryConfig;
use meshnet_peering::PeeringConfig;
use meshnet_routing::{Algorithm, RouterConfig};
use meshnet_transport::TransportConfig;

use crate::error::{Error, Result};

/// Configuration for a mesh node.
#[derive(Debug, Clone)]
pub struct NodeConfig {
    /// Mesh namespace; only nodes with the same id peer
    pub network_id: String,

    /// Interface for the mesh listeners
    pub host: IpAddr,

    /// Mesh (TCP) port; probe responder on port + 1
    pub port: u16,

    /// HTTP control API listen address
    pub api_addr: SocketAddr,

    /// Peer ceiling
    pub max_peers: usize,

    /// Silence after which a peer is dropped
    pub peer_timeout: Duration,

    /// Period between multicast announcements
    pub discovery_interval: Duration,

    /// Whether to run multicast discovery at all
    pub discovery_enabled: bool,

    /// Shortest-path algorithm
    pub routing_algorithm: Algorithm,

    /// Period of routing recomputation and link-state flooding
    pub routing_interval: Duration,

    /// Period between heartbeats
    pub heartbeat_interval: Duration,

    /// Minimum gap between dial attempts to the same discovered node
    pub redial_backoff: Duration,
}

impl Default for NodeConfig {
    fn default() -> Self {
        Self {
            network_id: "meshnet-001".to_string(),
            host: IpAddr::V4(Ipv4Addr::UNSPECIFIED),
            port: meshnet_protocol::DEFAULT_MESH_PORT,
            api_addr: SocketAddr::from(([0, 0, 0, 0], 3000)),
            max_peers: 50,
            peer_timeout: Duration::from_secs(60),
            discovery_interval: Duration::from_secs(10),
            discovery_enabled: true,
            routing_algorithm: Algorithm::Dijkstra,
            routing_interval: Duration::from_secs(15),
            heartbeat_interval: Duration::from_secs(5),
            redial_backoff: Duration::from_secs(15),
        }
    }
}

fn parse<T>(key: &str, raw: &str) -> Result<T>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    raw.trim()
        .parse()
        .map_err(|e| Error::Config(format!("invalid {key}={raw:?}: {e}")))
}

impl NodeConfig {
    /// Create config from environment variables with defaults for anything unset.
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Create config from an arbitrary variable source.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let mut config = Self::default();

        if let Some(v) = lookup("MESH_NETWORK_ID") {
            config.network_id = v;
        }
        if let Some(v) = lookup("MESH_HOST") {
            config.host = parse("MESH_HOST", &v)?;
        }
        if let Some(v) = lookup("MESH_PORT") {
            config.port = parse("MESH_PORT", &v)?;
        }
        if let Some(v) = lookup("MESH_API_ADDR") {
            config.api_addr = parse("MESH_API_ADDR", &v)?;
        }
        if let Some(v) = lookup("MESH_MAX_PEERS") {
            config.max_peers = parse("MESH_MAX_PEERS", &v)?;
        }
        if let Some(v) = lookup("MESH_PEER_TIMEOUT_SECS") {
            config.peer_timeout = Duration::from_secs(parse("MESH_PEER_TIMEOUT_SECS", &v)?);
        }
        if let Some(v) = lookup("MESH_DISCOVERY_INTERVAL_SECS") {
            config.discovery_interval = Duration::from_secs(parse("MESH_DISCOVERY_INTERVAL_SECS", &v)?);
        }
        if let Some(v) = lookup("MESH_REDIAL_BACKOFF_SECS") {
            config.redial_backoff = Duration::from_secs(parse("MESH_REDIAL_BACKOFF_SECS", &v)?);
        }
        if let Some(v) = lookup("MESH_ROUTING_ALGORITHM") {
            config.routing_algorithm = parse("MESH_ROUTING_ALGORITHM", &v)?;
        }

        if config.network_id.trim().is_empty() {
            return Err(Error::Config("MESH_NETWORK_ID must not be empty".to_string()));
        }
        Ok(config)
    }

    #[must_use]
    pub fn with_network_id(mut self, network_id: impl Into<String>) -> Self {
        self.network_id = network_id.into();
        self
    }

    #[must_use]
    pub fn with_listen(mut self, host: IpAddr, port: u16) -> Self {
        self.host = host;
        self.port = port;
        self
    }

    #[must_use]
    pub fn with_api_addr(mut self, addr: SocketAddr) -> Self {
        self.api_addr = addr;
        self
    }

    #[must_use]
    pub fn with_max_peers(mut self, max_peers: usize) -> Self {
        self.max_peers = max_peers;
        self
    }

    #[must_use]
    pub fn with_discovery(mut self, enabled: bool) -> Self {
        self.discovery_enabled = enabled;
        self
    }

    #[must_use]
    pub fn with_routing_algorithm(mut self, algorithm: Algorithm) -> Self {
        self.routing_algorithm = algorithm;
        self
    }

    #[must_use]
    pub fn with_routing_interval(mut self, interval: Duration) -> Self {
        self.routing_interval = interval;
        self
    }

    #[must_use]
    pub fn with_heartbeat_interval(mut self, interval: Duration) -> Self {
        self.heartbeat_interval = interval;
        self
    }

    #[must_use]
    pub fn with_redial_backoff(mut self, backoff: Duration) -> Self {
        self.redial_backoff = backoff;
        self
    }

    pub fn transport_config(&self) -> TransportConfig {
        TransportConfig::default()
            .with_host(self.host)
            .with_port(self.port)
            .with_max_peers(self.max_peers)
    }

    pub fn discovery_config(&self) -> DiscoveryConfig {
        DiscoveryConfig::default()
            .with_mesh_port(self.port)
            .with_announce_interval(self.discovery_interval)
    }

    pub fn peering_config(&self) -> PeeringConfig {
        PeeringConfig::default()
            .with_max_peers(self.max_peers)
            .with_peer_timeout(self.peer_timeout)
            .with_heartbeat_interval(self.heartbeat_interval)
    }

    pub fn router_config(&self, node_id: &str) -> RouterConfig {
        RouterConfig::new(node_id)
            .with_algorithm(self.routing_algorithm)
            .with_update_interval(self.routing_interval)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup(vars: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = vars.iter().map(|(k, v)| (k.to_string(), v.to_string())).collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn defaults_when_unset() {
        let config = NodeConfig::from_lookup(lookup(&[])).unwrap();
        assert_eq!(config.network_id, "meshnet-001");
        assert_eq!(config.port, 8000);
        assert_eq!(config.api_addr.port(), 3000);
        assert_eq!(config.max_peers, 50);
        assert_eq!(config.peer_timeout, Duration::from_secs(60));
        assert_eq!(config.discovery_interval, Duration::from_secs(10));
        assert_eq!(config.routing_algorithm, Algorithm::Dijkstra);
    }

    #[test]
    fn overrides_are_applied() {
        let config = NodeConfig::from_lookup(lookup(&[
            ("MESH_NETWORK_ID", "lab"),
            ("MESH_HOST", "127.0.0.1"),
            ("MESH_PORT", "9100"),
            ("MESH_API_ADDR", "127.0.0.1:3100"),
            ("MESH_MAX_PEERS", "4"),
            ("MESH_PEER_TIMEOUT_SECS", "20"),
            ("MESH_DISCOVERY_INTERVAL_SECS", "2"),
            ("MESH_ROUTING_ALGORITHM", "bellman-ford"),
            ("MESH_REDIAL_BACKOFF_SECS", "3"),
        ]))
        .unwrap();

        assert_eq!(config.network_id, "lab");
        assert_eq!(config.host, IpAddr::V4(Ipv4Addr::LOCALHOST));
        assert_eq!(config.transport_config().probe_addr().port(), 9101);
        assert_eq!(config.max_peers, 4);
        assert_eq!(config.peering_config().peer_timeout, Duration::from_secs(20));
        assert_eq!(config.discovery_config().announce_interval, Duration::from_secs(2));
        assert_eq!(config.router_config("n").algorithm, Algorithm::BellmanFord);
        assert_eq!(config.redial_backoff, Duration::from_secs(3));
    }

    #[test]
    fn bad_values_are_config_errors() {
        for (key, value) in [
            ("MESH_PORT", "eighty"),
            ("MESH_API_ADDR", "nowhere"),
            ("MESH_ROUTING_ALGORITHM", "ospf"),
            ("MESH_NETWORK_ID", "  "),
        ] {
            let err = NodeConfig::from_lookup(lookup(&[(key, value)])).unwrap_err();
            assert!(matches!(err, Error::Config(_)), "{key}");
        }
    }
}
