//! Discovery configuration.

use std::net::Ipv4Addr;
use std::time::Duration;

use meshnet_protocol::DEFAULT_MESH_PORT;

/// Discovery configuration
#[derive(Debug, Clone)]
pub struct DiscoveryConfig {
    /// Multicast group joined and announced to
    pub multicast_group: Ipv4Addr,
    /// Port bound for the group (all nodes share it)
    pub multicast_port: u16,
    /// Local interface used to join the group
    pub interface: Ipv4Addr,
    /// Mesh port advertised in every datagram
    pub mesh_port: u16,
    /// Period between self-announcements
    pub announce_interval: Duration,
    /// Period between staleness sweeps
    pub cleanup_interval: Duration,
    /// Age after which a silent node is considered lost
    pub stale_after: Duration,
    /// Multicast TTL
    pub ttl: u32,
}

impl Default for DiscoveryConfig {
    fn default() -> Self {
        Self {
            multicast_group: Ipv4Addr::new(239, 255, 255, 250),
            multicast_port: 9999,
            interface: Ipv4Addr::UNSPECIFIED,
            mesh_port: DEFAULT_MESH_PORT,
            announce_interval: Duration::from_secs(10),
            cleanup_interval: Duration::from_secs(30),
            stale_after: Duration::from_secs(60),
            ttl: 128,
        }
    }
}

impl DiscoveryConfig {
    #[must_use]
    pub fn with_multicast(mut self, group: Ipv4Addr, port: u16) -> Self {
        self.multicast_group = group;
        self.multicast_port = port;
        self
    }

    #[must_use]
    pub fn with_interface(mut self, interface: Ipv4Addr) -> Self {
        self.interface = interface;
        self
    }

    #[must_use]
    pub fn with_mesh_port(mut self, port: u16) -> Self {
        self.mesh_port = port;
        self
    }

    #[must_use]
    pub fn with_announce_interval(mut self, interval: Duration) -> Self {
        self.announce_interval = interval;
        self
    }

    #[must_use]
    pub fn with_cleanup_interval(mut self, interval: Duration) -> Self {
        self.cleanup_interval = interval;
        self
    }

    #[must_use]
    pub fn with_stale_after(mut self, stale_after: Duration) -> Self {
        self.stale_after = stale_after;
        self
    }
}
