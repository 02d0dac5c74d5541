//! Peering configuration.

use std::time::Duration;

/// Peering manager configuration
#[derive(Debug, Clone)]
pub struct PeeringConfig {
    /// Admission ceiling checked before dialing
    pub max_peers: usize,
    /// Period between heartbeat broadcasts
    pub heartbeat_interval: Duration,
    /// Period between stale-peer sweeps
    pub cleanup_interval: Duration,
    /// Silence after which a peer is dropped
    pub peer_timeout: Duration,
}

impl Default for PeeringConfig {
    fn default() -> Self {
        Self {
            max_peers: 50,
            heartbeat_interval: Duration::from_secs(5),
            cleanup_interval: Duration::from_secs(30),
            peer_timeout: Duration::from_secs(60),
        }
    }
}

impl PeeringConfig {
    #[must_use]
    pub fn with_max_peers(mut self, max_peers: usize) -> Self {
        self.max_peers = max_peers;
        self
    }

    #[must_use]
    pub fn with_heartbeat_interval(mut self, interval: Duration) -> Self {
        self.heartbeat_interval = interval;
        self
    }

    #[must_use]
    pub fn with_cleanup_interval(mut self, interval: Duration) -> Self {
        self.cleanup_interval = interval;
        self
    }

    #[must_use]
    pub fn with_peer_timeout(mut self, timeout: Duration) -> Self {
        self.peer_timeout = timeout;
        self
    }
}
