//! Error types for meshnet-peering.

use thiserror::Error;

/// Result type for peering operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors returned by the peering manager.
#[derive(Debug, Error)]
pub enum Error {
    /// The `address:port` is on the blacklist.
    #[error("peer {0} is blacklisted")]
    PeerBlacklisted(String),

    /// Already at the configured peer ceiling.
    #[error("maximum peers reached ({0})")]
    MaxPeersReached(usize),

    /// The transport refused or failed the connection.
    #[error(transparent)]
    Transport(#[from] meshnet_transport::Error),
}
