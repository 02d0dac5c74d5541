//! Error types for the mesh node.

use thiserror::Error;

/// Result type for node operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur while configuring or running a node.
#[derive(Debug, Error)]
pub enum Error {
    /// Invalid configuration value
    #[error("Config error: {0}")]
    Config(String),

    /// Transport error
    #[error("Transport error: {0}")]
    Transport(#[from] meshnet_transport::Error),

    /// Discovery error
    #[error("Discovery error: {0}")]
    Discovery(#[from] meshnet_discovery::Error),

    /// Peering error
    #[error("Peering error: {0}")]
    Peering(#[from] meshnet_peering::Error),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}
