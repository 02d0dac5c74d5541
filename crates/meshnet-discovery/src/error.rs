//! Error types for meshnet-discovery.

use thiserror::Error;

/// Result type for discovery operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur while running discovery.
#[derive(Debug, Error)]
pub enum Error {
    /// Socket setup or send failure.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Datagram could not be encoded.
    #[error("protocol error: {0}")]
    Protocol(#[from] meshnet_protocol::Error),
}
