//! Error types for meshnet-transport.

use thiserror::Error;

/// Result type for transport operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur in the transport.
#[derive(Debug, Error)]
pub enum Error {
    /// Socket bind, connect, read or write failure.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Frame could not be encoded or decoded.
    #[error("protocol error: {0}")]
    Protocol(#[from] meshnet_protocol::Error),

    /// A peer sent a frame longer than the limit.
    #[error("frame of {0} bytes exceeds limit")]
    FrameTooLarge(usize),

    /// The peer map is at its configured ceiling.
    #[error("maximum peers reached ({0})")]
    MaxPeersReached(usize),

    /// The remote belongs to a different mesh.
    #[error("network id mismatch: expected {expected}, got {actual}")]
    NetworkIdMismatch { expected: String, actual: String },

    /// The remote announced our own node id.
    #[error("connection to self")]
    SelfConnection,

    /// An operation did not finish in time.
    #[error("timed out: {0}")]
    Timeout(&'static str),

    /// The connection was closed before the operation finished.
    #[error("connection closed")]
    ConnectionClosed,
}
