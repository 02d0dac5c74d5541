//! Error types for meshnet-routing.

use thiserror::Error;

/// Result type for routing operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur in routing configuration.
#[derive(Debug, Error)]
pub enum Error {
    /// The algorithm name is not one of the supported ones.
    #[error("unknown routing algorithm: {0} (expected dijkstra, bellman-ford or distance-vector)")]
    UnknownAlgorithm(String),
}
