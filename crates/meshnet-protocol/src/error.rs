//! Error types for meshnet-protocol.

use thiserror::Error;

/// Result type for protocol operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors produced while encoding or decoding wire messages.
#[derive(Debug, Error)]
pub enum Error {
    /// The payload was not a valid message.
    #[error("decode error: {0}")]
    Decode(#[from] serde_json::Error),

    /// The payload was not UTF-8.
    #[error("invalid utf-8 in frame: {0}")]
    Utf8(#[from] std::str::Utf8Error),

    /// A stream frame exceeded the size limit.
    #[error("frame of {0} bytes exceeds limit")]
    FrameTooLarge(usize),

    /// An empty frame (blank line) carries no message.
    #[error("empty frame")]
    EmptyFrame,
}
