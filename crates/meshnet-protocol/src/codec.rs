//! Line framing.
//!
//! Stream messages are single-line JSON documents terminated by `\n`.
//! `serde_json` never emits a raw newline inside a document, so the
//! terminator is unambiguous. Datagrams carry one JSON document each, with
//! no terminator.

use crate::discovery::DiscoveryMessage;
use crate::envelope::Envelope;
use crate::error::{Error, Result};

/// Frame terminator.
pub const TERMINATOR: u8 = b'\n';

/// Largest stream frame accepted, terminator included.
pub const MAX_FRAME_LEN: usize = 1024 * 1024;

/// Serialize an envelope into a terminated frame.
pub fn encode_line(envelope: &Envelope) -> Result<Vec<u8>> {
    let mut buf = serde_json::to_vec(envelope)?;
    buf.push(TERMINATOR);
    Ok(buf)
}

/// Parse one frame. Surrounding whitespace and the terminator are ignored.
pub fn decode_line(line: &str) -> Result<Envelope> {
    let trimmed = line.trim();
    if trimmed.is_empty() {
        return Err(Error::EmptyFrame);
    }
    Ok(serde_json::from_str(trimmed)?)
}

/// Parse one raw frame as read off the wire. Invalid UTF-8 is an error,
/// never replaced.
pub fn decode_frame(frame: &[u8]) -> Result<Envelope> {
    if frame.len() > MAX_FRAME_LEN {
        return Err(Error::FrameTooLarge(frame.len()));
    }
    decode_line(std::str::from_utf8(frame)?)
}

/// Serialize a discovery datagram.
pub fn encode_datagram(message: &DiscoveryMessage) -> Result<Vec<u8>> {
    Ok(serde_json::to_vec(message)?)
}

/// Parse a discovery datagram.
pub fn decode_datagram(data: &[u8]) -> Result<DiscoveryMessage> {
    let text = std::str::from_utf8(data)?;
    Ok(serde_json::from_str(text.trim())?)
}
