//! Meshnet Protocol - shared wire vocabulary for the mesh overlay
//!
//! Every component of a meshnet node speaks the same small set of messages.
//! This crate owns them so the transport, discovery, peering and routing
//! crates agree on shapes without depending on each other.
//!
//! # Overview
//!
//! - [`NodeIdentity`]: the per-process node id plus the network id that
//!   namespaces a mesh. Two nodes only peer when network ids match exactly.
//! - [`Envelope`]: stream messages, newline-delimited JSON tagged by `type`.
//! - [`DiscoveryMessage`]: multicast and probe datagrams.
//! - [`PeeringAgreement`]: the best-effort peering descriptor exchanged
//!   between peers.
//! - [`codec`]: line framing helpers used on both sides of a connection.
//!
//! # Wire format
//!
//! ```text
//! {"type":"handshake","nodeId":"...","networkId":"...","timestamp":1700000000000}\n
//! {"type":"heartbeat","nodeId":"...","timestamp":1700000000000,"peers":3}\n
//! {"type":"route:update","payload":{"node-b":1,"node-c":4}}\n
//! ```

pub mod agreement;
pub mod codec;
pub mod discovery;
pub mod envelope;
pub mod error;
pub mod identity;

pub use agreement::{AgreementStatus, AgreementTerms, PeeringAgreement, Priority};
pub use codec::{decode_datagram, decode_frame, decode_line, encode_datagram, encode_line, MAX_FRAME_LEN};
pub use discovery::DiscoveryMessage;
pub use envelope::{Cost, Envelope, LinkStateAdvertisement, Packet, RevocationNotice};
pub use error::{Error, Result};
pub use identity::{now_millis, NodeId, NodeIdentity};

/// Default mesh (stream) port.
pub const DEFAULT_MESH_PORT: u16 = 8000;
