//! Meshnet Transport - peer connections and the handshake
//!
//! Owns one TCP listener on the mesh port and one UDP probe responder on
//! mesh port + 1. Every stream connection, inbound or outbound, starts
//! pending: both ends send a `handshake` immediately, and only when the
//! remote's handshake arrives (and its network id matches) does the
//! connection become a peer, keyed by the remote node id.
//!
//! ```text
//! Connecting ──tcp──▶ AwaitingHandshake ──handshake──▶ Established ──eof──▶ Closed
//!                            │                                   ▲
//!                            └─ mismatch / full / timeout ───────┘ (no event)
//! ```
//!
//! Only established peers appear in [`Transport::peers`] and only they
//! produce [`TransportEvent::PeerConnected`] / [`TransportEvent::PeerDisconnected`].

mod config;
mod error;
mod peer;
mod transport;

pub use config::TransportConfig;
pub use error::{Error, Result};
pub use peer::{ConnectionState, Direction, Peer, Topology, TopologyEdge, TopologyNode};
pub use transport::{Transport, TransportEvent};
