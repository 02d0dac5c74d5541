//! Meshnet Discovery - multicast announcement and response
//!
//! Every node periodically multicasts a `discovery` datagram naming itself,
//! its network and its mesh port. Nodes on the same network answer with a
//! unicast `discovery:response`. Either kind of datagram records the sender
//! under its observed source address.
//!
//! ```text
//!   A ──discovery──────────▶ 239.255.255.250:9999 ──▶ B, C, ...
//!   A ◀──discovery:response── B          (unicast to A's source address)
//! ```
//!
//! [`DiscoveryTable`] holds the bookkeeping (dedup, staleness) and has no
//! I/O. [`Discovery`] owns the socket and the timers and publishes
//! [`DiscoveryEvent`]s.

mod config;
mod error;
mod service;
mod table;

pub use config::DiscoveryConfig;
pub use error::{Error, Result};
pub use service::{Discovery, DiscoveryEvent};
pub use table::{DiscoveredNode, DiscoveryTable, Observation};
