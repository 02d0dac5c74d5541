//! Meshnet Peering - who we peer with, and on what terms
//!
//! The peering manager sits on top of the transport. It gates new
//! connections (blacklist, peer ceiling), keeps peers alive with periodic
//! heartbeats, drops peers that stop talking, and records the
//! best-effort peering agreements exchanged with them.

mod config;
mod error;
mod manager;

pub use config::PeeringConfig;
pub use error::{Error, Result};
pub use manager::{PeerInfo, PeerStatistics, PeeringEvent, PeeringManager};
