//! Meshnet Routing - link-state advertisements to forwarding table
//!
//! Each node knows the cost to its direct neighbors and the most recent
//! link-state advertisement (LSA) from every node that sent one. From that
//! graph it computes a forwarding table: for every reachable destination, the
//! neighbor to hand traffic to.
//!
//! # Layers
//!
//! - [`LinkStateDb`]: the graph and the algorithms. Pure and synchronous.
//! - [`Router`]: the async service. Owns a database behind a lock, rebuilds
//!   the table on every change and on a timer, and turns packets into
//!   forward/drop decisions published as [`RouterEvent`]s.
//!
//! # Algorithms
//!
//! ```text
//! dijkstra         shortest paths over neighbors + all LSAs (default)
//! bellman-ford     same graph, edge relaxation; identical costs
//! distance-vector  direct neighbors only, one hop each
//! ```
//!
//! The router decides and never transmits; delivery belongs to the caller.

mod algorithm;
mod error;
mod router;
mod table;

pub use algorithm::Algorithm;
pub use error::{Error, Result};
pub use router::{Router, RouterConfig, RouterEvent};
pub use table::{LinkStateDb, Route, RoutingTable};
