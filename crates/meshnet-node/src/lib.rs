//! Meshnet Node - one process, one mesh member
//!
//! Architecture:
//! - [`MeshNode`] owns discovery, transport, peering and routing and pumps
//!   events between them
//! - HTTP control API for status and manual peering ([`api`])
//! - Environment-driven configuration ([`NodeConfig::from_env`])

pub mod api;
pub mod config;
pub mod error;
pub mod node;

pub use config::NodeConfig;
pub use error::{Error, Result};
pub use node::{MeshNode, NodeEvent, NodeStatus};
