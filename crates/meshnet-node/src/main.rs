//! Mesh Node binary
//!
//! A self-organizing meshnet overlay node.

use std::sync::Arc;

use meshnet_node::{MeshNode, NodeConfig};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Initialize tracing
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "mesh_node=info,meshnet=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    tracing::info!("Starting Mesh Node");

    let config = NodeConfig::from_env()?;
    tracing::info!("  Network: {}", config.network_id);
    tracing::info!("  Mesh: {}:{}", config.host, config.port);
    tracing::info!("  API: http://{}", config.api_addr);
    tracing::info!("  Routing: {}", config.routing_algorithm);

    let node = Arc::new(MeshNode::new(config));
    node.run().await?;

    Ok(())
}
