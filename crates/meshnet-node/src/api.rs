//! HTTP control API.

use std::net::IpAddr;
use std::sync::Arc;

use axum::{
    extract::State,
    http::StatusCode,
    routing::{get, post},
    Json, Router,
};
use meshnet_discovery::DiscoveredNode;
use meshnet_peering::Error as PeeringError;
use meshnet_protocol::{NodeId, PeeringAgreement};
use meshnet_routing::Route;
use meshnet_transport::Topology;
use serde::{Deserialize, Serialize};
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

use crate::node::{MeshNode, NodeStatus};

type AppState = Arc<MeshNode>;

/// Build the API router.
pub fn build_router(node: AppState) -> Router {
    // CORS layer for browser dashboards
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        .route("/health", get(health))
        .route("/api/status", get(status))
        .route("/api/peers", get(list_peers))
        .route("/api/routes", get(list_routes))
        .route("/api/topology", get(topology))
        .route("/api/discovered", get(list_discovered))
        .route("/api/agreements", get(list_agreements))
        .route("/api/peer/connect", post(connect_peer))
        .layer(cors)
        .layer(TraceLayer::new_for_http())
        .with_state(node)
}

async fn health() -> &'static str {
    "OK"
}

async fn status(State(node): State<AppState>) -> Json<NodeStatus> {
    Json(node.status().await)
}

#[derive(Debug, Serialize, Deserialize)]
struct PeerSummary {
    id: NodeId,
    address: IpAddr,
    port: u16,
    latency: u64,
    connected: bool,
}

#[derive(Debug, Serialize, Deserialize)]
struct PeersResponse {
    peers: Vec<PeerSummary>,
}

async fn list_peers(State(node): State<AppState>) -> Json<PeersResponse> {
    let peers = node
        .transport()
        .peers()
        .await
        .into_iter()
        .map(|p| PeerSummary {
            id: p.id,
            address: p.address,
            port: p.port,
            latency: p.latency_ms.unwrap_or(0),
            connected: p.connected,
        })
        .collect();
    Json(PeersResponse { peers })
}

#[derive(Debug, Serialize, Deserialize)]
struct RoutesResponse {
    routes: Vec<Route>,
}

async fn list_routes(State(node): State<AppState>) -> Json<RoutesResponse> {
    Json(RoutesResponse {
        routes: node.router().routes().await,
    })
}

async fn topology(State(node): State<AppState>) -> Json<Topology> {
    Json(node.transport().topology().await)
}

#[derive(Debug, Serialize, Deserialize)]
struct DiscoveredResponse {
    nodes: Vec<DiscoveredNode>,
}

async fn list_discovered(State(node): State<AppState>) -> Json<DiscoveredResponse> {
    Json(DiscoveredResponse {
        nodes: node.discovery().discovered_nodes().await,
    })
}

#[derive(Debug, Serialize, Deserialize)]
struct AgreementsResponse {
    agreements: Vec<PeeringAgreement>,
}

async fn list_agreements(State(node): State<AppState>) -> Json<AgreementsResponse> {
    Json(AgreementsResponse {
        agreements: node.peering().peering_agreements().await,
    })
}

#[derive(Debug, Deserialize)]
struct ConnectRequest {
    address: String,
    port: u16,
}

#[derive(Debug, Serialize, Deserialize)]
struct ConnectResponse {
    success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    error: Option<String>,
}

/// Admission rejections are expected outcomes, not server faults.
fn connect_error_status(err: &PeeringError) -> StatusCode {
    match err {
        PeeringError::PeerBlacklisted(_) => StatusCode::FORBIDDEN,
        PeeringError::MaxPeersReached(_) | PeeringError::Transport(meshnet_transport::Error::MaxPeersReached(_)) => {
            StatusCode::SERVICE_UNAVAILABLE
        }
        _ => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

async fn connect_peer(
    State(node): State<AppState>,
    Json(req): Json<ConnectRequest>,
) -> (StatusCode, Json<ConnectResponse>) {
    match node.peering().connect_to_peer(&req.address, req.port).await {
        Ok(()) => (
            StatusCode::OK,
            Json(ConnectResponse {
                success: true,
                error: None,
            }),
        ),
        Err(e) => (
            connect_error_status(&e),
            Json(ConnectResponse {
                success: false,
                error: Some(e.to_string()),
            }),
        ),
    }
}
