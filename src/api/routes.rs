//! API Routes
//!
//! The HTTP surface of the node: control-plane pushes (directory and
//! policy snapshots), the peer enumeration and resolution endpoints the
//! integration harness relies on, health checks and metrics.

use axum::{
    extract::{Path as UrlPath, State},
    http::StatusCode,
    response::IntoResponse,
    routing::{get, put},
    Json, Router,
};
use serde::Deserialize;
use std::net::{IpAddr, SocketAddr};
use std::path::PathBuf;
use std::sync::Arc;
use tower_http::trace::TraceLayer;
use tracing::{info, warn};

use crate::api::Metrics;
use crate::config::ServiceConfig;
use crate::directory::{Node, PeerDirectory};
use crate::dns::wire::{self, TYPE_A};
use crate::policy::{DnsPolicy, PolicyHandle};
use crate::resolvconf;
use crate::resolver::{Resolution, Resolver};

/// Shared API state
pub struct ApiState {
    pub config: Arc<ServiceConfig>,
    pub directory: Arc<PeerDirectory>,
    pub policy: Arc<PolicyHandle>,
    pub resolver: Arc<Resolver>,
    pub metrics: Arc<Metrics>,
    pub resolv_conf_path: PathBuf,
}

/// Run the HTTP API server
pub async fn run_api_server(state: Arc<ApiState>) -> anyhow::Result<()> {
    let addr = SocketAddr::from(([0, 0, 0, 0], state.config.api_port));
    let app = router(state);

    info!("📊 HTTP API server listening on {addr}");

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}

fn router(state: Arc<ApiState>) -> Router {
    Router::new()
        // Health & status
        .route("/health", get(health_check))
        .route("/status", get(get_status))
        // Control plane (full-replacement snapshots)
        .route("/directory", put(put_directory).get(get_directory))
        .route("/policy", put(put_policy).get(get_policy))
        // Harness collaborator: resolve a name on this node
        .route("/resolve/:name", get(resolve_name))
        // Metrics
        .route("/metrics", get(get_metrics_prometheus))
        .route("/metrics/json", get(get_metrics_json))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// GET /health - Simple health check
async fn health_check() -> impl IntoResponse {
    "OK"
}

/// GET /status - Detailed status
async fn get_status(State(state): State<Arc<ApiState>>) -> impl IntoResponse {
    let snapshot = state.directory.snapshot().await;
    let policy = state.policy.current().await;

    Json(serde_json::json!({
        "status": "healthy",
        "version": env!("CARGO_PKG_VERSION"),
        "uptime_secs": state.metrics.uptime_secs(),
        "timestamp": chrono::Utc::now().timestamp(),
        "directory": {
            "serial": snapshot.serial(),
            "nodes": snapshot.len(),
            "online": snapshot.online_count(),
        },
        "policy": {
            "base_domain": policy.base_domain,
            "magic_dns": policy.magic_dns,
            "global_nameservers": policy.global_nameservers.len(),
            "split_nameservers": policy.split_nameservers.len(),
            "search_domains": policy.search_domains.len(),
            "extra_records": policy.extra_records.len(),
        },
    }))
}

/// Node record as the control plane transmits it
#[derive(Debug, Deserialize)]
pub struct NodeSpec {
    pub hostname: String,
    pub addresses: Vec<IpAddr>,
    #[serde(default = "default_online")]
    pub online: bool,
}

fn default_online() -> bool {
    true
}

/// Full-replacement directory snapshot
#[derive(Debug, Deserialize)]
pub struct DirectoryUpdate {
    pub serial: u64,
    pub nodes: Vec<NodeSpec>,
}

/// PUT /directory - Apply a full-replacement directory snapshot
async fn put_directory(
    State(state): State<Arc<ApiState>>,
    Json(update): Json<DirectoryUpdate>,
) -> impl IntoResponse {
    let mut nodes = Vec::with_capacity(update.nodes.len());
    for spec in update.nodes {
        match Node::new(&spec.hostname, spec.addresses, spec.online) {
            Ok(node) => nodes.push(node),
            Err(e) => {
                warn!("rejecting directory update: {e}");
                return (
                    StatusCode::BAD_REQUEST,
                    Json(serde_json::json!({ "error": e.to_string() })),
                );
            }
        }
    }

    let count = nodes.len();
    let applied = state.directory.replace(update.serial, nodes).await;
    if applied {
        state.metrics.inc_directory_updates();
        state.metrics.set_directory_nodes(count as u64);
    } else {
        state.metrics.inc_directory_stale_rejected();
    }

    (
        StatusCode::OK,
        Json(serde_json::json!({ "applied": applied, "serial": update.serial })),
    )
}

/// GET /directory - Enumerate peers and their FQDN/address pairs
async fn get_directory(State(state): State<Arc<ApiState>>) -> impl IntoResponse {
    let snapshot = state.directory.snapshot().await;

    let mut peers: Vec<_> = snapshot
        .entries()
        .map(|(fqdn, node)| {
            serde_json::json!({
                "fqdn": fqdn,
                "hostname": node.hostname,
                "addresses": node.addresses,
                "online": node.online,
            })
        })
        .collect();
    peers.sort_by_key(|p| p["fqdn"].as_str().map(String::from));

    Json(serde_json::json!({
        "serial": snapshot.serial(),
        "count": peers.len(),
        "peers": peers,
    }))
}

/// PUT /policy - Apply a full-replacement DNS policy
async fn put_policy(
    State(state): State<Arc<ApiState>>,
    Json(policy): Json<DnsPolicy>,
) -> impl IntoResponse {
    // Synthesis validates and writes the resolver file; only then does the
    // new policy become visible to queries. An invalid policy changes
    // nothing, including the previously written file.
    if let Err(e) = resolvconf::apply(&policy, &state.resolv_conf_path).await {
        warn!("rejecting policy update: {e}");
        state.metrics.inc_policy_rejected();
        return (
            StatusCode::UNPROCESSABLE_ENTITY,
            Json(serde_json::json!({ "error": e.to_string() })),
        );
    }

    state.directory.set_base_domain(&policy.base_domain).await;
    state.policy.replace(policy).await;
    state.metrics.inc_policy_updates();
    info!("DNS policy replaced");

    (StatusCode::OK, Json(serde_json::json!({ "applied": true })))
}

/// GET /policy - The currently applied policy
async fn get_policy(State(state): State<Arc<ApiState>>) -> impl IntoResponse {
    let policy = state.policy.current().await;
    Json(policy.as_ref().clone())
}

/// GET /resolve/{name} - Resolve a name the way the stub server would
async fn resolve_name(
    State(state): State<Arc<ApiState>>,
    UrlPath(name): UrlPath<String>,
) -> impl IntoResponse {
    let query = match wire::build_query(0, &name, TYPE_A) {
        Ok(query) => query,
        Err(e) => {
            return (
                StatusCode::BAD_REQUEST,
                Json(serde_json::json!({ "error": e.to_string() })),
            )
        }
    };

    match state.resolver.resolve(&name, &query).await {
        Ok(Resolution::Answer { addresses, source }) => (
            StatusCode::OK,
            Json(serde_json::json!({
                "name": name,
                "source": source.as_str(),
                "addresses": addresses,
            })),
        ),
        Ok(Resolution::Relayed { payload, source }) => {
            let addresses = wire::parse_response_addresses(&payload).unwrap_or_default();
            (
                StatusCode::OK,
                Json(serde_json::json!({
                    "name": name,
                    "source": source.as_str(),
                    "addresses": addresses,
                })),
            )
        }
        Ok(Resolution::NotFound) => (
            StatusCode::NOT_FOUND,
            Json(serde_json::json!({ "name": name, "error": "not found" })),
        ),
        Err(e) => (
            StatusCode::BAD_GATEWAY,
            Json(serde_json::json!({ "name": name, "error": e.to_string() })),
        ),
    }
}

/// GET /metrics - Prometheus format metrics
async fn get_metrics_prometheus(State(state): State<Arc<ApiState>>) -> impl IntoResponse {
    state
        .metrics
        .set_directory_nodes(state.directory.len().await as u64);
    state.metrics.to_prometheus()
}

/// GET /metrics/json - JSON format metrics
async fn get_metrics_json(State(state): State<Arc<ApiState>>) -> impl IntoResponse {
    state
        .metrics
        .set_directory_nodes(state.directory.len().await as u64);
    Json(state.metrics.to_json())
}
