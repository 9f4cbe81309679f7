use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::{Deserialize, Serialize};
use std::future::Future;
use std::sync::Arc;
use tokio::net::TcpListener;

use super::{ConfigRequest, ConfigResponse, Pipeline};

/// One lease as reported by the leases endpoint
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LeaseEntry {
    pub namespace: String,
    pub name: String,
    pub interface: String,
    pub address: String,
}

pub fn router(pipeline: Arc<Pipeline>) -> Router {
    Router::new()
        .route("/v1/generate", post(generate))
        .route("/v1/cleanup", post(cleanup))
        .route("/v1/leases/{*address_space}", get(leases))
        .with_state(pipeline)
}

/// Serve the RPC surface until `shutdown` resolves
pub async fn serve<F>(listener: TcpListener, pipeline: Arc<Pipeline>, shutdown: F) -> std::io::Result<()>
where
    F: Future<Output = ()> + Send + 'static,
{
    axum::serve(listener, router(pipeline))
        .with_graceful_shutdown(shutdown)
        .await
}

pub async fn generate(
    State(pipeline): State<Arc<Pipeline>>,
    Json(req): Json<ConfigRequest>,
) -> Json<ConfigResponse> {
    Json(pipeline.generate(&req).await.into())
}

pub async fn cleanup(
    State(pipeline): State<Arc<Pipeline>>,
    Json(req): Json<ConfigRequest>,
) -> Json<ConfigResponse> {
    Json(pipeline.cleanup(&req).await.into())
}

pub async fn leases(
    State(pipeline): State<Arc<Pipeline>>,
    Path(address_space): Path<String>,
) -> Result<Json<Vec<LeaseEntry>>, (StatusCode, String)> {
    let leases = pipeline
        .allocator()
        .leases(&address_space)
        .await
        .map_err(|e| (StatusCode::NOT_FOUND, e.to_string()))?;

    Ok(Json(
        leases
            .into_iter()
            .map(|(pod, lease)| LeaseEntry {
                namespace: pod.namespace,
                name: pod.name,
                address: lease.cidr(),
                interface: lease.interface,
            })
            .collect(),
    ))
}
