//! HTTP handlers.
//!
//! Every handler takes a snapshot of the `MetricStore` and renders it;
//! nothing here mutates the store.

use axum::extract::State;
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::Json;
use tracing::trace;

use esprobe_core::NodeIdentity;
use esprobe_metrics::{render_prometheus, CONTENT_TYPE};

use crate::ApiState;

/// Response wrapper for consistent API format.
#[derive(serde::Serialize)]
struct ApiResponse<T: serde::Serialize> {
    success: bool,
    data: T,
}

impl<T: serde::Serialize> ApiResponse<T> {
    fn ok(data: T) -> Json<Self> {
        Json(Self {
            success: true,
            data,
        })
    }
}

#[derive(serde::Serialize)]
struct NodeList {
    node_count: u64,
    tracked: Vec<NodeIdentity>,
}

/// GET /metrics
pub async fn prometheus_metrics(State(state): State<ApiState>) -> impl IntoResponse {
    let snapshot = state.store.snapshot();
    trace!(nodes = snapshot.nodes.len(), "rendering exposition");
    (
        StatusCode::OK,
        [("content-type", CONTENT_TYPE)],
        render_prometheus(&snapshot),
    )
}

/// GET /healthz
pub async fn healthz() -> impl IntoResponse {
    (StatusCode::OK, "ok")
}

/// GET /api/v1/nodes
pub async fn list_nodes(State(state): State<ApiState>) -> impl IntoResponse {
    ApiResponse::ok(NodeList {
        node_count: state.store.total_node_count(),
        tracked: state.store.tracked_nodes(),
    })
}
