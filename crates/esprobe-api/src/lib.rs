//! esprobe-api — HTTP surface of the probe.
//!
//! Serves the metric store to Prometheus and answers liveness checks. The
//! router only ever reads the store; all writes come from the probe cycle.
//!
//! # Routes
//!
//! | Method | Path | Description |
//! |---|---|---|
//! | GET | `/metrics` | Prometheus exposition |
//! | GET | `/healthz` | Liveness |
//! | GET | `/api/v1/nodes` | Nodes that currently have series |

pub mod handlers;

use std::sync::Arc;

use axum::Router;
use axum::routing::get;
use esprobe_metrics::MetricStore;

/// Shared state for API handlers.
#[derive(Clone)]
pub struct ApiState {
    pub store: Arc<MetricStore>,
}

/// Build the complete router (metrics + liveness + node listing).
pub fn build_router(store: Arc<MetricStore>) -> Router {
    let state = ApiState { store };

    Router::new()
        .route("/metrics", get(handlers::prometheus_metrics))
        .route("/healthz", get(handlers::healthz))
        .route("/api/v1/nodes", get(handlers::list_nodes))
        .with_state(state)
}
