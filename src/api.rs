//! Liveness HTTP endpoints.
//!
//! `GET /healthz` reports the running build; `GET /metrics` renders the
//! process counters. Served by axum next to the delivery loop and shut
//! down with a short grace period on signal.

use std::sync::Arc;

use axum::extract::State;
use axum::http::header;
use axum::response::{IntoResponse, Json};
use axum::routing::get;
use axum::Router;
use serde_json::{json, Value};

use crate::metrics::Collector;

/// Shared state for the liveness server.
pub struct AppState {
    pub build: String,
    pub metrics: Arc<Collector>,
}

/// Build the liveness router.
pub fn router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/healthz", get(healthz))
        .route("/metrics", get(metrics))
        .with_state(state)
}

async fn healthz(State(state): State<Arc<AppState>>) -> Json<Value> {
    Json(json!({
        "status": "OK",
        "build": state.build,
    }))
}

async fn metrics(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    (
        [(header::CONTENT_TYPE, "text/plain; version=0.0.4")],
        state.metrics.render(),
    )
}
