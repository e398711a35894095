//! Router assembly.
//!
//! SYSTEM CONTEXT
//! ==============
//! Capture clients connect with a plain WebSocket to `/` (or `/ws`). The two
//! HTTP endpoints are for operators: a liveness probe and a read-only view of
//! the live connections and recently processed fragments.

pub mod ws;

use axum::extract::State;
use axum::http::StatusCode;
use axum::routing::get;
use axum::{Json, Router};
use serde_json::{Value, json};
use tower_http::trace::TraceLayer;

use crate::state::AppState;

pub fn app(state: AppState) -> Router {
    Router::new()
        .route("/", get(ws::handle_ws))
        .route("/ws", get(ws::handle_ws))
        .route("/healthz", get(healthz))
        .route("/api/connections", get(connections))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

async fn healthz() -> StatusCode {
    StatusCode::OK
}

/// Informational snapshot; nothing here is needed for correctness.
async fn connections(State(state): State<AppState>) -> Json<Value> {
    let live = state.connections.snapshot();
    let recent = state
        .history
        .as_ref()
        .map(crate::processor::FragmentHistory::snapshot)
        .unwrap_or_default();
    Json(json!({
        "count": live.len(),
        "connections": live,
        "recent_fragments": recent,
        "shutting_down": state.shutdown.is_cancelled(),
    }))
}
