//! WebSocket upgrade for capture clients.
//!
//! Each upgraded socket runs `connection::run` in its own task, tracked so
//! the listener can wait for it on shutdown.

use std::net::SocketAddr;

use axum::extract::ws::WebSocketUpgrade;
use axum::extract::{ConnectInfo, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};

use crate::connection;
use crate::state::AppState;
use crate::transport::WsTransport;

pub async fn handle_ws(
    State(state): State<AppState>,
    ConnectInfo(peer): ConnectInfo<SocketAddr>,
    ws: WebSocketUpgrade,
) -> Response {
    if state.shutdown.is_cancelled() {
        return (StatusCode::SERVICE_UNAVAILABLE, "server shutting down").into_response();
    }

    let max = state.config.max_message_bytes;
    let idle_timeout = state.config.idle_timeout;
    let tracker = state.tracker.clone();

    ws.max_message_size(max)
        .max_frame_size(max)
        .on_upgrade(move |socket| {
            tracker.track_future(async move {
                connection::run(WsTransport::new(socket, idle_timeout), state, Some(peer)).await;
            })
        })
}

#[cfg(test)]
#[path = "ws_test.rs"]
mod tests;
