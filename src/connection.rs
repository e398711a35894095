//! Connection handler: one client's lifecycle from accept to close.
//!
//! LIFECYCLE
//! =========
//! 1. Register in the connection registry → log connect
//! 2. Loop: receive → decode → process → encode → send
//!    - peer close, transport error, idle timeout or failed send → closed
//!    - undecodable message → dropped, no reply, keep reading
//!    - listener shutdown while waiting for input → closed
//! 3. Idle timeout or shutdown → send `1001` close frame
//! 4. Unregister → log disconnect
//!
//! Messages on one connection are handled strictly one at a time, in receipt
//! order. The shutdown signal is only observed between messages, so a fragment
//! already being processed is always answered.

use std::net::SocketAddr;

use tracing::{info, warn};
use uuid::Uuid;

use crate::fragment::{self, ErrorCode};
use crate::processor::FragmentProcessor;
use crate::state::AppState;
use crate::transport::{FrameTransport, Inbound, TransportError};

/// Why a connection ended.
///
/// Only [`CloseReason::IdleTimeout`] and [`CloseReason::Shutdown`] end with a
/// server-sent close frame (`1001 Going Away`). For the other variants the
/// socket is already closed or broken, so the handler just drops it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CloseReason {
    /// The client closed the connection.
    PeerClosed,
    /// Nothing arrived within the idle timeout. Server sends close.
    IdleTimeout,
    /// Reading from the transport failed.
    ReceiveFailed,
    /// Sending a reply failed.
    SendFailed,
    /// The listener is stopping. Server sends close.
    Shutdown,
}

impl CloseReason {
    /// Whether the server initiates the close handshake for this reason.
    #[must_use]
    pub fn sends_close_frame(self) -> bool {
        matches!(self, Self::IdleTimeout | Self::Shutdown)
    }
}

/// Drive one connection until it closes.
pub async fn run<T: FrameTransport>(mut transport: T, state: AppState, peer: Option<SocketAddr>) -> CloseReason {
    let guard = state.connections.register(peer);
    let conn_id = guard.id();
    info!(%conn_id, ?peer, live = state.connections.len(), "ws: client connected");

    let reason = loop {
        let inbound = tokio::select! {
            biased;
            () = state.shutdown.cancelled() => None,
            inbound = transport.receive() => Some(inbound),
        };
        let Some(inbound) = inbound else {
            break CloseReason::Shutdown;
        };

        let payload = match inbound {
            Ok(Inbound::Message(payload)) => payload,
            Ok(Inbound::Closed) => break CloseReason::PeerClosed,
            Err(TransportError::Timeout(after)) => {
                info!(%conn_id, ?after, "ws: idle timeout");
                break CloseReason::IdleTimeout;
            }
            Err(e) => {
                warn!(%conn_id, code = e.error_code(), error = %e, "ws: receive failed");
                break CloseReason::ReceiveFailed;
            }
        };

        let Some(reply) = handle_message(state.processor.as_ref(), conn_id, &payload).await else {
            continue;
        };
        guard.record_fragment();

        if let Err(e) = transport.send(reply).await {
            warn!(%conn_id, code = e.error_code(), error = %e, "ws: send failed");
            break CloseReason::SendFailed;
        }
    };

    if reason.sends_close_frame() {
        transport.close().await;
    }

    drop(guard);
    info!(%conn_id, ?reason, "ws: client disconnected");
    reason
}

/// Decode one message, process it, and return the encoded reply.
///
/// Returns `None` for payloads that do not decode; those are logged and
/// dropped without a reply.
pub async fn handle_message(processor: &dyn FragmentProcessor, conn_id: Uuid, payload: &[u8]) -> Option<String> {
    let fragment = match fragment::decode(payload) {
        Ok(f) => f,
        Err(e) => {
            warn!(%conn_id, code = e.error_code(), error = %e, bytes = payload.len(), "ws: dropping undecodable message");
            return None;
        }
    };

    let summary = fragment.summary();
    info!(
        %conn_id,
        model = summary.model_name.as_deref().unwrap_or("-"),
        frames = summary.frames,
        extrinsics = summary.extrinsics,
        image_bytes = summary.image_bytes,
        "ws: recv fragment"
    );
    for (index, extrinsic) in fragment.extrinsics.iter().enumerate() {
        info!(
            %conn_id,
            index,
            position = ?extrinsic.camera_position(),
            rotation = ?extrinsic.camera_rotation(),
            record = %extrinsic.0,
            "ws: extrinsic"
        );
    }

    let result = processor.process(fragment).await;
    info!(%conn_id, status = result.status.as_str(), "ws: send result");
    Some(fragment::encode(&result))
}

#[cfg(test)]
#[path = "connection_test.rs"]
mod tests;
