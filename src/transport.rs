//! Frame transport: message-framed send/receive over one client connection.
//!
//! DESIGN
//! ======
//! The connection handler only needs three primitives: wait for the next
//! complete message, send a reply, and close. `FrameTransport` names those so
//! the handler can be driven by the upgraded Axum WebSocket in production and
//! by an in-memory channel pair in tests.
//!
//! Message boundaries are the transport's job. A peer close is a normal
//! `Inbound::Closed`, never an error.

use std::time::Duration;

use axum::extract::ws::{CloseFrame, Message, WebSocket, close_code};

use crate::fragment::ErrorCode;

// =============================================================================
// TYPES
// =============================================================================

/// What one `receive` call produced.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Inbound {
    /// One complete application message (text or binary payload bytes).
    Message(Vec<u8>),
    /// The peer closed the connection.
    Closed,
}

#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    #[error("websocket error: {0}")]
    Socket(#[from] axum::Error),
    #[error("connection already closed")]
    Closed,
    #[error("no message received for {0:?}")]
    Timeout(Duration),
}

impl ErrorCode for TransportError {
    fn error_code(&self) -> &'static str {
        match self {
            Self::Socket(_) => "E_SOCKET",
            Self::Closed => "E_CLOSED",
            Self::Timeout(_) => "E_IDLE_TIMEOUT",
        }
    }
}

#[async_trait::async_trait]
pub trait FrameTransport: Send {
    /// Suspend until one complete message arrives or the peer closes.
    async fn receive(&mut self) -> Result<Inbound, TransportError>;

    /// Send one text message.
    async fn send(&mut self, text: String) -> Result<(), TransportError>;

    /// Tell the peer we are going away. Best effort.
    async fn close(&mut self);
}

// =============================================================================
// WEBSOCKET
// =============================================================================

/// Axum WebSocket with an optional idle read timeout.
pub struct WsTransport {
    socket: WebSocket,
    idle_timeout: Option<Duration>,
}

impl WsTransport {
    #[must_use]
    pub fn new(socket: WebSocket, idle_timeout: Option<Duration>) -> Self {
        Self { socket, idle_timeout }
    }

    async fn next_message(&mut self) -> Result<Option<Message>, TransportError> {
        let next = match self.idle_timeout {
            Some(limit) => tokio::time::timeout(limit, self.socket.recv())
                .await
                .map_err(|_| TransportError::Timeout(limit))?,
            None => self.socket.recv().await,
        };
        next.transpose().map_err(TransportError::from)
    }
}

#[async_trait::async_trait]
impl FrameTransport for WsTransport {
    async fn receive(&mut self) -> Result<Inbound, TransportError> {
        // Control frames are answered by the socket itself; they only reset
        // the idle clock here.
        loop {
            let Some(msg) = self.next_message().await? else {
                return Ok(Inbound::Closed);
            };
            match msg {
                Message::Text(text) => return Ok(Inbound::Message(text.as_str().as_bytes().to_vec())),
                Message::Binary(bytes) => return Ok(Inbound::Message(bytes.to_vec())),
                Message::Close(_) => return Ok(Inbound::Closed),
                Message::Ping(_) | Message::Pong(_) => {}
            }
        }
    }

    async fn send(&mut self, text: String) -> Result<(), TransportError> {
        self.socket
            .send(Message::Text(text.into()))
            .await
            .map_err(TransportError::from)
    }

    async fn close(&mut self) {
        let frame = CloseFrame { code: close_code::AWAY, reason: "server closing connection".into() };
        let _ = self.socket.send(Message::Close(Some(frame))).await;
    }
}

// =============================================================================
// TEST HELPERS
// =============================================================================
