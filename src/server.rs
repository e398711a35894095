//! Listener: binds the address and serves until told to stop.
//!
//! DESIGN
//! ======
//! Axum owns the accept loop; every upgraded WebSocket gets its own task, so a
//! slow or stuck connection never blocks new accepts. The listener holds no
//! connection state, only the shutdown token and the task tracker.
//!
//! SHUTDOWN
//! ========
//! 1. Shutdown future resolves (or `RunningServer::stop`) → cancel token
//! 2. Axum stops accepting and finishes in-flight HTTP requests
//! 3. Open connections finish their current fragment, then close
//! 4. Wait up to the grace period for connection tasks to drain

use std::future::Future;
use std::net::SocketAddr;

use tokio::net::TcpListener;
use tokio::task::JoinHandle;
use tracing::{info, warn};

use crate::config::ServerConfig;
use crate::routes;
use crate::state::AppState;

#[derive(Debug, thiserror::Error)]
pub enum ServerError {
    #[error("failed to bind {addr}: {source}")]
    Bind {
        addr: String,
        #[source]
        source: std::io::Error,
    },
    #[error("server failed: {0}")]
    Serve(#[source] std::io::Error),
    #[error("server task failed: {0}")]
    Join(#[from] tokio::task::JoinError),
}

impl crate::fragment::ErrorCode for ServerError {
    fn error_code(&self) -> &'static str {
        match self {
            Self::Bind { .. } => "E_BIND",
            Self::Serve(_) => "E_SERVE",
            Self::Join(_) => "E_JOIN",
        }
    }
}

pub struct Server {
    listener: TcpListener,
    local_addr: SocketAddr,
    state: AppState,
}

impl Server {
    /// Bind the configured address. Nothing is accepted until [`Server::run`].
    ///
    /// # Errors
    ///
    /// [`ServerError::Bind`] if the address cannot be acquired.
    pub async fn bind(config: &ServerConfig, state: AppState) -> Result<Self, ServerError> {
        let addr = config.bind_addr();
        let bind_err = |source| ServerError::Bind { addr: addr.clone(), source };
        let listener = TcpListener::bind(&addr).await.map_err(bind_err)?;
        let local_addr = listener.local_addr().map_err(bind_err)?;
        Ok(Self { listener, local_addr, state })
    }

    #[must_use]
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// Serve until `shutdown` resolves or the state's shutdown token is
    /// cancelled, then drain open connections.
    ///
    /// # Errors
    ///
    /// [`ServerError::Serve`] if the accept loop fails.
    pub async fn run<S>(self, shutdown: S) -> Result<(), ServerError>
    where
        S: Future<Output = ()> + Send + 'static,
    {
        let Server { listener, local_addr, state } = self;
        let token = state.shutdown.clone();
        let tracker = state.tracker.clone();
        let connections = state.connections.clone();
        let grace = state.config.shutdown_grace;

        let app = routes::app(state).into_make_service_with_connect_info::<SocketAddr>();
        info!(%local_addr, "reconstruct-server listening on ws://{local_addr}");

        let signal = token.clone();
        axum::serve(listener, app)
            .with_graceful_shutdown(async move {
                tokio::select! {
                    () = shutdown => {}
                    () = signal.cancelled() => {}
                }
                signal.cancel();
            })
            .await
            .map_err(ServerError::Serve)?;

        // Covers the serve loop exiting on its own.
        token.cancel();
        tracker.close();
        info!(open = connections.len(), "listener stopped, draining connections");
        if tokio::time::timeout(grace, tracker.wait()).await.is_err() {
            warn!(open = connections.len(), ?grace, "shutdown grace period elapsed with connections still open");
        }
        info!("reconstruct-server stopped");
        Ok(())
    }

    /// Run on a background task; stop it with [`RunningServer::stop`].
    #[must_use]
    pub fn spawn(self) -> RunningServer {
        let addr = self.local_addr;
        let state = self.state.clone();
        let task = tokio::spawn(self.run(std::future::pending()));
        RunningServer { addr, state, task }
    }
}

/// Handle to a server started with [`Server::spawn`].
pub struct RunningServer {
    addr: SocketAddr,
    state: AppState,
    task: JoinHandle<Result<(), ServerError>>,
}

impl RunningServer {
    #[must_use]
    pub fn addr(&self) -> SocketAddr {
        self.addr
    }

    /// Stop accepting, let open connections finish their current fragment,
    /// and wait for the drain.
    ///
    /// # Errors
    ///
    /// Propagates the serve loop's error, or [`ServerError::Join`] if its task
    /// panicked.
    pub async fn stop(self) -> Result<(), ServerError> {
        self.state.shutdown.cancel();
        self.task.await?
    }
}

#[cfg(test)]
#[path = "server_test.rs"]
mod tests;
