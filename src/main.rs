use std::process::ExitCode;
use std::sync::Arc;

use reconstruct_server::config::ServerConfig;
use reconstruct_server::fragment::ErrorCode;
use reconstruct_server::processor::StubProcessor;
use reconstruct_server::server::Server;
use reconstruct_server::state::AppState;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let config = match ServerConfig::from_env() {
        Ok(config) => config,
        Err(e) => {
            error!(code = e.error_code(), error = %e, "invalid configuration");
            return ExitCode::FAILURE;
        }
    };

    let state = AppState::new(config.clone(), Arc::new(StubProcessor));
    let server = match Server::bind(&config, state).await {
        Ok(server) => server,
        Err(e) => {
            error!(code = e.error_code(), error = %e, "cannot start listener");
            return ExitCode::FAILURE;
        }
    };

    if let Err(e) = server.run(shutdown_signal()).await {
        error!(code = e.error_code(), error = %e, "server failed");
        return ExitCode::FAILURE;
    }
    ExitCode::SUCCESS
}

/// Resolves on Ctrl+C, or SIGTERM on Unix.
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!(error = %e, "failed to listen for ctrl-c");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut sig) => {
                sig.recv().await;
            }
            Err(e) => {
                error!(error = %e, "failed to listen for SIGTERM");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {}
        () = terminate => {}
    }
    info!("shutdown signal received");
}
