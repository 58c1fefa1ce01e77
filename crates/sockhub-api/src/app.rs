//! Application builder and server lifecycle.

use std::future::Future;
use std::time::Duration;

use axum::Router;
use tokio::net::TcpListener;
use tower_http::trace::TraceLayer;
use tracing::{error, info};

use sockhub_core::config::AppConfig;
use sockhub_core::AppResult;
use sockhub_core::error::AppError;
use sockhub_realtime::RealtimeEngine;

use crate::router::build_router;
use crate::state::AppState;

/// Builds the complete Axum application with all routes and middleware.
pub fn build_app(state: AppState) -> Router {
    build_router(state).layer(TraceLayer::new_for_http())
}

/// Binds the configured address and serves until Ctrl+C or SIGTERM.
pub async fn run_server(config: AppConfig, realtime: RealtimeEngine) -> AppResult<()> {
    let addr = config.server.bind_address();
    let listener = TcpListener::bind(&addr)
        .await
        .map_err(|e| AppError::internal(format!("Failed to bind {addr}: {e}")))?;

    serve(listener, config, realtime, shutdown_signal()).await
}

/// Serves on `listener` until `signal` resolves, then shuts the engine down.
pub async fn serve<F>(
    listener: TcpListener,
    config: AppConfig,
    realtime: RealtimeEngine,
    signal: F,
) -> AppResult<()>
where
    F: Future<Output = ()> + Send + 'static,
{
    let grace = Duration::from_secs(config.server.shutdown_grace_seconds);
    let local_addr = listener.local_addr()?;
    let app = build_app(AppState::new(config, realtime.clone()));

    info!("SockHub server listening on {}", local_addr);

    axum::serve(listener, app)
        .with_graceful_shutdown(async move {
            signal.await;
            info!("Shutdown signal received");
            if let Err(e) = realtime.shutdown(grace).await {
                error!(error = %e, "Realtime engine shutdown failed");
            }
        })
        .await
        .map_err(|e| AppError::internal(format!("Server error: {e}")))?;

    info!("SockHub server stopped");
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!(error = %e, "Failed to install Ctrl+C handler");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                error!(error = %e, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {}
        _ = terminate => {}
    }
}
