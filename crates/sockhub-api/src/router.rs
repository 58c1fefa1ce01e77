//! Route definitions for the SockHub HTTP API.

use axum::Router;
use axum::routing::get;

use crate::handlers;
use crate::state::AppState;

/// Build the Axum router with all routes.
pub fn build_router(state: AppState) -> Router {
    let api_routes = Router::new()
        .route("/health", get(handlers::health::health))
        .route("/connections", get(handlers::connections::list_connections));

    Router::new()
        .route("/", get(handlers::health::banner))
        .route("/ws", get(handlers::ws::ws_upgrade))
        .nest("/api", api_routes)
        .with_state(state)
}
