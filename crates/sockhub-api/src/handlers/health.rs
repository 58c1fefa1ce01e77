//! Health check handlers.

use axum::Json;
use axum::extract::State;

use crate::dto::response::{ApiResponse, HealthResponse};
use crate::state::AppState;

/// GET /api/health
pub async fn health(State(state): State<AppState>) -> Json<ApiResponse<HealthResponse>> {
    let status = if state.realtime.is_shutting_down() {
        "shutting_down"
    } else {
        "ok"
    };

    Json(ApiResponse::ok(HealthResponse {
        status: status.to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
        uptime_seconds: state.uptime_seconds(),
        connections: state.realtime.connection_count(),
        rooms: state.realtime.room_count(),
    }))
}

/// GET /
pub async fn banner() -> &'static str {
    concat!("SockHub realtime server ", env!("CARGO_PKG_VERSION"))
}
