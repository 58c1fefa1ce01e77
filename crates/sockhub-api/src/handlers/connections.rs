//! Connection listing.

use axum::Json;
use axum::extract::State;

use sockhub_realtime::connection::ConnectionInfo;

use crate::dto::response::ApiResponse;
use crate::state::AppState;

/// GET /api/connections
///
/// Registered connections, reconnecting ones included, ordered by id.
pub async fn list_connections(
    State(state): State<AppState>,
) -> Json<ApiResponse<Vec<ConnectionInfo>>> {
    let mut connections: Vec<ConnectionInfo> = state
        .realtime
        .connections()
        .iter()
        .map(|conn| conn.info())
        .collect();
    connections.sort_by(|a, b| a.id.cmp(&b.id));
    Json(ApiResponse::ok(connections))
}
