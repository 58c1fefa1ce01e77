//! WebSocket upgrade handler.
//!
//! Each binary WebSocket message carries exactly one frame.

use std::future;
use std::io;

use axum::extract::ws::{Message, WebSocket};
use axum::extract::{State, WebSocketUpgrade};
use axum::response::Response;
use futures::{SinkExt, StreamExt};
use tracing::{debug, info};

use sockhub_core::error::AppError;
use sockhub_realtime::connection::InboundItem;
use sockhub_realtime::frame::{CodecError, Frame, decode_bytes, encode};

use crate::error::ApiError;
use crate::state::AppState;

/// GET /ws: WebSocket upgrade
pub async fn ws_upgrade(
    State(state): State<AppState>,
    ws: WebSocketUpgrade,
) -> Result<Response, ApiError> {
    if state.realtime.is_shutting_down() {
        return Err(AppError::service_unavailable("Server is shutting down").into());
    }

    let max = state.realtime.config().max_frame_bytes;
    Ok(ws
        .max_message_size(max)
        .max_frame_size(max)
        .on_upgrade(move |socket| handle_socket(state, socket)))
}

/// Hands an upgraded socket to the realtime engine.
async fn handle_socket(state: AppState, socket: WebSocket) {
    let (ws_tx, ws_rx) = socket.split();

    let sink = ws_tx.with(|frame: Frame| {
        future::ready(Ok::<_, axum::Error>(Message::Binary(encode(&frame))))
    });
    let stream = ws_rx
        .take_while(|message| future::ready(!matches!(message, Ok(Message::Close(_)))))
        .filter_map(|message| future::ready(inbound(message)));

    info!("WebSocket transport opened");
    state.realtime.serve(sink, stream).await;
    info!("WebSocket transport closed");
}

fn inbound(message: Result<Message, axum::Error>) -> Option<InboundItem> {
    match message {
        Ok(Message::Binary(bytes)) => Some(Ok(decode_bytes(bytes))),
        Ok(Message::Text(_)) => {
            debug!("Ignoring text WebSocket message");
            None
        }
        // WebSocket-level pings are answered by the socket itself.
        Ok(Message::Ping(_) | Message::Pong(_) | Message::Close(_)) => None,
        Err(e) => Some(Err(CodecError::Io(io::Error::other(e)))),
    }
}
