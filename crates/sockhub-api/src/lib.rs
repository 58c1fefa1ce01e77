//! # sockhub-api
//!
//! HTTP layer for SockHub built on Axum.
//!
//! Serves the WebSocket endpoint that feeds the realtime engine, a health
//! endpoint, and the server lifecycle (bind, serve, graceful shutdown).

pub mod app;
pub mod dto;
pub mod error;
pub mod handlers;
pub mod router;
pub mod state;

pub use app::{build_app, run_server, serve};
pub use error::ApiError;
pub use state::AppState;
