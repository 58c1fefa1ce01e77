//! Application state shared across all handlers.

use std::sync::Arc;

use chrono::{DateTime, Utc};

use sockhub_core::config::AppConfig;
use sockhub_realtime::RealtimeEngine;

/// Application state passed to every Axum handler via `State<AppState>`.
#[derive(Debug, Clone)]
pub struct AppState {
    /// Application configuration
    pub config: Arc<AppConfig>,
    /// Realtime engine
    pub realtime: RealtimeEngine,
    /// Server start time
    pub started_at: DateTime<Utc>,
}

impl AppState {
    pub fn new(config: AppConfig, realtime: RealtimeEngine) -> Self {
        Self {
            config: Arc::new(config),
            realtime,
            started_at: Utc::now(),
        }
    }

    /// Whole seconds since the server started.
    pub fn uptime_seconds(&self) -> u64 {
        u64::try_from((Utc::now() - self.started_at).num_seconds()).unwrap_or(0)
    }
}
