//! Real-time engine configuration.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::AppError;

/// Real-time (socket) engine configuration.
///
/// The four protocol options also accept their camelCase spelling
/// (`heartbeatIntervalMs`, `heartbeatTimeoutMs`, `reconnectGraceMs`,
/// `maxFrameBytes`).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RealtimeConfig {
    /// Interval between server PINGs in milliseconds.
    #[serde(default = "default_heartbeat_interval", alias = "heartbeatIntervalMs")]
    pub heartbeat_interval_ms: u64,
    /// Time allowed for a PONG to arrive after a PING, in milliseconds.
    #[serde(default = "default_heartbeat_timeout", alias = "heartbeatTimeoutMs")]
    pub heartbeat_timeout_ms: u64,
    /// Window after a transport closes during which the identity may resume.
    #[serde(default = "default_reconnect_grace", alias = "reconnectGraceMs")]
    pub reconnect_grace_ms: u64,
    /// Largest accepted frame, header included.
    #[serde(default = "default_max_frame_bytes", alias = "maxFrameBytes")]
    pub max_frame_bytes: usize,
    /// Upper bound for queueing or writing a single outbound frame.
    #[serde(default = "default_send_timeout")]
    pub send_timeout_ms: u64,
    /// Time a fresh transport has to send its CONNECT frame.
    #[serde(default = "default_handshake_timeout")]
    pub handshake_timeout_ms: u64,
    /// Upper bound for flushing pending frames while closing.
    #[serde(default = "default_close_timeout")]
    pub close_timeout_ms: u64,
    /// Outbound queue capacity per session.
    #[serde(default = "default_channel_buffer")]
    pub channel_buffer_size: usize,
    /// Upper bound for a single event handler invocation.
    #[serde(default = "default_handler_timeout")]
    pub handler_timeout_ms: u64,
}

impl RealtimeConfig {
    /// Rejects values the engine cannot run with.
    pub fn validate(&self) -> Result<(), AppError> {
        if self.heartbeat_interval_ms == 0 {
            return Err(AppError::configuration(
                "realtime.heartbeat_interval_ms must be greater than zero",
            ));
        }
        if self.handler_timeout_ms == 0 {
            return Err(AppError::configuration(
                "realtime.handler_timeout_ms must be greater than zero",
            ));
        }
        Ok(())
    }

    /// PING interval. Never zero.
    pub fn heartbeat_interval(&self) -> Duration {
        Duration::from_millis(self.heartbeat_interval_ms.max(1))
    }

    /// PONG deadline.
    pub fn heartbeat_timeout(&self) -> Duration {
        Duration::from_millis(self.heartbeat_timeout_ms)
    }

    /// Reconnection grace period.
    pub fn reconnect_grace(&self) -> Duration {
        Duration::from_millis(self.reconnect_grace_ms)
    }

    /// Per-frame send deadline.
    pub fn send_timeout(&self) -> Duration {
        Duration::from_millis(self.send_timeout_ms)
    }

    /// Handshake deadline.
    pub fn handshake_timeout(&self) -> Duration {
        Duration::from_millis(self.handshake_timeout_ms)
    }

    /// Flush deadline while closing.
    pub fn close_timeout(&self) -> Duration {
        Duration::from_millis(self.close_timeout_ms)
    }

    /// Handler deadline.
    pub fn handler_timeout(&self) -> Duration {
        Duration::from_millis(self.handler_timeout_ms)
    }
}

impl Default for RealtimeConfig {
    fn default() -> Self {
        Self {
            heartbeat_interval_ms: default_heartbeat_interval(),
            heartbeat_timeout_ms: default_heartbeat_timeout(),
            reconnect_grace_ms: default_reconnect_grace(),
            max_frame_bytes: default_max_frame_bytes(),
            send_timeout_ms: default_send_timeout(),
            handshake_timeout_ms: default_handshake_timeout(),
            close_timeout_ms: default_close_timeout(),
            channel_buffer_size: default_channel_buffer(),
            handler_timeout_ms: default_handler_timeout(),
        }
    }
}

fn default_heartbeat_interval() -> u64 {
    25_000
}

fn default_heartbeat_timeout() -> u64 {
    20_000
}

fn default_reconnect_grace() -> u64 {
    30_000
}

fn default_max_frame_bytes() -> usize {
    1_000_000
}

fn default_send_timeout() -> u64 {
    5_000
}

fn default_handshake_timeout() -> u64 {
    10_000
}

fn default_close_timeout() -> u64 {
    2_000
}

fn default_channel_buffer() -> usize {
    256
}

fn default_handler_timeout() -> u64 {
    30_000
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_camel_case_aliases() {
        let config: RealtimeConfig = serde_json::from_str(
            r#"{
                "heartbeatIntervalMs": 1000,
                "heartbeatTimeoutMs": 500,
                "reconnectGraceMs": 2000,
                "maxFrameBytes": 4096
            }"#,
        )
        .unwrap();

        assert_eq!(config.heartbeat_interval(), Duration::from_secs(1));
        assert_eq!(config.heartbeat_timeout(), Duration::from_millis(500));
        assert_eq!(config.reconnect_grace(), Duration::from_secs(2));
        assert_eq!(config.max_frame_bytes, 4096);
        assert_eq!(config.channel_buffer_size, 256);
    }

    #[test]
    fn test_zero_heartbeat_interval_is_rejected() {
        let config = RealtimeConfig {
            heartbeat_interval_ms: 0,
            ..RealtimeConfig::default()
        };

        let err = config.validate().unwrap_err();
        assert_eq!(err.kind, crate::error::ErrorKind::Configuration);
        assert_eq!(config.heartbeat_interval(), Duration::from_millis(1));
    }

    #[test]
    fn test_zero_handler_timeout_is_rejected() {
        let config = RealtimeConfig {
            handler_timeout_ms: 0,
            ..RealtimeConfig::default()
        };
        assert!(config.validate().is_err());
        assert!(RealtimeConfig::default().validate().is_ok());
    }
}
