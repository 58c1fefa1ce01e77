//! Payload types for CONNECT, MESSAGE and ERROR frames.

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Body of the client's CONNECT frame. An empty payload means "no prior identity".
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConnectRequest {
    /// Identifier of a previous connection to resume.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sid: Option<String>,
}

/// Body of the server's CONNECT reply.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Handshake {
    /// Identifier assigned or confirmed by the server.
    pub sid: String,
    /// PING interval in milliseconds.
    pub ping_interval: u64,
    /// PONG deadline in milliseconds.
    pub ping_timeout: u64,
    /// Largest frame the server accepts.
    pub max_payload: usize,
    /// Whether an existing identity was resumed.
    pub resumed: bool,
}

/// An application event: name plus data.
///
/// On the wire this is a JSON array `[event, ...args]`.
#[derive(Debug, Clone, PartialEq)]
pub struct EventPacket {
    /// Opaque event name.
    pub event: String,
    /// Event data; `null` when no argument was sent.
    pub data: Value,
}

impl EventPacket {
    /// Creates an event packet.
    pub fn new(event: impl Into<String>, data: Value) -> Self {
        Self {
            event: event.into(),
            data,
        }
    }
}

/// Body of an ERROR frame.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorPayload {
    /// Machine-readable error code.
    pub code: String,
    /// Human-readable description.
    pub message: String,
}

impl ErrorPayload {
    /// Creates an error payload.
    pub fn new(code: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            code: code.into(),
            message: message.into(),
        }
    }
}
