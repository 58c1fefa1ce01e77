//! Error taxonomy of the realtime engine.

use std::time::Duration;

use thiserror::Error;

use sockhub_core::error::{AppError, ErrorKind};

use crate::frame::DecodeError;

/// Errors produced by the realtime engine.
///
/// None of these is fatal for the process: each is scoped to a single
/// frame, send, or session.
#[derive(Debug, Error)]
pub enum RealtimeError {
    /// A frame could not be decoded. The frame is dropped.
    #[error(transparent)]
    Decode(#[from] DecodeError),

    /// A send was attempted on a transport that is closing or gone.
    #[error("session closed")]
    SessionClosed,

    /// No connection is registered under the identifier.
    #[error("connection not found: {0}")]
    NotFound(String),

    /// An application handler returned an error or panicked.
    #[error("handler failure: {0}")]
    HandlerFailure(String),

    /// A heartbeat or send deadline elapsed.
    #[error("{operation} timed out after {elapsed:?}")]
    Timeout {
        /// What was being waited for.
        operation: &'static str,
        /// The configured deadline.
        elapsed: Duration,
    },

    /// A frame payload did not follow the expected JSON convention.
    #[error("invalid payload: {0}")]
    InvalidPayload(String),

    /// The client did not complete the CONNECT exchange.
    #[error("handshake failed: {0}")]
    Handshake(String),

    /// The underlying stream failed.
    #[error("transport error: {0}")]
    Transport(String),
}

impl RealtimeError {
    /// Machine-readable code used in ERROR frame payloads.
    pub fn code(&self) -> &'static str {
        match self {
            Self::Decode(_) => "DECODE_ERROR",
            Self::SessionClosed => "SESSION_CLOSED",
            Self::NotFound(_) => "NOT_FOUND",
            Self::HandlerFailure(_) => "HANDLER_FAILURE",
            Self::Timeout { .. } => "TIMEOUT",
            Self::InvalidPayload(_) => "INVALID_PAYLOAD",
            Self::Handshake(_) => "HANDSHAKE_FAILED",
            Self::Transport(_) => "TRANSPORT_ERROR",
        }
    }
}

impl From<serde_json::Error> for RealtimeError {
    fn from(err: serde_json::Error) -> Self {
        Self::InvalidPayload(err.to_string())
    }
}

impl From<RealtimeError> for AppError {
    fn from(err: RealtimeError) -> Self {
        let kind = match &err {
            RealtimeError::Decode(_) | RealtimeError::InvalidPayload(_) => ErrorKind::Validation,
            RealtimeError::NotFound(_) => ErrorKind::NotFound,
            RealtimeError::Timeout { .. } => ErrorKind::Timeout,
            RealtimeError::Transport(_) => ErrorKind::Io,
            RealtimeError::SessionClosed
            | RealtimeError::HandlerFailure(_)
            | RealtimeError::Handshake(_) => ErrorKind::Session,
        };
        AppError::with_source(kind, err.to_string(), err)
    }
}

/// A specialized `Result` type for the realtime engine.
pub type RealtimeResult<T> = Result<T, RealtimeError>;
