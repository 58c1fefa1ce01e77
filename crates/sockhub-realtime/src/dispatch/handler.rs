//! Event handler trait and invocation context.

use std::future::Future;

use async_trait::async_trait;
use serde_json::Value;
use thiserror::Error;

use crate::connection::handle::Connection;
use crate::error::RealtimeError;
use crate::frame::AckId;

/// Error returned by an application handler.
///
/// Its message is sent to the client in the ERROR frame.
#[derive(Debug, Clone, Error)]
#[error("{message}")]
pub struct HandlerError {
    message: String,
}

impl HandlerError {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }

    pub fn message(&self) -> &str {
        &self.message
    }
}

impl From<&str> for HandlerError {
    fn from(message: &str) -> Self {
        Self::new(message)
    }
}

impl From<String> for HandlerError {
    fn from(message: String) -> Self {
        Self::new(message)
    }
}

impl From<RealtimeError> for HandlerError {
    fn from(err: RealtimeError) -> Self {
        Self::new(err.to_string())
    }
}

impl From<serde_json::Error> for HandlerError {
    fn from(err: serde_json::Error) -> Self {
        Self::new(err.to_string())
    }
}

/// Result of a handler: the acknowledgment value, or a failure.
pub type HandlerResult = Result<Value, HandlerError>;

/// What a handler knows about the event it is handling.
#[derive(Debug, Clone)]
pub struct EventContext {
    /// Connection the event arrived on.
    pub connection: Connection,
    /// Namespace of the MESSAGE frame.
    pub namespace: String,
    /// Event name.
    pub event: String,
    /// Acknowledgment requested by the client, if any.
    pub ack_id: Option<AckId>,
}

impl EventContext {
    /// Whether the client is waiting for an acknowledgment.
    pub fn wants_ack(&self) -> bool {
        self.ack_id.is_some()
    }
}

/// Handles one application event.
///
/// The returned value becomes the ACK payload when the client asked for an
/// acknowledgment and is discarded otherwise.
#[async_trait]
pub trait EventHandler: Send + Sync {
    async fn handle(&self, ctx: EventContext, data: Value) -> HandlerResult;
}

#[async_trait]
impl<F, Fut> EventHandler for F
where
    F: Fn(EventContext, Value) -> Fut + Send + Sync,
    Fut: Future<Output = HandlerResult> + Send + 'static,
{
    async fn handle(&self, ctx: EventContext, data: Value) -> HandlerResult {
        (self)(ctx, data).await
    }
}
