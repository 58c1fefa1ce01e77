//! Event dispatcher: routes inbound MESSAGE frames to handlers.

use std::any::Any;
use std::collections::HashMap;
use std::fmt;
use std::panic::AssertUnwindSafe;
use std::sync::{Arc, RwLock};
use std::time::Duration;

use futures::FutureExt;
use tokio::time;
use tracing::{debug, warn};

use crate::connection::handle::Connection;
use crate::error::RealtimeError;
use crate::frame::{AckId, Frame};
use crate::message::serializer::{decode_event, encode_error, encode_value};
use crate::message::types::ErrorPayload;

use super::handler::{EventContext, EventHandler};

/// Error code sent when an acknowledged event has no handler.
pub const UNKNOWN_EVENT: &str = "UNKNOWN_EVENT";

/// What happened to an inbound MESSAGE.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DispatchOutcome {
    /// The handler ran; no acknowledgment was requested.
    Handled,
    /// The handler ran and its value was sent back as ACK.
    Acknowledged(AckId),
    /// The handler failed or panicked; ERROR was sent.
    Failed,
    /// No handler for the event.
    Unhandled,
    /// The payload was not a valid event.
    Rejected,
}

/// Per-connection table of `(namespace, event)` handlers.
pub struct EventDispatcher {
    handlers: RwLock<HashMap<String, HashMap<String, Arc<dyn EventHandler>>>>,
    handler_timeout: Duration,
}

impl fmt::Debug for EventDispatcher {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EventDispatcher")
            .field("handlers", &self.len())
            .field("handler_timeout", &self.handler_timeout)
            .finish()
    }
}

impl EventDispatcher {
    /// Creates an empty table. Each handler invocation is bounded by `handler_timeout`.
    pub fn new(handler_timeout: Duration) -> Self {
        Self {
            handlers: RwLock::new(HashMap::new()),
            handler_timeout,
        }
    }

    /// Registers `handler`, replacing any handler for the same key.
    pub fn on(&self, namespace: &str, event: &str, handler: Arc<dyn EventHandler>) {
        self.handlers
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .entry(namespace.to_owned())
            .or_default()
            .insert(event.to_owned(), handler);
    }

    /// Removes the handler for `(namespace, event)`.
    pub fn off(&self, namespace: &str, event: &str) -> bool {
        let mut handlers = self.handlers.write().unwrap_or_else(|e| e.into_inner());
        let Some(events) = handlers.get_mut(namespace) else {
            return false;
        };
        let removed = events.remove(event).is_some();
        if events.is_empty() {
            handlers.remove(namespace);
        }
        removed
    }

    /// Looks up the handler for `(namespace, event)`.
    pub fn handler(&self, namespace: &str, event: &str) -> Option<Arc<dyn EventHandler>> {
        self.handlers
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .get(namespace)
            .and_then(|events| events.get(event))
            .cloned()
    }

    /// Number of registered handlers.
    pub fn len(&self) -> usize {
        self.handlers
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .values()
            .map(HashMap::len)
            .sum()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Decodes `frame` as an event and runs its handler.
    ///
    /// A handler error, panic or overrun of the handler timeout never
    /// escapes: it is logged and reported to the client as ERROR. When the
    /// frame carries an ack id, exactly one ACK or ERROR with that id is sent
    /// back.
    pub async fn dispatch_inbound(&self, connection: &Connection, frame: Frame) -> DispatchOutcome {
        let Frame {
            namespace,
            ack_id,
            payload,
            ..
        } = frame;

        let packet = match decode_event(&payload) {
            Ok(packet) => packet,
            Err(err) => {
                warn!(conn_id = %connection.id(), error = %err, "Rejecting malformed event payload");
                reply_error(connection, &namespace, ack_id, err.code(), err.to_string()).await;
                return DispatchOutcome::Rejected;
            }
        };

        let Some(handler) = self.handler(&namespace, &packet.event) else {
            debug!(
                conn_id = %connection.id(),
                namespace = %namespace,
                event = %packet.event,
                "No handler registered"
            );
            if ack_id.is_some() {
                let message = format!("no handler for event '{}'", packet.event);
                reply_error(connection, &namespace, ack_id, UNKNOWN_EVENT, message).await;
            }
            return DispatchOutcome::Unhandled;
        };

        let ctx = EventContext {
            connection: connection.clone(),
            namespace: namespace.clone(),
            event: packet.event.clone(),
            ack_id,
        };
        let invocation = AssertUnwindSafe(handler.handle(ctx, packet.data)).catch_unwind();
        let result = match time::timeout(self.handler_timeout, invocation).await {
            Ok(Ok(result)) => result.map_err(|e| RealtimeError::HandlerFailure(e.to_string())),
            Ok(Err(panic)) => Err(RealtimeError::HandlerFailure(panic_message(panic.as_ref()))),
            Err(_) => Err(RealtimeError::Timeout {
                operation: "handler",
                elapsed: self.handler_timeout,
            }),
        };

        match (result, ack_id) {
            (Ok(_), None) => DispatchOutcome::Handled,
            (Ok(value), Some(ack_id)) => {
                let frame = match encode_value(&value) {
                    Ok(body) => Frame::ack(namespace.as_str(), ack_id, body),
                    Err(err) => {
                        reply_error(connection, &namespace, Some(ack_id), err.code(), err.to_string())
                            .await;
                        return DispatchOutcome::Failed;
                    }
                };
                if let Err(err) = connection.send_frame(frame).await {
                    debug!(conn_id = %connection.id(), error = %err, "Could not send ACK");
                }
                DispatchOutcome::Acknowledged(ack_id)
            }
            (Err(err), ack_id) => {
                warn!(
                    conn_id = %connection.id(),
                    event = %packet.event,
                    error = %err,
                    "Event handler failed"
                );
                reply_error(connection, &namespace, ack_id, err.code(), err.to_string()).await;
                DispatchOutcome::Failed
            }
        }
    }
}

async fn reply_error(
    connection: &Connection,
    namespace: &str,
    ack_id: Option<AckId>,
    code: &str,
    message: String,
) {
    let payload = encode_error(&ErrorPayload::new(code, message));
    if let Err(err) = connection
        .send_frame(Frame::error(namespace, ack_id, payload))
        .await
    {
        debug!(conn_id = %connection.id(), error = %err, "Could not send ERROR");
    }
}

fn panic_message(panic: &(dyn Any + Send)) -> String {
    if let Some(message) = panic.downcast_ref::<&str>() {
        format!("handler panicked: {message}")
    } else if let Some(message) = panic.downcast_ref::<String>() {
        format!("handler panicked: {message}")
    } else {
        "handler panicked".to_owned()
    }
}

#[cfg(test)]
mod tests {
    use serde_json::{Value, json};

    use super::*;
    use crate::dispatch::handler::HandlerResult;

    struct Upper;

    #[async_trait::async_trait]
    impl EventHandler for Upper {
        async fn handle(&self, _ctx: EventContext, data: Value) -> HandlerResult {
            Ok(json!(data.as_str().unwrap_or_default().to_uppercase()))
        }
    }

    #[test]
    fn test_register_and_replace() {
        let dispatcher = EventDispatcher::new(Duration::from_secs(1));
        dispatcher.on("/", "shout", Arc::new(Upper));
        dispatcher.on("/", "shout", Arc::new(Upper));
        dispatcher.on("/chat", "shout", Arc::new(Upper));

        assert_eq!(dispatcher.len(), 2);
        assert!(dispatcher.handler("/", "shout").is_some());
        assert!(dispatcher.handler("/", "whisper").is_none());
        assert!(dispatcher.handler("/other", "shout").is_none());
    }

    #[test]
    fn test_off() {
        let dispatcher = EventDispatcher::new(Duration::from_secs(1));
        dispatcher.on("/", "shout", Arc::new(Upper));

        assert!(dispatcher.off("/", "shout"));
        assert!(!dispatcher.off("/", "shout"));
        assert!(dispatcher.is_empty());
    }

    #[test]
    fn test_panic_message() {
        let boxed: Box<dyn Any + Send> = Box::new("boom");
        assert_eq!(panic_message(boxed.as_ref()), "handler panicked: boom");

        let boxed: Box<dyn Any + Send> = Box::new(7_u32);
        assert_eq!(panic_message(boxed.as_ref()), "handler panicked");
    }
}
