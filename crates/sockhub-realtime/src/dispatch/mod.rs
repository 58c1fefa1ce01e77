//! Event dispatch: handler registration and invocation with acknowledgments.

pub mod dispatcher;
pub mod handler;

pub use dispatcher::{DispatchOutcome, EventDispatcher};
pub use handler::{EventContext, EventHandler, HandlerError, HandlerResult};
