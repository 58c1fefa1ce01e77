//! Connection management: transport sessions, logical handles, heartbeat, registry.

pub mod handle;
pub mod heartbeat;
pub mod registry;
pub mod session;

pub use handle::{Connection, ConnectionId, ConnectionInfo, ConnectionState, DisconnectReason};
pub use registry::ConnectionRegistry;
pub use session::{CloseReason, InboundItem, SessionHandle, SessionState};
