//! JSON payload conventions carried inside frames.

pub mod serializer;
pub mod types;
pub mod validator;

pub use types::{ConnectRequest, ErrorPayload, EventPacket, Handshake};
