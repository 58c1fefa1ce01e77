//! # sockhub-realtime
//!
//! Real-time bidirectional messaging engine for SockHub. Provides:
//!
//! - A compact binary frame codec with LEB128 length prefixes
//! - Transport sessions with PING/PONG heartbeats and bounded send queues
//! - Logical connections that survive transport drops for a grace period
//! - Rooms with snapshot-based broadcast
//! - Per-connection event handlers with request/acknowledge semantics
//!
//! The engine is transport-agnostic: anything that can be expressed as a
//! `Sink<Frame>` plus a stream of decoded frames can be served, and raw
//! byte streams can be served through [`frame::FrameCodec`].

pub mod connection;
pub mod dispatch;
pub mod error;
pub mod frame;
pub mod message;
pub mod room;
pub mod server;

pub use connection::{Connection, ConnectionId, ConnectionState, DisconnectReason};
pub use dispatch::{EventContext, EventHandler, HandlerError, HandlerResult};
pub use error::{RealtimeError, RealtimeResult};
pub use frame::{AckId, Frame, FrameCodec, FrameType};
pub use room::{BroadcastReport, Room};
pub use server::RealtimeEngine;
