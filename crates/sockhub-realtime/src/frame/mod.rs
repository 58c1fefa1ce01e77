//! Wire frames and their binary codec.

pub mod codec;
pub mod types;

pub use codec::{CodecError, DecodeError, FrameCodec, Malformation, decode, decode_bytes, encode};
pub use types::{AckId, DEFAULT_NAMESPACE, Frame, FrameType};
