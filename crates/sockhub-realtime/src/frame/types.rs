//! Frame and frame-type definitions.

use std::fmt;
use std::num::NonZeroU64;

use bytes::Bytes;

/// Namespace used when the application does not pick one.
pub const DEFAULT_NAMESPACE: &str = "/";

/// Acknowledgment identifier. Zero is reserved on the wire for "no ack".
pub type AckId = NonZeroU64;

/// Kind of a frame.
///
/// Codes `7..=127` are kept as [`FrameType::Unknown`] so peers speaking a
/// newer revision can be tolerated. Codes with the high bit set are invalid.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FrameType {
    /// Handshake (client request or server reply).
    Connect,
    /// Explicit end of the logical connection.
    Disconnect,
    /// Application event.
    Message,
    /// Reply to an ack-requesting message.
    Ack,
    /// Error report, optionally tied to an ack id.
    Error,
    /// Heartbeat request.
    Ping,
    /// Heartbeat reply.
    Pong,
    /// Type code this revision does not know.
    Unknown(u8),
}

impl FrameType {
    /// Highest code that is not reserved as invalid.
    pub const MAX_CODE: u8 = 0x7F;

    /// Wire code of this frame type.
    pub const fn code(self) -> u8 {
        match self {
            Self::Connect => 0,
            Self::Disconnect => 1,
            Self::Message => 2,
            Self::Ack => 3,
            Self::Error => 4,
            Self::Ping => 5,
            Self::Pong => 6,
            Self::Unknown(code) => code,
        }
    }

    /// Parses a wire code. Returns `None` for invalid codes.
    pub const fn from_code(code: u8) -> Option<Self> {
        let ty = match code {
            0 => Self::Connect,
            1 => Self::Disconnect,
            2 => Self::Message,
            3 => Self::Ack,
            4 => Self::Error,
            5 => Self::Ping,
            6 => Self::Pong,
            c if c <= Self::MAX_CODE => Self::Unknown(c),
            _ => return None,
        };
        Some(ty)
    }
}

impl fmt::Display for FrameType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Connect => write!(f, "CONNECT"),
            Self::Disconnect => write!(f, "DISCONNECT"),
            Self::Message => write!(f, "MESSAGE"),
            Self::Ack => write!(f, "ACK"),
            Self::Error => write!(f, "ERROR"),
            Self::Ping => write!(f, "PING"),
            Self::Pong => write!(f, "PONG"),
            Self::Unknown(code) => write!(f, "UNKNOWN({code})"),
        }
    }
}

/// One protocol message unit.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    /// Frame kind.
    pub frame_type: FrameType,
    /// Namespace the frame belongs to.
    pub namespace: String,
    /// Acknowledgment id, if the frame requests or answers one.
    pub ack_id: Option<AckId>,
    /// Opaque payload.
    pub payload: Bytes,
}

impl Frame {
    /// Creates an empty frame of the given type.
    pub fn new(frame_type: FrameType, namespace: impl Into<String>) -> Self {
        Self {
            frame_type,
            namespace: namespace.into(),
            ack_id: None,
            payload: Bytes::new(),
        }
    }

    /// Sets the acknowledgment id.
    pub fn with_ack(mut self, ack_id: Option<AckId>) -> Self {
        self.ack_id = ack_id;
        self
    }

    /// Sets the payload.
    pub fn with_payload(mut self, payload: impl Into<Bytes>) -> Self {
        self.payload = payload.into();
        self
    }

    /// CONNECT frame carrying a handshake payload.
    pub fn connect(namespace: impl Into<String>, payload: impl Into<Bytes>) -> Self {
        Self::new(FrameType::Connect, namespace).with_payload(payload)
    }

    /// DISCONNECT frame.
    pub fn disconnect(namespace: impl Into<String>) -> Self {
        Self::new(FrameType::Disconnect, namespace)
    }

    /// MESSAGE frame.
    pub fn message(namespace: impl Into<String>, payload: impl Into<Bytes>) -> Self {
        Self::new(FrameType::Message, namespace).with_payload(payload)
    }

    /// ACK frame answering `ack_id`.
    pub fn ack(namespace: impl Into<String>, ack_id: AckId, payload: impl Into<Bytes>) -> Self {
        Self::new(FrameType::Ack, namespace)
            .with_ack(Some(ack_id))
            .with_payload(payload)
    }

    /// ERROR frame, optionally answering `ack_id`.
    pub fn error(
        namespace: impl Into<String>,
        ack_id: Option<AckId>,
        payload: impl Into<Bytes>,
    ) -> Self {
        Self::new(FrameType::Error, namespace)
            .with_ack(ack_id)
            .with_payload(payload)
    }

    /// PING frame on the default namespace.
    pub fn ping() -> Self {
        Self::new(FrameType::Ping, DEFAULT_NAMESPACE)
    }

    /// PONG frame on the default namespace.
    pub fn pong() -> Self {
        Self::new(FrameType::Pong, DEFAULT_NAMESPACE)
    }

    /// Whether the frame asks the peer for an acknowledgment.
    pub fn wants_ack(&self) -> bool {
        self.frame_type == FrameType::Message && self.ack_id.is_some()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_codes_round_trip() {
        for code in 0..=FrameType::MAX_CODE {
            let ty = FrameType::from_code(code).unwrap();
            assert_eq!(ty.code(), code);
        }
    }

    #[test]
    fn test_high_bit_codes_are_invalid() {
        assert_eq!(FrameType::from_code(0x80), None);
        assert_eq!(FrameType::from_code(0xFF), None);
    }

    #[test]
    fn test_unknown_display() {
        assert_eq!(FrameType::from_code(42).unwrap().to_string(), "UNKNOWN(42)");
        assert_eq!(FrameType::Message.to_string(), "MESSAGE");
    }

    #[test]
    fn test_wants_ack() {
        let id = AckId::new(7);
        assert!(Frame::message("/", "x").with_ack(id).wants_ack());
        assert!(!Frame::message("/", "x").wants_ack());
        assert!(!Frame::ack("/", AckId::MIN, "x").wants_ack());
    }
}
