//! Binary frame codec.
//!
//! Wire layout, all varints unsigned LEB128:
//!
//! ```text
//! [type:1][namespace-len:varint][namespace][ack-id:varint, 0 = none][payload-len:varint][payload]
//! ```
//!
//! [`encode`]/[`decode`] work on a single buffer holding exactly one frame
//! (for message-oriented transports such as WebSocket). [`FrameCodec`]
//! recovers frames from a byte stream.

use std::num::NonZeroU64;
use std::ops::Range;

use bytes::{BufMut, Bytes, BytesMut};
use thiserror::Error;
use tokio_util::codec::{Decoder, Encoder};

use super::types::{Frame, FrameType};

/// Longest LEB128 encoding of a `u64`.
pub const MAX_VARINT_LEN: usize = 10;

/// Structural defect of a frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum Malformation {
    /// Input ended before the frame did.
    #[error("truncated input")]
    Truncated,
    /// Type byte outside the valid range.
    #[error("invalid frame type {0:#04x}")]
    InvalidType(u8),
    /// Varint longer than ten bytes or overflowing 64 bits.
    #[error("varint overflow")]
    VarintOverflow,
    /// Namespace bytes are not UTF-8.
    #[error("namespace is not valid UTF-8")]
    InvalidNamespace,
    /// Bytes left after a complete frame.
    #[error("{0} trailing bytes after frame")]
    TrailingBytes(usize),
}

/// Failure to turn bytes into a [`Frame`].
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DecodeError {
    /// The bytes do not form a valid frame.
    #[error("malformed frame: {0}")]
    Malformed(#[from] Malformation),
    /// The declared frame size exceeds the configured limit.
    #[error("frame of {size} bytes exceeds the {limit} byte limit")]
    TooLarge {
        /// Declared size (or the first declared length that overflowed).
        size: u64,
        /// Configured limit.
        limit: usize,
    },
}

/// Stream-level codec failure. Ends the stream.
#[derive(Debug, Error)]
pub enum CodecError {
    /// The stream can no longer be split into frames.
    #[error("unrecoverable frame stream: {0}")]
    Fatal(DecodeError),
    /// Underlying I/O failure.
    #[error(transparent)]
    Io(#[from] std::io::Error),
}

/// Number of bytes [`encode`] produces for `frame`.
pub fn encoded_len(frame: &Frame) -> usize {
    let ack = frame.ack_id.map_or(0, NonZeroU64::get);
    1 + varint_len(frame.namespace.len() as u64)
        + frame.namespace.len()
        + varint_len(ack)
        + varint_len(frame.payload.len() as u64)
        + frame.payload.len()
}

/// Encodes a frame into a fresh buffer.
pub fn encode(frame: &Frame) -> Bytes {
    let mut buf = BytesMut::with_capacity(encoded_len(frame));
    encode_into(frame, &mut buf);
    buf.freeze()
}

/// Appends the encoding of `frame` to `dst`.
pub fn encode_into(frame: &Frame, dst: &mut BytesMut) {
    dst.reserve(encoded_len(frame));
    dst.put_u8(frame.frame_type.code());
    put_varint(dst, frame.namespace.len() as u64);
    dst.put_slice(frame.namespace.as_bytes());
    put_varint(dst, frame.ack_id.map_or(0, NonZeroU64::get));
    put_varint(dst, frame.payload.len() as u64);
    dst.put_slice(&frame.payload);
}

/// Decodes a buffer that holds exactly one frame.
pub fn decode(src: &[u8]) -> Result<Frame, DecodeError> {
    decode_bytes(Bytes::copy_from_slice(src))
}

/// Zero-copy variant of [`decode`]; the payload shares `src`.
pub fn decode_bytes(src: Bytes) -> Result<Frame, DecodeError> {
    match scan(&src, usize::MAX)? {
        Scan::Incomplete => Err(Malformation::Truncated.into()),
        Scan::Complete(layout) if layout.len < src.len() => {
            Err(Malformation::TrailingBytes(src.len() - layout.len).into())
        }
        Scan::Complete(layout) => layout.into_frame(src),
    }
}

/// Streaming codec for byte-oriented transports.
///
/// A complete frame with invalid contents is yielded as an item-level
/// `Err` so the reader can drop it and continue. Conditions after which
/// frame boundaries are lost end the stream with [`CodecError::Fatal`].
#[derive(Debug, Clone)]
pub struct FrameCodec {
    max_frame_bytes: usize,
}

impl FrameCodec {
    /// Creates a codec rejecting frames larger than `max_frame_bytes`.
    pub fn new(max_frame_bytes: usize) -> Self {
        Self { max_frame_bytes }
    }

    /// Configured frame size limit.
    pub fn max_frame_bytes(&self) -> usize {
        self.max_frame_bytes
    }
}

impl Decoder for FrameCodec {
    type Item = Result<Frame, DecodeError>;
    type Error = CodecError;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>, Self::Error> {
        match scan(src, self.max_frame_bytes).map_err(CodecError::Fatal)? {
            Scan::Incomplete => Ok(None),
            Scan::Complete(layout) => {
                let bytes = src.split_to(layout.len).freeze();
                Ok(Some(layout.into_frame(bytes)))
            }
        }
    }
}

impl Encoder<Frame> for FrameCodec {
    type Error = CodecError;

    fn encode(&mut self, item: Frame, dst: &mut BytesMut) -> Result<(), Self::Error> {
        encode_into(&item, dst);
        Ok(())
    }
}

/// Byte offsets of a fully buffered frame.
#[derive(Debug)]
struct Layout {
    code: u8,
    namespace: Range<usize>,
    ack_id: u64,
    payload: Range<usize>,
    len: usize,
}

impl Layout {
    /// Validates contents; `bytes` starts at the frame's first byte.
    fn into_frame(self, bytes: Bytes) -> Result<Frame, DecodeError> {
        let frame_type =
            FrameType::from_code(self.code).ok_or(Malformation::InvalidType(self.code))?;
        let namespace = std::str::from_utf8(&bytes[self.namespace])
            .map_err(|_| Malformation::InvalidNamespace)?
            .to_owned();

        Ok(Frame {
            frame_type,
            namespace,
            ack_id: NonZeroU64::new(self.ack_id),
            payload: bytes.slice(self.payload),
        })
    }
}

enum Scan {
    Incomplete,
    Complete(Layout),
}

/// Locates frame boundaries without validating contents.
fn scan(buf: &[u8], limit: usize) -> Result<Scan, DecodeError> {
    let Some(&code) = buf.first() else {
        return Ok(Scan::Incomplete);
    };
    let mut pos = 1;

    let Some(ns_len) = read_varint(buf, &mut pos)? else {
        return Ok(Scan::Incomplete);
    };
    let ns_start = pos;
    let ns_end = checked_end(ns_start, ns_len, limit)?;
    if buf.len() < ns_end {
        return Ok(Scan::Incomplete);
    }
    pos = ns_end;

    let Some(ack_id) = read_varint(buf, &mut pos)? else {
        return Ok(Scan::Incomplete);
    };
    let Some(payload_len) = read_varint(buf, &mut pos)? else {
        return Ok(Scan::Incomplete);
    };
    let payload_start = pos;
    let end = checked_end(payload_start, payload_len, limit)?;
    if buf.len() < end {
        return Ok(Scan::Incomplete);
    }

    Ok(Scan::Complete(Layout {
        code,
        namespace: ns_start..ns_end,
        ack_id,
        payload: payload_start..end,
        len: end,
    }))
}

/// End offset of a field of `declared` bytes at `start`.
///
/// Without a limit, a length no buffer can hold means the input is cut short.
fn checked_end(start: usize, declared: u64, limit: usize) -> Result<usize, DecodeError> {
    let end = usize::try_from(declared)
        .ok()
        .and_then(|len| start.checked_add(len));
    match end {
        Some(end) if end <= limit => Ok(end),
        None if limit == usize::MAX => Err(Malformation::Truncated.into()),
        _ => Err(DecodeError::TooLarge {
            size: declared.saturating_add(start as u64),
            limit,
        }),
    }
}

/// Reads a LEB128 varint at `pos`. `Ok(None)` means more input is needed.
fn read_varint(buf: &[u8], pos: &mut usize) -> Result<Option<u64>, DecodeError> {
    let mut value = 0u64;
    for i in 0..MAX_VARINT_LEN {
        let Some(&byte) = buf.get(*pos + i) else {
            return Ok(None);
        };
        if i == MAX_VARINT_LEN - 1 && byte > 1 {
            return Err(Malformation::VarintOverflow.into());
        }
        value |= u64::from(byte & 0x7F) << (7 * i);
        if byte & 0x80 == 0 {
            *pos += i + 1;
            return Ok(Some(value));
        }
    }
    Err(Malformation::VarintOverflow.into())
}

fn put_varint(dst: &mut BytesMut, mut value: u64) {
    while value >= 0x80 {
        dst.put_u8((value as u8) | 0x80);
        value >>= 7;
    }
    dst.put_u8(value as u8);
}

fn varint_len(value: u64) -> usize {
    let bits = 64 - (value | 1).leading_zeros() as usize;
    bits.div_ceil(7)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::frame::types::AckId;

    fn sample_frames() -> Vec<Frame> {
        vec![
            Frame::connect("/", r#"{"sid":null}"#),
            Frame::disconnect("/chat"),
            Frame::message("/", r#"["echo","hi"]"#).with_ack(AckId::new(7)),
            Frame::ack("/admin", AckId::new(u64::MAX).unwrap(), "ok"),
            Frame::error("/", None, r#"{"code":"X"}"#),
            Frame::ping(),
            Frame::pong(),
            Frame::new(FrameType::Unknown(42), "/ünïcode").with_payload(vec![0u8, 255, 7]),
            Frame::message("/", vec![0xABu8; 300]),
        ]
    }

    #[test]
    fn test_round_trip() {
        for frame in sample_frames() {
            let bytes = encode(&frame);
            assert_eq!(bytes.len(), encoded_len(&frame));
            assert_eq!(decode(&bytes).unwrap(), frame);
        }
    }

    #[test]
    fn test_wire_layout() {
        let frame = Frame::message("/", "hi").with_ack(AckId::new(7));
        assert_eq!(&encode(&frame)[..], &[2, 1, b'/', 7, 2, b'h', b'i']);

        let ping = Frame::ping();
        assert_eq!(&encode(&ping)[..], &[5, 1, b'/', 0, 0]);
    }

    #[test]
    fn test_varint_boundaries() {
        for value in [0u64, 1, 127, 128, 16_383, 16_384, u32::MAX as u64, u64::MAX] {
            let mut buf = BytesMut::new();
            put_varint(&mut buf, value);
            assert_eq!(buf.len(), varint_len(value));

            let mut pos = 0;
            assert_eq!(read_varint(&buf, &mut pos).unwrap(), Some(value));
            assert_eq!(pos, buf.len());
        }
    }

    #[test]
    fn test_every_prefix_is_truncated() {
        let bytes = encode(&Frame::message("/room", "payload").with_ack(AckId::new(300)));
        for cut in 0..bytes.len() {
            assert_eq!(
                decode(&bytes[..cut]),
                Err(DecodeError::Malformed(Malformation::Truncated)),
                "prefix of {cut} bytes"
            );
        }
    }

    #[test]
    fn test_invalid_type() {
        let err = decode(&[0x80, 1, b'/', 0, 0]).unwrap_err();
        assert_eq!(err, DecodeError::Malformed(Malformation::InvalidType(0x80)));
    }

    #[test]
    fn test_unknown_type_preserved() {
        let frame = decode(&[0x30, 1, b'/', 0, 1, b'x']).unwrap();
        assert_eq!(frame.frame_type, FrameType::Unknown(0x30));
        assert_eq!(&frame.payload[..], b"x");
    }

    #[test]
    fn test_invalid_namespace() {
        let err = decode(&[2, 2, 0xC3, 0x28, 0, 0]).unwrap_err();
        assert_eq!(err, DecodeError::Malformed(Malformation::InvalidNamespace));
    }

    #[test]
    fn test_trailing_bytes() {
        let mut bytes = encode(&Frame::pong()).to_vec();
        bytes.extend_from_slice(&[9, 9]);
        assert_eq!(
            decode(&bytes),
            Err(DecodeError::Malformed(Malformation::TrailingBytes(2)))
        );
    }

    #[test]
    fn test_varint_overflow() {
        let mut bytes = vec![2u8];
        bytes.extend_from_slice(&[0xFF; 11]);
        assert_eq!(
            decode(&bytes),
            Err(DecodeError::Malformed(Malformation::VarintOverflow))
        );
    }

    #[test]
    fn test_unbounded_length_is_truncated() {
        // MESSAGE, empty namespace, no ack, payload length u64::MAX.
        let mut bytes = vec![2u8, 0, 0];
        bytes.extend_from_slice(&[0xFF; 9]);
        bytes.push(0x01);
        assert_eq!(
            decode(&bytes),
            Err(DecodeError::Malformed(Malformation::Truncated))
        );
    }

    #[test]
    fn test_stream_decodes_byte_by_byte() {
        let frame = Frame::message("/", r#"["echo","hi"]"#).with_ack(AckId::new(1));
        let bytes = encode(&frame);
        let mut codec = FrameCodec::new(1024);
        let mut buf = BytesMut::new();

        for (i, byte) in bytes.iter().enumerate() {
            buf.put_u8(*byte);
            let item = codec.decode(&mut buf).unwrap();
            if i + 1 < bytes.len() {
                assert!(item.is_none());
            } else {
                assert_eq!(item.unwrap().unwrap(), frame);
            }
        }
        assert!(buf.is_empty());
    }

    #[test]
    fn test_stream_skips_bad_frame_and_continues() {
        let mut codec = FrameCodec::new(1024);
        let mut buf = BytesMut::new();
        buf.put_slice(&[0x90, 1, b'/', 0, 0]);
        encode_into(&Frame::ping(), &mut buf);

        let first = codec.decode(&mut buf).unwrap().unwrap();
        assert_eq!(
            first,
            Err(DecodeError::Malformed(Malformation::InvalidType(0x90)))
        );
        let second = codec.decode(&mut buf).unwrap().unwrap();
        assert_eq!(second.unwrap(), Frame::ping());
        assert!(codec.decode(&mut buf).unwrap().is_none());
    }

    #[test]
    fn test_stream_rejects_oversized_frame() {
        let mut codec = FrameCodec::new(16);
        let mut buf = BytesMut::new();
        encode_into(&Frame::message("/", vec![0u8; 64]), &mut buf);

        match codec.decode(&mut buf) {
            Err(CodecError::Fatal(DecodeError::TooLarge { limit, .. })) => assert_eq!(limit, 16),
            other => panic!("expected oversize error, got {other:?}"),
        }
    }

    #[test]
    fn test_codec_encoder_matches_encode() {
        let frame = Frame::ack("/", AckId::new(9).unwrap(), "done");
        let mut codec = FrameCodec::new(1024);
        let mut buf = BytesMut::new();
        Encoder::encode(&mut codec, frame.clone(), &mut buf).unwrap();
        assert_eq!(buf.freeze(), encode(&frame));
    }
}
