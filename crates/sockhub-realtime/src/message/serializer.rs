//! JSON serialization for frame payloads.

use bytes::Bytes;
use serde_json::Value;

use crate::error::{RealtimeError, RealtimeResult};

use super::types::{ConnectRequest, ErrorPayload, EventPacket, Handshake};

/// Serialize an event as `[event]` or `[event, data]`.
pub fn encode_event(packet: &EventPacket) -> RealtimeResult<Bytes> {
    let mut items = vec![Value::String(packet.event.clone())];
    if !packet.data.is_null() {
        items.push(packet.data.clone());
    }
    Ok(Bytes::from(serde_json::to_vec(&items)?))
}

/// Deserialize a MESSAGE payload into an event.
///
/// Extra arguments beyond the first are folded into an array.
pub fn decode_event(payload: &[u8]) -> RealtimeResult<EventPacket> {
    let items: Vec<Value> = serde_json::from_slice(payload)?;
    let mut items = items.into_iter();

    let event = match items.next() {
        Some(Value::String(event)) => event,
        Some(other) => {
            return Err(RealtimeError::InvalidPayload(format!(
                "event name must be a string, got {other}"
            )));
        }
        None => return Err(RealtimeError::InvalidPayload("empty event payload".into())),
    };

    let mut args: Vec<Value> = items.collect();
    let data = match args.len() {
        0 => Value::Null,
        1 => args.pop().unwrap_or(Value::Null),
        _ => Value::Array(args),
    };

    Ok(EventPacket { event, data })
}

/// Serialize an ACK payload.
pub fn encode_value(value: &Value) -> RealtimeResult<Bytes> {
    Ok(Bytes::from(serde_json::to_vec(value)?))
}

/// Deserialize an ACK payload. An empty payload is `null`.
pub fn decode_value(payload: &[u8]) -> RealtimeResult<Value> {
    if payload.is_empty() {
        return Ok(Value::Null);
    }
    Ok(serde_json::from_slice(payload)?)
}

/// Serialize an ERROR payload.
pub fn encode_error(error: &ErrorPayload) -> Bytes {
    Bytes::from(serde_json::to_vec(error).unwrap_or_default())
}

/// Deserialize an ERROR payload.
pub fn decode_error(payload: &[u8]) -> RealtimeResult<ErrorPayload> {
    Ok(serde_json::from_slice(payload)?)
}

/// Serialize the server's CONNECT reply.
pub fn encode_handshake(handshake: &Handshake) -> Bytes {
    Bytes::from(serde_json::to_vec(handshake).unwrap_or_default())
}

/// Deserialize the server's CONNECT reply.
pub fn decode_handshake(payload: &[u8]) -> RealtimeResult<Handshake> {
    Ok(serde_json::from_slice(payload)?)
}

/// Serialize the client's CONNECT request.
pub fn encode_connect_request(request: &ConnectRequest) -> Bytes {
    Bytes::from(serde_json::to_vec(request).unwrap_or_default())
}

/// Deserialize the client's CONNECT request. An empty payload is a fresh connect.
pub fn decode_connect_request(payload: &[u8]) -> RealtimeResult<ConnectRequest> {
    if payload.is_empty() {
        return Ok(ConnectRequest::default());
    }
    Ok(serde_json::from_slice(payload)?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_event_wire_shape() {
        let packet = EventPacket::new("echo", json!("hi"));
        let bytes = encode_event(&packet).unwrap();
        assert_eq!(&bytes[..], br#"["echo","hi"]"#);
        assert_eq!(decode_event(&bytes).unwrap(), packet);
    }

    #[test]
    fn test_event_without_data() {
        let bytes = encode_event(&EventPacket::new("tick", Value::Null)).unwrap();
        assert_eq!(&bytes[..], br#"["tick"]"#);
        assert_eq!(decode_event(&bytes).unwrap().data, Value::Null);
    }

    #[test]
    fn test_event_multiple_args_folded() {
        let packet = decode_event(br#"["move", 1, 2]"#).unwrap();
        assert_eq!(packet.event, "move");
        assert_eq!(packet.data, json!([1, 2]));
    }

    #[test]
    fn test_event_rejects_bad_shapes() {
        assert!(matches!(
            decode_event(b"[]"),
            Err(RealtimeError::InvalidPayload(_))
        ));
        assert!(matches!(
            decode_event(b"[42]"),
            Err(RealtimeError::InvalidPayload(_))
        ));
        assert!(matches!(
            decode_event(b"not json"),
            Err(RealtimeError::InvalidPayload(_))
        ));
    }

    #[test]
    fn test_connect_request() {
        assert_eq!(decode_connect_request(b"").unwrap(), ConnectRequest::default());
        let request = decode_connect_request(br#"{"sid":"abc"}"#).unwrap();
        assert_eq!(request.sid.as_deref(), Some("abc"));
        assert_eq!(&encode_connect_request(&ConnectRequest::default())[..], b"{}");
    }

    #[test]
    fn test_handshake_is_camel_case() {
        let handshake = Handshake {
            sid: "abc".into(),
            ping_interval: 25_000,
            ping_timeout: 20_000,
            max_payload: 1024,
            resumed: false,
        };
        let text = String::from_utf8(encode_handshake(&handshake).to_vec()).unwrap();
        assert!(text.contains("\"pingInterval\":25000"));
        assert_eq!(decode_handshake(text.as_bytes()).unwrap(), handshake);
    }
}
