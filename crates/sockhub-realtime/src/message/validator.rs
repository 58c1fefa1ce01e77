//! Name validation rules.

use crate::error::{RealtimeError, RealtimeResult};

/// Maximum length of an event, room or namespace name in bytes.
pub const MAX_NAME_LEN: usize = 256;

/// Validates an event name. Event names are otherwise opaque.
pub fn validate_event_name(event: &str) -> RealtimeResult<()> {
    validate_name("event", event)
}

/// Validates a room name.
pub fn validate_room_name(room: &str) -> RealtimeResult<()> {
    validate_name("room", room)
}

fn validate_name(what: &str, name: &str) -> RealtimeResult<()> {
    if name.is_empty() || name.len() > MAX_NAME_LEN {
        return Err(RealtimeError::InvalidPayload(format!(
            "invalid {what} name length: {}",
            name.len()
        )));
    }

    if name.chars().any(char::is_control) {
        return Err(RealtimeError::InvalidPayload(format!(
            "{what} name contains control characters"
        )));
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_names() {
        assert!(validate_room_name("lobby").is_ok());
        assert!(validate_event_name("messgae").is_ok());
        assert!(validate_room_name("").is_err());
        assert!(validate_room_name(&"x".repeat(MAX_NAME_LEN + 1)).is_err());
        assert!(validate_event_name("bad\nname").is_err());
    }
}
