//! Wire encoding for gossip messages
//!
//! All messages use postcard. Field order is Rust struct field order, so
//! reordering fields of a wire type is a protocol break.

use crate::error::{Error, Result};
use crate::types::{CustomEvent, EventType};
use serde::de::DeserializeOwned;
use serde::Serialize;

/// Maximum length of an event type identifier in bytes
pub const MAX_EVENT_TYPE_LEN: usize = 255;

/// Serialize a value to its wire bytes.
pub fn encode<T: Serialize>(value: &T) -> Result<Vec<u8>> {
    postcard::to_allocvec(value).map_err(Error::from)
}

/// Deserialize a value from wire bytes.
pub fn decode<T: DeserializeOwned>(bytes: &[u8]) -> Result<T> {
    postcard::from_bytes(bytes).map_err(Error::from)
}

/// Check that an event type identifier is usable on the wire.
pub fn validate_event_type(event_type: &EventType) -> Result<()> {
    let len = event_type.as_bytes().len();
    if len == 0 {
        return Err(Error::InvalidEventType("empty".into()));
    }
    if len > MAX_EVENT_TYPE_LEN {
        return Err(Error::InvalidEventType(format!(
            "{} bytes (max {})",
            len, MAX_EVENT_TYPE_LEN
        )));
    }
    Ok(())
}

/// Check a custom event before it is buffered for dissemination.
pub fn validate_custom_event(event: &CustomEvent, max_payload: usize) -> Result<()> {
    validate_event_type(&event.event_type)?;
    if event.payload.len() > max_payload {
        return Err(Error::PayloadTooLarge {
            size: event.payload.len(),
            max: max_payload,
        });
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::*;

    #[test]
    fn test_encoding_deterministic() {
        let term = GossipTerm::new(42, 7);
        let bytes1 = encode(&term).unwrap();
        let bytes2 = encode(&term).unwrap();
        assert_eq!(bytes1, bytes2);
        assert_eq!(decode::<GossipTerm>(&bytes1).unwrap(), term);
    }

    #[test]
    fn test_event_type_validation() {
        assert!(validate_event_type(&EventType::from("leader")).is_ok());
        assert!(validate_event_type(&EventType::new(Vec::<u8>::new())).is_err());
        assert!(validate_event_type(&EventType::new(vec![b'x'; 256])).is_err());
    }

    #[test]
    fn test_payload_limit() {
        let event = CustomEvent::new(
            EventType::from("leader"),
            MemberId::from("a"),
            GossipTerm::default(),
            vec![0; 65],
        );
        assert!(matches!(
            validate_custom_event(&event, 64),
            Err(Error::PayloadTooLarge { size: 65, max: 64 })
        ));
        assert!(validate_custom_event(&event, 65).is_ok());
    }
}
