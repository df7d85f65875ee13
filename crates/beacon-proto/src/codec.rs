//! Text frame encoding and decoding

use crate::{Envelope, ProtocolError};
use serde::Serialize;
use serde_json::Value;

/// Maximum frame size (16MB)
pub const MAX_FRAME_SIZE: usize = 16 * 1024 * 1024;

/// Result of decoding one inbound text frame
#[derive(Debug, Default)]
pub struct DecodedFrame {
    /// Envelopes that passed validation, in frame order
    pub envelopes: Vec<Envelope>,
    /// Elements of the frame that were dropped, with the reason
    pub rejected: Vec<ProtocolError>,
    /// Whether the frame was an array
    pub batched: bool,
}

impl DecodedFrame {
    /// Number of elements the frame carried, valid or not
    pub fn len(&self) -> usize {
        self.envelopes.len() + self.rejected.len()
    }
    
    /// Check whether the frame carried no elements at all
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Decode a text frame into envelopes.
///
/// Accepts a single envelope object or an array of them. A frame that is not
/// JSON at all is an error; individual array elements that are not valid
/// envelopes are collected in [`DecodedFrame::rejected`] without affecting
/// their neighbours.
pub fn decode_frame(raw: &str) -> Result<DecodedFrame, ProtocolError> {
    decode_frame_with_limit(raw, MAX_FRAME_SIZE)
}

/// Decode a text frame with a custom size limit
pub fn decode_frame_with_limit(raw: &str, max_frame_size: usize) -> Result<DecodedFrame, ProtocolError> {
    if raw.len() > max_frame_size {
        return Err(ProtocolError::FrameTooLarge {
            size: raw.len(),
            max: max_frame_size,
        });
    }
    
    let value: Value = serde_json::from_str(raw)?;
    let mut decoded = DecodedFrame::default();
    
    let elements = match value {
        Value::Array(items) => {
            decoded.batched = true;
            items
        }
        single => vec![single],
    };
    
    for element in elements {
        match into_envelope(element) {
            Ok(envelope) => decoded.envelopes.push(envelope),
            Err(e) => decoded.rejected.push(e),
        }
    }
    
    Ok(decoded)
}

fn into_envelope(element: Value) -> Result<Envelope, ProtocolError> {
    if !element.is_object() {
        return Err(ProtocolError::InvalidEnvelope(format!("expected object, got {}", element)));
    }
    let envelope: Envelope = serde_json::from_value(element)
        .map_err(|e| ProtocolError::InvalidEnvelope(e.to_string()))?;
    envelope.validate()?;
    Ok(envelope)
}

/// Serialize a payload into a text frame.
///
/// A payload that is already a string is passed through unchanged; anything
/// else is serialized as JSON.
pub fn encode_payload<T: Serialize + ?Sized>(payload: &T) -> Result<String, ProtocolError> {
    let value = serde_json::to_value(payload)
        .map_err(|e| ProtocolError::Encode(e.to_string()))?;
    match value {
        Value::String(text) => Ok(text),
        _ => serde_json::to_string(payload)
            .map_err(|e| ProtocolError::Encode(e.to_string())),
    }
}

/// Serialize a single envelope into a text frame
pub fn encode_envelope(envelope: &Envelope) -> Result<String, ProtocolError> {
    encode_payload(envelope)
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use serde_json::json;
    
    #[test]
    fn test_decode_single_envelope() {
        let decoded = decode_frame(r#"{"operation":"eval_js","data":{"code":"1+1","id":"x1"}}"#).unwrap();
        assert!(!decoded.batched);
        assert_eq!(decoded.envelopes.len(), 1);
        assert_eq!(decoded.envelopes[0].operation, "eval_js");
        assert_eq!(decoded.envelopes[0].data["id"], json!("x1"));
    }
    
    #[test]
    fn test_decode_batch_preserves_order() {
        let decoded = decode_frame(
            r#"[{"operation":"a","data":1},{"operation":"b","data":2},{"operation":"c","data":3}]"#
        ).unwrap();
        assert!(decoded.batched);
        let ops: Vec<_> = decoded.envelopes.iter().map(|e| e.operation.as_str()).collect();
        assert_eq!(ops, vec!["a", "b", "c"]);
    }
    
    #[test]
    fn test_decode_empty_batch() {
        let decoded = decode_frame("[]").unwrap();
        assert!(decoded.batched);
        assert!(decoded.is_empty());
    }
    
    #[test]
    fn test_decode_rejects_elements_individually() {
        let decoded = decode_frame(
            r#"[{"operation":"","data":1},{"operation":"ok"},42,{"data":"no op"}]"#
        ).unwrap();
        assert_eq!(decoded.envelopes.len(), 1);
        assert_eq!(decoded.envelopes[0].operation, "ok");
        assert_eq!(decoded.rejected.len(), 3);
        assert!(matches!(decoded.rejected[0], ProtocolError::MissingOperation));
        assert!(matches!(decoded.rejected[1], ProtocolError::InvalidEnvelope(_)));
        assert!(matches!(decoded.rejected[2], ProtocolError::MissingOperation));
    }
    
    #[test]
    fn test_decode_malformed_frame() {
        let result = decode_frame("this is not json {");
        assert!(matches!(result, Err(ProtocolError::Decode(_))));
    }
    
    #[test]
    fn test_decode_non_string_operation_is_rejected() {
        let decoded = decode_frame(r#"{"operation": 5, "data": null}"#).unwrap();
        assert!(decoded.envelopes.is_empty());
        assert!(matches!(decoded.rejected[0], ProtocolError::InvalidEnvelope(_)));
    }
    
    #[test]
    fn test_frame_too_large() {
        let raw = format!(r#"{{"operation":"x","data":"{}"}}"#, "a".repeat(200));
        let result = decode_frame_with_limit(&raw, 100);
        assert!(matches!(result, Err(ProtocolError::FrameTooLarge { max: 100, .. })));
    }
    
    #[test]
    fn test_encode_payload_passes_strings_through() {
        let raw = r#"{"operation":"heartbeat","data":"ping"}"#;
        assert_eq!(encode_payload(raw).unwrap(), raw);
        assert_eq!(encode_payload(&json!({"a": 1})).unwrap(), r#"{"a":1}"#);
    }
    
    #[test]
    fn test_encode_envelope_shape() {
        let encoded = encode_envelope(&Envelope::ping()).unwrap();
        let value: serde_json::Value = serde_json::from_str(&encoded).unwrap();
        assert_eq!(value, json!({"operation": "heartbeat", "data": "ping"}));
    }
    
    proptest! {
        #[test]
        fn test_single_and_singleton_batch_decode_identically(
            operation in "[a-z_]{1,16}",
            id in "[a-zA-Z0-9]{0,12}",
            number in any::<i64>()
        ) {
            let envelope = json!({"operation": operation, "data": {"id": id, "n": number}});
            let single = decode_frame(&envelope.to_string()).unwrap();
            let batch = decode_frame(&json!([envelope]).to_string()).unwrap();
            
            prop_assert_eq!(single.envelopes, batch.envelopes);
            prop_assert!(single.rejected.is_empty());
            prop_assert!(batch.rejected.is_empty());
        }
        
        #[test]
        fn test_decode_never_panics(raw in ".{0,256}") {
            let _ = decode_frame(&raw);
        }
    }
}
