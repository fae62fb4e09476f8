//! Request id discovery from arbitrary request payloads.

use serde::Serialize;

/// Field inspected on serialized payloads.
pub const REQUEST_ID_FIELD: &str = "requestId";

/// Look for a string `requestId` field at the top level of `payload`.
///
/// Payloads that do not serialize to an object, or lack the field, yield `None`.
pub fn request_id_from_payload<T: Serialize + ?Sized>(payload: &T) -> Option<String> {
    let value = serde_json::to_value(payload).ok()?;
    match value.get(REQUEST_ID_FIELD)? {
        serde_json::Value::String(s) if !s.is_empty() => Some(s.clone()),
        _ => None,
    }
}

/// Render a payload for diagnostic logs.
pub(crate) fn render<T: Serialize + ?Sized>(payload: &T) -> String {
    serde_json::to_string(payload).unwrap_or_else(|_| "<unserializable>".to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_reads_top_level_field() {
        let req = json!({ "requestId": "req-9", "orderId": 42 });
        assert_eq!(request_id_from_payload(&req).as_deref(), Some("req-9"));
    }

    #[test]
    fn test_missing_or_wrong_type() {
        assert!(request_id_from_payload(&json!({ "orderId": 42 })).is_none());
        assert!(request_id_from_payload(&json!({ "requestId": 7 })).is_none());
        assert!(request_id_from_payload(&json!(["requestId"])).is_none());
        assert!(request_id_from_payload("plain string").is_none());
    }
}
