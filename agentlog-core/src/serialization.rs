//! Conversion of caller values into bucket values.
//!
//! Emission must never fail because of an odd value, so anything serde cannot
//! represent as JSON degrades to a string.

use serde::Serialize;
use serde_json::Value;

/// Convert any serializable value into a bucket value.
///
/// Date-times (chrono) come out as ISO-8601 strings through their `Serialize`
/// impls. Values serde rejects (e.g. maps with non-string keys) are replaced by
/// a string describing the failure; callers that want such a value's
/// `Display` form store it with `LogContext::add_display`.
pub fn to_field_value<V: Serialize + ?Sized>(value: &V) -> Value {
    match serde_json::to_value(value) {
        Ok(v) => v,
        Err(e) => Value::String(format!("<unserializable: {e}>")),
    }
}

/// Stringify a bucket value the way span attributes expect it:
/// strings verbatim, everything else as compact JSON.
pub fn stringify(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

/// Serialize a finished record to a single line.
pub fn to_line(record: &serde_json::Map<String, Value>) -> String {
    serde_json::to_string(record).unwrap_or_else(|e| {
        // Unreachable for `Value` trees in practice; keep the line valid JSON anyway.
        format!(r#"{{"severity":"ERROR","message":"log serialization failed: {e}"}}"#)
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeZone, Utc};
    use serde_json::json;
    use std::collections::HashMap;

    #[test]
    fn datetime_becomes_iso_string() {
        let ts = Utc.with_ymd_and_hms(2024, 5, 1, 12, 30, 0).unwrap();
        let v = to_field_value(&ts);
        assert_eq!(v, json!("2024-05-01T12:30:00Z"));
    }

    #[test]
    fn non_string_map_keys_fall_back_to_string() {
        let mut m: HashMap<(u8, u8), u8> = HashMap::new();
        m.insert((1, 2), 3);
        let v = to_field_value(&m);
        let s = v.as_str().expect("fallback is a string");
        assert!(s.starts_with("<unserializable:"));
    }

    #[test]
    fn stringify_keeps_strings_unquoted() {
        assert_eq!(stringify(&json!("abc")), "abc");
        assert_eq!(stringify(&json!(42)), "42");
        assert_eq!(stringify(&json!(true)), "true");
        assert_eq!(stringify(&json!([1, "a"])), r#"[1,"a"]"#);
        assert_eq!(stringify(&Value::Null), "null");
    }
}
