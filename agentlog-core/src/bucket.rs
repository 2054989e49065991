//! The per-execution key/value bucket and its dotted-key merge.

use serde_json::{Map, Value};

/// Accumulated log fields for one logical execution.
pub type Bucket = Map<String, Value>;

/// Keys under this prefix are vendor correlation fields and are never nested,
/// even though they contain dots.
pub const FLAT_PREFIX: &str = "logging.googleapis.com";

/// Whether `key` should be split on `.` into a nested path.
#[inline]
pub fn is_nested_key(key: &str) -> bool {
    key.contains('.') && !key.starts_with(FLAT_PREFIX)
}

/// Merge `value` into `bucket` at `key`.
///
/// `"a.b.c"` walks (and creates) `a` and `a.b` as objects, replacing any
/// non-object found on the way, then sets `c`. Siblings already present under
/// `a` and `a.b` are kept.
pub fn insert_path(bucket: &mut Bucket, key: &str, value: Value) {
    if !is_nested_key(key) {
        bucket.insert(key.to_string(), value);
        return;
    }

    let mut parts = key.split('.').collect::<Vec<_>>();
    let Some(leaf) = parts.pop() else {
        return;
    };

    let mut node = bucket;
    for part in parts {
        let slot = node
            .entry(part.to_string())
            .or_insert_with(|| Value::Object(Map::new()));
        if !slot.is_object() {
            *slot = Value::Object(Map::new());
        }
        let Value::Object(next) = slot else {
            return;
        };
        node = next;
    }
    node.insert(leaf.to_string(), value);
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn dotted_key_nests() {
        let mut b = Bucket::new();
        insert_path(&mut b, "a.b.c", json!(7));
        assert_eq!(b["a"]["b"]["c"], json!(7));
    }

    #[test]
    fn dotted_key_keeps_siblings() {
        let mut b = Bucket::new();
        insert_path(&mut b, "http.method", json!("GET"));
        insert_path(&mut b, "http.status", json!(200));
        assert_eq!(b["http"], json!({"method": "GET", "status": 200}));
    }

    #[test]
    fn scalar_intermediate_is_replaced() {
        let mut b = Bucket::new();
        insert_path(&mut b, "gen_ai", json!("flat"));
        insert_path(&mut b, "gen_ai.usage.total_tokens", json!(12));
        assert_eq!(b["gen_ai"], json!({"usage": {"total_tokens": 12}}));
    }

    #[test]
    fn reserved_prefix_stays_flat() {
        let mut b = Bucket::new();
        insert_path(&mut b, "logging.googleapis.com/trace", json!("abc"));
        assert_eq!(b["logging.googleapis.com/trace"], json!("abc"));
        assert!(!b.contains_key("logging"));
    }

    #[test]
    fn plain_key_overwrites_whole_value() {
        let mut b = Bucket::new();
        insert_path(&mut b, "adk.session_id", json!("s1"));
        insert_path(&mut b, "adk", json!({"user_id": "u1"}));
        assert_eq!(b["adk"], json!({"user_id": "u1"}));
    }
}
