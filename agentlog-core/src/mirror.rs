//! Projection of bucket writes onto the active tracing span.
//!
//! Span attributes are flat strings, so nested objects are walked depth-first
//! and written as `parent.child.leaf`. Long values are cut at
//! [`MAX_ATTRIBUTE_LEN`] characters.

use std::sync::{Arc, Mutex};

use opentelemetry::trace::TraceContextExt;
use serde_json::Value;
use tracing_opentelemetry::OpenTelemetrySpanExt;

use crate::serialization::stringify;

/// Longest attribute value written to a span, in characters.
pub const MAX_ATTRIBUTE_LEN: usize = 1024;

/// Appended to attribute values cut at [`MAX_ATTRIBUTE_LEN`].
pub const TRUNCATION_MARKER: &str = "... [truncated]";

/// Default length of span snippets for large content fields.
pub const DEFAULT_SNIPPET_LEN: usize = 50;

/// Trace correlation ids of the active span, already hex-formatted.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TraceIds {
    /// 32 lowercase hex chars.
    pub trace_id: String,
    /// 16 lowercase hex chars.
    pub span_id: String,
}

impl TraceIds {
    pub fn from_raw(trace_id: u128, span_id: u64) -> Self {
        Self {
            trace_id: format!("{trace_id:032x}"),
            span_id: format!("{span_id:016x}"),
        }
    }
}

/// Write side of the span projection.
///
/// Requirements:
/// - Implementations must be thread-safe (`Send + Sync`) and `'static`.
/// - `set_attribute` targets whatever span is active for the caller; it must not panic.
pub trait SpanMirror: Send + Sync + 'static {
    /// Whether there is an active span that accepts attributes.
    fn is_recording(&self) -> bool;

    fn set_attribute(&self, key: &str, value: String);

    /// Correlation ids of the active span, if it has a valid span context.
    fn trace_ids(&self) -> Option<TraceIds> {
        None
    }
}

/// Mirrors onto `tracing::Span::current()` through the OpenTelemetry bridge.
///
/// Without an `OpenTelemetryLayer` installed the writes are dropped, which is
/// what an unconfigured process should do.
#[derive(Debug, Default, Clone, Copy)]
pub struct CurrentSpanMirror;

impl SpanMirror for CurrentSpanMirror {
    fn is_recording(&self) -> bool {
        !tracing::Span::current().is_disabled()
    }

    fn set_attribute(&self, key: &str, value: String) {
        tracing::Span::current().set_attribute(key.to_string(), value);
    }

    fn trace_ids(&self) -> Option<TraceIds> {
        let span = tracing::Span::current();
        if span.is_disabled() {
            return None;
        }
        let cx = span.context();
        let otel_span = cx.span();
        let sc = otel_span.span_context();
        if !sc.is_valid() {
            return None;
        }
        Some(TraceIds {
            trace_id: sc.trace_id().to_string(),
            span_id: sc.span_id().to_string(),
        })
    }
}

/// Collects attribute writes in memory. Useful for embedding the context
/// without a tracing pipeline, and for asserting on mirrored attributes.
#[derive(Debug, Default, Clone)]
pub struct RecordingMirror {
    attributes: Arc<Mutex<Vec<(String, String)>>>,
    ids: Option<TraceIds>,
}

impl RecordingMirror {
    pub fn new() -> Self {
        Self::default()
    }

    /// Pretend the active span carries these ids.
    pub fn with_trace_ids(mut self, ids: TraceIds) -> Self {
        self.ids = Some(ids);
        self
    }

    /// All writes so far, in order.
    pub fn attributes(&self) -> Vec<(String, String)> {
        self.attributes
            .lock()
            .map(|a| a.clone())
            .unwrap_or_default()
    }

    /// Last value written for `key`.
    pub fn get(&self, key: &str) -> Option<String> {
        self.attributes()
            .into_iter()
            .rev()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v)
    }

    pub fn clear(&self) {
        if let Ok(mut a) = self.attributes.lock() {
            a.clear();
        }
    }
}

impl SpanMirror for RecordingMirror {
    fn is_recording(&self) -> bool {
        true
    }

    fn set_attribute(&self, key: &str, value: String) {
        if let Ok(mut a) = self.attributes.lock() {
            a.push((key.to_string(), value));
        }
    }

    fn trace_ids(&self) -> Option<TraceIds> {
        self.ids.clone()
    }
}

/// Cut `s` to `max` characters and append [`TRUNCATION_MARKER`] when longer.
pub fn truncate_attribute(s: &str, max: usize) -> String {
    cut(s, max, TRUNCATION_MARKER)
}

/// Cut `s` to `len` characters and append `...` when longer.
pub fn snippet(s: &str, len: usize) -> String {
    cut(s, len, "...")
}

fn cut(s: &str, max: usize, marker: &str) -> String {
    match s.char_indices().nth(max) {
        Some((byte_idx, _)) => {
            let mut out = String::with_capacity(byte_idx + marker.len());
            out.push_str(&s[..byte_idx]);
            out.push_str(marker);
            out
        }
        None => s.to_string(),
    }
}

/// Depth-first flatten of `value` under `prefix` into `(key, stringified)` pairs.
/// Arrays and scalars are leaves; an empty object produces nothing.
pub fn flatten(prefix: &str, value: &Value, out: &mut Vec<(String, String)>) {
    match value {
        Value::Object(map) => {
            for (k, v) in map {
                flatten(&format!("{prefix}.{k}"), v, out);
            }
        }
        leaf => out.push((prefix.to_string(), stringify(leaf))),
    }
}

/// Flatten and write `value` under `key`, applying the length cap.
pub(crate) fn mirror_value(mirror: &dyn SpanMirror, key: &str, value: &Value, max_len: usize) {
    if !mirror.is_recording() {
        return;
    }
    let mut pairs = Vec::new();
    flatten(key, value, &mut pairs);
    for (k, v) in pairs {
        mirror.set_attribute(&k, truncate_attribute(&v, max_len));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn long_value_is_truncated_with_marker() {
        let long = "x".repeat(2000);
        let out = truncate_attribute(&long, MAX_ATTRIBUTE_LEN);
        assert_eq!(out.len(), MAX_ATTRIBUTE_LEN + TRUNCATION_MARKER.len());
        assert!(out.ends_with(TRUNCATION_MARKER));
        assert!(out.starts_with(&"x".repeat(1024)));
    }

    #[test]
    fn value_at_limit_is_untouched() {
        let exact = "y".repeat(MAX_ATTRIBUTE_LEN);
        assert_eq!(truncate_attribute(&exact, MAX_ATTRIBUTE_LEN), exact);
    }

    #[test]
    fn truncation_respects_char_boundaries() {
        let s = "é".repeat(10);
        assert_eq!(truncate_attribute(&s, 3), format!("ééé{TRUNCATION_MARKER}"));
        assert_eq!(snippet(&s, 2), "éé...");
    }

    #[test]
    fn flatten_walks_nested_objects() {
        let v = json!({"usage": {"total_tokens": 5, "model": "m"}, "tags": ["a"]});
        let mut out = Vec::new();
        flatten("gen_ai", &v, &mut out);
        out.sort();
        assert_eq!(
            out,
            vec![
                ("gen_ai.tags".to_string(), r#"["a"]"#.to_string()),
                ("gen_ai.usage.model".to_string(), "m".to_string()),
                ("gen_ai.usage.total_tokens".to_string(), "5".to_string()),
            ]
        );
    }

    #[test]
    fn mirror_value_caps_every_leaf() {
        let rec = RecordingMirror::new();
        let v = json!({"prompt": "p".repeat(2000)});
        mirror_value(&rec, "llm", &v, MAX_ATTRIBUTE_LEN);
        let got = rec.get("llm.prompt").expect("mirrored");
        assert_eq!(got.chars().count(), MAX_ATTRIBUTE_LEN + TRUNCATION_MARKER.len());
    }

    #[test]
    fn trace_ids_are_zero_padded_hex() {
        let ids = TraceIds::from_raw(0xabc, 0x1f);
        assert_eq!(ids.trace_id, format!("{}abc", "0".repeat(29)));
        assert_eq!(ids.span_id, "000000000000001f");
    }

    #[test]
    fn current_span_mirror_without_subscriber_is_idle() {
        let m = CurrentSpanMirror;
        assert!(!m.is_recording());
        assert!(m.trace_ids().is_none());
        // No subscriber: write is dropped, never panics.
        m.set_attribute("k", "v".into());
    }
}
