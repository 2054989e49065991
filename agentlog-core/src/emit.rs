//! End-of-request emission: one JSON line per unit of work.

use std::sync::{Arc, Mutex};

use chrono::{DateTime, Utc};
use serde_json::{Map, Value};

use crate::bucket::Bucket;
use crate::config::SinkKind;
use crate::context::LogContext;
use crate::serialization::to_line;
use crate::telemetry::keys::{KEY_MESSAGE, KEY_SEVERITY, KEY_TIMESTAMP, LOG_TARGET, SEVERITY_INFO};

/// Receives finished log lines.
///
/// Requirements:
/// - Implementations must be thread-safe (`Send + Sync`) and `'static`.
/// - `write` may be called from any thread; implementations should avoid panicking.
pub trait LogSink: Send + Sync + 'static {
    fn write(&self, line: &str);
}

/// Writes each record as one line on stdout, where Cloud Run / GKE agents pick
/// it up.
#[derive(Debug, Default, Clone, Copy)]
pub struct StdoutSink;

impl LogSink for StdoutSink {
    fn write(&self, line: &str) {
        println!("{line}");
    }
}

/// Forwards each record as an `INFO` event on the `agentlog` target.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingSink;

impl LogSink for TracingSink {
    fn write(&self, line: &str) {
        tracing::info!(target: LOG_TARGET, record = %line, "structured log");
    }
}

/// Keeps lines in memory.
#[derive(Debug, Default, Clone)]
pub struct MemorySink {
    lines: Arc<Mutex<Vec<String>>>,
}

impl MemorySink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn lines(&self) -> Vec<String> {
        self.lines.lock().map(|l| l.clone()).unwrap_or_default()
    }

    /// Parsed records, skipping anything that is not a JSON object.
    pub fn records(&self) -> Vec<Map<String, Value>> {
        self.lines()
            .iter()
            .filter_map(|l| serde_json::from_str::<Map<String, Value>>(l).ok())
            .collect()
    }
}

impl LogSink for MemorySink {
    fn write(&self, line: &str) {
        if let Ok(mut l) = self.lines.lock() {
            l.push(line.to_string());
        }
    }
}

/// Sink selected by configuration.
pub fn sink_for(kind: SinkKind) -> Arc<dyn LogSink> {
    match kind {
        SinkKind::Stdout => Arc::new(StdoutSink),
        SinkKind::Tracing => Arc::new(TracingSink),
    }
}

/// Assemble the record for `bucket` stamped with the current time.
pub fn build_record(bucket: &Bucket, message: Option<&str>) -> Map<String, Value> {
    build_record_at(bucket, message, Utc::now())
}

/// Record layout: `severity`, `timestamp`, `message` (if any), then the bucket
/// keys in insertion order. A `timestamp` or `message` already in the bucket
/// wins over the generated one.
pub fn build_record_at(
    bucket: &Bucket,
    message: Option<&str>,
    now: DateTime<Utc>,
) -> Map<String, Value> {
    let mut record = Map::with_capacity(bucket.len() + 3);
    let severity = bucket
        .get(KEY_SEVERITY)
        .cloned()
        .unwrap_or_else(|| Value::String(SEVERITY_INFO.into()));
    record.insert(KEY_SEVERITY.into(), severity);
    record.insert(
        KEY_TIMESTAMP.into(),
        Value::String(now.format("%Y-%m-%dT%H:%M:%SZ").to_string()),
    );
    if let Some(msg) = message {
        record.insert(KEY_MESSAGE.into(), Value::String(msg.into()));
    }
    for (k, v) in bucket {
        if k == KEY_SEVERITY {
            continue;
        }
        record.insert(k.clone(), v.clone());
    }
    record
}

impl LogContext {
    /// Serialize the current bucket and write it to `sink` as one line.
    /// Returns `false` (and writes nothing) when the bucket is empty.
    pub fn emit(&self, sink: &dyn LogSink, message: Option<&str>) -> bool {
        let bucket = self.get_all();
        if bucket.is_empty() {
            return false;
        }
        let line = to_line(&build_record(&bucket, message));
        sink.write(&line);
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::telemetry::test_span::install_capture;
    use chrono::TimeZone;
    use serde_json::json;

    #[test]
    fn record_has_defaults_and_bucket_keys() {
        let mut b = Bucket::new();
        b.insert("http".into(), json!({"status": 200}));
        let now = Utc.with_ymd_and_hms(2024, 3, 9, 8, 7, 6).unwrap();
        let rec = build_record_at(&b, Some("Request processed"), now);
        let keys = rec.keys().map(String::as_str).collect::<Vec<_>>();
        assert_eq!(keys, ["severity", "timestamp", "message", "http"]);
        assert_eq!(rec["severity"], json!("INFO"));
        assert_eq!(rec["timestamp"], json!("2024-03-09T08:07:06Z"));
        assert_eq!(rec["http"]["status"], json!(200));
    }

    #[test]
    fn bucket_severity_is_kept() {
        let mut b = Bucket::new();
        b.insert("severity".into(), json!("ERROR"));
        b.insert("a".into(), json!(1));
        let rec = build_record(&b, None);
        assert_eq!(rec["severity"], json!("ERROR"));
        assert!(!rec.contains_key("message"));
        assert_eq!(rec.len(), 3);
    }

    #[test]
    fn emit_writes_one_valid_json_line() {
        let ctx = LogContext::new();
        ctx.clear();
        ctx.add("gen_ai.usage.total_tokens", 42);
        ctx.add("logging.googleapis.com/trace", "abc");
        let sink = MemorySink::new();
        assert!(ctx.emit(&sink, Some("done")));

        let lines = sink.lines();
        assert_eq!(lines.len(), 1);
        assert!(!lines[0].contains('\n'));
        let rec: Value = serde_json::from_str(&lines[0]).unwrap();
        assert_eq!(rec["message"], json!("done"));
        assert_eq!(rec["gen_ai"]["usage"]["total_tokens"], json!(42));
        assert_eq!(rec["logging.googleapis.com/trace"], json!("abc"));
        assert!(rec["timestamp"].as_str().unwrap().ends_with('Z'));
    }

    #[test]
    fn empty_bucket_emits_nothing() {
        let ctx = LogContext::new();
        ctx.clear();
        let sink = MemorySink::new();
        assert!(!ctx.emit(&sink, Some("ignored")));
        assert!(sink.lines().is_empty());
    }

    #[test]
    fn tracing_sink_emits_on_agentlog_target() {
        let (store, _guard) = install_capture();
        TracingSink.write(r#"{"a":1}"#);
        let events = store.events_for(LOG_TARGET);
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].level, tracing::Level::INFO);
        assert_eq!(events[0].fields["record"], r#"{"a":1}"#);
    }
}
