//! Request-scoped log context.
//!
//! Every logical execution (request, task) owns one [`Bucket`]. Inside
//! [`LogContext::scope`] the bucket is task-local, so concurrent tasks on the
//! same worker thread never see each other's writes. Outside any scope the
//! bucket falls back to a thread-local, which isolates plain synchronous call
//! chains per thread. A spawned tokio task without a scope has no bucket at
//! all: it can hop worker threads between polls, so its writes are dropped and
//! its reads see nothing. Use [`LogContext::spawn`] for background work.
//!
//! [`LogContext`] itself is only the write policy (span mirror, attribute cap);
//! it is cheap to clone and every clone addresses the same per-execution bucket.

use std::cell::RefCell;
use std::fmt;
use std::future::Future;
use std::sync::Arc;

use once_cell::sync::{Lazy, OnceCell};
use serde::Serialize;
use serde_json::Value;
use tokio::task::JoinHandle;

use crate::bucket::{Bucket, insert_path};
use crate::config::EmissionCfg;
use crate::mirror::{
    CurrentSpanMirror, DEFAULT_SNIPPET_LEN, MAX_ATTRIBUTE_LEN, SpanMirror, mirror_value, snippet,
};
use crate::serialization::to_field_value;
use crate::telemetry::keys::{
    KEY_ERROR, KEY_GCP_SPAN_ID, KEY_GCP_TRACE, KEY_SEVERITY, SEVERITY_ERROR,
};

tokio::task_local! {
    static TASK_BUCKET: RefCell<Bucket>;
}

thread_local! {
    static THREAD_BUCKET: RefCell<Bucket> = RefCell::new(Bucket::new());
}

static UNSCOPED_TASK_WARNED: OnceCell<()> = OnceCell::new();

/// Run `f` against the bucket of the current logical execution.
/// `f` must not re-enter the context.
fn with_bucket<R>(f: impl FnOnce(&mut Bucket) -> R) -> R {
    if TASK_BUCKET.try_with(|_| ()).is_ok() {
        TASK_BUCKET.with(|cell| f(&mut cell.borrow_mut()))
    } else if let Some(task) = tokio::task::try_id() {
        // the worker's thread bucket is shared by every task it polls
        if UNSCOPED_TASK_WARNED.set(()).is_ok() {
            tracing::warn!(
                task = %task,
                "log context used in a tokio task without LogContext::scope; fields are discarded"
            );
        }
        f(&mut Bucket::new())
    } else {
        THREAD_BUCKET.with(|cell| f(&mut cell.borrow_mut()))
    }
}

/// Fixed-shape error block written under `error`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ErrorRecord {
    #[serde(rename = "type")]
    pub kind: String,
    pub message: String,
    pub module: String,
}

impl ErrorRecord {
    pub fn new(
        kind: impl Into<String>,
        message: impl Into<String>,
        module: impl Into<String>,
    ) -> Self {
        Self {
            kind: kind.into(),
            message: message.into(),
            module: module.into(),
        }
    }

    /// Build a record from any displayable error. `kind` is the short type
    /// name, `module` the path it lives under.
    pub fn from_error<E: fmt::Display + ?Sized>(err: &E) -> Self {
        let (module, kind) = split_type_name(std::any::type_name::<E>());
        Self {
            kind: kind.to_string(),
            message: err.to_string(),
            module: module.to_string(),
        }
    }
}

/// `"my_crate::errors::Boom<T>"` -> `("my_crate::errors", "Boom")`.
fn split_type_name(full: &str) -> (&str, &str) {
    let full = full.strip_prefix("dyn ").unwrap_or(full);
    let path = full.split('<').next().unwrap_or(full);
    path.rsplit_once("::").unwrap_or(("", path))
}

/// Handle to the per-execution log bucket.
#[derive(Clone)]
pub struct LogContext {
    mirror: Arc<dyn SpanMirror>,
    max_attribute_len: usize,
    snippet_len: usize,
}

impl fmt::Debug for LogContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LogContext")
            .field("max_attribute_len", &self.max_attribute_len)
            .field("snippet_len", &self.snippet_len)
            .finish_non_exhaustive()
    }
}

impl Default for LogContext {
    fn default() -> Self {
        Self::new()
    }
}

static LOG_CTX: Lazy<LogContext> = Lazy::new(LogContext::new);

/// The process-wide context, mirroring onto the current `tracing` span.
pub fn log_ctx() -> &'static LogContext {
    &LOG_CTX
}

impl LogContext {
    pub fn new() -> Self {
        Self::with_mirror(Arc::new(CurrentSpanMirror))
    }

    pub fn with_mirror(mirror: Arc<dyn SpanMirror>) -> Self {
        Self {
            mirror,
            max_attribute_len: MAX_ATTRIBUTE_LEN,
            snippet_len: DEFAULT_SNIPPET_LEN,
        }
    }

    pub fn max_attribute_len(mut self, len: usize) -> Self {
        self.max_attribute_len = len;
        self
    }

    /// Snippet length used by [`LogContext::add_content_default`].
    pub fn snippet_len(mut self, len: usize) -> Self {
        self.snippet_len = len;
        self
    }

    /// Attribute cap and snippet length from the emission config.
    pub fn from_config(cfg: &EmissionCfg) -> Self {
        Self::new()
            .max_attribute_len(cfg.max_attribute_len)
            .snippet_len(cfg.snippet_len)
    }

    pub fn mirror(&self) -> &dyn SpanMirror {
        &*self.mirror
    }

    /// Run `fut` with a fresh, empty bucket of its own.
    pub fn scope<F: Future>(fut: F) -> impl Future<Output = F::Output> {
        TASK_BUCKET.scope(RefCell::new(Bucket::new()), fut)
    }

    /// Run `fut` with a copy of the caller's bucket. Writes inside `fut` do not
    /// flow back to the caller.
    pub fn fork<F: Future>(fut: F) -> impl Future<Output = F::Output> {
        let snapshot = with_bucket(|b| b.clone());
        TASK_BUCKET.scope(RefCell::new(snapshot), fut)
    }

    /// `tokio::spawn` `fut` on a fork of the caller's bucket.
    pub fn spawn<F>(fut: F) -> JoinHandle<F::Output>
    where
        F: Future + Send + 'static,
        F::Output: Send + 'static,
    {
        tokio::spawn(Self::fork(fut))
    }

    /// Synchronous counterpart of [`LogContext::scope`].
    pub fn sync_scope<R>(f: impl FnOnce() -> R) -> R {
        TASK_BUCKET.sync_scope(RefCell::new(Bucket::new()), f)
    }

    /// Reset the current bucket.
    pub fn clear(&self) {
        with_bucket(|b| b.clear());
    }

    /// Merge `value` at `key` (dotted keys nest) and mirror it onto the active span.
    /// A value serde rejects is stored as a failure note; use
    /// [`LogContext::add_display`] to keep such a value's `Display` form.
    pub fn add<V: Serialize>(&self, key: &str, value: V) {
        self.add_value(key, to_field_value(&value));
    }

    /// Like [`LogContext::add`], storing the `Display` form of `value`.
    pub fn add_display(&self, key: &str, value: impl fmt::Display) {
        self.add_value(key, Value::String(value.to_string()));
    }

    pub fn add_value(&self, key: &str, value: Value) {
        mirror_value(&*self.mirror, key, &value, self.max_attribute_len);
        with_bucket(|b| insert_path(b, key, value));
    }

    /// Store the full `text` in the log but only a short snippet on the span.
    pub fn add_content(&self, key: &str, text: &str, snippet_len: usize) {
        let owned = text.to_string();
        with_bucket(|b| insert_path(b, key, Value::String(owned)));
        if self.mirror.is_recording() {
            self.mirror.set_attribute(key, snippet(text, snippet_len));
        }
    }

    /// [`LogContext::add_content`] with this context's snippet length.
    pub fn add_content_default(&self, key: &str, text: &str) {
        self.add_content(key, text, self.snippet_len);
    }

    /// Add several fields at once.
    pub fn enrich<I, K, V>(&self, fields: I)
    where
        I: IntoIterator<Item = (K, V)>,
        K: AsRef<str>,
        V: Serialize,
    {
        for (k, v) in fields {
            self.add(k.as_ref(), v);
        }
    }

    /// Top-level value at `key`.
    pub fn get(&self, key: &str) -> Option<Value> {
        with_bucket(|b| b.get(key).cloned())
    }

    /// Snapshot of the whole bucket.
    pub fn get_all(&self) -> Bucket {
        with_bucket(|b| b.clone())
    }

    pub fn is_empty(&self) -> bool {
        with_bucket(|b| b.is_empty())
    }

    /// Write the error block for `err` and escalate severity.
    pub fn record_exception<E: fmt::Display + ?Sized>(&self, err: &E) {
        self.record_error(ErrorRecord::from_error(err));
    }

    pub fn record_error(&self, record: ErrorRecord) {
        self.add(KEY_ERROR, &record);
        self.add(KEY_SEVERITY, SEVERITY_ERROR);
    }

    /// Inject trace/span ids of the active span as log correlation fields.
    /// With a project the trace field takes the `projects/{p}/traces/{id}` form.
    pub fn initialize_with_otel(&self, project_id: Option<&str>) {
        let Some(ids) = self.mirror.trace_ids() else {
            return;
        };
        let trace = match project_id.filter(|p| !p.is_empty()) {
            Some(project) => format!("projects/{project}/traces/{}", ids.trace_id),
            None => ids.trace_id,
        };
        self.add(KEY_GCP_TRACE, trace);
        self.add(KEY_GCP_SPAN_ID, ids.span_id);
    }

    /// Project the whole bucket onto the active span.
    pub fn mirror_all(&self) {
        if !self.mirror.is_recording() {
            return;
        }
        for (key, value) in &self.get_all() {
            mirror_value(&*self.mirror, key, value, self.max_attribute_len);
        }
    }
}
