//! Wrapping agent runs so their metadata and metrics land in the log context.
//!
//! Contract:
//! - Every run opens one span (`otel.name = "ADK {name}"`) that stays open
//!   until the run's result or stream is finished.
//! - Metrics are written to the bucket exactly once per run, then the whole
//!   bucket is mirrored onto the run span.
//! - Errors from the wrapped run are recorded and handed back untouched.

use std::collections::BTreeSet;
use std::fmt;
use std::future::Future;
use std::pin::Pin;
use std::task::{Context, Poll};

use futures::stream::{BoxStream, Stream};
use serde::Serialize;
use serde_json::Value;
use tracing::{Instrument, Span};

use super::extractors::{
    ToolCall, extract_agent_config, extract_agent_name, extract_runner_metadata,
    extract_tool_calls, extract_total_tokens,
};
use crate::context::LogContext;
use crate::serialization::to_field_value;
use crate::telemetry::keys::{
    KEY_GEN_AI, KEY_RUNNER, KEY_RUNNER_AGENTS_INVOKED, KEY_RUNNER_TOOL_CALLS_COUNT,
    KEY_RUNNER_TOTAL_TOKENS, KEY_TOOLS, SEVERITY_ERROR,
};

fn run_span(name: &str) -> Span {
    tracing::info_span!(
        "adk.run",
        otel.name = %format!("ADK {name}"),
        otel.status_code = tracing::field::Empty,
        otel.status_message = tracing::field::Empty,
        adk.runner = %name,
    )
}

/// Running totals for one run.
#[derive(Debug, Default, Clone)]
pub struct RunMetrics {
    /// Highest running total reported so far.
    pub total_tokens: u64,
    pub tool_calls: Vec<ToolCall>,
    pub agents_invoked: BTreeSet<String>,
}

#[derive(Serialize)]
struct ToolsBlock<'a> {
    calls: &'a [ToolCall],
    count: usize,
}

impl RunMetrics {
    /// Fold one response (or stream chunk) into the totals.
    pub fn observe(&mut self, chunk: &Value) {
        if let Some(name) = extract_agent_name(chunk) {
            self.agents_invoked.insert(name.to_string());
        }
        if let Some(tokens) = extract_total_tokens(chunk) {
            self.total_tokens = self.total_tokens.max(tokens);
        }
        self.tool_calls.extend(extract_tool_calls(chunk));
    }

    /// Write the totals into `ctx`.
    pub fn write_to(&self, ctx: &LogContext) {
        ctx.add(KEY_RUNNER_TOTAL_TOKENS, self.total_tokens);
        ctx.add(KEY_RUNNER_TOOL_CALLS_COUNT, self.tool_calls.len());
        if !self.agents_invoked.is_empty() {
            ctx.add(KEY_RUNNER_AGENTS_INVOKED, &self.agents_invoked);
        }
        if !self.tool_calls.is_empty() {
            ctx.add(
                KEY_TOOLS,
                ToolsBlock {
                    calls: &self.tool_calls,
                    count: self.tool_calls.len(),
                },
            );
        }
    }
}

/// Put the runner's agent config under `gen_ai` and the input's identity
/// fields under `adk`. The agent temperature is repeated in `adk` unless the
/// input already carries one.
pub fn prepare_context(ctx: &LogContext, runner: &Value, input: &Value) {
    let config = extract_agent_config(runner);
    if !config.is_empty() {
        ctx.add(KEY_GEN_AI, Value::Object(config));
    }

    let mut meta = extract_runner_metadata(input);
    let temperature = ctx
        .get(KEY_GEN_AI)
        .and_then(|g| g.get("temperature").cloned());
    if let Some(t) = temperature {
        meta.entry("temperature").or_insert(t);
    }
    ctx.add(KEY_RUNNER, Value::Object(meta));
}

fn mark_error<E: fmt::Display + ?Sized>(ctx: &LogContext, span: &Span, err: &E) {
    ctx.record_exception(err);
    span.record("otel.status_code", SEVERITY_ERROR);
    span.record("otel.status_message", tracing::field::display(err));
    tracing::error!(error = %err, "runner failed");
}

/// Run `fut` inside an `ADK {name}` span with the log context prepared from
/// `runner` and `input`. On success the result's tokens, tool calls and agent
/// are recorded; on failure the error is recorded and returned as is.
pub async fn instrument_run<R, I, F, T, E>(
    ctx: &LogContext,
    name: &str,
    runner: &R,
    input: &I,
    fut: F,
) -> Result<T, E>
where
    R: Serialize + ?Sized,
    I: Serialize + ?Sized,
    F: Future<Output = Result<T, E>>,
    T: Serialize,
    E: fmt::Display,
{
    let span = run_span(name);
    let runner = to_field_value(runner);
    let input = to_field_value(input);
    span.in_scope(|| prepare_context(ctx, &runner, &input));

    match fut.instrument(span.clone()).await {
        Ok(out) => {
            span.in_scope(|| {
                let mut metrics = RunMetrics::default();
                metrics.observe(&to_field_value(&out));
                metrics.write_to(ctx);
                ctx.mirror_all();
            });
            Ok(out)
        }
        Err(err) => {
            span.in_scope(|| {
                mark_error(ctx, &span, &err);
                ctx.mirror_all();
            });
            Err(err)
        }
    }
}

/// Per-run state shared by the stream and iterator wrappers. Finalizes on
/// drop if the consumer stops early.
struct RunState {
    ctx: LogContext,
    span: Span,
    metrics: RunMetrics,
    finished: bool,
}

impl RunState {
    fn start(ctx: &LogContext, name: &str, runner: &Value, input: &Value) -> Self {
        let span = run_span(name);
        span.in_scope(|| prepare_context(ctx, runner, input));
        Self {
            ctx: ctx.clone(),
            span,
            metrics: RunMetrics::default(),
            finished: false,
        }
    }

    fn observe<T: Serialize>(&mut self, item: &T) {
        self.metrics.observe(&to_field_value(item));
    }

    fn finish(&mut self) {
        if std::mem::replace(&mut self.finished, true) {
            return;
        }
        let _entered = self.span.enter();
        self.metrics.write_to(&self.ctx);
        self.ctx.mirror_all();
    }
}

impl Drop for RunState {
    fn drop(&mut self) {
        self.finish();
    }
}

/// Stream returned by [`instrument_stream`].
pub struct InstrumentedStream<T> {
    inner: BoxStream<'static, T>,
    state: RunState,
}

impl<T> fmt::Debug for InstrumentedStream<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("InstrumentedStream")
            .field("metrics", &self.state.metrics)
            .field("finished", &self.state.finished)
            .finish_non_exhaustive()
    }
}

impl<T> InstrumentedStream<T> {
    /// Totals observed so far.
    pub fn metrics(&self) -> &RunMetrics {
        &self.state.metrics
    }
}

impl<T: Serialize> Stream for InstrumentedStream<T> {
    type Item = T;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<T>> {
        match self.inner.as_mut().poll_next(cx) {
            Poll::Ready(Some(item)) => {
                self.state.observe(&item);
                Poll::Ready(Some(item))
            }
            Poll::Ready(None) => {
                self.state.finish();
                Poll::Ready(None)
            }
            Poll::Pending => Poll::Pending,
        }
    }
}

/// Wrap a streaming run. Each chunk updates the running totals; the totals
/// are written once the stream ends or is dropped.
pub fn instrument_stream<R, I, S>(
    ctx: &LogContext,
    name: &str,
    runner: &R,
    input: &I,
    stream: S,
) -> InstrumentedStream<S::Item>
where
    R: Serialize + ?Sized,
    I: Serialize + ?Sized,
    S: Stream + Send + 'static,
    S::Item: Serialize,
{
    let state = RunState::start(ctx, name, &to_field_value(runner), &to_field_value(input));
    let inner = tracing_futures::Instrument::instrument(stream, state.span.clone());
    InstrumentedStream {
        inner: Box::pin(inner),
        state,
    }
}

/// Iterator returned by [`instrument_iter`].
pub struct InstrumentedIter<It> {
    inner: It,
    state: RunState,
}

impl<It> fmt::Debug for InstrumentedIter<It> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("InstrumentedIter")
            .field("metrics", &self.state.metrics)
            .field("finished", &self.state.finished)
            .finish_non_exhaustive()
    }
}

impl<It> InstrumentedIter<It> {
    pub fn metrics(&self) -> &RunMetrics {
        &self.state.metrics
    }
}

impl<It> Iterator for InstrumentedIter<It>
where
    It: Iterator,
    It::Item: Serialize,
{
    type Item = It::Item;

    fn next(&mut self) -> Option<It::Item> {
        let next = self.state.span.in_scope(|| self.inner.next());
        match next {
            Some(item) => {
                self.state.observe(&item);
                Some(item)
            }
            None => {
                self.state.finish();
                None
            }
        }
    }
}

/// Synchronous counterpart of [`instrument_stream`].
pub fn instrument_iter<R, I, It>(
    ctx: &LogContext,
    name: &str,
    runner: &R,
    input: &I,
    iter: It,
) -> InstrumentedIter<It::IntoIter>
where
    R: Serialize + ?Sized,
    I: Serialize + ?Sized,
    It: IntoIterator,
    It::Item: Serialize,
{
    InstrumentedIter {
        state: RunState::start(ctx, name, &to_field_value(runner), &to_field_value(input)),
        inner: iter.into_iter(),
    }
}
