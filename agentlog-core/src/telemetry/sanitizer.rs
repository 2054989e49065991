use std::collections::HashSet;
use std::time::Duration;

use opentelemetry::Context;
use opentelemetry_sdk::Resource;
use opentelemetry_sdk::error::OTelSdkResult;
use opentelemetry_sdk::trace::{Span, SpanData, SpanProcessor};

use super::keys::{VERTEX_LLM_REQUEST, VERTEX_LLM_RESPONSE};

/// Span processor that strips blocklisted attributes before handing finished
/// spans to the wrapped processor (usually the exporting one).
///
/// Agent frameworks attach whole LLM request/response payloads to spans; those
/// already land in the log record and only bloat traces.
#[derive(Debug)]
pub struct SanitizingProcessor<P> {
    inner: P,
    blocklist: HashSet<String>,
}

impl<P: SpanProcessor> SanitizingProcessor<P> {
    /// Wrap `inner` with the default Vertex AI payload blocklist.
    pub fn new(inner: P) -> Self {
        Self::with_blocklist(inner, [VERTEX_LLM_REQUEST, VERTEX_LLM_RESPONSE])
    }

    pub fn with_blocklist<I, S>(inner: P, keys: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            inner,
            blocklist: keys.into_iter().map(Into::into).collect(),
        }
    }
}

impl<P: SpanProcessor> SpanProcessor for SanitizingProcessor<P> {
    fn on_start(&self, span: &mut Span, cx: &Context) {
        self.inner.on_start(span, cx);
    }

    fn on_end(&self, mut span: SpanData) {
        if !span.attributes.is_empty() {
            span.attributes
                .retain(|kv| !self.blocklist.contains(kv.key.as_str()));
        }
        self.inner.on_end(span);
    }

    fn force_flush(&self) -> OTelSdkResult {
        self.inner.force_flush()
    }

    fn shutdown_with_timeout(&self, timeout: Duration) -> OTelSdkResult {
        self.inner.shutdown_with_timeout(timeout)
    }

    fn shutdown(&self) -> OTelSdkResult {
        self.inner.shutdown()
    }

    fn set_resource(&mut self, resource: &Resource) {
        self.inner.set_resource(resource);
    }
}
