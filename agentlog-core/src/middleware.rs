//! Per-request logging for `http`-based tower services (axum, hyper, tonic).
//!
//! Each request runs in a fresh context scope under a `{METHOD} {path}` span
//! and ends with exactly one emitted record.

use std::fmt;
use std::sync::Arc;
use std::task::{Context, Poll};
use std::time::{Duration, Instant};

use futures::future::BoxFuture;
use http::{Request, Response};
use tower::{Layer, Service};
use tracing::Instrument;

use crate::config::Config;
use crate::context::LogContext;
use crate::emit::{LogSink, sink_for};
use crate::telemetry::keys::{
    KEY_HTTP_DURATION_MS, KEY_HTTP_METHOD, KEY_HTTP_PATH, KEY_HTTP_STATUS, REQUEST_MESSAGE,
    SEVERITY_ERROR,
};

/// Status logged when the inner service fails instead of answering.
const FAILED_STATUS: u16 = 500;

/// Milliseconds, rounded to two decimals.
fn duration_ms(d: Duration) -> f64 {
    (d.as_secs_f64() * 100_000.0).round() / 100.0
}

/// Layer that wraps services in [`RequestLog`].
#[derive(Clone)]
pub struct RequestLogLayer {
    ctx: LogContext,
    sink: Arc<dyn LogSink>,
    project_id: Option<Arc<str>>,
    message: Arc<str>,
}

impl fmt::Debug for RequestLogLayer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RequestLogLayer")
            .field("ctx", &self.ctx)
            .field("project_id", &self.project_id)
            .field("message", &self.message)
            .finish_non_exhaustive()
    }
}

impl RequestLogLayer {
    pub fn new(sink: Arc<dyn LogSink>) -> Self {
        Self {
            ctx: LogContext::new(),
            sink,
            project_id: None,
            message: Arc::from(REQUEST_MESSAGE),
        }
    }

    /// Sink, message, attribute cap and snippet length from `cfg`.
    pub fn from_config(cfg: &Config, project_id: Option<String>) -> Self {
        Self::new(sink_for(cfg.emission.sink))
            .with_context(LogContext::from_config(&cfg.emission))
            .message(cfg.emission.message.clone())
            .project_id(project_id)
    }

    pub fn with_context(mut self, ctx: LogContext) -> Self {
        self.ctx = ctx;
        self
    }

    /// GCP project used to qualify the trace correlation field.
    pub fn project_id(mut self, project_id: Option<String>) -> Self {
        self.project_id = project_id.filter(|p| !p.is_empty()).map(Arc::from);
        self
    }

    pub fn message(mut self, message: impl Into<String>) -> Self {
        self.message = Arc::from(message.into());
        self
    }
}

impl<S> Layer<S> for RequestLogLayer {
    type Service = RequestLog<S>;

    fn layer(&self, inner: S) -> Self::Service {
        RequestLog {
            inner,
            layer: self.clone(),
        }
    }
}

/// Service produced by [`RequestLogLayer`].
#[derive(Clone, Debug)]
pub struct RequestLog<S> {
    inner: S,
    layer: RequestLogLayer,
}

impl<S, ReqBody, ResBody> Service<Request<ReqBody>> for RequestLog<S>
where
    S: Service<Request<ReqBody>, Response = Response<ResBody>> + Clone + Send + 'static,
    S::Future: Send + 'static,
    S::Error: fmt::Display + Send + 'static,
    ReqBody: Send + 'static,
    ResBody: Send + 'static,
{
    type Response = S::Response;
    type Error = S::Error;
    type Future = BoxFuture<'static, Result<S::Response, S::Error>>;

    fn poll_ready(&mut self, cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        self.inner.poll_ready(cx)
    }

    fn call(&mut self, req: Request<ReqBody>) -> Self::Future {
        // The ready service goes into the future; keep a fresh clone for the next call.
        let clone = self.inner.clone();
        let inner = std::mem::replace(&mut self.inner, clone);
        let layer = self.layer.clone();
        Box::pin(LogContext::scope(handle(layer, inner, req)))
    }
}

async fn handle<S, ReqBody, ResBody>(
    layer: RequestLogLayer,
    mut inner: S,
    req: Request<ReqBody>,
) -> Result<Response<ResBody>, S::Error>
where
    S: Service<Request<ReqBody>, Response = Response<ResBody>>,
    S::Error: fmt::Display,
{
    let ctx = &layer.ctx;
    ctx.clear();
    let start = Instant::now();
    let method = req.method().as_str().to_owned();
    let path = req.uri().path().to_owned();

    let span = tracing::info_span!(
        "http.request",
        otel.name = %format!("{method} {path}"),
        otel.kind = "server",
        otel.status_code = tracing::field::Empty,
    );
    span.in_scope(|| {
        ctx.initialize_with_otel(layer.project_id.as_deref());
        ctx.add(KEY_HTTP_METHOD, &method);
        ctx.add(KEY_HTTP_PATH, &path);
    });

    let result = inner.call(req).instrument(span.clone()).await;

    span.in_scope(|| {
        let status = match &result {
            Ok(resp) => resp.status().as_u16(),
            Err(err) => {
                ctx.record_exception(err);
                span.record("otel.status_code", SEVERITY_ERROR);
                tracing::error!(error = %err, "request failed");
                FAILED_STATUS
            }
        };
        ctx.add(KEY_HTTP_STATUS, status);
        ctx.add(KEY_HTTP_DURATION_MS, duration_ms(start.elapsed()));
        ctx.mirror_all();
        ctx.emit(&*layer.sink, Some(&layer.message));
    });
    result
}
