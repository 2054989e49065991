//! Tracing and OpenTelemetry wiring.
//! Nothing is installed until `init_telemetry` is called; without it spans are
//! no-ops and mirrored attributes are dropped.

pub mod keys;
pub mod sanitizer;
#[cfg(test)]
pub mod test_span;

pub use keys::*;
pub use sanitizer::SanitizingProcessor;

use once_cell::sync::OnceCell;
use opentelemetry::global;
use opentelemetry::trace::TracerProvider as _;
use opentelemetry_sdk::Resource;
use opentelemetry_sdk::trace::SdkTracerProvider;
use tracing_subscriber::fmt::format::FmtSpan;
use tracing_subscriber::prelude::*;
use tracing_subscriber::{EnvFilter, fmt};

use crate::config::TelemetryCfg;
use crate::error::{AgentLogError, CoreResult};

static INSTALLED: OnceCell<()> = OnceCell::new();

/// Keeps the tracer provider alive; flushes and shuts it down on drop.
#[derive(Debug)]
pub struct TelemetryGuard {
    provider: SdkTracerProvider,
}

impl TelemetryGuard {
    pub fn provider(&self) -> &SdkTracerProvider {
        &self.provider
    }
}

impl Drop for TelemetryGuard {
    fn drop(&mut self) {
        if let Err(e) = self.provider.shutdown() {
            eprintln!("agentlog: tracer provider shutdown failed: {e}");
        }
    }
}

#[cfg(feature = "otlp")]
fn otlp_processor(
    endpoint: &str,
    blocklist: &[String],
) -> CoreResult<SanitizingProcessor<opentelemetry_sdk::trace::BatchSpanProcessor>> {
    use opentelemetry_otlp::WithExportConfig;

    let exporter = opentelemetry_otlp::SpanExporter::builder()
        .with_http()
        .with_endpoint(endpoint)
        .build()
        .map_err(|e| AgentLogError::Telemetry(format!("otlp exporter: {e}")))?;
    let batch = opentelemetry_sdk::trace::BatchSpanProcessor::builder(exporter).build();
    Ok(SanitizingProcessor::with_blocklist(batch, blocklist.iter().cloned()))
}

/// Tracer provider for `cfg`: service resource plus, with the `otlp`
/// feature and an endpoint, a sanitized batch exporter.
pub fn build_tracer_provider(cfg: &TelemetryCfg) -> CoreResult<SdkTracerProvider> {
    let resource = Resource::builder()
        .with_service_name(cfg.service_name.clone())
        .build();
    let builder = SdkTracerProvider::builder().with_resource(resource);

    #[cfg(feature = "otlp")]
    let builder = match cfg.otlp_endpoint.as_deref() {
        Some(endpoint) => {
            builder.with_span_processor(otlp_processor(endpoint, &cfg.blocked_attributes)?)
        }
        None => builder,
    };
    #[cfg(not(feature = "otlp"))]
    if cfg.otlp_endpoint.is_some() {
        tracing::warn!("otlp_endpoint is set but agentlog was built without the `otlp` feature");
    }

    Ok(builder.build())
}

fn env_filter(cfg: &TelemetryCfg) -> CoreResult<EnvFilter> {
    match cfg.filter.as_deref() {
        Some(directive) => EnvFilter::try_new(directive)
            .map_err(|e| AgentLogError::Telemetry(format!("bad filter {directive:?}: {e}"))),
        None => Ok(EnvFilter::try_from_default_env()
            .unwrap_or_else(|_| EnvFilter::new(&cfg.level))),
    }
}

fn install(cfg: &TelemetryCfg) -> CoreResult<SdkTracerProvider> {
    let filter = env_filter(cfg)?;
    let provider = build_tracer_provider(cfg)?;
    let tracer = provider.tracer(LOG_TARGET);

    let span_events = if cfg.console_tracing {
        FmtSpan::CLOSE
    } else {
        FmtSpan::NONE
    };
    // stdout belongs to emitted records
    let fmt_layer = fmt::layer()
        .with_writer(std::io::stderr)
        .with_target(true)
        .with_span_events(span_events);
    let fmt_layer = if cfg.json {
        fmt_layer.json().boxed()
    } else {
        fmt_layer.boxed()
    };

    tracing_subscriber::registry()
        .with(filter)
        .with(tracing_opentelemetry::layer().with_tracer(tracer))
        .with(fmt_layer)
        .try_init()
        .map_err(|e| AgentLogError::Telemetry(e.to_string()))?;

    global::set_tracer_provider(provider.clone());
    Ok(provider)
}

/// Install the global subscriber (filter, console output, OpenTelemetry
/// bridge) and the global tracer provider. Succeeds once per process; a
/// failed attempt leaves nothing installed and may be retried.
pub fn init_telemetry(cfg: &TelemetryCfg) -> CoreResult<TelemetryGuard> {
    let mut installed = None;
    INSTALLED.get_or_try_init(|| {
        installed = Some(install(cfg)?);
        Ok::<_, AgentLogError>(())
    })?;
    let provider = installed
        .ok_or_else(|| AgentLogError::Telemetry("telemetry already initialized".into()))?;

    tracing::debug!(service = %cfg.service_name, "telemetry initialized");
    Ok(TelemetryGuard { provider })
}
