pub mod bucket;
pub mod config;
pub mod context;
pub mod emit;
pub mod error;
pub mod metadata;
pub mod middleware;
pub mod mirror;
pub mod runner;
pub mod serialization;
pub mod telemetry;

pub use context::{ErrorRecord, LogContext, log_ctx};
pub use emit::{LogSink, MemorySink, StdoutSink, TracingSink};
pub use error::{AgentLogError, CoreResult};
pub use middleware::{RequestLog, RequestLogLayer};
pub use mirror::{CurrentSpanMirror, RecordingMirror, SpanMirror};
