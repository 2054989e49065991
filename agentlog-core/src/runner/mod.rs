//! Agent runner integration: duck-typed metadata probes and run wrappers.

pub mod extractors;
pub mod instrumentation;

pub use extractors::{
    ToolCall, extract_agent_config, extract_agent_name, extract_runner_metadata,
    extract_tool_calls, extract_total_tokens,
};
pub use instrumentation::{
    InstrumentedIter, InstrumentedStream, RunMetrics, instrument_iter, instrument_run,
    instrument_stream, prepare_context,
};
