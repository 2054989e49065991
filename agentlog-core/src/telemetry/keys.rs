/// Log/span keys written by agentlog.
/// Keep these stable; changing them is a breaking change for dashboards.
pub const KEY_SEVERITY: &str = "severity";
pub const KEY_TIMESTAMP: &str = "timestamp";
pub const KEY_MESSAGE: &str = "message";
pub const KEY_ERROR: &str = "error";

pub const SEVERITY_INFO: &str = "INFO";
pub const SEVERITY_ERROR: &str = "ERROR";

/// Cloud Logging correlation fields; kept flat in the bucket.
pub const KEY_GCP_TRACE: &str = "logging.googleapis.com/trace";
pub const KEY_GCP_SPAN_ID: &str = "logging.googleapis.com/spanId";

pub const KEY_HTTP_METHOD: &str = "http.method";
pub const KEY_HTTP_PATH: &str = "http.path";
pub const KEY_HTTP_STATUS: &str = "http.status";
pub const KEY_HTTP_DURATION_MS: &str = "http.duration_ms";

/// Agent configuration block (model, temperature, agent name).
pub const KEY_GEN_AI: &str = "gen_ai";
/// Runner metadata and per-run metrics.
pub const KEY_RUNNER: &str = "adk";
pub const KEY_RUNNER_TOTAL_TOKENS: &str = "adk.total_tokens";
pub const KEY_RUNNER_TOOL_CALLS_COUNT: &str = "adk.tool_calls_count";
pub const KEY_RUNNER_AGENTS_INVOKED: &str = "adk.agents_invoked";
pub const KEY_TOOLS: &str = "tools";

/// Noisy payload attributes stripped from spans by default.
pub const VERTEX_LLM_REQUEST: &str = "gcp.vertex.agent.llm_request";
pub const VERTEX_LLM_RESPONSE: &str = "gcp.vertex.agent.llm_response";

/// Message attached to per-request records.
pub const REQUEST_MESSAGE: &str = "Request processed";

/// `tracing` target used by [`crate::emit::TracingSink`].
pub const LOG_TARGET: &str = "agentlog";
