use thiserror::Error;

/// Core error type for agentlog.
/// Internally, modules can use `anyhow::Result<T>` for convenience,
/// but public boundaries should expose `CoreResult<T>` with this error.
///
/// Nothing on the request path returns this: recording and emission swallow
/// their own failures. It surfaces from setup (config, telemetry install).
#[derive(Debug, Error)]
pub enum AgentLogError {
    #[error("validation failed: {0}")]
    Validation(String),

    #[error("telemetry setup failed: {0}")]
    Telemetry(String),

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

pub type CoreResult<T> = std::result::Result<T, AgentLogError>;
