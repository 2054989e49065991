use serde::{Deserialize, Serialize};
use std::{fs, path::Path};

use crate::mirror::{DEFAULT_SNIPPET_LEN, MAX_ATTRIBUTE_LEN};
use crate::telemetry::keys::{REQUEST_MESSAGE, VERTEX_LLM_REQUEST, VERTEX_LLM_RESPONSE};

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Eq)]
pub struct TelemetryCfg {
    /// Default level when neither `filter` nor `RUST_LOG` is set.
    #[serde(default = "default_level")]
    pub level: String,
    /// Explicit `EnvFilter` directive; wins over `RUST_LOG`.
    #[serde(default)]
    pub filter: Option<String>,
    /// Emit the process's own diagnostics as JSON instead of text.
    #[serde(default)]
    pub json: bool,
    /// Print span close events (with timings) to the console.
    #[serde(default = "default_true")]
    pub console_tracing: bool,
    #[serde(default = "default_service_name")]
    pub service_name: String,
    /// OTLP/HTTP traces endpoint. Only honoured with the `otlp` feature.
    #[serde(default)]
    pub otlp_endpoint: Option<String>,
    /// Span attributes stripped before export.
    #[serde(default = "default_blocked_attributes")]
    pub blocked_attributes: Vec<String>,
}

impl Default for TelemetryCfg {
    fn default() -> Self {
        Self {
            level: default_level(),
            filter: None,
            json: false,
            console_tracing: true,
            service_name: default_service_name(),
            otlp_endpoint: None,
            blocked_attributes: default_blocked_attributes(),
        }
    }
}

fn default_level() -> String {
    "info".into()
}
fn default_true() -> bool {
    true
}
fn default_service_name() -> String {
    "agentlog".into()
}
fn default_blocked_attributes() -> Vec<String> {
    vec![VERTEX_LLM_REQUEST.into(), VERTEX_LLM_RESPONSE.into()]
}

#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum SinkKind {
    #[default]
    Stdout,
    Tracing,
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Eq)]
pub struct EmissionCfg {
    #[serde(default)]
    pub sink: SinkKind,
    /// `message` field of per-request records.
    #[serde(default = "default_message")]
    pub message: String,
    #[serde(default = "default_max_attribute_len")]
    pub max_attribute_len: usize,
    #[serde(default = "default_snippet_len")]
    pub snippet_len: usize,
}

impl Default for EmissionCfg {
    fn default() -> Self {
        Self {
            sink: SinkKind::default(),
            message: default_message(),
            max_attribute_len: default_max_attribute_len(),
            snippet_len: default_snippet_len(),
        }
    }
}

fn default_message() -> String {
    REQUEST_MESSAGE.into()
}
fn default_max_attribute_len() -> usize {
    MAX_ATTRIBUTE_LEN
}
fn default_snippet_len() -> usize {
    DEFAULT_SNIPPET_LEN
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Eq)]
pub struct GcpCfg {
    /// Fixed project id; skips discovery when set.
    #[serde(default)]
    pub project_id: Option<String>,
    /// Probe env and the metadata server when no project id is configured.
    #[serde(default = "default_true")]
    pub detect: bool,
    #[serde(default = "default_metadata_url")]
    pub metadata_url: String,
    /// Metadata server timeout in milliseconds (default 100ms)
    #[serde(default = "default_metadata_timeout_ms")]
    pub metadata_timeout_ms: u64,
}

impl Default for GcpCfg {
    fn default() -> Self {
        Self {
            project_id: None,
            detect: true,
            metadata_url: default_metadata_url(),
            metadata_timeout_ms: default_metadata_timeout_ms(),
        }
    }
}

fn default_metadata_url() -> String {
    "http://metadata.google.internal".into()
}
fn default_metadata_timeout_ms() -> u64 {
    100
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Eq, Default)]
pub struct Config {
    #[serde(default)]
    pub telemetry: TelemetryCfg,
    #[serde(default)]
    pub emission: EmissionCfg,
    #[serde(default)]
    pub gcp: GcpCfg,
}

impl Config {
    /// Load a Config from a file path (JSON or TOML by extension). If the
    /// extension is missing or unrecognized, try JSON first, then TOML.
    pub fn from_path<P: AsRef<Path>>(path: P) -> crate::error::CoreResult<Self> {
        let path = path.as_ref();
        let bytes = fs::read(path).map_err(crate::error::AgentLogError::from)?;
        let s = std::str::from_utf8(&bytes)
            .map_err(|e| crate::error::AgentLogError::Other(e.into()))?;
        let cfg: Self = match path.extension().and_then(|e| e.to_str()) {
            Some("json") => serde_json::from_str::<Self>(s)
                .map_err(|e| crate::error::AgentLogError::Other(e.into()))?,
            Some("toml") => toml::from_str::<Self>(s)
                .map_err(|e| crate::error::AgentLogError::Other(e.into()))?,
            _ => serde_json::from_str::<Self>(s)
                .map_err(|e| crate::error::AgentLogError::Other(e.into()))
                .or_else(|_| {
                    toml::from_str::<Self>(s)
                        .map_err(|e| crate::error::AgentLogError::Other(e.into()))
                })?,
        };
        cfg.validate()?;
        Ok(cfg)
    }

    fn validate(&self) -> crate::error::CoreResult<()> {
        if self.emission.max_attribute_len == 0 {
            return Err(crate::error::AgentLogError::Validation(
                "emission.max_attribute_len must be positive".into(),
            ));
        }
        Ok(())
    }
}
