//! GCP project id discovery for trace correlation.
//!
//! Resolution order: explicit config, `GOOGLE_CLOUD_PROJECT`, then the GCE
//! metadata server. Off GCP the metadata probe fails fast and yields `None`.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;

use crate::config::GcpCfg;
use crate::error::{AgentLogError, CoreResult};

pub const PROJECT_ENV_VAR: &str = "GOOGLE_CLOUD_PROJECT";
pub const PROJECT_ID_PATH: &str = "/computeMetadata/v1/project/project-id";

#[async_trait]
pub trait ProjectIdSource: Send + Sync {
    fn name(&self) -> &str;
    /// The project id, or `None` when this source has nothing to say.
    async fn project_id(&self) -> Option<String>;
}

/// Reads the project from an environment variable.
#[derive(Debug, Clone)]
pub struct EnvProjectSource {
    var: String,
}

impl Default for EnvProjectSource {
    fn default() -> Self {
        Self::with_var(PROJECT_ENV_VAR)
    }
}

impl EnvProjectSource {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_var(var: impl Into<String>) -> Self {
        Self { var: var.into() }
    }
}

#[async_trait]
impl ProjectIdSource for EnvProjectSource {
    fn name(&self) -> &str {
        "env"
    }

    async fn project_id(&self) -> Option<String> {
        std::env::var(&self.var).ok().filter(|v| !v.is_empty())
    }
}

/// Asks the GCE metadata server.
#[derive(Debug, Clone)]
pub struct MetadataServerSource {
    inner: Client,
    base_url: String,
}

impl MetadataServerSource {
    pub fn new(base_url: impl Into<String>, timeout: Duration) -> CoreResult<Self> {
        let inner = Client::builder()
            .connect_timeout(timeout)
            .timeout(timeout)
            .build()
            .map_err(|e| AgentLogError::Other(anyhow::anyhow!("http client build failed: {e}")))?;
        Ok(Self {
            inner,
            base_url: base_url.into().trim_end_matches('/').to_string(),
        })
    }

    pub fn from_config(cfg: &GcpCfg) -> CoreResult<Self> {
        Self::new(
            cfg.metadata_url.clone(),
            Duration::from_millis(cfg.metadata_timeout_ms),
        )
    }
}

#[async_trait]
impl ProjectIdSource for MetadataServerSource {
    fn name(&self) -> &str {
        "metadata-server"
    }

    async fn project_id(&self) -> Option<String> {
        let url = format!("{}{}", self.base_url, PROJECT_ID_PATH);
        let resp = match self
            .inner
            .get(&url)
            .header("Metadata-Flavor", "Google")
            .send()
            .await
        {
            Ok(r) => r,
            Err(e) => {
                tracing::debug!(error = %e, "metadata server unreachable");
                return None;
            }
        };
        if !resp.status().is_success() {
            tracing::debug!(status = resp.status().as_u16(), "metadata server refused project id");
            return None;
        }
        let body = resp.text().await.ok()?;
        let id = body.trim();
        (!id.is_empty()).then(|| id.to_string())
    }
}

/// First id any source reports, in order.
pub async fn first_project_id(sources: &[&dyn ProjectIdSource]) -> Option<String> {
    for source in sources {
        if let Some(id) = source.project_id().await {
            tracing::debug!(source = source.name(), project_id = %id, "resolved project id");
            return Some(id);
        }
    }
    None
}

/// Resolve the project id for `cfg`. Never fails: any discovery problem
/// means "no project".
pub async fn detect_project_id(cfg: &GcpCfg) -> Option<String> {
    if let Some(id) = cfg.project_id.as_ref().filter(|p| !p.is_empty()) {
        return Some(id.clone());
    }
    if !cfg.detect {
        return None;
    }
    let env = EnvProjectSource::new();
    match MetadataServerSource::from_config(cfg) {
        Ok(server) => {
            let sources: [&dyn ProjectIdSource; 2] = [&env, &server];
            first_project_id(&sources).await
        }
        Err(e) => {
            tracing::warn!(error = %e, "metadata client unavailable; using env only");
            first_project_id(&[&env as &dyn ProjectIdSource]).await
        }
    }
}
