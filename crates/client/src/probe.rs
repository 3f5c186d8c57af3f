//! HTTP retrievability probe for generated artifacts.

use async_trait::async_trait;
use reqwest::header::CONTENT_TYPE;

use reelforge_pipeline::{ArtifactProber, ProbeError};

use crate::config::ClientConfig;
use crate::error::ClientError;

/// Content-type prefixes that count as a real artifact rather than an
/// error page.
pub const ACCEPTED_CONTENT_TYPES: &[&str] = &["video/", "image/", "application/octet-stream"];

/// Checks artifacts with a `HEAD` request.
pub struct HttpArtifactProber {
    client: reqwest::Client,
}

impl HttpArtifactProber {
    pub fn new(config: &ClientConfig) -> Result<Self, ClientError> {
        let client = reqwest::Client::builder()
            .timeout(config.probe_timeout)
            .build()?;
        Ok(Self { client })
    }

    pub fn with_client(client: reqwest::Client) -> Self {
        Self { client }
    }
}

#[async_trait]
impl ArtifactProber for HttpArtifactProber {
    /// `Ok(false)` for a non-2xx status or an unexpected content type;
    /// `Err` only when no response arrived at all.
    async fn probe(&self, url: &str) -> Result<bool, ProbeError> {
        let response = self
            .client
            .head(url)
            .send()
            .await
            .map_err(|e| ProbeError(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            tracing::debug!(url, status = status.as_u16(), "Artifact not retrievable yet");
            return Ok(false);
        }

        let content_type = response
            .headers()
            .get(CONTENT_TYPE)
            .and_then(|value| value.to_str().ok())
            .unwrap_or_default();
        let retrievable = is_artifact_content_type(content_type);
        if !retrievable {
            tracing::debug!(url, content_type, "Artifact served with unexpected content type");
        }
        Ok(retrievable)
    }
}

/// Whether `content_type` identifies media or an opaque binary.
pub fn is_artifact_content_type(content_type: &str) -> bool {
    let content_type = content_type.trim().to_ascii_lowercase();
    ACCEPTED_CONTENT_TYPES
        .iter()
        .any(|prefix| content_type.starts_with(prefix))
}
