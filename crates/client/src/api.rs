//! REST client for the engine API.
//!
//! Wraps the two endpoints the orchestrator needs using [`reqwest`]:
//!
//! - `POST {base}/generations`: submit one attempt. The body is a
//!   [`SubmissionRequest`]; the reply is `{"accepted": true}` or
//!   `{"accepted": false, "pipeline_error": {...}}`.
//! - `POST {base}/jobs/status`: bulk status fetch. The body is
//!   `{"ids": [...]}`; the reply is `{"jobs": [JobFact, ...]}`.

use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use reelforge_core::job::JobFact;
use reelforge_core::pipeline_error::{ErrorType, PipelineError, STAGE_SUBMISSION};
use reelforge_core::types::JobId;
use reelforge_pipeline::{
    GenerationSubmitter, JobStore, StoreError, SubmissionRequest, SubmissionResponse, SubmitError,
};

use crate::config::ClientConfig;
use crate::error::ClientError;

/// Reply body of `POST /generations`.
#[derive(Debug, Clone, Deserialize)]
pub struct GenerationReply {
    #[serde(default)]
    pub accepted: bool,
    #[serde(default)]
    pub pipeline_error: Option<PipelineError>,
}

impl GenerationReply {
    pub fn into_response(self) -> SubmissionResponse {
        match (self.accepted, self.pipeline_error) {
            (_, Some(error)) => SubmissionResponse::Rejected(error),
            (true, None) => SubmissionResponse::Accepted,
            (false, None) => SubmissionResponse::Rejected(PipelineError::new(
                STAGE_SUBMISSION,
                ErrorType::EngineError,
                "Engine declined the submission without a reason",
            )),
        }
    }
}

#[derive(Debug, Serialize)]
struct StatusQuery<'a> {
    ids: &'a [JobId],
}

#[derive(Debug, Deserialize)]
struct StatusReply {
    #[serde(default)]
    jobs: Vec<JobFact>,
}

/// HTTP client for one engine API deployment.
pub struct EngineApi {
    client: reqwest::Client,
    base_url: String,
    request_timeout: Duration,
}

impl EngineApi {
    /// Create a client with the configured request timeout.
    ///
    /// * `base_url` - e.g. `https://engines.internal/api`; a trailing
    ///   slash is ignored.
    pub fn new(base_url: impl Into<String>, config: &ClientConfig) -> Result<Self, ClientError> {
        let client = reqwest::Client::builder()
            .timeout(config.request_timeout)
            .build()?;
        Ok(Self::with_client(client, base_url, config.request_timeout))
    }

    /// Reuse an existing [`reqwest::Client`] for connection pooling.
    pub fn with_client(
        client: reqwest::Client,
        base_url: impl Into<String>,
        request_timeout: Duration,
    ) -> Self {
        let base_url = base_url.into().trim_end_matches('/').to_string();
        Self {
            client,
            base_url,
            request_timeout,
        }
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// Submit one generation attempt.
    ///
    /// A 4xx reply that carries a `pipeline_error` is a structured
    /// rejection, not a transport failure.
    pub async fn submit_generation(
        &self,
        request: &SubmissionRequest,
    ) -> Result<SubmissionResponse, ClientError> {
        let response = self
            .client
            .post(format!("{}/generations", self.base_url))
            .json(request)
            .send()
            .await?;

        let status = response.status();
        if status.is_client_error() {
            let body = response
                .text()
                .await
                .unwrap_or_else(|_| "<unreadable body>".to_string());
            return match serde_json::from_str::<GenerationReply>(&body) {
                Ok(GenerationReply {
                    pipeline_error: Some(error),
                    ..
                }) => Ok(SubmissionResponse::Rejected(error)),
                _ => Err(ClientError::Api {
                    status: status.as_u16(),
                    body,
                }),
            };
        }

        let reply: GenerationReply = Self::parse_response(response).await?;
        Ok(reply.into_response())
    }

    /// Fetch current producer facts for `ids`.
    pub async fn fetch_status(&self, ids: &[JobId]) -> Result<Vec<JobFact>, ClientError> {
        let response = self
            .client
            .post(format!("{}/jobs/status", self.base_url))
            .json(&StatusQuery { ids })
            .send()
            .await?;

        let reply: StatusReply = Self::parse_response(response).await?;
        Ok(reply.jobs)
    }

    // ---- private helpers ----

    /// Ensure the response has a success status code. Returns the
    /// response unchanged on success, or a [`ClientError::Api`] with the
    /// status and body text on failure.
    async fn ensure_success(response: reqwest::Response) -> Result<reqwest::Response, ClientError> {
        let status = response.status();
        if !status.is_success() {
            let body = response
                .text()
                .await
                .unwrap_or_else(|_| "<unreadable body>".to_string());
            return Err(ClientError::Api {
                status: status.as_u16(),
                body,
            });
        }
        Ok(response)
    }

    async fn parse_response<T: serde::de::DeserializeOwned>(
        response: reqwest::Response,
    ) -> Result<T, ClientError> {
        let response = Self::ensure_success(response).await?;
        let bytes = response.bytes().await?;
        serde_json::from_slice(&bytes).map_err(|e| ClientError::InvalidResponse(e.to_string()))
    }
}

#[async_trait]
impl GenerationSubmitter for EngineApi {
    async fn submit(&self, request: &SubmissionRequest) -> Result<SubmissionResponse, SubmitError> {
        self.submit_generation(request).await.map_err(|e| {
            if e.is_timeout() {
                SubmitError::Timeout(self.request_timeout)
            } else {
                SubmitError::Transport(e.to_string())
            }
        })
    }
}

#[async_trait]
impl JobStore for EngineApi {
    async fn fetch_statuses(&self, ids: &[JobId]) -> Result<Vec<JobFact>, StoreError> {
        self.fetch_status(ids)
            .await
            .map_err(|e| StoreError(e.to_string()))
    }
}
