//! Interfaces to the external collaborators the pipeline drives.
//!
//! The orchestrator never talks to an engine, a job store or an artifact
//! store directly; it goes through these traits so the transport can be
//! swapped (HTTP adapters in `reelforge-client`, fakes in tests).

use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;

use reelforge_core::escalation::EscalationMode;
use reelforge_core::job::JobFact;
use reelforge_core::pipeline_error::{ErrorType, PipelineError, STAGE_SUBMISSION};
use reelforge_core::types::{EngineId, JobId};

use crate::reconciler::FactSink;

// ---------------------------------------------------------------------------
// Generation submission
// ---------------------------------------------------------------------------

/// One generation attempt handed to the submission collaborator.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SubmissionRequest {
    pub job_id: JobId,
    pub engine_id: EngineId,
    /// Escalation mode; `None` for the initial submission.
    pub mode: Option<EscalationMode>,
    /// Ask the engine for its reduced feature set.
    pub safe_mode: bool,
    /// Passed through unchanged from the original request.
    pub requested_config: serde_json::Value,
}

/// Structured answer from the submission collaborator.
#[derive(Debug, Clone, PartialEq)]
pub enum SubmissionResponse {
    Accepted,
    Rejected(PipelineError),
}

/// Synchronous submission failure: the request never got a structured answer.
#[derive(Debug, Clone, thiserror::Error)]
pub enum SubmitError {
    #[error("Submission transport error: {0}")]
    Transport(String),

    #[error("Submission timed out after {0:?}")]
    Timeout(Duration),
}

impl SubmitError {
    /// Fold into the error recorded on the job.
    pub fn into_pipeline_error(self) -> PipelineError {
        let error_type = match self {
            Self::Transport(_) => ErrorType::EngineError,
            Self::Timeout(_) => ErrorType::TimeoutError,
        };
        PipelineError::new(STAGE_SUBMISSION, error_type, self.to_string())
    }
}

#[async_trait]
pub trait GenerationSubmitter: Send + Sync {
    async fn submit(&self, request: &SubmissionRequest) -> Result<SubmissionResponse, SubmitError>;
}

// ---------------------------------------------------------------------------
// Job store (poll channel)
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, thiserror::Error)]
#[error("Job store fetch failed: {0}")]
pub struct StoreError(pub String);

#[async_trait]
pub trait JobStore: Send + Sync {
    /// Bulk fetch by id. Ids the store does not know are simply absent.
    async fn fetch_statuses(&self, ids: &[JobId]) -> Result<Vec<JobFact>, StoreError>;
}

// ---------------------------------------------------------------------------
// Artifact store
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, thiserror::Error)]
#[error("Artifact probe failed: {0}")]
pub struct ProbeError(pub String);

#[async_trait]
pub trait ArtifactProber: Send + Sync {
    /// Whether the artifact exists and is of an acceptable content kind.
    async fn probe(&self, url: &str) -> Result<bool, ProbeError>;
}

// ---------------------------------------------------------------------------
// Push channel
// ---------------------------------------------------------------------------

#[async_trait]
pub trait PushSource: Send + Sync {
    /// Deliver producer facts into `sink` until `cancel` fires.
    async fn run(&self, sink: FactSink, cancel: CancellationToken);
}
