//! In-process event stream backed by a `tokio::sync::broadcast` channel.
//!
//! [`EventBus`] fans out [`OrchestratorEvent`]s to any number of
//! observers. It is cheap to clone; every clone publishes into the same
//! channel.

use serde::Serialize;
use tokio::sync::broadcast;

use reelforge_core::escalation::EscalationMode;
use reelforge_core::pipeline_error::PipelineError;
use reelforge_core::status::ReadinessState;
use reelforge_core::types::{CampaignId, EngineId, JobId};

// ---------------------------------------------------------------------------
// OrchestratorEvent
// ---------------------------------------------------------------------------

/// Something observable that happened to a job or to the pipeline.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum OrchestratorEvent {
    JobSubmitted {
        job_id: JobId,
        engine_id: EngineId,
        campaign_id: Option<CampaignId>,
    },
    JobStateChanged {
        job_id: JobId,
        from: ReadinessState,
        to: ReadinessState,
    },
    /// The artifact passed its retrievability check.
    JobReady { job_id: JobId, artifact_url: String },
    JobFailed {
        job_id: JobId,
        attempt_count: u32,
        error: Option<PipelineError>,
    },
    JobResubmitted {
        job_id: JobId,
        attempt: u32,
        mode: EscalationMode,
        engine_id: EngineId,
    },
    /// Permanent failure: no further automatic retry will be scheduled.
    RetriesExhausted { job_id: JobId, attempts: u32 },
    /// The poller hit its consecutive failure budget.
    PollDegraded {
        consecutive_failures: u32,
        last_error: String,
    },
    /// Validation is still running past its soft window.
    ValidationWindowExceeded {
        job_id: JobId,
        elapsed_secs: u64,
        attempts: u32,
    },
}

impl OrchestratorEvent {
    /// The job this event is about, if any.
    pub fn job_id(&self) -> Option<&str> {
        match self {
            Self::JobSubmitted { job_id, .. }
            | Self::JobStateChanged { job_id, .. }
            | Self::JobReady { job_id, .. }
            | Self::JobFailed { job_id, .. }
            | Self::JobResubmitted { job_id, .. }
            | Self::RetriesExhausted { job_id, .. }
            | Self::ValidationWindowExceeded { job_id, .. } => Some(job_id),
            Self::PollDegraded { .. } => None,
        }
    }
}

// ---------------------------------------------------------------------------
// EventBus
// ---------------------------------------------------------------------------

/// Default buffer capacity for the broadcast channel.
const DEFAULT_CAPACITY: usize = 1024;

/// Fan-out bus for [`OrchestratorEvent`]s.
///
/// Slow receivers that fall more than the channel capacity behind observe
/// `RecvError::Lagged` and miss the oldest events.
#[derive(Clone)]
pub struct EventBus {
    sender: broadcast::Sender<OrchestratorEvent>,
}

impl EventBus {
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity);
        Self { sender }
    }

    /// Publish to all current subscribers. Dropped when nobody listens.
    pub fn publish(&self, event: OrchestratorEvent) {
        let _ = self.sender.send(event);
    }

    pub fn subscribe(&self) -> broadcast::Receiver<OrchestratorEvent> {
        self.sender.subscribe()
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(DEFAULT_CAPACITY)
    }
}
