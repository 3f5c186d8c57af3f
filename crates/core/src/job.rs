//! Generation job model and the update shapes that mutate it.
//!
//! A [`GenerationJob`] is only ever changed through the
//! [`JobRegistry`](crate::registry::JobRegistry): producer facts
//! ([`JobFact`]) arrive from the push and poll channels, internal
//! patches ([`JobPatch`]) come from the readiness validator and the
//! retry controller.

use chrono::Utc;
use serde::{Deserialize, Serialize};

use crate::escalation::EscalationMode;
use crate::pipeline_error::PipelineError;
use crate::selector::{ContentShape, SelectionPreferences};
use crate::status::{RawStatus, ReadinessState};
use crate::types::{CampaignId, EngineId, JobId, Revision, Timestamp};

// ---------------------------------------------------------------------------
// GenerationJob
// ---------------------------------------------------------------------------

/// Canonical per-job state held by the registry.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GenerationJob {
    pub id: JobId,
    pub campaign_id: Option<CampaignId>,

    pub raw_status: RawStatus,
    pub readiness_state: ReadinessState,

    /// Only populated once `raw_status` is `completed`.
    pub artifact_url: Option<String>,
    pub thumbnail_url: Option<String>,
    pub duration_seconds: Option<f64>,

    /// True only after a successful retrievability check.
    pub url_validated: bool,
    pub validation_attempts: u32,
    pub validation_started_at: Option<Timestamp>,

    /// Number of re-submissions after the initial one.
    pub attempt_count: u32,
    pub retry_in_flight: bool,
    pub last_error: Option<PipelineError>,

    pub engine_used: EngineId,
    /// Escalation mode of the current attempt; `None` for the initial submission.
    pub escalation_mode: Option<EscalationMode>,

    /// Opaque generation parameters, passed through unchanged on retry.
    pub requested_config: serde_json::Value,
    pub preferences: SelectionPreferences,
    pub shape: ContentShape,

    /// Highest producer revision accepted so far.
    pub revision: Option<Revision>,
    /// Set on resubmission: final facts left over from the previous
    /// attempt are ignored until a fresh fact arrives.
    pub awaiting_fresh_fact: bool,
    /// The value of `revision` when the current attempt was submitted.
    pub resubmitted_at_revision: Option<Revision>,
    /// Artifact of the previous attempt; a `completed` fact naming it again
    /// is a leftover, not news about the current attempt.
    pub previous_artifact_url: Option<String>,

    pub created_at: Timestamp,
    pub updated_at: Timestamp,
}

impl GenerationJob {
    /// Create a freshly submitted job in the `pending` state.
    pub fn new(
        id: impl Into<JobId>,
        engine_used: impl Into<EngineId>,
        requested_config: serde_json::Value,
        preferences: SelectionPreferences,
        shape: ContentShape,
    ) -> Self {
        let now = Utc::now();
        Self {
            id: id.into(),
            campaign_id: None,
            raw_status: RawStatus::Pending,
            readiness_state: ReadinessState::Pending,
            artifact_url: None,
            thumbnail_url: None,
            duration_seconds: None,
            url_validated: false,
            validation_attempts: 0,
            validation_started_at: None,
            attempt_count: 0,
            retry_in_flight: false,
            last_error: None,
            engine_used: engine_used.into(),
            escalation_mode: None,
            requested_config,
            preferences,
            shape,
            revision: None,
            awaiting_fresh_fact: false,
            resubmitted_at_revision: None,
            previous_artifact_url: None,
            created_at: now,
            updated_at: now,
        }
    }

    /// Attach the job to a campaign.
    pub fn with_campaign(mut self, campaign_id: impl Into<CampaignId>) -> Self {
        self.campaign_id = Some(campaign_id.into());
        self
    }

    /// Terminal jobs are `ready`, or `failed` with the retry budget spent.
    pub fn is_terminal(&self, max_attempts: u32) -> bool {
        match self.readiness_state {
            ReadinessState::Ready => true,
            ReadinessState::Failed => self.attempt_count >= max_attempts,
            _ => false,
        }
    }

    /// Whether the job is failed but may still be resubmitted.
    pub fn is_retryable_failure(&self, max_attempts: u32) -> bool {
        self.readiness_state == ReadinessState::Failed && self.attempt_count < max_attempts
    }

    /// Equality ignoring `updated_at`, used to detect no-op merges.
    pub(crate) fn same_state(&self, other: &Self) -> bool {
        let mut a = self.clone();
        a.updated_at = other.updated_at;
        a == *other
    }
}

// ---------------------------------------------------------------------------
// JobFact
// ---------------------------------------------------------------------------

/// A producer-reported snapshot for one job, as delivered by push or poll.
///
/// Every field except `id` is optional: a fact only speaks for the
/// fields it carries.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobFact {
    pub id: JobId,
    #[serde(default)]
    pub raw_status: Option<RawStatus>,
    #[serde(default)]
    pub artifact_url: Option<String>,
    #[serde(default)]
    pub thumbnail_url: Option<String>,
    #[serde(default)]
    pub duration_seconds: Option<f64>,
    /// Monotonic ordering marker from the producer, when it provides one.
    #[serde(default)]
    pub revision: Option<Revision>,
}

impl JobFact {
    pub fn new(id: impl Into<JobId>, raw_status: RawStatus) -> Self {
        Self {
            id: id.into(),
            raw_status: Some(raw_status),
            artifact_url: None,
            thumbnail_url: None,
            duration_seconds: None,
            revision: None,
        }
    }

    pub fn with_artifact(mut self, url: impl Into<String>) -> Self {
        self.artifact_url = Some(url.into());
        self
    }

    pub fn with_thumbnail(mut self, url: impl Into<String>) -> Self {
        self.thumbnail_url = Some(url.into());
        self
    }

    pub fn with_duration(mut self, seconds: f64) -> Self {
        self.duration_seconds = Some(seconds);
        self
    }

    pub fn with_revision(mut self, revision: Revision) -> Self {
        self.revision = Some(revision);
        self
    }
}

// ---------------------------------------------------------------------------
// JobPatch
// ---------------------------------------------------------------------------

/// An internal state change from the validator or retry controller.
///
/// Unlike producer facts, patches bypass revision and progress checks,
/// but are still rejected if the result would break a job invariant.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct JobPatch {
    /// Only apply when the job is currently in this state.
    pub expect_state: Option<ReadinessState>,
    /// Only apply when the job still points at this artifact.
    pub expect_artifact_url: Option<String>,
    pub readiness_state: Option<ReadinessState>,
    pub url_validated: Option<bool>,
    pub validation_attempts: Option<u32>,
    pub last_error: Option<Option<PipelineError>>,
    pub engine_used: Option<EngineId>,
    pub escalation_mode: Option<EscalationMode>,
}

impl JobPatch {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn expecting(mut self, state: ReadinessState) -> Self {
        self.expect_state = Some(state);
        self
    }

    pub fn expecting_artifact(mut self, url: impl Into<String>) -> Self {
        self.expect_artifact_url = Some(url.into());
        self
    }

    pub fn state(mut self, state: ReadinessState) -> Self {
        self.readiness_state = Some(state);
        self
    }

    pub fn url_validated(mut self, validated: bool) -> Self {
        self.url_validated = Some(validated);
        self
    }

    pub fn validation_attempts(mut self, attempts: u32) -> Self {
        self.validation_attempts = Some(attempts);
        self
    }

    pub fn error(mut self, error: PipelineError) -> Self {
        self.last_error = Some(Some(error));
        self
    }

    pub fn clear_error(mut self) -> Self {
        self.last_error = Some(None);
        self
    }

    pub fn engine(mut self, engine_id: impl Into<EngineId>) -> Self {
        self.engine_used = Some(engine_id.into());
        self
    }

    pub fn escalation(mut self, mode: EscalationMode) -> Self {
        self.escalation_mode = Some(mode);
        self
    }
}

/// Anything the registry can merge into a job.
#[derive(Debug, Clone, PartialEq)]
pub enum JobUpdate {
    Fact(JobFact),
    Patch(JobPatch),
}

impl From<JobFact> for JobUpdate {
    fn from(fact: JobFact) -> Self {
        Self::Fact(fact)
    }
}

impl From<JobPatch> for JobUpdate {
    fn from(patch: JobPatch) -> Self {
        Self::Patch(patch)
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
