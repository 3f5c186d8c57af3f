//! Retry/escalation controller.
//!
//! Resubmits failed jobs with the escalation mode for the new attempt
//! number. The per-job retry guard lives in the registry; this module
//! only makes sure it is always released.

use std::sync::Arc;

use futures::future::BoxFuture;
use serde::Serialize;

use reelforge_core::escalation::{plan_attempt, EscalationPlan};
use reelforge_core::job::{GenerationJob, JobPatch};
use reelforge_core::pipeline_error::{ErrorType, PipelineError, STAGE_SUBMISSION};
use reelforge_core::registry::{JobRegistry, RetryClaim};
use reelforge_core::status::ReadinessState;
use reelforge_core::types::JobId;

use crate::collaborators::{GenerationSubmitter, SubmissionRequest, SubmissionResponse};
use crate::context::PipelineContext;
use crate::error::OrchestratorError;
use crate::events::OrchestratorEvent;
use crate::poller::Poller;

// ---------------------------------------------------------------------------
// Outcomes
// ---------------------------------------------------------------------------

/// Result of a single `retry` call.
#[derive(Debug, Clone, PartialEq)]
pub enum RetryOutcome {
    /// The job was resubmitted with this plan.
    Resubmitted(EscalationPlan),
    /// Another retry for the same job is still in flight; nothing was done.
    AlreadyInFlight,
    /// The resubmission itself failed; the job is `failed` again.
    SubmissionFailed(PipelineError),
}

/// Per-job results of a `retry_all_failed` sweep.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct RetrySweep {
    pub resubmitted: Vec<JobId>,
    pub skipped: Vec<JobId>,
    pub failed: Vec<JobId>,
}

impl RetrySweep {
    pub fn attempted(&self) -> usize {
        self.resubmitted.len() + self.skipped.len() + self.failed.len()
    }
}

/// Releases the registry retry guard when dropped, on every exit path.
struct RetryGuard {
    registry: Arc<JobRegistry>,
    job_id: JobId,
}

impl Drop for RetryGuard {
    fn drop(&mut self) {
        self.registry.release_retry(&self.job_id);
    }
}

// ---------------------------------------------------------------------------
// RetryController
// ---------------------------------------------------------------------------

#[derive(Clone)]
pub struct RetryController {
    ctx: PipelineContext,
    poller: Poller,
}

impl RetryController {
    pub fn new(ctx: PipelineContext, poller: Poller) -> Self {
        Self { ctx, poller }
    }

    /// Resubmit a failed job.
    ///
    /// A retry already in flight makes this a no-op. A job at the attempt
    /// ceiling yields `CoreError::MaxRetriesReached`.
    pub async fn retry(&self, job_id: &str) -> Result<RetryOutcome, OrchestratorError> {
        let job = match self.ctx.registry.claim_retry(job_id)? {
            RetryClaim::AlreadyInFlight => {
                tracing::debug!(job_id, "Retry already in flight, skipping");
                return Ok(RetryOutcome::AlreadyInFlight);
            }
            RetryClaim::Claimed(job) => job,
        };
        let guard = RetryGuard {
            registry: Arc::clone(&self.ctx.registry),
            job_id: job.id.clone(),
        };

        // A manual retry supersedes any pending automatic one.
        self.ctx.scheduler.cancel(job_id);
        self.ctx.events.publish(OrchestratorEvent::JobStateChanged {
            job_id: job.id.clone(),
            from: ReadinessState::Failed,
            to: ReadinessState::Processing,
        });

        let plan = match plan_attempt(&self.ctx.policy, &self.ctx.catalog, &job) {
            Ok(plan) => plan,
            Err(e) => {
                let error = PipelineError::new(STAGE_SUBMISSION, ErrorType::ValidationError, e.to_string());
                self.fail_attempt(job_id, ReadinessState::Processing, error);
                return Err(e.into());
            }
        };

        self.ctx.registry.upsert(
            job_id,
            JobPatch::new()
                .expecting(ReadinessState::Processing)
                .engine(plan.engine_id.clone())
                .escalation(plan.mode),
        )?;

        let request = SubmissionRequest {
            job_id: job.id.clone(),
            engine_id: plan.engine_id.clone(),
            mode: Some(plan.mode),
            safe_mode: plan.safe_mode,
            requested_config: job.requested_config.clone(),
        };

        match dispatch(self.ctx.collaborators.submitter.as_ref(), &request).await {
            Ok(()) => {
                tracing::info!(
                    job_id,
                    attempt = plan.attempt,
                    mode = %plan.mode,
                    engine_id = %plan.engine_id,
                    "Job resubmitted",
                );
                self.ctx.events.publish(OrchestratorEvent::JobResubmitted {
                    job_id: job.id.clone(),
                    attempt: plan.attempt,
                    mode: plan.mode,
                    engine_id: plan.engine_id.clone(),
                });
                drop(guard);
                self.poller.ensure_running();
                Ok(RetryOutcome::Resubmitted(plan))
            }
            Err(error) => {
                tracing::error!(
                    job_id,
                    attempt = plan.attempt,
                    error = %error,
                    "Resubmission failed",
                );
                let failed = self.fail_attempt(job_id, ReadinessState::Processing, error.clone());
                // Release before any automatic retry can be armed.
                drop(guard);
                if let Some(job) = failed {
                    self.handle_failure(&job);
                }
                Ok(RetryOutcome::SubmissionFailed(error))
            }
        }
    }

    /// Retry every failed job that still has budget, one at a time.
    pub async fn retry_all_failed(&self) -> RetrySweep {
        let max_attempts = self.ctx.registry.limits().max_attempts;
        let candidates: Vec<JobId> = self
            .ctx
            .registry
            .all()
            .into_iter()
            .filter(|job| job.is_retryable_failure(max_attempts))
            .map(|job| job.id)
            .collect();

        tracing::info!(count = candidates.len(), "Retrying all failed jobs");

        let mut sweep = RetrySweep::default();
        for job_id in candidates {
            match self.retry(&job_id).await {
                Ok(RetryOutcome::Resubmitted(_)) => sweep.resubmitted.push(job_id),
                Ok(RetryOutcome::AlreadyInFlight) => sweep.skipped.push(job_id),
                Ok(RetryOutcome::SubmissionFailed(_)) => sweep.failed.push(job_id),
                Err(e) => {
                    tracing::warn!(job_id = %job_id, error = %e, "Retry skipped");
                    sweep.skipped.push(job_id);
                }
            }
        }
        sweep
    }

    /// React to a job that just entered `failed`.
    ///
    /// Publishes the failure, then either reports the budget as exhausted
    /// or arms an automatic retry when enabled and the error allows it.
    pub fn handle_failure(&self, job: &GenerationJob) {
        self.ctx.events.publish(OrchestratorEvent::JobFailed {
            job_id: job.id.clone(),
            attempt_count: job.attempt_count,
            error: job.last_error.clone(),
        });

        let max_attempts = self.ctx.registry.limits().max_attempts;
        if job.attempt_count >= max_attempts {
            tracing::error!(
                job_id = %job.id,
                attempts = job.attempt_count,
                "Retries exhausted, job failed permanently",
            );
            self.ctx.events.publish(OrchestratorEvent::RetriesExhausted {
                job_id: job.id.clone(),
                attempts: job.attempt_count,
            });
            return;
        }

        if !self.ctx.config.auto_retry {
            return;
        }
        if job.last_error.as_ref().is_some_and(|e| !e.retryable) {
            tracing::info!(job_id = %job.id, "Failure is not retryable, waiting for manual retry");
            return;
        }

        let delay = self.ctx.config.auto_retry_delay;
        if self
            .ctx
            .scheduler
            .arm(&job.id, delay, self.auto_retry_task(job.id.clone()))
        {
            tracing::info!(
                job_id = %job.id,
                next_attempt = job.attempt_count + 1,
                delay_ms = delay.as_millis() as u64,
                "Automatic retry scheduled",
            );
        }
    }

    /// Mark the current attempt failed with `error`, if the job is still in
    /// `expected`. Returns the failed job when the transition happened.
    pub(crate) fn fail_attempt(
        &self,
        job_id: &str,
        expected: ReadinessState,
        error: PipelineError,
    ) -> Option<GenerationJob> {
        let patch = JobPatch::new()
            .expecting(expected)
            .state(ReadinessState::Failed)
            .url_validated(false)
            .error(error);
        match self.ctx.registry.merge(job_id, patch) {
            Ok(outcome) if outcome.entered(ReadinessState::Failed) => {
                self.ctx.publish_transition(&outcome);
                Some(outcome.job)
            }
            Ok(outcome) => {
                tracing::debug!(
                    job_id,
                    state = %outcome.job.readiness_state,
                    "Job moved on before the failure was recorded",
                );
                None
            }
            Err(e) => {
                tracing::warn!(job_id, error = %e, "Failed to record attempt failure");
                None
            }
        }
    }

    fn auto_retry_task(&self, job_id: JobId) -> BoxFuture<'static, ()> {
        let this = self.clone();
        Box::pin(async move {
            if let Err(e) = this.retry(&job_id).await {
                tracing::warn!(job_id = %job_id, error = %e, "Automatic retry not performed");
            }
        })
    }
}

/// Send one attempt to the submission collaborator, folding both failure
/// kinds into a [`PipelineError`].
pub(crate) async fn dispatch(
    submitter: &dyn GenerationSubmitter,
    request: &SubmissionRequest,
) -> Result<(), PipelineError> {
    match submitter.submit(request).await {
        Ok(SubmissionResponse::Accepted) => Ok(()),
        Ok(SubmissionResponse::Rejected(error)) => Err(error),
        Err(e) => Err(e.into_pipeline_error()),
    }
}
