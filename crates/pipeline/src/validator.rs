//! Readiness validator: confirms a completed job's artifact is actually
//! retrievable before the job is exposed as `ready`.
//!
//! Each job gets its own self-scheduling check loop. A failed check arms
//! the next one through the [`JobScheduler`](crate::scheduler::JobScheduler)
//! after `base_delay * attempt`; the loop ends when a check succeeds, the
//! attempt budget is spent, or the job leaves `validating`. The soft
//! validation window is only reported, never enforced.

use std::collections::HashSet;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use tokio::time::Instant;

use reelforge_core::job::JobPatch;
use reelforge_core::pipeline_error::PipelineError;
use reelforge_core::registry::{MergeOutcome, ValidationCheck};
use reelforge_core::status::ReadinessState;
use reelforge_core::types::JobId;

use crate::context::PipelineContext;
use crate::events::OrchestratorEvent;
use crate::retry::RetryController;

/// Membership of a job in the set of running check loops. Dropping it
/// (loop finished, or its pending timer cancelled) frees the slot.
struct ActiveLoop {
    active: Arc<Mutex<HashSet<JobId>>>,
    job_id: JobId,
}

impl ActiveLoop {
    fn acquire(active: &Arc<Mutex<HashSet<JobId>>>, job_id: &str) -> Option<Self> {
        let inserted = active
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(job_id.to_string());
        inserted.then(|| Self {
            active: Arc::clone(active),
            job_id: job_id.to_string(),
        })
    }
}

impl Drop for ActiveLoop {
    fn drop(&mut self) {
        self.active
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(&self.job_id);
    }
}

/// Soft window for one artifact, on the runtime clock.
struct ValidationWindow {
    artifact_url: String,
    opened_at: Instant,
    reported: bool,
}

/// State carried from one check to the next.
struct CheckLoop {
    job_id: JobId,
    _slot: ActiveLoop,
    window: Option<ValidationWindow>,
}

#[derive(Clone)]
pub struct ReadinessValidator {
    ctx: PipelineContext,
    retry: RetryController,
    active: Arc<Mutex<HashSet<JobId>>>,
}

impl ReadinessValidator {
    pub fn new(ctx: PipelineContext, retry: RetryController) -> Self {
        Self {
            ctx,
            retry,
            active: Arc::new(Mutex::new(HashSet::new())),
        }
    }

    /// Start the check loop for a job that just entered `validating`.
    ///
    /// The first check runs immediately. A no-op when a loop for the job
    /// is already running.
    pub fn start(&self, job_id: &str) -> bool {
        let Some(slot) = ActiveLoop::acquire(&self.active, job_id) else {
            tracing::debug!(job_id, "Validation already running");
            return false;
        };
        tracing::info!(job_id, "Artifact validation started");
        self.schedule(
            CheckLoop {
                job_id: job_id.to_string(),
                _slot: slot,
                window: None,
            },
            Duration::ZERO,
        )
    }

    pub fn is_validating(&self, job_id: &str) -> bool {
        self.active
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .contains(job_id)
    }

    fn schedule(&self, state: CheckLoop, delay: Duration) -> bool {
        let this = self.clone();
        let job_id = state.job_id.clone();
        self.ctx
            .scheduler
            .arm(&job_id, delay, Box::pin(async move { this.check(state).await }))
    }

    async fn check(self, mut state: CheckLoop) {
        let check = match self.ctx.registry.record_validation_check(&state.job_id) {
            Ok(Some(check)) => check,
            Ok(None) => {
                tracing::debug!(job_id = %state.job_id, "Job no longer validating, check loop ended");
                return;
            }
            Err(e) => {
                tracing::debug!(job_id = %state.job_id, error = %e, "Validation check skipped");
                return;
            }
        };

        self.report_window(&mut state, &check);

        let reachable = match self.ctx.collaborators.prober.probe(&check.artifact_url).await {
            Ok(reachable) => reachable,
            Err(e) => {
                tracing::warn!(job_id = %state.job_id, attempt = check.attempt, error = %e, "Artifact probe errored");
                false
            }
        };

        let max_attempts = self.ctx.registry.limits().max_validation_attempts;
        if reachable {
            let patch = JobPatch::new()
                .expecting(ReadinessState::Validating)
                .expecting_artifact(check.artifact_url.clone())
                .state(ReadinessState::Ready)
                .url_validated(true)
                .clear_error();
            if let Some(outcome) = self.settle(&state, patch) {
                tracing::info!(
                    job_id = %state.job_id,
                    attempts = check.attempt,
                    "Artifact validated, job ready",
                );
                self.ctx.events.publish(OrchestratorEvent::JobReady {
                    job_id: outcome.job.id.clone(),
                    artifact_url: check.artifact_url,
                });
            } else {
                self.continue_if_validating(state);
            }
            return;
        }

        if check.attempt >= max_attempts {
            let patch = JobPatch::new()
                .expecting(ReadinessState::Validating)
                .expecting_artifact(check.artifact_url.clone())
                .state(ReadinessState::Failed)
                .url_validated(false)
                .error(PipelineError::artifact_unreachable(&check.artifact_url, check.attempt));
            if let Some(outcome) = self.settle(&state, patch) {
                tracing::error!(
                    job_id = %state.job_id,
                    attempts = check.attempt,
                    url = %check.artifact_url,
                    "Artifact never became retrievable",
                );
                drop(state);
                self.retry.handle_failure(&outcome.job);
            } else {
                self.continue_if_validating(state);
            }
            return;
        }

        let delay = self.ctx.config.validation_base_delay * check.attempt;
        tracing::warn!(
            job_id = %state.job_id,
            attempt = check.attempt,
            max_attempts,
            delay_ms = delay.as_millis() as u64,
            "Artifact not yet retrievable, retrying",
        );
        self.schedule(state, delay);
    }

    /// Apply a final patch. Returns the outcome when the job transitioned.
    fn settle(&self, state: &CheckLoop, patch: JobPatch) -> Option<MergeOutcome> {
        match self.ctx.registry.merge(&state.job_id, patch) {
            Ok(outcome) if outcome.changed => {
                self.ctx.publish_transition(&outcome);
                Some(outcome)
            }
            Ok(_) => None,
            Err(e) => {
                tracing::warn!(job_id = %state.job_id, error = %e, "Failed to record validation result");
                None
            }
        }
    }

    /// The result was for an artifact the job no longer points at; keep
    /// checking the new one if the job is still validating.
    fn continue_if_validating(&self, state: CheckLoop) {
        let still_validating = self
            .ctx
            .registry
            .get(&state.job_id)
            .is_some_and(|job| job.readiness_state == ReadinessState::Validating);
        if still_validating {
            tracing::debug!(job_id = %state.job_id, "Artifact replaced during check, rechecking");
            self.schedule(state, Duration::ZERO);
        }
    }

    fn report_window(&self, state: &mut CheckLoop, check: &ValidationCheck) {
        // A replaced artifact opens a fresh window.
        let stale = state
            .window
            .as_ref()
            .map_or(true, |w| w.artifact_url != check.artifact_url);
        if stale {
            state.window = Some(ValidationWindow {
                artifact_url: check.artifact_url.clone(),
                opened_at: Instant::now(),
                reported: false,
            });
        }
        let Some(window) = state.window.as_mut() else {
            return;
        };
        if window.reported {
            return;
        }
        let elapsed = window.opened_at.elapsed();
        if elapsed < self.ctx.config.validation_window {
            return;
        }
        window.reported = true;
        tracing::warn!(
            job_id = %state.job_id,
            elapsed_secs = elapsed.as_secs(),
            attempts = check.attempt,
            "Validation window exceeded, continuing until attempts are spent",
        );
        self.ctx.events.publish(OrchestratorEvent::ValidationWindowExceeded {
            job_id: state.job_id.clone(),
            elapsed_secs: elapsed.as_secs(),
            attempts: check.attempt,
        });
    }
}
