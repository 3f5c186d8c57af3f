//! In-memory Job Registry and its merge rules.
//!
//! The registry is the single reconciliation point for every job
//! mutation. It is synchronous and performs no I/O; all access goes
//! through one mutex, so a caller on a multi-threaded runtime sees each
//! merge as a critical section.
//!
//! Producer facts are merged with a revision/progress-preferring rule:
//!
//! - a fact with an older revision than the one held is dropped;
//! - a revision decides only when both sides carry one; otherwise the
//!   fact showing more progress wins
//!   (`completed` over `processing`), and a tie between two different
//!   final statuses keeps the one already held;
//! - `ready` and `failed` jobs no longer move on producer facts, so a
//!   late `processing` push can never demote a validated job.
//!
//! Internal patches (validator, retry controller) skip those checks but
//! are rejected if they would break a job invariant.

use std::cmp::Ordering;
use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard, PoisonError};

use chrono::Utc;
use serde::Serialize;

use crate::error::CoreError;
use crate::escalation::DEFAULT_MAX_ATTEMPTS;
use crate::job::{GenerationJob, JobFact, JobPatch, JobUpdate};
use crate::pipeline_error::PipelineError;
use crate::status::{RawStatus, ReadinessState};
use crate::types::{JobId, Timestamp};

/// Default ceiling on retrievability checks per artifact.
pub const DEFAULT_MAX_VALIDATION_ATTEMPTS: u32 = 5;

// ---------------------------------------------------------------------------
// Types
// ---------------------------------------------------------------------------

/// Bounds enforced on every job in the registry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RegistryLimits {
    pub max_attempts: u32,
    pub max_validation_attempts: u32,
}

impl Default for RegistryLimits {
    fn default() -> Self {
        Self {
            max_attempts: DEFAULT_MAX_ATTEMPTS,
            max_validation_attempts: DEFAULT_MAX_VALIDATION_ATTEMPTS,
        }
    }
}

/// Lifecycle of the registry: `init -> active -> disposed`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RegistryLifecycle {
    Initialized,
    Active,
    /// Reads still work for historical display; writes are refused.
    Disposed,
}

/// Why an update left the job untouched.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IgnoreReason {
    /// The fact carries an older revision than the one already accepted.
    StaleRevision,
    /// The fact reports less progress than the job already shows.
    LessProgress,
    /// The job is `ready` or `failed`; only a retry moves it.
    TerminalState,
    /// The fact describes the attempt before the latest resubmission.
    PreviousAttempt,
    /// A patch expected a different readiness state or artifact.
    StateMismatch,
}

/// Result of merging one update into the registry.
#[derive(Debug, Clone)]
pub struct MergeOutcome {
    pub job: GenerationJob,
    pub previous_state: ReadinessState,
    pub changed: bool,
    pub ignored: Option<IgnoreReason>,
}

impl MergeOutcome {
    /// Whether this merge moved the job into `state`.
    pub fn entered(&self, state: ReadinessState) -> bool {
        self.previous_state != state && self.job.readiness_state == state
    }
}

/// Result of trying to take the per-job retry guard.
#[derive(Debug, Clone)]
pub enum RetryClaim {
    /// The guard was taken and the job reset for the new attempt.
    Claimed(GenerationJob),
    /// Another retry already holds the guard.
    AlreadyInFlight,
}

/// A retrievability check that has been counted and should now run.
#[derive(Debug, Clone, PartialEq)]
pub struct ValidationCheck {
    /// 1-based number of this check.
    pub attempt: u32,
    pub artifact_url: String,
    pub started_at: Timestamp,
}

struct Inner {
    lifecycle: RegistryLifecycle,
    jobs: HashMap<JobId, GenerationJob>,
}

// ---------------------------------------------------------------------------
// JobRegistry
// ---------------------------------------------------------------------------

/// Explicitly owned store of generation jobs.
///
/// Create one per orchestrating session and pass it (usually behind an
/// `Arc`) to every component that needs it.
pub struct JobRegistry {
    limits: RegistryLimits,
    inner: Mutex<Inner>,
}

impl JobRegistry {
    pub fn new(limits: RegistryLimits) -> Self {
        Self {
            limits,
            inner: Mutex::new(Inner {
                lifecycle: RegistryLifecycle::Initialized,
                jobs: HashMap::new(),
            }),
        }
    }

    pub fn limits(&self) -> RegistryLimits {
        self.limits
    }

    // ---- lifecycle ----

    pub fn lifecycle(&self) -> RegistryLifecycle {
        self.lock().lifecycle
    }

    /// Move from `initialized` to `active`. Idempotent while active.
    pub fn activate(&self) -> Result<(), CoreError> {
        let mut inner = self.lock();
        match inner.lifecycle {
            RegistryLifecycle::Disposed => Err(CoreError::Disposed),
            _ => {
                inner.lifecycle = RegistryLifecycle::Active;
                Ok(())
            }
        }
    }

    /// Refuse all further writes. Jobs stay readable.
    pub fn dispose(&self) {
        self.lock().lifecycle = RegistryLifecycle::Disposed;
    }

    // ---- reads ----

    pub fn get(&self, id: &str) -> Option<GenerationJob> {
        self.lock().jobs.get(id).cloned()
    }

    /// Every job, oldest first.
    pub fn all(&self) -> Vec<GenerationJob> {
        let mut jobs: Vec<GenerationJob> = self.lock().jobs.values().cloned().collect();
        jobs.sort_by(|a, b| a.created_at.cmp(&b.created_at).then_with(|| a.id.cmp(&b.id)));
        jobs
    }

    pub fn len(&self) -> usize {
        self.lock().jobs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().jobs.is_empty()
    }

    /// Ids of jobs still waiting on the producer, sorted.
    pub fn ids_awaiting_producer(&self) -> Vec<JobId> {
        let mut ids: Vec<JobId> = self
            .lock()
            .jobs
            .values()
            .filter(|j| j.readiness_state.awaits_producer())
            .map(|j| j.id.clone())
            .collect();
        ids.sort();
        ids
    }

    // ---- writes ----

    /// Add a newly submitted job.
    pub fn register(&self, job: GenerationJob) -> Result<GenerationJob, CoreError> {
        let mut inner = self.lock();
        Self::ensure_writable(&inner)?;
        if inner.jobs.contains_key(&job.id) {
            return Err(CoreError::Conflict(format!(
                "Job '{}' is already registered",
                job.id
            )));
        }
        check_invariants(&job, &self.limits)?;
        inner.jobs.insert(job.id.clone(), job.clone());
        Ok(job)
    }

    /// Merge `update` into job `id` and return the resulting job.
    pub fn upsert(
        &self,
        id: &str,
        update: impl Into<JobUpdate>,
    ) -> Result<GenerationJob, CoreError> {
        self.merge(id, update).map(|outcome| outcome.job)
    }

    /// Merge `update` into job `id`, reporting what happened.
    pub fn merge(&self, id: &str, update: impl Into<JobUpdate>) -> Result<MergeOutcome, CoreError> {
        let update = update.into();
        let mut inner = self.lock();
        Self::ensure_writable(&inner)?;
        let job = inner
            .jobs
            .get_mut(id)
            .ok_or_else(|| CoreError::job_not_found(id))?;

        let now = Utc::now();
        let previous_state = job.readiness_state;
        let mut candidate = job.clone();
        let ignored = match &update {
            JobUpdate::Fact(fact) => merge_fact(&mut candidate, fact, now),
            JobUpdate::Patch(patch) => apply_patch(&mut candidate, patch),
        };

        check_invariants(&candidate, &self.limits)?;

        let changed = !candidate.same_state(job);
        if changed {
            candidate.updated_at = now;
            *job = candidate;
        }

        Ok(MergeOutcome {
            job: job.clone(),
            previous_state,
            changed,
            ignored,
        })
    }

    /// Count the next retrievability check for a validating job.
    ///
    /// Returns `None` when the job is not validating, has no artifact, or
    /// has spent its check budget.
    pub fn record_validation_check(&self, id: &str) -> Result<Option<ValidationCheck>, CoreError> {
        let mut inner = self.lock();
        Self::ensure_writable(&inner)?;
        let job = inner
            .jobs
            .get_mut(id)
            .ok_or_else(|| CoreError::job_not_found(id))?;

        if job.readiness_state != ReadinessState::Validating
            || job.validation_attempts >= self.limits.max_validation_attempts
        {
            return Ok(None);
        }
        let Some(url) = job.artifact_url.clone() else {
            return Ok(None);
        };

        let now = Utc::now();
        job.validation_attempts += 1;
        let started_at = *job.validation_started_at.get_or_insert(now);
        job.updated_at = now;

        Ok(Some(ValidationCheck {
            attempt: job.validation_attempts,
            artifact_url: url,
            started_at,
        }))
    }

    /// Take the per-job retry guard and reset the job for a new attempt.
    ///
    /// Checks run in order: an in-flight retry makes this a no-op, a spent
    /// budget is an explicit [`CoreError::MaxRetriesReached`], and only
    /// `failed` jobs can be retried.
    pub fn claim_retry(&self, id: &str) -> Result<RetryClaim, CoreError> {
        let mut inner = self.lock();
        Self::ensure_writable(&inner)?;
        let job = inner
            .jobs
            .get_mut(id)
            .ok_or_else(|| CoreError::job_not_found(id))?;

        if job.retry_in_flight {
            return Ok(RetryClaim::AlreadyInFlight);
        }
        if job.attempt_count >= self.limits.max_attempts {
            return Err(CoreError::MaxRetriesReached {
                job_id: job.id.clone(),
                attempts: job.attempt_count,
            });
        }
        if job.readiness_state != ReadinessState::Failed {
            return Err(CoreError::Conflict(format!(
                "Job '{}' is {}, only failed jobs can be retried",
                job.id, job.readiness_state
            )));
        }

        job.retry_in_flight = true;
        job.attempt_count += 1;
        job.readiness_state = ReadinessState::Processing;
        job.raw_status = RawStatus::Pending;
        job.previous_artifact_url = job.artifact_url.take();
        job.thumbnail_url = None;
        job.duration_seconds = None;
        job.url_validated = false;
        job.validation_attempts = 0;
        job.validation_started_at = None;
        job.last_error = None;
        job.awaiting_fresh_fact = true;
        job.resubmitted_at_revision = job.revision;
        job.updated_at = Utc::now();

        Ok(RetryClaim::Claimed(job.clone()))
    }

    /// Release the retry guard. Works after disposal so a scoped release
    /// always succeeds.
    pub fn release_retry(&self, id: &str) {
        if let Some(job) = self.lock().jobs.get_mut(id) {
            job.retry_in_flight = false;
        }
    }

    /// Remove a terminal job. Non-terminal jobs cannot be removed.
    pub fn remove(&self, id: &str) -> Result<Option<GenerationJob>, CoreError> {
        let mut inner = self.lock();
        Self::ensure_writable(&inner)?;
        match inner.jobs.get(id) {
            None => Ok(None),
            Some(job) if !job.is_terminal(self.limits.max_attempts) => {
                Err(CoreError::Conflict(format!(
                    "Job '{id}' is {} and cannot be removed",
                    job.readiness_state
                )))
            }
            Some(_) => Ok(inner.jobs.remove(id)),
        }
    }

    // ---- private helpers ----

    fn lock(&self) -> MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn ensure_writable(inner: &Inner) -> Result<(), CoreError> {
        if inner.lifecycle == RegistryLifecycle::Disposed {
            return Err(CoreError::Disposed);
        }
        Ok(())
    }
}

impl Default for JobRegistry {
    fn default() -> Self {
        Self::new(RegistryLimits::default())
    }
}

// ---------------------------------------------------------------------------
// Merge rules
// ---------------------------------------------------------------------------

fn merge_fact(job: &mut GenerationJob, fact: &JobFact, now: Timestamp) -> Option<IgnoreReason> {
    if !job.readiness_state.accepts_producer_facts() {
        // Descriptive gaps on a ready job can still be filled.
        if job.readiness_state == ReadinessState::Ready {
            if job.thumbnail_url.is_none() {
                job.thumbnail_url = fact.thumbnail_url.clone();
            }
            if job.duration_seconds.is_none() {
                job.duration_seconds = fact.duration_seconds;
            }
        }
        return Some(IgnoreReason::TerminalState);
    }

    let ordering = match (fact.revision, job.revision) {
        (Some(incoming), Some(held)) => incoming.cmp(&held),
        // Nothing to compare against; progress decides.
        _ => Ordering::Equal,
    };
    if ordering == Ordering::Less {
        return Some(IgnoreReason::StaleRevision);
    }
    let newer = ordering == Ordering::Greater;

    if let Some(incoming) = fact.raw_status {
        if job.awaiting_fresh_fact && is_previous_attempt(job, fact, incoming) {
            return Some(IgnoreReason::PreviousAttempt);
        }
        let current = job.raw_status;
        let accepted =
            newer || incoming == current || incoming.progress_rank() > current.progress_rank();
        if !accepted {
            return Some(IgnoreReason::LessProgress);
        }
        job.raw_status = incoming;
        job.awaiting_fresh_fact = false;
    }

    if job.raw_status == RawStatus::Completed {
        if let Some(url) = &fact.artifact_url {
            if job.artifact_url.as_ref() != Some(url) {
                job.artifact_url = Some(url.clone());
                job.url_validated = false;
                if job.readiness_state == ReadinessState::Validating {
                    // A new artifact gets a fresh check budget.
                    job.validation_attempts = 0;
                    job.validation_started_at = Some(now);
                }
            }
        }
        if fact.thumbnail_url.is_some() {
            job.thumbnail_url = fact.thumbnail_url.clone();
        }
        if fact.duration_seconds.is_some() {
            job.duration_seconds = fact.duration_seconds;
        }
    }

    if let Some(rev) = fact.revision {
        job.revision = Some(job.revision.map_or(rev, |held| held.max(rev)));
    }

    derive_readiness(job, now);
    None
}

/// Whether a final-status fact belongs to the attempt before the latest
/// resubmission rather than the current one.
fn is_previous_attempt(job: &GenerationJob, fact: &JobFact, incoming: RawStatus) -> bool {
    let fresh_revision = match (fact.revision, job.resubmitted_at_revision) {
        (Some(rev), Some(floor)) => rev > floor,
        (Some(_), None) => true,
        (None, _) => false,
    };
    if fresh_revision {
        return false;
    }
    match incoming {
        RawStatus::Failed => true,
        RawStatus::Completed => {
            fact.artifact_url.is_some() && fact.artifact_url == job.previous_artifact_url
        }
        RawStatus::Pending | RawStatus::Processing => false,
    }
}

/// Derive the readiness state from the merged raw facts.
fn derive_readiness(job: &mut GenerationJob, now: Timestamp) {
    let next = match job.raw_status {
        RawStatus::Pending if job.readiness_state == ReadinessState::Pending => {
            ReadinessState::Pending
        }
        RawStatus::Pending | RawStatus::Processing => ReadinessState::Processing,
        RawStatus::Completed if job.artifact_url.is_some() => ReadinessState::Validating,
        // Completed without an artifact is an incomplete fact, not an error.
        RawStatus::Completed => ReadinessState::Processing,
        RawStatus::Failed => ReadinessState::Failed,
    };

    if next == job.readiness_state {
        return;
    }

    match next {
        ReadinessState::Validating => {
            job.validation_attempts = 0;
            job.validation_started_at = Some(now);
            job.url_validated = false;
        }
        ReadinessState::Failed => {
            job.url_validated = false;
            job.last_error = Some(PipelineError::engine_failed(&job.engine_used));
        }
        _ if job.readiness_state == ReadinessState::Validating => {
            job.validation_attempts = 0;
            job.validation_started_at = None;
            job.url_validated = false;
        }
        _ => {}
    }
    job.readiness_state = next;
}

fn apply_patch(job: &mut GenerationJob, patch: &JobPatch) -> Option<IgnoreReason> {
    if let Some(expected) = patch.expect_state {
        if job.readiness_state != expected {
            return Some(IgnoreReason::StateMismatch);
        }
    }
    if let Some(url) = &patch.expect_artifact_url {
        if job.artifact_url.as_ref() != Some(url) {
            return Some(IgnoreReason::StateMismatch);
        }
    }
    if let Some(state) = patch.readiness_state {
        job.readiness_state = state;
    }
    if let Some(validated) = patch.url_validated {
        job.url_validated = validated;
    }
    if let Some(attempts) = patch.validation_attempts {
        job.validation_attempts = attempts;
    }
    if let Some(error) = &patch.last_error {
        job.last_error = error.clone();
    }
    if let Some(engine) = &patch.engine_used {
        job.engine_used = engine.clone();
    }
    if let Some(mode) = patch.escalation_mode {
        job.escalation_mode = Some(mode);
    }
    None
}

fn check_invariants(job: &GenerationJob, limits: &RegistryLimits) -> Result<(), CoreError> {
    if job.readiness_state == ReadinessState::Ready
        && (job.artifact_url.is_none() || !job.url_validated)
    {
        return Err(CoreError::Conflict(format!(
            "Job '{}' cannot be ready without a validated artifact",
            job.id
        )));
    }
    if job.attempt_count > limits.max_attempts {
        return Err(CoreError::Conflict(format!(
            "Job '{}' exceeds {} attempts",
            job.id, limits.max_attempts
        )));
    }
    if job.validation_attempts > limits.max_validation_attempts {
        return Err(CoreError::Conflict(format!(
            "Job '{}' exceeds {} validation attempts",
            job.id, limits.max_validation_attempts
        )));
    }
    Ok(())
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
