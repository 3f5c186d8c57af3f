//! Aggregate status projection over a set of jobs.
//!
//! Pure read: no hidden state, safe to call on every observation tick.

use serde::Serialize;

use crate::job::GenerationJob;
use crate::status::ReadinessState;

/// Campaign-level rollup of job readiness.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
pub struct AggregateStatus {
    pub total: usize,
    pub ready_count: usize,
    /// Jobs still moving: pending, processing or validating.
    pub processing_count: usize,
    pub failed_count: usize,
    /// Failed jobs that still have retry budget left.
    pub retryable_failed_count: usize,
    pub overall_complete: bool,
    /// `round(ready / total * 100)`, 0 for an empty set.
    pub progress_percent: u8,
}

impl AggregateStatus {
    /// Every job is either ready or permanently failed.
    pub fn is_settled(&self) -> bool {
        self.processing_count == 0 && self.retryable_failed_count == 0
    }
}

/// Project `jobs` into an [`AggregateStatus`].
///
/// `max_attempts` decides which failed jobs still count as retryable.
pub fn project(jobs: &[GenerationJob], max_attempts: u32) -> AggregateStatus {
    let mut status = AggregateStatus {
        total: jobs.len(),
        ..AggregateStatus::default()
    };

    for job in jobs {
        match job.readiness_state {
            ReadinessState::Ready => status.ready_count += 1,
            ReadinessState::Failed => {
                status.failed_count += 1;
                if job.is_retryable_failure(max_attempts) {
                    status.retryable_failed_count += 1;
                }
            }
            ReadinessState::Pending | ReadinessState::Processing | ReadinessState::Validating => {
                status.processing_count += 1
            }
        }
    }

    status.overall_complete = status.total > 0 && status.ready_count == status.total;
    status.progress_percent = if status.total == 0 {
        0
    } else {
        (status.ready_count as f64 / status.total as f64 * 100.0).round() as u8
    };
    status
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::selector::{ContentShape, SelectionPreferences};

    fn job_in(state: ReadinessState, attempts: u32) -> GenerationJob {
        let mut job = GenerationJob::new(
            uuid::Uuid::new_v4().to_string(),
            "swift-clip",
            serde_json::json!({}),
            SelectionPreferences::default(),
            ContentShape::new(5.0),
        );
        job.readiness_state = state;
        job.attempt_count = attempts;
        job
    }

    #[test]
    fn half_ready_batch_reports_fifty_percent() {
        let jobs = vec![
            job_in(ReadinessState::Ready, 0),
            job_in(ReadinessState::Ready, 0),
            job_in(ReadinessState::Processing, 0),
            job_in(ReadinessState::Failed, 1),
        ];
        let status = project(&jobs, 4);
        assert_eq!(status.total, 4);
        assert_eq!(status.ready_count, 2);
        assert_eq!(status.processing_count, 1);
        assert_eq!(status.failed_count, 1);
        assert_eq!(status.progress_percent, 50);
        assert!(!status.overall_complete);
        assert!(!status.is_settled());
    }

    #[test]
    fn validating_counts_as_processing() {
        let jobs = vec![
            job_in(ReadinessState::Pending, 0),
            job_in(ReadinessState::Validating, 0),
        ];
        assert_eq!(project(&jobs, 4).processing_count, 2);
    }

    #[test]
    fn empty_set_is_not_complete() {
        let status = project(&[], 4);
        assert_eq!(status.progress_percent, 0);
        assert!(!status.overall_complete);
    }

    #[test]
    fn all_ready_is_complete() {
        let jobs = vec![job_in(ReadinessState::Ready, 0)];
        let status = project(&jobs, 4);
        assert!(status.overall_complete);
        assert_eq!(status.progress_percent, 100);
    }

    #[test]
    fn progress_rounds_to_nearest_percent() {
        let jobs = vec![
            job_in(ReadinessState::Ready, 0),
            job_in(ReadinessState::Ready, 0),
            job_in(ReadinessState::Processing, 0),
        ];
        assert_eq!(project(&jobs, 4).progress_percent, 67);
    }

    #[test]
    fn exhausted_failures_settle_the_batch() {
        let jobs = vec![
            job_in(ReadinessState::Ready, 0),
            job_in(ReadinessState::Failed, 4),
        ];
        let status = project(&jobs, 4);
        assert_eq!(status.retryable_failed_count, 0);
        assert!(status.is_settled());
        assert!(!status.overall_complete);
    }
}
