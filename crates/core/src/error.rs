use crate::types::JobId;

#[derive(Debug, thiserror::Error)]
pub enum CoreError {
    #[error("Entity not found: {entity} with id {id}")]
    NotFound { entity: &'static str, id: String },

    #[error("Validation failed: {0}")]
    Validation(String),

    #[error("Conflict: {0}")]
    Conflict(String),

    #[error("No eligible engine for cost mode '{cost_mode}' and {duration_seconds}s duration")]
    NoEligibleEngine {
        cost_mode: &'static str,
        duration_seconds: f64,
    },

    #[error("Max retries reached for job {job_id} ({attempts} attempts)")]
    MaxRetriesReached { job_id: JobId, attempts: u32 },

    #[error("Job registry has been disposed")]
    Disposed,
}

impl CoreError {
    /// Shorthand for a missing job.
    pub fn job_not_found(id: &str) -> Self {
        Self::NotFound {
            entity: "generation_job",
            id: id.to_string(),
        }
    }
}
