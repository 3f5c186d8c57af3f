use reelforge_core::error::CoreError;

/// Errors surfaced by the orchestrator's public operations.
#[derive(Debug, thiserror::Error)]
pub enum OrchestratorError {
    #[error(transparent)]
    Core(#[from] CoreError),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Orchestrator has been shut down")]
    ShutDown,
}

impl OrchestratorError {
    /// Whether this is the explicit "max retries reached" signal.
    pub fn is_max_retries(&self) -> bool {
        matches!(self, Self::Core(CoreError::MaxRetriesReached { .. }))
    }
}
