//! Retry escalation policy: which generation strategy each retry attempt
//! uses, and the hard ceiling on attempts.

use serde::{Deserialize, Serialize};

use crate::catalog::EngineCatalog;
use crate::error::CoreError;
use crate::job::GenerationJob;
use crate::selector::select_fallback;
use crate::types::EngineId;

/// Default ceiling on re-submissions per job.
pub const DEFAULT_MAX_ATTEMPTS: u32 = 4;

// ---------------------------------------------------------------------------
// EscalationMode
// ---------------------------------------------------------------------------

/// Generation strategy for a retry attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EscalationMode {
    /// Resubmit to the engine that ran the previous attempt.
    SameEngine,
    /// Switch to a minimal-dependency fallback engine.
    FallbackEngine,
    /// Keep the engine but request the reduced feature set.
    SafeMode,
}

impl EscalationMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::SameEngine => "same_engine",
            Self::FallbackEngine => "fallback_engine",
            Self::SafeMode => "safe_mode",
        }
    }
}

impl std::fmt::Display for EscalationMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

// ---------------------------------------------------------------------------
// RetryEscalationPolicy
// ---------------------------------------------------------------------------

/// Ordered mapping from retry attempt number (1-based) to mode.
///
/// Attempts beyond the listed modes reuse the last one, up to
/// `max_attempts`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RetryEscalationPolicy {
    modes: Vec<EscalationMode>,
    max_attempts: u32,
}

impl RetryEscalationPolicy {
    pub fn new(modes: Vec<EscalationMode>, max_attempts: u32) -> Result<Self, CoreError> {
        if modes.is_empty() {
            return Err(CoreError::Validation(
                "Escalation policy needs at least one mode".to_string(),
            ));
        }
        if max_attempts == 0 {
            return Err(CoreError::Validation(
                "max_attempts must be at least 1".to_string(),
            ));
        }
        Ok(Self {
            modes,
            max_attempts,
        })
    }

    /// The default ladder with a custom ceiling.
    pub fn with_max_attempts(max_attempts: u32) -> Result<Self, CoreError> {
        Self::new(Self::default().modes, max_attempts)
    }

    pub fn max_attempts(&self) -> u32 {
        self.max_attempts
    }

    /// Mode for retry attempt `attempt`, or `None` outside `1..=max_attempts`.
    pub fn mode_for_attempt(&self, attempt: u32) -> Option<EscalationMode> {
        if attempt == 0 || attempt > self.max_attempts {
            return None;
        }
        let index = (attempt as usize).min(self.modes.len()) - 1;
        Some(self.modes[index])
    }
}

impl Default for RetryEscalationPolicy {
    /// Attempts 1-2 retry the same engine, 3 falls back, 4 runs in safe mode.
    fn default() -> Self {
        Self {
            modes: vec![
                EscalationMode::SameEngine,
                EscalationMode::SameEngine,
                EscalationMode::FallbackEngine,
                EscalationMode::SafeMode,
            ],
            max_attempts: DEFAULT_MAX_ATTEMPTS,
        }
    }
}

// ---------------------------------------------------------------------------
// EscalationPlan
// ---------------------------------------------------------------------------

/// Concrete engine and feature set for one retry attempt.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct EscalationPlan {
    pub attempt: u32,
    pub mode: EscalationMode,
    pub engine_id: EngineId,
    /// Request the reduced feature set from the engine.
    pub safe_mode: bool,
}

/// Resolve the plan for `job`, whose `attempt_count` already counts the
/// attempt being planned.
///
/// When the catalog has no capable fallback engine the current engine is
/// kept, so a missing fallback never blocks the retry.
pub fn plan_attempt(
    policy: &RetryEscalationPolicy,
    catalog: &EngineCatalog,
    job: &GenerationJob,
) -> Result<EscalationPlan, CoreError> {
    let attempt = job.attempt_count;
    let mode = policy
        .mode_for_attempt(attempt)
        .ok_or_else(|| CoreError::MaxRetriesReached {
            job_id: job.id.clone(),
            attempts: attempt,
        })?;

    let engine_id = match mode {
        EscalationMode::SameEngine | EscalationMode::SafeMode => job.engine_used.clone(),
        EscalationMode::FallbackEngine => match select_fallback(catalog, &job.shape) {
            Ok(selection) => selection.engine.id,
            Err(e) => {
                tracing::warn!(
                    job_id = %job.id,
                    error = %e,
                    "No fallback engine available, keeping current engine",
                );
                job.engine_used.clone()
            }
        },
    };

    Ok(EscalationPlan {
        attempt,
        mode,
        engine_id,
        safe_mode: mode == EscalationMode::SafeMode,
    })
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
