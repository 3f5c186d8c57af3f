//! Status vocabularies for generation jobs.
//!
//! Two deliberately distinct vocabularies: [`RawStatus`] is what the
//! producing engine reports, [`ReadinessState`] is what the orchestrator
//! guarantees to consumers. Only [`ReadinessState::Ready`] promises a
//! validated, retrievable artifact.

use serde::{Deserialize, Serialize};

// ---------------------------------------------------------------------------
// Constants
// ---------------------------------------------------------------------------

pub const STATUS_PENDING: &str = "pending";
pub const STATUS_PROCESSING: &str = "processing";
pub const STATUS_COMPLETED: &str = "completed";
pub const STATUS_FAILED: &str = "failed";

/// All valid raw status strings.
pub const VALID_RAW_STATUSES: &[&str] = &[
    STATUS_PENDING,
    STATUS_PROCESSING,
    STATUS_COMPLETED,
    STATUS_FAILED,
];

pub const STATE_PENDING: &str = "pending";
pub const STATE_PROCESSING: &str = "processing";
pub const STATE_VALIDATING: &str = "validating";
pub const STATE_READY: &str = "ready";
pub const STATE_FAILED: &str = "failed";

/// All valid readiness state strings.
pub const VALID_READINESS_STATES: &[&str] = &[
    STATE_PENDING,
    STATE_PROCESSING,
    STATE_VALIDATING,
    STATE_READY,
    STATE_FAILED,
];

// ---------------------------------------------------------------------------
// RawStatus
// ---------------------------------------------------------------------------

/// Status reported by the producing engine or job store.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RawStatus {
    Pending,
    Processing,
    Completed,
    Failed,
}

impl RawStatus {
    /// Parse from the wire string value.
    pub fn from_str_value(s: &str) -> Result<Self, String> {
        match s {
            STATUS_PENDING => Ok(Self::Pending),
            STATUS_PROCESSING => Ok(Self::Processing),
            STATUS_COMPLETED => Ok(Self::Completed),
            STATUS_FAILED => Ok(Self::Failed),
            _ => Err(format!(
                "Invalid raw status '{s}'. Must be one of: {}",
                VALID_RAW_STATUSES.join(", ")
            )),
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => STATUS_PENDING,
            Self::Processing => STATUS_PROCESSING,
            Self::Completed => STATUS_COMPLETED,
            Self::Failed => STATUS_FAILED,
        }
    }

    /// How far along the producer is. Used to prefer the more-progressed
    /// fact when two channels disagree and no revision settles it.
    ///
    /// `Completed` and `Failed` share the top rank: both are final for
    /// the producer, and neither outranks the other.
    pub fn progress_rank(&self) -> u8 {
        match self {
            Self::Pending => 0,
            Self::Processing => 1,
            Self::Completed | Self::Failed => 2,
        }
    }
}

// ---------------------------------------------------------------------------
// ReadinessState
// ---------------------------------------------------------------------------

/// Consumer-facing lifecycle state derived by the orchestrator.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReadinessState {
    Pending,
    Processing,
    Validating,
    Ready,
    Failed,
}

impl ReadinessState {
    /// Parse from the wire string value.
    pub fn from_str_value(s: &str) -> Result<Self, String> {
        match s {
            STATE_PENDING => Ok(Self::Pending),
            STATE_PROCESSING => Ok(Self::Processing),
            STATE_VALIDATING => Ok(Self::Validating),
            STATE_READY => Ok(Self::Ready),
            STATE_FAILED => Ok(Self::Failed),
            _ => Err(format!(
                "Invalid readiness state '{s}'. Must be one of: {}",
                VALID_READINESS_STATES.join(", ")
            )),
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => STATE_PENDING,
            Self::Processing => STATE_PROCESSING,
            Self::Validating => STATE_VALIDATING,
            Self::Ready => STATE_READY,
            Self::Failed => STATE_FAILED,
        }
    }

    /// Whether producer facts can still move this state.
    ///
    /// `Ready` and `Failed` are only left through an explicit retry.
    pub fn accepts_producer_facts(&self) -> bool {
        matches!(self, Self::Pending | Self::Processing | Self::Validating)
    }

    /// Whether the job is still waiting on the producer (and so worth polling).
    pub fn awaits_producer(&self) -> bool {
        matches!(self, Self::Pending | Self::Processing)
    }
}

impl std::fmt::Display for RawStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::fmt::Display for ReadinessState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
