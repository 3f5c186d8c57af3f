//! Structured pipeline failures recorded on a job as `last_error`.
//!
//! Every [`PipelineError`] carries the stage that produced it, a
//! classified [`ErrorType`], whether a retry can help, and an advisory
//! fix shown to operators.

use serde::{Deserialize, Serialize};

// ---------------------------------------------------------------------------
// Stage names
// ---------------------------------------------------------------------------

/// Engine submission stage (initial or retry).
pub const STAGE_SUBMISSION: &str = "submission";
/// Producer-side generation stage, reported through push or poll.
pub const STAGE_GENERATION: &str = "generation";
/// Artifact retrievability check stage.
pub const STAGE_VALIDATION: &str = "validation";

// ---------------------------------------------------------------------------
// ErrorType
// ---------------------------------------------------------------------------

/// Classification of a pipeline failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorType {
    /// The producing engine returned no usable output.
    EngineError,
    /// Post-processing or encoding crashed.
    #[serde(rename = "ffmpeg_error")]
    EncodeError,
    /// The artifact failed to persist.
    UploadError,
    /// The artifact reference is invalid, missing or not retrievable.
    UrlError,
    /// A stage exceeded its allotted time.
    TimeoutError,
    /// Input or configuration rejected before generation started.
    ValidationError,
}

impl ErrorType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::EngineError => "engine_error",
            Self::EncodeError => "ffmpeg_error",
            Self::UploadError => "upload_error",
            Self::UrlError => "url_error",
            Self::TimeoutError => "timeout_error",
            Self::ValidationError => "validation_error",
        }
    }

    /// Whether resubmitting can plausibly succeed for this class of failure.
    ///
    /// A rejected configuration fails the same way every time.
    pub fn default_retryable(&self) -> bool {
        !matches!(self, Self::ValidationError)
    }

    /// Advisory text shown next to the failure.
    pub fn default_suggested_fix(&self) -> &'static str {
        match self {
            Self::EngineError => "Retry generation; later attempts fall back to a simpler engine",
            Self::EncodeError => "Retry generation; safe mode skips optional post-processing",
            Self::UploadError => "Retry generation; the storage backend may be temporarily unavailable",
            Self::UrlError => "Retry generation to produce a fresh artifact",
            Self::TimeoutError => "Retry generation or choose a faster engine",
            Self::ValidationError => "Fix the generation settings before resubmitting",
        }
    }
}

impl std::fmt::Display for ErrorType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

// ---------------------------------------------------------------------------
// PipelineError
// ---------------------------------------------------------------------------

/// A failure recorded against a generation job.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PipelineError {
    /// Free-form name of the stage that failed.
    pub stage: String,
    pub error_type: ErrorType,
    pub message: String,
    pub retryable: bool,
    pub suggested_fix: String,
}

impl PipelineError {
    /// Build an error whose `retryable` flag and `suggested_fix` come from
    /// the defaults of `error_type`.
    pub fn new(stage: impl Into<String>, error_type: ErrorType, message: impl Into<String>) -> Self {
        Self {
            stage: stage.into(),
            error_type,
            message: message.into(),
            retryable: error_type.default_retryable(),
            suggested_fix: error_type.default_suggested_fix().to_string(),
        }
    }

    /// Override the retryable flag.
    pub fn with_retryable(mut self, retryable: bool) -> Self {
        self.retryable = retryable;
        self
    }

    /// Override the advisory fix text.
    pub fn with_suggested_fix(mut self, fix: impl Into<String>) -> Self {
        self.suggested_fix = fix.into();
        self
    }

    /// The producer reported `failed` for the job.
    pub fn engine_failed(engine_id: &str) -> Self {
        Self::new(
            STAGE_GENERATION,
            ErrorType::EngineError,
            format!("Engine '{engine_id}' reported the job as failed"),
        )
    }

    /// The artifact never became retrievable within the attempt budget.
    pub fn artifact_unreachable(url: &str, attempts: u32) -> Self {
        Self::new(
            STAGE_VALIDATION,
            ErrorType::UrlError,
            format!("Artifact at '{url}' was not retrievable after {attempts} checks"),
        )
    }
}

impl std::fmt::Display for PipelineError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} at {}: {}", self.error_type, self.stage, self.message)
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn validation_errors_are_not_retryable_by_default() {
        let err = PipelineError::new("submission", ErrorType::ValidationError, "bad ratio");
        assert!(!err.retryable);
        assert_eq!(err.suggested_fix, ErrorType::ValidationError.default_suggested_fix());
    }

    #[test]
    fn engine_errors_are_retryable_by_default() {
        assert!(PipelineError::engine_failed("kling").retryable);
    }

    #[test]
    fn overrides_replace_defaults() {
        let err = PipelineError::new("upload", ErrorType::UploadError, "quota")
            .with_retryable(false)
            .with_suggested_fix("Raise the bucket quota");
        assert!(!err.retryable);
        assert_eq!(err.suggested_fix, "Raise the bucket quota");
    }

    #[test]
    fn encode_error_uses_ffmpeg_wire_name() {
        let json = serde_json::to_value(ErrorType::EncodeError).unwrap();
        assert_eq!(json, "ffmpeg_error");
        let parsed: ErrorType = serde_json::from_str("\"url_error\"").unwrap();
        assert_eq!(parsed, ErrorType::UrlError);
    }

    #[test]
    fn display_includes_stage_and_type() {
        let err = PipelineError::artifact_unreachable("https://cdn/x.mp4", 5);
        let text = err.to_string();
        assert!(text.starts_with("url_error at validation"));
        assert!(text.contains("5 checks"));
    }
}
