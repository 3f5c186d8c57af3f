//! Orchestrator tuning loaded from environment variables.

use std::str::FromStr;
use std::time::Duration;

use reelforge_core::escalation::DEFAULT_MAX_ATTEMPTS;
use reelforge_core::registry::{RegistryLimits, DEFAULT_MAX_VALIDATION_ATTEMPTS};

use crate::error::OrchestratorError;

/// Timing and budget settings for one orchestrator instance.
#[derive(Debug, Clone, PartialEq)]
pub struct OrchestratorConfig {
    /// Delay between bulk status fetches.
    pub poll_interval: Duration,
    /// Maximum ids per bulk status fetch.
    pub poll_batch_size: usize,
    /// Consecutive fetch failures before the poller reports itself degraded.
    pub max_consecutive_poll_failures: u32,
    /// Ceiling on re-submissions per job.
    pub max_attempts: u32,
    /// Ceiling on retrievability checks per artifact.
    pub max_validation_attempts: u32,
    /// Backoff unit between retrievability checks (`base * attempt`).
    pub validation_base_delay: Duration,
    /// Soft window for validation; exceeding it is logged, never fatal.
    pub validation_window: Duration,
    /// Resubmit retryable failures automatically.
    pub auto_retry: bool,
    pub auto_retry_delay: Duration,
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_secs(5),
            poll_batch_size: 50,
            max_consecutive_poll_failures: 5,
            max_attempts: DEFAULT_MAX_ATTEMPTS,
            max_validation_attempts: DEFAULT_MAX_VALIDATION_ATTEMPTS,
            validation_base_delay: Duration::from_millis(2000),
            validation_window: Duration::from_secs(30),
            auto_retry: true,
            auto_retry_delay: Duration::from_secs(10),
        }
    }
}

impl OrchestratorConfig {
    /// Load configuration from environment variables with defaults.
    ///
    /// | Env Var                          | Default |
    /// |----------------------------------|---------|
    /// | `POLL_INTERVAL_SECS`             | `5`     |
    /// | `POLL_BATCH_SIZE`                | `50`    |
    /// | `MAX_CONSECUTIVE_POLL_FAILURES`  | `5`     |
    /// | `MAX_ATTEMPTS`                   | `4`     |
    /// | `MAX_VALIDATION_ATTEMPTS`        | `5`     |
    /// | `VALIDATION_BASE_DELAY_MS`       | `2000`  |
    /// | `VALIDATION_WINDOW_SECS`         | `30`    |
    /// | `AUTO_RETRY`                     | `true`  |
    /// | `AUTO_RETRY_DELAY_SECS`          | `10`    |
    pub fn from_env() -> Result<Self, OrchestratorError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build from an arbitrary key lookup. Missing keys use defaults.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, OrchestratorError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let defaults = Self::default();
        let config = Self {
            poll_interval: Duration::from_secs(parse_or(
                &lookup,
                "POLL_INTERVAL_SECS",
                defaults.poll_interval.as_secs(),
            )?),
            poll_batch_size: parse_or(&lookup, "POLL_BATCH_SIZE", defaults.poll_batch_size)?,
            max_consecutive_poll_failures: parse_or(
                &lookup,
                "MAX_CONSECUTIVE_POLL_FAILURES",
                defaults.max_consecutive_poll_failures,
            )?,
            max_attempts: parse_or(&lookup, "MAX_ATTEMPTS", defaults.max_attempts)?,
            max_validation_attempts: parse_or(
                &lookup,
                "MAX_VALIDATION_ATTEMPTS",
                defaults.max_validation_attempts,
            )?,
            validation_base_delay: Duration::from_millis(parse_or(
                &lookup,
                "VALIDATION_BASE_DELAY_MS",
                defaults.validation_base_delay.as_millis() as u64,
            )?),
            validation_window: Duration::from_secs(parse_or(
                &lookup,
                "VALIDATION_WINDOW_SECS",
                defaults.validation_window.as_secs(),
            )?),
            auto_retry: parse_or(&lookup, "AUTO_RETRY", defaults.auto_retry)?,
            auto_retry_delay: Duration::from_secs(parse_or(
                &lookup,
                "AUTO_RETRY_DELAY_SECS",
                defaults.auto_retry_delay.as_secs(),
            )?),
        };
        config.validate()?;
        Ok(config)
    }

    /// Reject settings that would stall or disable the pipeline.
    pub fn validate(&self) -> Result<(), OrchestratorError> {
        if self.poll_interval.is_zero() {
            return Err(OrchestratorError::Config(
                "POLL_INTERVAL_SECS must be greater than 0".into(),
            ));
        }
        if self.poll_batch_size == 0 {
            return Err(OrchestratorError::Config(
                "POLL_BATCH_SIZE must be greater than 0".into(),
            ));
        }
        if self.max_consecutive_poll_failures == 0 {
            return Err(OrchestratorError::Config(
                "MAX_CONSECUTIVE_POLL_FAILURES must be greater than 0".into(),
            ));
        }
        if self.max_attempts == 0 {
            return Err(OrchestratorError::Config(
                "MAX_ATTEMPTS must be greater than 0".into(),
            ));
        }
        if self.max_validation_attempts == 0 {
            return Err(OrchestratorError::Config(
                "MAX_VALIDATION_ATTEMPTS must be greater than 0".into(),
            ));
        }
        Ok(())
    }

    pub fn registry_limits(&self) -> RegistryLimits {
        RegistryLimits {
            max_attempts: self.max_attempts,
            max_validation_attempts: self.max_validation_attempts,
        }
    }
}

fn parse_or<F, T>(lookup: &F, key: &str, default: T) -> Result<T, OrchestratorError>
where
    F: Fn(&str) -> Option<String>,
    T: FromStr,
{
    match lookup(key) {
        None => Ok(default),
        Some(raw) => raw
            .trim()
            .parse()
            .map_err(|_| OrchestratorError::Config(format!("{key} has an invalid value '{raw}'"))),
    }
}
