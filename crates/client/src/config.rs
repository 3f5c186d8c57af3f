//! HTTP client settings loaded from environment variables.

use std::time::Duration;

use crate::error::ClientError;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClientConfig {
    /// Timeout for engine API calls (submission and status fetch).
    pub request_timeout: Duration,
    /// Timeout for one artifact retrievability probe.
    pub probe_timeout: Duration,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            request_timeout: Duration::from_secs(30),
            probe_timeout: Duration::from_secs(10),
        }
    }
}

impl ClientConfig {
    /// Load configuration from environment variables with defaults.
    ///
    /// | Env Var                | Default |
    /// |------------------------|---------|
    /// | `REQUEST_TIMEOUT_SECS` | `30`    |
    /// | `PROBE_TIMEOUT_SECS`   | `10`    |
    pub fn from_env() -> Result<Self, ClientError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    pub fn from_lookup<F>(lookup: F) -> Result<Self, ClientError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let defaults = Self::default();
        Ok(Self {
            request_timeout: secs_or(&lookup, "REQUEST_TIMEOUT_SECS", defaults.request_timeout)?,
            probe_timeout: secs_or(&lookup, "PROBE_TIMEOUT_SECS", defaults.probe_timeout)?,
        })
    }
}

fn secs_or<F>(lookup: &F, key: &str, default: Duration) -> Result<Duration, ClientError>
where
    F: Fn(&str) -> Option<String>,
{
    let Some(raw) = lookup(key) else {
        return Ok(default);
    };
    let secs: u64 = raw
        .trim()
        .parse()
        .map_err(|_| ClientError::Config(format!("{key} must be a whole number of seconds")))?;
    if secs == 0 {
        return Err(ClientError::Config(format!("{key} must be greater than 0")));
    }
    Ok(Duration::from_secs(secs))
}
