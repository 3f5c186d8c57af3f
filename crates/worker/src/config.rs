//! Worker settings loaded from environment variables.

use std::path::PathBuf;

use anyhow::{bail, Context};

/// Output format of the tracing subscriber.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LogFormat {
    #[default]
    Text,
    Json,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WorkerConfig {
    pub engine_api_url: String,
    pub push_ws_url: Option<String>,
    /// JSON engine catalog; the built-in catalog is used when unset.
    pub engine_catalog_path: Option<PathBuf>,
    /// JSON array of job requests to submit.
    pub job_manifest_path: PathBuf,
    pub log_format: LogFormat,
}

impl WorkerConfig {
    /// Load configuration from environment variables.
    ///
    /// | Env Var               | Required | Default    |
    /// |-----------------------|----------|------------|
    /// | `ENGINE_API_URL`      | yes      | --         |
    /// | `JOB_MANIFEST_PATH`   | yes      | --         |
    /// | `PUSH_WS_URL`         | no       | poll only  |
    /// | `ENGINE_CATALOG_PATH` | no       | built-in   |
    /// | `LOG_FORMAT`          | no       | `text`     |
    pub fn from_env() -> anyhow::Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    pub fn from_lookup<F>(lookup: F) -> anyhow::Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let non_empty = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        let engine_api_url =
            non_empty("ENGINE_API_URL").context("ENGINE_API_URL environment variable is required")?;
        let job_manifest_path = non_empty("JOB_MANIFEST_PATH")
            .map(PathBuf::from)
            .context("JOB_MANIFEST_PATH environment variable is required")?;

        let log_format = match non_empty("LOG_FORMAT").as_deref() {
            None | Some("text") => LogFormat::Text,
            Some("json") => LogFormat::Json,
            Some(other) => bail!("LOG_FORMAT must be 'text' or 'json', got '{other}'"),
        };

        Ok(Self {
            engine_api_url,
            push_ws_url: non_empty("PUSH_WS_URL"),
            engine_catalog_path: non_empty("ENGINE_CATALOG_PATH").map(PathBuf::from),
            job_manifest_path,
            log_format,
        })
    }
}
