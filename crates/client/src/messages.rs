//! Push channel message types and parser.
//!
//! The push endpoint sends JSON text frames shaped
//! `{"type": "<kind>", "data": {...}}`. Only `job_update` carries a
//! fact; `heartbeat` keeps idle connections alive.

use serde::Deserialize;

use reelforge_core::job::JobFact;

#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "type", content = "data")]
pub enum PushMessage {
    /// A producer snapshot for one job.
    #[serde(rename = "job_update")]
    JobUpdate(JobFact),

    #[serde(rename = "heartbeat")]
    Heartbeat,
}

/// Parse a push text frame.
///
/// Returns `Err` for malformed JSON or unknown `type` values. Callers
/// should log and continue.
pub fn parse_message(text: &str) -> Result<PushMessage, serde_json::Error> {
    serde_json::from_str(text)
}
