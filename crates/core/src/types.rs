/// Opaque generation job identifier, assigned at submission and never changed.
pub type JobId = String;

/// Identifier of an engine in the catalog.
pub type EngineId = String;

/// Identifier grouping jobs that belong to one campaign.
pub type CampaignId = String;

/// Producer-supplied monotonic ordering marker attached to a fact.
pub type Revision = u64;

/// All timestamps are UTC.
pub type Timestamp = chrono::DateTime<chrono::Utc>;
