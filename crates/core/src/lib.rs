//! Domain logic for the reelforge generation orchestrator.
//!
//! Everything in this crate is synchronous and free of I/O: the job
//! model and its merge rules, engine selection, retry escalation and
//! status projection. The async machinery lives in `reelforge-pipeline`.

pub mod catalog;
pub mod error;
pub mod escalation;
pub mod job;
pub mod pipeline_error;
pub mod projection;
pub mod registry;
pub mod selector;
pub mod status;
pub mod types;
