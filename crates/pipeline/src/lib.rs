//! Async job orchestration for reelforge.
//!
//! - [`Orchestrator`] owns a [`JobRegistry`](reelforge_core::registry::JobRegistry)
//!   and the background tasks around it.
//! - [`UpdateReconciler`] funnels push and poll facts into the registry.
//! - [`ReadinessValidator`] confirms artifacts are retrievable before a
//!   job is reported `ready`.
//! - [`RetryController`] resubmits failed jobs along the escalation ladder.
//! - [`Poller`] fetches producer status while jobs are outstanding.
//! - [`EventBus`] broadcasts [`OrchestratorEvent`]s to observers.
//!
//! External systems are reached only through the traits in
//! [`collaborators`].

pub mod collaborators;
pub mod config;
pub mod context;
pub mod error;
pub mod events;
pub mod orchestrator;
pub mod poller;
pub mod push;
pub mod reconciler;
pub mod retry;
pub mod scheduler;
pub mod validator;

pub use collaborators::{
    ArtifactProber, GenerationSubmitter, JobStore, ProbeError, PushSource, StoreError,
    SubmissionRequest, SubmissionResponse, SubmitError,
};
pub use config::OrchestratorConfig;
pub use context::{Collaborators, PipelineContext};
pub use error::OrchestratorError;
pub use events::{EventBus, OrchestratorEvent};
pub use orchestrator::{NewJobRequest, Orchestrator};
pub use poller::Poller;
pub use push::PushSubscription;
pub use reconciler::{FactSink, Inbound, ReconcileSummary, UpdateReconciler};
pub use retry::{RetryController, RetryOutcome, RetrySweep};
pub use scheduler::JobScheduler;
pub use validator::ReadinessValidator;
