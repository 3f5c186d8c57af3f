use std::sync::Arc;

use tokio_util::sync::CancellationToken;

use reelforge_core::catalog::EngineCatalog;
use reelforge_core::escalation::RetryEscalationPolicy;
use reelforge_core::registry::{JobRegistry, MergeOutcome};

use crate::collaborators::{ArtifactProber, GenerationSubmitter, JobStore};
use crate::config::OrchestratorConfig;
use crate::events::{EventBus, OrchestratorEvent};
use crate::reconciler::FactSink;
use crate::scheduler::JobScheduler;

/// The external collaborators an orchestrator is wired to.
#[derive(Clone)]
pub struct Collaborators {
    pub submitter: Arc<dyn GenerationSubmitter>,
    pub store: Arc<dyn JobStore>,
    pub prober: Arc<dyn ArtifactProber>,
}

/// Shared handles passed to every pipeline component.
///
/// Cheap to clone; all fields are reference counted.
#[derive(Clone)]
pub struct PipelineContext {
    pub registry: Arc<JobRegistry>,
    pub catalog: Arc<EngineCatalog>,
    pub policy: Arc<RetryEscalationPolicy>,
    pub config: Arc<OrchestratorConfig>,
    pub collaborators: Collaborators,
    pub events: EventBus,
    pub scheduler: JobScheduler,
    /// Inbox of the reconciliation loop.
    pub inbox: FactSink,
    /// Root token; cancelled on shutdown.
    pub shutdown: CancellationToken,
}

impl PipelineContext {
    /// Publish `JobStateChanged` if the merge moved the job to a new state.
    pub fn publish_transition(&self, outcome: &MergeOutcome) {
        let from = outcome.previous_state;
        let to = outcome.job.readiness_state;
        if from == to {
            return;
        }
        tracing::debug!(job_id = %outcome.job.id, %from, %to, "Job state changed");
        self.events.publish(OrchestratorEvent::JobStateChanged {
            job_id: outcome.job.id.clone(),
            from,
            to,
        });
    }
}
