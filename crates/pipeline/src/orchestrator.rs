//! Orchestrator: owns one registry and wires every pipeline component
//! around it.
//!
//! Created via [`Orchestrator::start`]; all background work (reconciler
//! loop, poller, validation and retry timers, push subscriptions) runs
//! under one root [`CancellationToken`] that [`Orchestrator::shutdown`]
//! cancels.

use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use reelforge_core::catalog::EngineCatalog;
use reelforge_core::error::CoreError;
use reelforge_core::escalation::RetryEscalationPolicy;
use reelforge_core::job::GenerationJob;
use reelforge_core::projection::{project, AggregateStatus};
use reelforge_core::registry::JobRegistry;
use reelforge_core::selector::{select_or_widen, ContentShape, SelectionPreferences};
use reelforge_core::status::ReadinessState;
use reelforge_core::types::{CampaignId, JobId};

use crate::collaborators::{PushSource, SubmissionRequest};
use crate::config::OrchestratorConfig;
use crate::context::{Collaborators, PipelineContext};
use crate::error::OrchestratorError;
use crate::events::{EventBus, OrchestratorEvent};
use crate::poller::Poller;
use crate::push::PushSubscription;
use crate::reconciler::{FactSink, UpdateReconciler, INBOX_CAPACITY};
use crate::retry::{dispatch, RetryController, RetryOutcome, RetrySweep};
use crate::scheduler::JobScheduler;
use crate::validator::ReadinessValidator;

/// How long `shutdown` waits for the reconciler loop to exit.
const SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(5);

/// A request to generate one artifact.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewJobRequest {
    /// Caller-chosen id; a UUID v4 is generated when absent.
    #[serde(default)]
    pub id: Option<JobId>,
    #[serde(default)]
    pub campaign_id: Option<CampaignId>,
    #[serde(default)]
    pub requested_config: serde_json::Value,
    #[serde(default)]
    pub preferences: SelectionPreferences,
    pub shape: ContentShape,
}

pub struct Orchestrator {
    ctx: PipelineContext,
    poller: Poller,
    retry: RetryController,
    validator: ReadinessValidator,
    reconciler: UpdateReconciler,
    reconciler_task: Mutex<Option<JoinHandle<()>>>,
}

impl std::fmt::Debug for Orchestrator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Orchestrator").finish_non_exhaustive()
    }
}

impl Orchestrator {
    /// Build the registry and components and start the reconciler loop.
    ///
    /// Must be called from within a Tokio runtime.
    pub fn start(
        config: OrchestratorConfig,
        catalog: EngineCatalog,
        collaborators: Collaborators,
    ) -> Result<Self, OrchestratorError> {
        config.validate()?;
        if catalog.is_empty() {
            return Err(OrchestratorError::Config(
                "Engine catalog has no engines".into(),
            ));
        }
        let policy = RetryEscalationPolicy::with_max_attempts(config.max_attempts)?;

        let registry = JobRegistry::new(config.registry_limits());
        registry.activate()?;

        let shutdown = CancellationToken::new();
        let (inbox, inbox_rx) = FactSink::channel(INBOX_CAPACITY);
        let ctx = PipelineContext {
            registry: Arc::new(registry),
            catalog: Arc::new(catalog),
            policy: Arc::new(policy),
            config: Arc::new(config),
            collaborators,
            events: EventBus::default(),
            scheduler: JobScheduler::new(shutdown.child_token()),
            inbox,
            shutdown,
        };

        let poller = Poller::new(ctx.clone());
        let retry = RetryController::new(ctx.clone(), poller.clone());
        let validator = ReadinessValidator::new(ctx.clone(), retry.clone());
        let reconciler =
            UpdateReconciler::new(ctx.clone(), validator.clone(), retry.clone(), poller.clone());

        let reconciler_task =
            tokio::spawn(reconciler.clone().run(inbox_rx, ctx.shutdown.child_token()));

        tracing::info!(
            engines = ctx.catalog.engines().len(),
            max_attempts = ctx.config.max_attempts,
            max_validation_attempts = ctx.config.max_validation_attempts,
            "Orchestrator started",
        );

        Ok(Self {
            ctx,
            poller,
            retry,
            validator,
            reconciler,
            reconciler_task: Mutex::new(Some(reconciler_task)),
        })
    }

    // ---- submission and retry ----

    /// Select an engine, register the job and submit its first attempt.
    ///
    /// A rejected or failed submission is not an error here: the job is
    /// returned in `failed` with `last_error` set.
    pub async fn submit(&self, request: NewJobRequest) -> Result<GenerationJob, OrchestratorError> {
        self.ensure_active()?;
        let selection = select_or_widen(&self.ctx.catalog, &request.preferences, &request.shape)?;

        let id = request
            .id
            .unwrap_or_else(|| uuid::Uuid::new_v4().to_string());
        let mut job = GenerationJob::new(
            id,
            selection.engine.id.clone(),
            request.requested_config,
            request.preferences,
            request.shape,
        );
        if let Some(campaign_id) = request.campaign_id {
            job = job.with_campaign(campaign_id);
        }
        let job = self.ctx.registry.register(job)?;

        tracing::info!(
            job_id = %job.id,
            engine_id = %job.engine_used,
            estimated_cost = selection.cost_estimate.estimated,
            reason = %selection.reason,
            "Job submitted",
        );
        self.ctx.events.publish(OrchestratorEvent::JobSubmitted {
            job_id: job.id.clone(),
            engine_id: job.engine_used.clone(),
            campaign_id: job.campaign_id.clone(),
        });

        let submission = SubmissionRequest {
            job_id: job.id.clone(),
            engine_id: job.engine_used.clone(),
            mode: None,
            safe_mode: false,
            requested_config: job.requested_config.clone(),
        };
        match dispatch(self.ctx.collaborators.submitter.as_ref(), &submission).await {
            Ok(()) => {
                self.poller.ensure_running();
            }
            Err(error) => {
                tracing::error!(job_id = %job.id, error = %error, "Submission failed");
                let failed = self
                    .retry
                    .fail_attempt(&job.id, ReadinessState::Pending, error);
                if let Some(failed) = failed {
                    self.retry.handle_failure(&failed);
                }
            }
        }

        self.ctx
            .registry
            .get(&job.id)
            .ok_or_else(|| CoreError::job_not_found(&job.id).into())
    }

    /// Resubmit one failed job.
    pub async fn retry(&self, job_id: &str) -> Result<RetryOutcome, OrchestratorError> {
        self.ensure_active()?;
        self.retry.retry(job_id).await
    }

    /// Resubmit every failed job that still has retry budget.
    pub async fn retry_all_failed(&self) -> Result<RetrySweep, OrchestratorError> {
        self.ensure_active()?;
        Ok(self.retry.retry_all_failed().await)
    }

    // ---- push channel ----

    /// Run `source` as a scoped push subscription feeding the reconciler.
    pub fn attach_push(
        &self,
        source: Arc<dyn PushSource>,
    ) -> Result<PushSubscription, OrchestratorError> {
        self.ensure_active()?;
        Ok(PushSubscription::spawn(
            source,
            self.ctx.inbox.clone(),
            &self.ctx.shutdown,
        ))
    }

    /// Sending half of the reconciliation inbox.
    pub fn fact_sink(&self) -> FactSink {
        self.ctx.inbox.clone()
    }

    // ---- reads ----

    pub fn job(&self, job_id: &str) -> Option<GenerationJob> {
        self.ctx.registry.get(job_id)
    }

    pub fn jobs(&self) -> Vec<GenerationJob> {
        self.ctx.registry.all()
    }

    /// Aggregate status over every job.
    pub fn status(&self) -> AggregateStatus {
        project(&self.ctx.registry.all(), self.ctx.config.max_attempts)
    }

    /// Aggregate status over one campaign's jobs.
    pub fn campaign_status(&self, campaign_id: &str) -> AggregateStatus {
        let jobs: Vec<GenerationJob> = self
            .ctx
            .registry
            .all()
            .into_iter()
            .filter(|job| job.campaign_id.as_deref() == Some(campaign_id))
            .collect();
        project(&jobs, self.ctx.config.max_attempts)
    }

    pub fn subscribe(&self) -> broadcast::Receiver<OrchestratorEvent> {
        self.ctx.events.subscribe()
    }

    pub fn registry(&self) -> &Arc<JobRegistry> {
        &self.ctx.registry
    }

    pub fn reconciler(&self) -> &UpdateReconciler {
        &self.reconciler
    }

    pub fn validator(&self) -> &ReadinessValidator {
        &self.validator
    }

    pub fn scheduler(&self) -> &JobScheduler {
        &self.ctx.scheduler
    }

    pub fn is_polling(&self) -> bool {
        self.poller.is_running()
    }

    pub fn config(&self) -> &OrchestratorConfig {
        &self.ctx.config
    }

    // ---- lifecycle ----

    pub fn is_shut_down(&self) -> bool {
        self.ctx.shutdown.is_cancelled()
    }

    /// Stop all background work and dispose the registry.
    ///
    /// Jobs stay readable afterwards. Calling this twice is harmless.
    pub async fn shutdown(&self) {
        tracing::info!("Shutting down orchestrator");
        self.ctx.shutdown.cancel();
        self.ctx.scheduler.cancel_all();
        self.ctx.registry.dispose();

        let task = self
            .reconciler_task
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if let Some(task) = task {
            let _ = tokio::time::timeout(SHUTDOWN_TIMEOUT, task).await;
        }

        tracing::info!("Orchestrator shut down complete");
    }

    fn ensure_active(&self) -> Result<(), OrchestratorError> {
        if self.is_shut_down() {
            return Err(OrchestratorError::ShutDown);
        }
        Ok(())
    }
}

impl Drop for Orchestrator {
    fn drop(&mut self) {
        self.ctx.shutdown.cancel();
    }
}
