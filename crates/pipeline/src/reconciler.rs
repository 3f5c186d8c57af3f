//! Update reconciler: the single funnel through which producer facts from
//! both the push and the poll channel reach the registry.
//!
//! Both channels post into one inbox that [`UpdateReconciler::run`]
//! drains in order, so per-job writes are applied in the order they are
//! processed. The merge rules themselves live in the registry; this
//! module reacts to the resulting transitions.

use serde::Serialize;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use reelforge_core::error::CoreError;
use reelforge_core::job::JobFact;
use reelforge_core::registry::MergeOutcome;
use reelforge_core::status::ReadinessState;

use crate::context::PipelineContext;
use crate::poller::Poller;
use crate::retry::RetryController;
use crate::validator::ReadinessValidator;

/// Capacity of the reconciliation inbox.
pub const INBOX_CAPACITY: usize = 1024;

// ---------------------------------------------------------------------------
// Inbox
// ---------------------------------------------------------------------------

/// A message for the reconciliation loop.
#[derive(Debug, Clone)]
pub enum Inbound {
    Push(JobFact),
    Poll(Vec<JobFact>),
}

/// Sending half of the reconciliation inbox.
#[derive(Clone)]
pub struct FactSink {
    sender: mpsc::Sender<Inbound>,
}

impl FactSink {
    /// Create the inbox. The receiver goes to [`UpdateReconciler::run`].
    pub fn channel(capacity: usize) -> (Self, mpsc::Receiver<Inbound>) {
        let (sender, receiver) = mpsc::channel(capacity);
        (Self { sender }, receiver)
    }

    /// Post one pushed fact. Returns `false` once the loop has stopped.
    pub async fn send(&self, fact: JobFact) -> bool {
        self.sender.send(Inbound::Push(fact)).await.is_ok()
    }

    /// Post one poll snapshot. Returns `false` once the loop has stopped.
    pub async fn send_batch(&self, facts: Vec<JobFact>) -> bool {
        self.sender.send(Inbound::Poll(facts)).await.is_ok()
    }

    pub fn is_closed(&self) -> bool {
        self.sender.is_closed()
    }
}

/// Where a fact came from, for logging.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Channel {
    Push,
    Poll,
}

/// Per-batch tally of an `apply_poll_batch` call.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct ReconcileSummary {
    pub applied: usize,
    pub changed: usize,
    pub ignored: usize,
    pub unknown: usize,
}

// ---------------------------------------------------------------------------
// UpdateReconciler
// ---------------------------------------------------------------------------

#[derive(Clone)]
pub struct UpdateReconciler {
    ctx: PipelineContext,
    validator: ReadinessValidator,
    retry: RetryController,
    poller: Poller,
}

impl UpdateReconciler {
    pub fn new(
        ctx: PipelineContext,
        validator: ReadinessValidator,
        retry: RetryController,
        poller: Poller,
    ) -> Self {
        Self {
            ctx,
            validator,
            retry,
            poller,
        }
    }

    /// Merge one pushed fact. Facts for unknown jobs yield `Ok(None)`.
    pub fn apply_push_event(&self, fact: JobFact) -> Result<Option<MergeOutcome>, CoreError> {
        self.apply(fact, Channel::Push)
    }

    /// Merge a poll snapshot. Stops at the first registry-level error.
    pub fn apply_poll_batch(&self, facts: Vec<JobFact>) -> Result<ReconcileSummary, CoreError> {
        let mut summary = ReconcileSummary::default();
        for fact in facts {
            match self.apply(fact, Channel::Poll)? {
                None => summary.unknown += 1,
                Some(outcome) => {
                    summary.applied += 1;
                    if outcome.changed {
                        summary.changed += 1;
                    }
                    if outcome.ignored.is_some() {
                        summary.ignored += 1;
                    }
                }
            }
        }
        Ok(summary)
    }

    /// Drain the inbox until cancelled, the inbox closes, or the registry
    /// is disposed.
    pub async fn run(self, mut inbox: mpsc::Receiver<Inbound>, cancel: CancellationToken) {
        tracing::info!("Reconciler started");
        loop {
            let message = tokio::select! {
                _ = cancel.cancelled() => break,
                message = inbox.recv() => message,
            };
            let result = match message {
                Some(Inbound::Push(fact)) => self.apply_push_event(fact).map(|_| ()),
                Some(Inbound::Poll(facts)) => self.apply_poll_batch(facts).map(|summary| {
                    tracing::debug!(
                        applied = summary.applied,
                        changed = summary.changed,
                        ignored = summary.ignored,
                        unknown = summary.unknown,
                        "Poll batch reconciled",
                    );
                }),
                None => break,
            };
            if let Err(e) = result {
                tracing::warn!(error = %e, "Reconciler stopping");
                break;
            }
        }
        tracing::info!("Reconciler stopped");
    }

    fn apply(&self, fact: JobFact, channel: Channel) -> Result<Option<MergeOutcome>, CoreError> {
        let job_id = fact.id.clone();
        match self.ctx.registry.merge(&job_id, fact) {
            Ok(outcome) => {
                if let Some(reason) = outcome.ignored {
                    tracing::debug!(job_id = %job_id, ?channel, ?reason, "Fact not applied");
                }
                self.react(&outcome);
                Ok(Some(outcome))
            }
            Err(CoreError::NotFound { .. }) => {
                tracing::debug!(job_id = %job_id, ?channel, "Fact for unknown job ignored");
                Ok(None)
            }
            Err(e) => Err(e),
        }
    }

    fn react(&self, outcome: &MergeOutcome) {
        if !outcome.changed || outcome.previous_state == outcome.job.readiness_state {
            return;
        }
        self.ctx.publish_transition(outcome);

        let job = &outcome.job;
        match job.readiness_state {
            ReadinessState::Validating => {
                self.validator.start(&job.id);
            }
            ReadinessState::Failed => {
                tracing::warn!(
                    job_id = %job.id,
                    engine_id = %job.engine_used,
                    attempt_count = job.attempt_count,
                    "Producer reported job failed",
                );
                self.retry.handle_failure(job);
            }
            ReadinessState::Pending | ReadinessState::Processing => {
                // Back to waiting on the producer, e.g. after a newer
                // revision superseded a completed fact.
                self.poller.ensure_running();
            }
            ReadinessState::Ready => {}
        }
    }
}
