//! Periodic bulk status fetch for jobs still waiting on the producer.
//!
//! The poller runs only while at least one job is `pending` or
//! `processing`. Once none remain the task exits; [`Poller::ensure_running`]
//! starts a fresh one when a submission or retry creates new work.

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;

use crate::context::PipelineContext;
use crate::events::OrchestratorEvent;

#[derive(Default)]
struct PollerState {
    running: bool,
    /// Number of poll tasks started so far.
    runs: u64,
}

#[derive(Clone)]
pub struct Poller {
    ctx: PipelineContext,
    state: Arc<Mutex<PollerState>>,
}

impl Poller {
    pub fn new(ctx: PipelineContext) -> Self {
        Self {
            ctx,
            state: Arc::new(Mutex::new(PollerState::default())),
        }
    }

    /// Start the poll task unless one is already running.
    ///
    /// Returns whether a new task was started.
    pub fn ensure_running(&self) -> bool {
        let mut state = self.lock();
        if state.running || self.ctx.shutdown.is_cancelled() {
            return false;
        }
        state.running = true;
        state.runs += 1;

        let this = self.clone();
        let cancel = self.ctx.shutdown.child_token();
        tokio::spawn(async move { this.run(cancel).await });
        true
    }

    pub fn is_running(&self) -> bool {
        self.lock().running
    }

    /// How many times the poll task has been started.
    pub fn runs(&self) -> u64 {
        self.lock().runs
    }

    async fn run(self, cancel: CancellationToken) {
        let interval = self.ctx.config.poll_interval;
        let batch_size = self.ctx.config.poll_batch_size;
        let max_failures = self.ctx.config.max_consecutive_poll_failures;

        let mut ticker = tokio::time::interval(interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        let mut consecutive_failures = 0u32;

        tracing::info!(
            poll_interval_ms = interval.as_millis() as u64,
            batch_size,
            "Poller started",
        );

        'poll: loop {
            tokio::select! {
                _ = cancel.cancelled() => break 'poll,
                _ = ticker.tick() => {}
            }

            let ids = self.ctx.registry.ids_awaiting_producer();
            if ids.is_empty() {
                if self.try_stop() {
                    tracing::info!("Poller stopped, no jobs awaiting the producer");
                    return;
                }
                continue;
            }

            for chunk in ids.chunks(batch_size) {
                let result = tokio::select! {
                    _ = cancel.cancelled() => break 'poll,
                    result = self.ctx.collaborators.store.fetch_statuses(chunk) => result,
                };

                match result {
                    Ok(facts) => {
                        consecutive_failures = 0;
                        tracing::debug!(
                            requested = chunk.len(),
                            returned = facts.len(),
                            "Poll batch fetched",
                        );
                        if !self.ctx.inbox.send_batch(facts).await {
                            tracing::debug!("Reconciler inbox closed, poller exiting");
                            break 'poll;
                        }
                    }
                    Err(e) => {
                        consecutive_failures += 1;
                        if consecutive_failures == max_failures {
                            tracing::error!(
                                consecutive_failures,
                                error = %e,
                                "Poll failure budget exhausted",
                            );
                            self.ctx.events.publish(OrchestratorEvent::PollDegraded {
                                consecutive_failures,
                                last_error: e.to_string(),
                            });
                        } else {
                            tracing::warn!(consecutive_failures, error = %e, "Poll fetch failed");
                        }
                        break;
                    }
                }
            }
        }

        self.lock().running = false;
        tracing::info!("Poller shutting down");
    }

    /// Mark the poller stopped if there is still nothing to poll.
    ///
    /// The re-check happens under the poller lock so a concurrent
    /// [`ensure_running`](Self::ensure_running) either sees the task as
    /// running before it exits, or starts a new one after.
    fn try_stop(&self) -> bool {
        let mut state = self.lock();
        if !self.ctx.registry.ids_awaiting_producer().is_empty() {
            return false;
        }
        state.running = false;
        true
    }

    fn lock(&self) -> MutexGuard<'_, PollerState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}
