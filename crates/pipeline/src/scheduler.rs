//! Per-job delayed task scheduler with scoped cancellation.
//!
//! Every armed task runs under a child of the scheduler's root
//! [`CancellationToken`]. Re-arming a job cancels its pending task, and
//! [`JobScheduler::cancel_all`] cancels every outstanding timer at once,
//! including tasks that are mid-flight.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use futures::future::BoxFuture;
use tokio_util::sync::CancellationToken;

use reelforge_core::types::JobId;

struct ArmedTimer {
    generation: u64,
    cancel: CancellationToken,
}

/// Delayed, cancellable tasks keyed by job id. At most one pending task
/// per job.
#[derive(Clone)]
pub struct JobScheduler {
    root: CancellationToken,
    timers: Arc<Mutex<HashMap<JobId, ArmedTimer>>>,
    next_generation: Arc<AtomicU64>,
}

impl JobScheduler {
    pub fn new(root: CancellationToken) -> Self {
        Self {
            root,
            timers: Arc::new(Mutex::new(HashMap::new())),
            next_generation: Arc::new(AtomicU64::new(0)),
        }
    }

    /// Run `task` for `job_id` after `delay`, replacing any pending task.
    ///
    /// Returns `false` when the scheduler has been shut down. Must be
    /// called from within a Tokio runtime.
    pub fn arm(&self, job_id: &str, delay: Duration, task: BoxFuture<'static, ()>) -> bool {
        if self.root.is_cancelled() {
            tracing::debug!(job_id, "Scheduler shut down, task dropped");
            return false;
        }

        let cancel = self.root.child_token();
        let generation = self.next_generation.fetch_add(1, Ordering::Relaxed);
        if let Some(previous) = self.lock().insert(
            job_id.to_string(),
            ArmedTimer {
                generation,
                cancel: cancel.clone(),
            },
        ) {
            previous.cancel.cancel();
        }

        let timers = Arc::clone(&self.timers);
        let key = job_id.to_string();
        tokio::spawn(async move {
            tokio::select! {
                _ = cancel.cancelled() => return,
                _ = tokio::time::sleep(delay) => {}
            }

            // The timer fired; the job no longer has a pending task, so the
            // task itself may arm the next one.
            {
                let mut timers = timers.lock().unwrap_or_else(PoisonError::into_inner);
                if timers.get(&key).map(|t| t.generation) == Some(generation) {
                    timers.remove(&key);
                }
            }

            tokio::select! {
                _ = cancel.cancelled() => {}
                _ = task => {}
            }
        });
        true
    }

    /// Cancel the pending task for `job_id`. Returns whether one existed.
    pub fn cancel(&self, job_id: &str) -> bool {
        match self.lock().remove(job_id) {
            Some(timer) => {
                timer.cancel.cancel();
                true
            }
            None => false,
        }
    }

    /// Cancel every pending and running task and refuse new ones.
    pub fn cancel_all(&self) {
        self.root.cancel();
        let drained: Vec<ArmedTimer> = self.lock().drain().map(|(_, t)| t).collect();
        tracing::debug!(count = drained.len(), "Cancelled scheduled tasks");
    }

    pub fn is_armed(&self, job_id: &str) -> bool {
        self.lock().contains_key(job_id)
    }

    /// Number of tasks still waiting for their delay.
    pub fn pending_count(&self) -> usize {
        self.lock().len()
    }

    pub fn is_shut_down(&self) -> bool {
        self.root.is_cancelled()
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<JobId, ArmedTimer>> {
        self.timers.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::AtomicUsize;

    use super::*;

    fn counting_task(counter: &Arc<AtomicUsize>) -> BoxFuture<'static, ()> {
        let counter = Arc::clone(counter);
        Box::pin(async move {
            counter.fetch_add(1, Ordering::SeqCst);
        })
    }

    #[tokio::test(start_paused = true)]
    async fn task_runs_after_delay() {
        let scheduler = JobScheduler::new(CancellationToken::new());
        let counter = Arc::new(AtomicUsize::new(0));

        assert!(scheduler.arm("a", Duration::from_secs(5), counting_task(&counter)));
        assert!(scheduler.is_armed("a"));

        tokio::time::sleep(Duration::from_secs(4)).await;
        assert_eq!(counter.load(Ordering::SeqCst), 0);

        tokio::time::sleep(Duration::from_secs(2)).await;
        assert_eq!(counter.load(Ordering::SeqCst), 1);
        assert!(!scheduler.is_armed("a"));
    }

    #[tokio::test(start_paused = true)]
    async fn rearming_replaces_pending_task() {
        let scheduler = JobScheduler::new(CancellationToken::new());
        let first = Arc::new(AtomicUsize::new(0));
        let second = Arc::new(AtomicUsize::new(0));

        scheduler.arm("a", Duration::from_secs(5), counting_task(&first));
        scheduler.arm("a", Duration::from_secs(1), counting_task(&second));
        assert_eq!(scheduler.pending_count(), 1);

        tokio::time::sleep(Duration::from_secs(10)).await;
        assert_eq!(first.load(Ordering::SeqCst), 0);
        assert_eq!(second.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn cancel_stops_single_job() {
        let scheduler = JobScheduler::new(CancellationToken::new());
        let a = Arc::new(AtomicUsize::new(0));
        let b = Arc::new(AtomicUsize::new(0));

        scheduler.arm("a", Duration::from_secs(1), counting_task(&a));
        scheduler.arm("b", Duration::from_secs(1), counting_task(&b));
        assert!(scheduler.cancel("a"));
        assert!(!scheduler.cancel("a"));

        tokio::time::sleep(Duration::from_secs(2)).await;
        assert_eq!(a.load(Ordering::SeqCst), 0);
        assert_eq!(b.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn cancel_all_drops_pending_and_refuses_new_tasks() {
        let scheduler = JobScheduler::new(CancellationToken::new());
        let counter = Arc::new(AtomicUsize::new(0));

        scheduler.arm("a", Duration::from_secs(1), counting_task(&counter));
        scheduler.arm("b", Duration::from_secs(1), counting_task(&counter));
        scheduler.cancel_all();

        assert_eq!(scheduler.pending_count(), 0);
        assert!(!scheduler.arm("c", Duration::ZERO, counting_task(&counter)));

        tokio::time::sleep(Duration::from_secs(5)).await;
        assert_eq!(counter.load(Ordering::SeqCst), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn running_task_is_cancelled_by_root() {
        let root = CancellationToken::new();
        let scheduler = JobScheduler::new(root.clone());
        let finished = Arc::new(AtomicUsize::new(0));
        let flag = Arc::clone(&finished);

        scheduler.arm(
            "a",
            Duration::ZERO,
            Box::pin(async move {
                tokio::time::sleep(Duration::from_secs(60)).await;
                flag.fetch_add(1, Ordering::SeqCst);
            }),
        );
        tokio::time::sleep(Duration::from_secs(1)).await;
        root.cancel();

        tokio::time::sleep(Duration::from_secs(120)).await;
        assert_eq!(finished.load(Ordering::SeqCst), 0);
    }
}
