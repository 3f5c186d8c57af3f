//! Scoped push subscription.
//!
//! [`PushSubscription`] owns the task running a [`PushSource`]. Dropping
//! the subscription, calling [`PushSubscription::unsubscribe`], or shutting
//! the orchestrator down all cancel the source.

use std::sync::Arc;
use std::time::Duration;

use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::collaborators::PushSource;
use crate::reconciler::FactSink;

/// How long `unsubscribe` waits for the source task to exit.
const UNSUBSCRIBE_TIMEOUT: Duration = Duration::from_secs(5);

pub struct PushSubscription {
    cancel: CancellationToken,
    handle: Option<JoinHandle<()>>,
}

impl PushSubscription {
    pub(crate) fn spawn(
        source: Arc<dyn PushSource>,
        sink: FactSink,
        parent: &CancellationToken,
    ) -> Self {
        let cancel = parent.child_token();
        let task_cancel = cancel.clone();
        let handle = tokio::spawn(async move {
            tracing::info!("Push subscription started");
            source.run(sink, task_cancel).await;
            tracing::info!("Push subscription ended");
        });
        Self {
            cancel,
            handle: Some(handle),
        }
    }

    pub fn is_active(&self) -> bool {
        !self.cancel.is_cancelled() && self.handle.as_ref().is_some_and(|h| !h.is_finished())
    }

    /// Cancel the source and wait briefly for it to exit.
    pub async fn unsubscribe(mut self) {
        self.cancel.cancel();
        if let Some(handle) = self.handle.take() {
            if tokio::time::timeout(UNSUBSCRIBE_TIMEOUT, handle).await.is_err() {
                tracing::warn!("Push source did not stop within the unsubscribe timeout");
            }
        }
    }
}

impl Drop for PushSubscription {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}
