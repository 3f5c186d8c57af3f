//! Orchestrator lifecycle: polling, aggregation, shutdown.

mod common;

use std::time::Duration;

use assert_matches::assert_matches;

use reelforge_core::catalog::EngineCatalog;
use reelforge_core::job::JobFact;
use reelforge_core::registry::RegistryLifecycle;
use reelforge_core::status::{RawStatus, ReadinessState};
use reelforge_pipeline::{Orchestrator, OrchestratorConfig, OrchestratorError, OrchestratorEvent};

use common::*;

// ---- Test: poller lifetime ----

/// The poller runs only while some job still waits on the producer.
#[tokio::test(start_paused = true)]
async fn poller_stops_when_nothing_awaits_producer() {
    let h = harness(test_config(), ScriptedProber::answering(&[], true));
    let orch = &h.orchestrator;
    assert!(!orch.is_polling());

    orch.submit(request("job-1")).await.unwrap();
    assert!(orch.is_polling());

    h.store
        .set(JobFact::new("job-1", RawStatus::Completed).with_artifact(ARTIFACT_URL));
    assert!(
        wait_until(|| orch.job("job-1").unwrap().readiness_state == ReadinessState::Ready).await
    );
    assert!(wait_until(|| !orch.is_polling()).await);

    // New work restarts it.
    orch.submit(request("job-2")).await.unwrap();
    assert!(orch.is_polling());
}

/// Repeated store failures are reported once the threshold is reached.
#[tokio::test(start_paused = true)]
async fn repeated_poll_failures_publish_degraded_event() {
    let config = OrchestratorConfig {
        max_consecutive_poll_failures: 2,
        ..test_config()
    };
    let h = harness(config, ScriptedProber::default());
    h.store.set_failing(true);
    let orch = &h.orchestrator;
    let mut events = orch.subscribe();

    orch.submit(request("job-1")).await.unwrap();
    let event = next_event_matching(&mut events, |e| {
        matches!(e, OrchestratorEvent::PollDegraded { .. })
    })
    .await;
    assert_matches!(
        event,
        Some(OrchestratorEvent::PollDegraded { consecutive_failures: 2, .. })
    );

    // The poller keeps going and recovers once the store does.
    assert!(orch.is_polling());
    h.store.set_failing(false);
    h.store.set(JobFact::new("job-1", RawStatus::Processing));
    assert!(
        wait_until(|| orch.job("job-1").unwrap().readiness_state == ReadinessState::Processing)
            .await
    );
}

// ---- Test: aggregation ----

/// Campaign status only counts that campaign's jobs.
#[tokio::test(start_paused = true)]
async fn campaign_status_is_scoped() {
    let h = harness(test_config(), ScriptedProber::answering(&[], true));
    let orch = &h.orchestrator;
    for (id, campaign) in [("job-1", "spring"), ("job-2", "spring"), ("job-3", "fall")] {
        let mut req = request(id);
        req.campaign_id = Some(campaign.to_string());
        orch.submit(req).await.unwrap();
    }

    orch.reconciler()
        .apply_push_event(JobFact::new("job-1", RawStatus::Completed).with_artifact(ARTIFACT_URL))
        .unwrap();
    assert!(
        wait_until(|| orch.job("job-1").unwrap().readiness_state == ReadinessState::Ready).await
    );

    let spring = orch.campaign_status("spring");
    assert_eq!(spring.total, 2);
    assert_eq!(spring.ready_count, 1);
    assert_eq!(spring.processing_count, 1);
    assert_eq!(spring.progress_percent, 50);
    assert!(!spring.overall_complete);

    let fall = orch.campaign_status("fall");
    assert_eq!(fall.total, 1);
    assert_eq!(fall.ready_count, 0);

    assert_eq!(orch.status().total, 3);
    assert_eq!(orch.campaign_status("winter").total, 0);
}

/// Submitted jobs carry the engine picked by the selector.
#[tokio::test(start_paused = true)]
async fn submit_records_selected_engine() {
    let h = harness(test_config(), ScriptedProber::default());
    let orch = &h.orchestrator;
    let mut events = orch.subscribe();

    let job = orch.submit(request("job-1")).await.unwrap();
    assert_eq!(job.readiness_state, ReadinessState::Pending);
    assert_eq!(job.attempt_count, 0);
    assert!(job.escalation_mode.is_none());

    let requests = h.submitter.requests();
    assert_eq!(requests.len(), 1);
    assert_eq!(requests[0].engine_id, job.engine_used);
    assert!(requests[0].mode.is_none());
    assert_eq!(requests[0].requested_config["ratio"], "9:16");

    assert_matches!(
        events.try_recv(),
        Ok(OrchestratorEvent::JobSubmitted { job_id, .. }) if job_id == "job-1"
    );

    // Ids are unique within a registry.
    assert!(orch.submit(request("job-1")).await.is_err());
}

/// A request without an id gets a generated one.
#[tokio::test(start_paused = true)]
async fn submit_generates_missing_id() {
    let h = harness(test_config(), ScriptedProber::default());
    let mut req = request("unused");
    req.id = None;

    let job = h.orchestrator.submit(req).await.unwrap();
    assert!(uuid::Uuid::parse_str(&job.id).is_ok());
}

// ---- Test: shutdown ----

/// Shutdown cancels pending timers, stops the poller, and disposes the
/// registry; jobs stay readable.
#[tokio::test(start_paused = true)]
async fn shutdown_cancels_background_work() {
    let config = OrchestratorConfig {
        validation_base_delay: Duration::from_secs(60),
        ..test_config()
    };
    let h = harness(config, ScriptedProber::default());
    let orch = &h.orchestrator;
    orch.submit(request("job-1")).await.unwrap();
    orch.submit(request("job-2")).await.unwrap();

    orch.reconciler()
        .apply_push_event(JobFact::new("job-1", RawStatus::Completed).with_artifact(ARTIFACT_URL))
        .unwrap();
    assert!(wait_until(|| h.prober.calls() == 1 && orch.scheduler().pending_count() == 1).await);
    assert!(orch.is_polling());

    orch.shutdown().await;

    assert!(orch.is_shut_down());
    assert_eq!(orch.scheduler().pending_count(), 0);
    assert_eq!(orch.registry().lifecycle(), RegistryLifecycle::Disposed);
    assert!(wait_until(|| !orch.is_polling()).await);

    tokio::time::sleep(Duration::from_secs(300)).await;
    assert_eq!(h.prober.calls(), 1);
    assert_eq!(
        orch.job("job-1").unwrap().readiness_state,
        ReadinessState::Validating
    );

    assert_matches!(
        orch.submit(request("job-3")).await,
        Err(OrchestratorError::ShutDown)
    );
    assert_matches!(orch.retry("job-2").await, Err(OrchestratorError::ShutDown));

    // A second shutdown is harmless.
    orch.shutdown().await;
}

// ---- Test: startup validation ----

#[tokio::test]
async fn start_rejects_empty_catalog() {
    let result = Orchestrator::start(
        test_config(),
        EngineCatalog::new(Vec::new()).unwrap(),
        collaborators(),
    );
    assert_matches!(result, Err(OrchestratorError::Config(_)));
}

#[tokio::test]
async fn start_rejects_invalid_config() {
    let config = OrchestratorConfig {
        poll_batch_size: 0,
        ..test_config()
    };
    let result = Orchestrator::start(config, EngineCatalog::builtin(), collaborators());
    assert_matches!(result, Err(OrchestratorError::Config(_)));
}
