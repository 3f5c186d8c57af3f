//! Readiness validation through the full orchestrator.

mod common;

use std::time::Duration;

use reelforge_core::job::JobFact;
use reelforge_core::pipeline_error::{ErrorType, STAGE_VALIDATION};
use reelforge_core::status::{RawStatus, ReadinessState};
use reelforge_pipeline::OrchestratorEvent;

use common::*;

// ---- Test: retrievable on the second check ----

/// A completed job whose artifact answers on the second probe ends `ready`
/// with two recorded checks.
#[tokio::test(start_paused = true)]
async fn artifact_ready_on_second_check() {
    let h = harness(test_config(), ScriptedProber::answering(&[false, true], false));
    let orch = &h.orchestrator;
    orch.submit(request("job-a")).await.unwrap();

    let outcome = orch
        .reconciler()
        .apply_push_event(JobFact::new("job-a", RawStatus::Completed).with_artifact(ARTIFACT_URL))
        .unwrap()
        .expect("job is registered");
    assert_eq!(outcome.job.readiness_state, ReadinessState::Validating);
    assert!(!outcome.job.url_validated);

    assert!(
        wait_until(|| orch.job("job-a").unwrap().readiness_state == ReadinessState::Ready).await
    );
    let job = orch.job("job-a").unwrap();
    assert!(job.url_validated);
    assert_eq!(job.validation_attempts, 2);
    assert_eq!(job.artifact_url.as_deref(), Some(ARTIFACT_URL));
    assert!(job.last_error.is_none());
    assert_eq!(h.prober.calls(), 2);
    assert!(!orch.validator().is_validating("job-a"));
}

// ---- Test: never retrievable ----

/// Five failed probes exhaust the budget and fail the job with a URL error.
#[tokio::test(start_paused = true)]
async fn unreachable_artifact_fails_after_budget() {
    let h = harness(test_config(), ScriptedProber::answering(&[], false));
    let orch = &h.orchestrator;
    orch.submit(request("job-b")).await.unwrap();

    orch.reconciler()
        .apply_push_event(JobFact::new("job-b", RawStatus::Completed).with_artifact(ARTIFACT_URL))
        .unwrap();

    assert!(
        wait_until(|| orch.job("job-b").unwrap().readiness_state == ReadinessState::Failed).await
    );
    let job = orch.job("job-b").unwrap();
    assert!(!job.url_validated);
    assert_eq!(job.validation_attempts, 5);
    let error = job.last_error.expect("failure carries an error");
    assert_eq!(error.error_type, ErrorType::UrlError);
    assert_eq!(error.stage, STAGE_VALIDATION);
    assert!(error.retryable);
    assert_eq!(h.prober.calls(), 5);

    // No further checks once the loop has given up.
    tokio::time::sleep(Duration::from_secs(30)).await;
    assert_eq!(h.prober.calls(), 5);
}

// ---- Test: backoff ----

/// Each failed check waits `base * attempt` before the next one.
#[tokio::test(start_paused = true)]
async fn checks_back_off_linearly() {
    let h = harness(test_config(), ScriptedProber::answering(&[], false));
    let orch = &h.orchestrator;
    orch.submit(request("job-t")).await.unwrap();

    orch.reconciler()
        .apply_push_event(JobFact::new("job-t", RawStatus::Completed).with_artifact(ARTIFACT_URL))
        .unwrap();
    assert!(
        wait_until(|| orch.job("job-t").unwrap().readiness_state == ReadinessState::Failed).await
    );

    let gaps: Vec<u128> = h.prober.gaps().iter().map(Duration::as_millis).collect();
    assert_eq!(gaps, vec![100, 200, 300, 400]);
}

// ---- Test: soft window ----

/// Passing the soft window is reported once and the checks carry on.
#[tokio::test(start_paused = true)]
async fn window_exceeded_is_reported_once() {
    let config = reelforge_pipeline::OrchestratorConfig {
        validation_window: Duration::ZERO,
        ..test_config()
    };
    let h = harness(config, ScriptedProber::answering(&[false, false, true], false));
    let orch = &h.orchestrator;
    let mut events = orch.subscribe();
    orch.submit(request("job-w")).await.unwrap();

    orch.reconciler()
        .apply_push_event(JobFact::new("job-w", RawStatus::Completed).with_artifact(ARTIFACT_URL))
        .unwrap();
    assert!(
        wait_until(|| orch.job("job-w").unwrap().readiness_state == ReadinessState::Ready).await
    );

    let events = drain_events(&mut events);
    let window_reports = events
        .iter()
        .filter(|e| matches!(e, OrchestratorEvent::ValidationWindowExceeded { .. }))
        .count();
    assert_eq!(window_reports, 1);
    assert!(events.iter().any(|e| matches!(
        e,
        OrchestratorEvent::JobReady { job_id, artifact_url } if job_id == "job-w" && artifact_url == ARTIFACT_URL
    )));
}

/// The window is measured on the runtime clock from the first check, so
/// it trips on the first check made after it has elapsed.
#[tokio::test(start_paused = true)]
async fn window_trips_after_elapsed_backoff() {
    let config = reelforge_pipeline::OrchestratorConfig {
        validation_window: Duration::from_millis(250),
        ..test_config()
    };
    // Checks at 0, 100, 300 and 600 ms; the fourth succeeds.
    let h = harness(config, ScriptedProber::answering(&[false, false, false, true], false));
    let orch = &h.orchestrator;
    let mut events = orch.subscribe();
    orch.submit(request("job-v")).await.unwrap();

    orch.reconciler()
        .apply_push_event(JobFact::new("job-v", RawStatus::Completed).with_artifact(ARTIFACT_URL))
        .unwrap();
    assert!(
        wait_until(|| orch.job("job-v").unwrap().readiness_state == ReadinessState::Ready).await
    );

    let reports: Vec<u32> = drain_events(&mut events)
        .into_iter()
        .filter_map(|e| match e {
            OrchestratorEvent::ValidationWindowExceeded { attempts, .. } => Some(attempts),
            _ => None,
        })
        .collect();
    assert_eq!(reports, vec![3]);
}

// ---- Test: one loop per job ----

/// Starting validation for a job already being checked does nothing.
#[tokio::test(start_paused = true)]
async fn duplicate_start_does_not_spawn_second_loop() {
    let h = harness(test_config(), ScriptedProber::answering(&[false], true));
    let orch = &h.orchestrator;
    orch.submit(request("job-d")).await.unwrap();

    orch.reconciler()
        .apply_push_event(JobFact::new("job-d", RawStatus::Completed).with_artifact(ARTIFACT_URL))
        .unwrap();
    assert!(orch.validator().is_validating("job-d"));
    assert!(!orch.validator().start("job-d"));

    assert!(
        wait_until(|| orch.job("job-d").unwrap().readiness_state == ReadinessState::Ready).await
    );
    assert_eq!(h.prober.calls(), 2);
}

// ---- Test: replaced artifact ----

/// A newer revision naming a different artifact restarts the check budget
/// and the job is only ready once the new URL is confirmed.
#[tokio::test(start_paused = true)]
async fn newer_artifact_restarts_budget() {
    let h = harness(test_config(), ScriptedProber::answering(&[false, false, true], false));
    let orch = &h.orchestrator;
    orch.submit(request("job-r")).await.unwrap();

    orch.reconciler()
        .apply_push_event(
            JobFact::new("job-r", RawStatus::Completed)
                .with_artifact("https://cdn.example/renders/old.mp4")
                .with_revision(1),
        )
        .unwrap();
    assert!(wait_until(|| h.prober.calls() >= 2).await);

    let outcome = orch
        .reconciler()
        .apply_push_event(
            JobFact::new("job-r", RawStatus::Completed)
                .with_artifact(ARTIFACT_URL)
                .with_revision(2),
        )
        .unwrap()
        .unwrap();
    assert_eq!(outcome.job.readiness_state, ReadinessState::Validating);
    assert_eq!(outcome.job.validation_attempts, 0);

    assert!(
        wait_until(|| orch.job("job-r").unwrap().readiness_state == ReadinessState::Ready).await
    );
    let job = orch.job("job-r").unwrap();
    assert_eq!(job.artifact_url.as_deref(), Some(ARTIFACT_URL));
    assert!(job.url_validated);
}
