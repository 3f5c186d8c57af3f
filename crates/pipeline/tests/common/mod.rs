//! Shared fakes and helpers for the pipeline integration tests.

#![allow(dead_code)]

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::broadcast;
use tokio_util::sync::CancellationToken;

use reelforge_core::catalog::EngineCatalog;
use reelforge_core::job::JobFact;
use reelforge_core::selector::{ContentShape, SelectionPreferences};
use reelforge_core::types::JobId;
use reelforge_pipeline::{
    ArtifactProber, Collaborators, FactSink, GenerationSubmitter, JobStore, NewJobRequest,
    Orchestrator, OrchestratorConfig, OrchestratorEvent, ProbeError, PushSource, StoreError,
    SubmissionRequest, SubmissionResponse, SubmitError,
};

pub const ARTIFACT_URL: &str = "https://cdn.example/renders/clip.mp4";

// ---------------------------------------------------------------------------
// FakeSubmitter
// ---------------------------------------------------------------------------

/// Records every submission and answers from a script, `Accepted` by default.
#[derive(Default)]
pub struct FakeSubmitter {
    requests: Mutex<Vec<SubmissionRequest>>,
    script: Mutex<VecDeque<Result<SubmissionResponse, SubmitError>>>,
    latency_ms: AtomicU64,
}

impl FakeSubmitter {
    pub fn respond_with(&self, response: Result<SubmissionResponse, SubmitError>) {
        self.script.lock().unwrap().push_back(response);
    }

    pub fn set_latency(&self, latency: Duration) {
        self.latency_ms
            .store(latency.as_millis() as u64, Ordering::SeqCst);
    }

    pub fn requests(&self) -> Vec<SubmissionRequest> {
        self.requests.lock().unwrap().clone()
    }

    /// Submissions made by the retry controller (those carrying a mode).
    pub fn resubmissions(&self) -> Vec<SubmissionRequest> {
        self.requests()
            .into_iter()
            .filter(|r| r.mode.is_some())
            .collect()
    }
}

#[async_trait]
impl GenerationSubmitter for FakeSubmitter {
    async fn submit(&self, request: &SubmissionRequest) -> Result<SubmissionResponse, SubmitError> {
        self.requests.lock().unwrap().push(request.clone());
        let latency = self.latency_ms.load(Ordering::SeqCst);
        if latency > 0 {
            tokio::time::sleep(Duration::from_millis(latency)).await;
        }
        self.script
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or(Ok(SubmissionResponse::Accepted))
    }
}

// ---------------------------------------------------------------------------
// FakeStore
// ---------------------------------------------------------------------------

/// Job store serving whatever snapshots the test put into it.
#[derive(Default)]
pub struct FakeStore {
    facts: Mutex<HashMap<JobId, JobFact>>,
    failing: AtomicBool,
    calls: Mutex<Vec<Vec<JobId>>>,
}

impl FakeStore {
    pub fn set(&self, fact: JobFact) {
        self.facts.lock().unwrap().insert(fact.id.clone(), fact);
    }

    pub fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }

    pub fn call_count(&self) -> usize {
        self.calls.lock().unwrap().len()
    }
}

#[async_trait]
impl JobStore for FakeStore {
    async fn fetch_statuses(&self, ids: &[JobId]) -> Result<Vec<JobFact>, StoreError> {
        self.calls.lock().unwrap().push(ids.to_vec());
        if self.failing.load(Ordering::SeqCst) {
            return Err(StoreError("store unavailable".into()));
        }
        let facts = self.facts.lock().unwrap();
        Ok(ids.iter().filter_map(|id| facts.get(id).cloned()).collect())
    }
}

// ---------------------------------------------------------------------------
// ScriptedProber
// ---------------------------------------------------------------------------

/// Answers probes from a script, then with a fixed default.
#[derive(Default)]
pub struct ScriptedProber {
    answers: Mutex<VecDeque<bool>>,
    default_answer: AtomicBool,
    calls: AtomicUsize,
    called_at: Mutex<Vec<tokio::time::Instant>>,
}

impl ScriptedProber {
    pub fn answering(answers: &[bool], default_answer: bool) -> Self {
        Self {
            answers: Mutex::new(answers.iter().copied().collect()),
            default_answer: AtomicBool::new(default_answer),
            calls: AtomicUsize::new(0),
            called_at: Mutex::new(Vec::new()),
        }
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    /// Time between consecutive probes, on the runtime clock.
    pub fn gaps(&self) -> Vec<Duration> {
        let called_at = self.called_at.lock().unwrap();
        called_at.windows(2).map(|w| w[1] - w[0]).collect()
    }
}

#[async_trait]
impl ArtifactProber for ScriptedProber {
    async fn probe(&self, _url: &str) -> Result<bool, ProbeError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.called_at.lock().unwrap().push(tokio::time::Instant::now());
        let scripted = self.answers.lock().unwrap().pop_front();
        Ok(scripted.unwrap_or_else(|| self.default_answer.load(Ordering::SeqCst)))
    }
}

// ---------------------------------------------------------------------------
// FakePushSource
// ---------------------------------------------------------------------------

/// Pushes a fixed list of facts, then idles until cancelled.
#[derive(Default)]
pub struct FakePushSource {
    facts: Mutex<Vec<JobFact>>,
    stopped: AtomicBool,
}

impl FakePushSource {
    pub fn with_facts(facts: Vec<JobFact>) -> Self {
        Self {
            facts: Mutex::new(facts),
            stopped: AtomicBool::new(false),
        }
    }

    pub fn stopped(&self) -> bool {
        self.stopped.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl PushSource for FakePushSource {
    async fn run(&self, sink: FactSink, cancel: CancellationToken) {
        let facts: Vec<JobFact> = self.facts.lock().unwrap().drain(..).collect();
        for fact in facts {
            if !sink.send(fact).await {
                break;
            }
        }
        cancel.cancelled().await;
        self.stopped.store(true, Ordering::SeqCst);
    }
}

// ---------------------------------------------------------------------------
// Harness
// ---------------------------------------------------------------------------

pub struct Harness {
    pub orchestrator: Orchestrator,
    pub submitter: Arc<FakeSubmitter>,
    pub store: Arc<FakeStore>,
    pub prober: Arc<ScriptedProber>,
}

/// Fast timings, no automatic retry.
pub fn test_config() -> OrchestratorConfig {
    OrchestratorConfig {
        poll_interval: Duration::from_secs(1),
        validation_base_delay: Duration::from_millis(100),
        auto_retry: false,
        ..OrchestratorConfig::default()
    }
}

pub fn harness(config: OrchestratorConfig, prober: ScriptedProber) -> Harness {
    let submitter = Arc::new(FakeSubmitter::default());
    let store = Arc::new(FakeStore::default());
    let prober = Arc::new(prober);
    let orchestrator = Orchestrator::start(
        config,
        EngineCatalog::builtin(),
        Collaborators {
            submitter: submitter.clone(),
            store: store.clone(),
            prober: prober.clone(),
        },
    )
    .expect("orchestrator should start");
    Harness {
        orchestrator,
        submitter,
        store,
        prober,
    }
}

/// Default fakes, for tests that never reach the collaborators.
pub fn collaborators() -> Collaborators {
    Collaborators {
        submitter: Arc::new(FakeSubmitter::default()),
        store: Arc::new(FakeStore::default()),
        prober: Arc::new(ScriptedProber::default()),
    }
}

pub fn request(id: &str) -> NewJobRequest {
    NewJobRequest {
        id: Some(id.to_string()),
        campaign_id: None,
        requested_config: serde_json::json!({"ratio": "9:16", "style": "documentary"}),
        preferences: SelectionPreferences::default(),
        shape: ContentShape::new(8.0),
    }
}

/// Poll `condition` every 100ms of (virtual) time for up to a minute.
pub async fn wait_until<F: Fn() -> bool>(condition: F) -> bool {
    for _ in 0..600 {
        if condition() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(100)).await;
    }
    condition()
}

/// Receive events until one matches `predicate`, or give up after a minute.
pub async fn next_event_matching<F>(
    rx: &mut broadcast::Receiver<OrchestratorEvent>,
    predicate: F,
) -> Option<OrchestratorEvent>
where
    F: Fn(&OrchestratorEvent) -> bool,
{
    let deadline = tokio::time::Instant::now() + Duration::from_secs(60);
    loop {
        let remaining = deadline.saturating_duration_since(tokio::time::Instant::now());
        match tokio::time::timeout(remaining, rx.recv()).await {
            Ok(Ok(event)) if predicate(&event) => return Some(event),
            Ok(Ok(_)) | Ok(Err(broadcast::error::RecvError::Lagged(_))) => continue,
            Ok(Err(broadcast::error::RecvError::Closed)) | Err(_) => return None,
        }
    }
}

/// Drain whatever events are already buffered.
pub fn drain_events(rx: &mut broadcast::Receiver<OrchestratorEvent>) -> Vec<OrchestratorEvent> {
    let mut events = Vec::new();
    while let Ok(event) = rx.try_recv() {
        events.push(event);
    }
    events
}
