//! Scripted collaborators for testing generation runs.

use async_trait::async_trait;
use parking_lot::Mutex;
use serde_json::{json, Value};
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use crate::backends::{
    commands, BackendResponse, ExternalRenderService, JobPoll, JobStatus, RenderBackend,
    RenderJobSpec, SubmittedJob,
};
use crate::core::{GenerationError, GenerationStage, GenerationStatus};
use crate::errors::GenflowError;
use crate::pipeline::GenerationObserver;
use crate::storage::{InMemoryKeyValueStore, KeyValueStore};

const ARTIFACT_HOST: &str = "https://render.test";

#[derive(Debug, Clone)]
struct ScriptedFailure {
    remaining: usize,
    message: String,
}

/// A [`RenderBackend`] answering every stage command with canned data.
///
/// Commands can be scripted to fail a number of times or to take a while.
#[derive(Debug)]
pub struct ScriptedRenderBackend {
    failures: Mutex<HashMap<String, ScriptedFailure>>,
    delays: Mutex<HashMap<String, Duration>>,
    quality_score: Mutex<f64>,
    calls: Mutex<Vec<(String, Value)>>,
}

impl Default for ScriptedRenderBackend {
    fn default() -> Self {
        Self {
            failures: Mutex::new(HashMap::new()),
            delays: Mutex::new(HashMap::new()),
            quality_score: Mutex::new(0.8),
            calls: Mutex::new(Vec::new()),
        }
    }
}

impl ScriptedRenderBackend {
    /// Creates a backend where every command succeeds.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Makes `command` fail `times` times with `message`, then succeed.
    #[must_use]
    pub fn fail_command(self, command: &str, times: usize, message: impl Into<String>) -> Self {
        self.failures.lock().insert(
            command.to_string(),
            ScriptedFailure {
                remaining: times,
                message: message.into(),
            },
        );
        self
    }

    /// Makes `command` always fail with `message`.
    #[must_use]
    pub fn always_fail(self, command: &str, message: impl Into<String>) -> Self {
        self.fail_command(command, usize::MAX, message)
    }

    /// Delays every call of `command`.
    #[must_use]
    pub fn with_delay(self, command: &str, delay: Duration) -> Self {
        self.delays.lock().insert(command.to_string(), delay);
        self
    }

    /// Sets the score returned for every unit by quality analysis.
    #[must_use]
    pub fn with_quality_score(self, score: f64) -> Self {
        *self.quality_score.lock() = score;
        self
    }

    /// Every call received, in order.
    #[must_use]
    pub fn calls(&self) -> Vec<(String, Value)> {
        self.calls.lock().clone()
    }

    /// Number of calls of `command`.
    #[must_use]
    pub fn call_count(&self, command: &str) -> usize {
        self.calls.lock().iter().filter(|(c, _)| c == command).count()
    }

    fn take_failure(&self, command: &str) -> Option<String> {
        let mut failures = self.failures.lock();
        let failure = failures.get_mut(command)?;
        if failure.remaining == 0 {
            return None;
        }
        failure.remaining = failure.remaining.saturating_sub(1);
        Some(failure.message.clone())
    }

    fn respond(&self, command: &str, args: &Value) -> BackendResponse {
        let project_id = args["project_id"].as_str().unwrap_or("unknown");
        match command {
            commands::GENERATE_GRID => BackendResponse::ok(json!({
                "grid_url": format!("{ARTIFACT_HOST}/{project_id}/grid.png"),
            })),
            commands::PROMOTE_UNIT => {
                let unit_id = args["unit_id"].as_str().unwrap_or("unknown");
                BackendResponse::ok(json!({
                    "artifact_url": format!("{ARTIFACT_HOST}/{project_id}/{unit_id}/promoted.png"),
                }))
            }
            commands::ANALYZE_QUALITY => {
                let score = *self.quality_score.lock();
                let scores: serde_json::Map<String, Value> = args["units"]
                    .as_array()
                    .map(|units| {
                        units
                            .iter()
                            .filter_map(|u| u["unit_id"].as_str())
                            .map(|id| (id.to_string(), json!(score)))
                            .collect()
                    })
                    .unwrap_or_default();
                BackendResponse::ok(json!({ "scores": scores }))
            }
            commands::EXPORT_PROJECT => BackendResponse::ok(json!({
                "primary_artifact_url": format!("{ARTIFACT_HOST}/{project_id}/export.zip"),
            })),
            other => BackendResponse::fail(format!("unsupported command '{other}'")),
        }
    }
}

#[async_trait]
impl RenderBackend for ScriptedRenderBackend {
    async fn invoke(&self, command: &str, args: Value) -> BackendResponse {
        self.calls.lock().push((command.to_string(), args.clone()));

        let delay = self.delays.lock().get(command).copied();
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }

        if let Some(message) = self.take_failure(command) {
            return BackendResponse::fail(message);
        }
        self.respond(command, &args)
    }
}

#[derive(Debug, Clone)]
struct FakeJob {
    project_id: String,
    unit_id: String,
    polls: usize,
}

/// An [`ExternalRenderService`] with in-memory jobs.
///
/// Jobs complete after a configurable number of polls, or never.
#[derive(Debug)]
pub struct FakeRenderService {
    jobs: Mutex<HashMap<String, FakeJob>>,
    submit_failures: Mutex<Option<ScriptedFailure>>,
    polls_until_complete: usize,
    never_complete: bool,
    fail_jobs: bool,
    next_job: AtomicUsize,
    submits: AtomicUsize,
    polls: AtomicUsize,
}

impl Default for FakeRenderService {
    fn default() -> Self {
        Self {
            jobs: Mutex::new(HashMap::new()),
            submit_failures: Mutex::new(None),
            polls_until_complete: 1,
            never_complete: false,
            fail_jobs: false,
            next_job: AtomicUsize::new(1),
            submits: AtomicUsize::new(0),
            polls: AtomicUsize::new(0),
        }
    }
}

impl FakeRenderService {
    /// Creates a service whose jobs complete on the first poll.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Makes the next `times` submits fail with `message`.
    #[must_use]
    pub fn fail_submits(self, times: usize, message: impl Into<String>) -> Self {
        *self.submit_failures.lock() = Some(ScriptedFailure {
            remaining: times,
            message: message.into(),
        });
        self
    }

    /// Reports jobs as running until they were polled `polls` times.
    #[must_use]
    pub fn polls_until_complete(mut self, polls: usize) -> Self {
        self.polls_until_complete = polls.max(1);
        self
    }

    /// Keeps every job running forever.
    #[must_use]
    pub fn never_complete(mut self) -> Self {
        self.never_complete = true;
        self
    }

    /// Finishes every job as failed.
    #[must_use]
    pub fn fail_jobs(mut self) -> Self {
        self.fail_jobs = true;
        self
    }

    /// Number of submit calls, including failed ones.
    #[must_use]
    pub fn submit_count(&self) -> usize {
        self.submits.load(Ordering::SeqCst)
    }

    /// Number of poll calls.
    #[must_use]
    pub fn poll_count(&self) -> usize {
        self.polls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl ExternalRenderService for FakeRenderService {
    async fn submit(&self, job: &RenderJobSpec) -> BackendResponse<SubmittedJob> {
        self.submits.fetch_add(1, Ordering::SeqCst);

        if let Some(failure) = self.submit_failures.lock().as_mut() {
            if failure.remaining > 0 {
                failure.remaining -= 1;
                return BackendResponse::fail(failure.message.clone());
            }
        }

        let job_id = format!("job-{}", self.next_job.fetch_add(1, Ordering::SeqCst));
        self.jobs.lock().insert(
            job_id.clone(),
            FakeJob {
                project_id: job.project_id.clone(),
                unit_id: job.unit_id.clone(),
                polls: 0,
            },
        );
        BackendResponse::ok(SubmittedJob { job_id })
    }

    async fn poll(&self, job_id: &str) -> BackendResponse<JobPoll> {
        self.polls.fetch_add(1, Ordering::SeqCst);

        let mut jobs = self.jobs.lock();
        let Some(job) = jobs.get_mut(job_id) else {
            return BackendResponse::fail(format!("job '{job_id}' not found"));
        };
        job.polls += 1;

        let poll = if self.never_complete || job.polls < self.polls_until_complete {
            JobPoll {
                status: if job.polls == 1 { JobStatus::Queued } else { JobStatus::Running },
                outputs: Vec::new(),
                error: None,
            }
        } else if self.fail_jobs {
            JobPoll {
                status: JobStatus::Failed,
                outputs: Vec::new(),
                error: Some("render worker crashed".to_string()),
            }
        } else {
            JobPoll {
                status: JobStatus::Completed,
                outputs: vec![format!(
                    "{ARTIFACT_HOST}/{}/{}/render.png",
                    job.project_id, job.unit_id
                )],
                error: None,
            }
        };
        BackendResponse::ok(poll)
    }
}

/// A [`KeyValueStore`] that counts physical writes.
///
/// Writes can be slowed down to widen race windows, or made to fail.
#[derive(Debug, Default)]
pub struct CountingKeyValueStore {
    inner: InMemoryKeyValueStore,
    writes: AtomicUsize,
    write_delay: Option<Duration>,
    fail_writes: AtomicBool,
}

impl CountingKeyValueStore {
    /// Creates an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Delays every `set` by `delay`.
    #[must_use]
    pub fn with_write_delay(mut self, delay: Duration) -> Self {
        self.write_delay = Some(delay);
        self
    }

    /// Makes every subsequent `set` fail.
    pub fn fail_writes(&self, fail: bool) {
        self.fail_writes.store(fail, Ordering::SeqCst);
    }

    /// Number of `set` calls that reached the store.
    #[must_use]
    pub fn write_count(&self) -> usize {
        self.writes.load(Ordering::SeqCst)
    }

    /// The underlying in-memory store.
    #[must_use]
    pub fn inner(&self) -> &InMemoryKeyValueStore {
        &self.inner
    }
}

#[async_trait]
impl KeyValueStore for CountingKeyValueStore {
    async fn get(&self, key: &str) -> Result<Option<String>, GenflowError> {
        self.inner.get(key).await
    }

    async fn set(&self, key: &str, value: String) -> Result<(), GenflowError> {
        self.writes.fetch_add(1, Ordering::SeqCst);
        if let Some(delay) = self.write_delay {
            tokio::time::sleep(delay).await;
        }
        if self.fail_writes.load(Ordering::SeqCst) {
            return Err(GenflowError::Storage(format!("write '{key}': disk full")));
        }
        self.inner.set(key, value).await
    }

    async fn delete(&self, key: &str) -> Result<(), GenflowError> {
        self.inner.delete(key).await
    }

    async fn list_keys(&self) -> Result<Vec<String>, GenflowError> {
        self.inner.list_keys().await
    }
}

/// A [`GenerationObserver`] that records every callback.
#[derive(Debug, Default, Clone)]
pub struct RecordingObserver {
    progress: Arc<Mutex<Vec<GenerationStatus>>>,
    stages: Arc<Mutex<Vec<(GenerationStage, Value)>>>,
    errors: Arc<Mutex<Vec<GenerationError>>>,
}

impl RecordingObserver {
    /// Creates an observer with nothing recorded.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Every status reported, in order.
    #[must_use]
    pub fn progress(&self) -> Vec<GenerationStatus> {
        self.progress.lock().clone()
    }

    /// Progress percentages reported, in order.
    #[must_use]
    pub fn progress_values(&self) -> Vec<f64> {
        self.progress.lock().iter().map(|s| s.progress).collect()
    }

    /// Stages reported complete, in order.
    #[must_use]
    pub fn completed_stages(&self) -> Vec<GenerationStage> {
        self.stages.lock().iter().map(|(s, _)| *s).collect()
    }

    /// The result payload reported for `stage`.
    #[must_use]
    pub fn stage_result(&self, stage: GenerationStage) -> Option<Value> {
        self.stages
            .lock()
            .iter()
            .find(|(s, _)| *s == stage)
            .map(|(_, v)| v.clone())
    }

    /// Every error reported, in order.
    #[must_use]
    pub fn errors(&self) -> Vec<GenerationError> {
        self.errors.lock().clone()
    }
}

impl GenerationObserver for RecordingObserver {
    fn on_progress(&self, status: &GenerationStatus) {
        self.progress.lock().push(status.clone());
    }

    fn on_stage_complete(&self, stage: GenerationStage, result: &Value) {
        self.stages.lock().push((stage, result.clone()));
    }

    fn on_error(&self, error: &GenerationError) {
        self.errors.lock().push(error.clone());
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn job(unit_id: &str) -> RenderJobSpec {
        RenderJobSpec {
            project_id: "p1".to_string(),
            unit_id: unit_id.to_string(),
            prompt: "a cat".to_string(),
            grid_url: "g".to_string(),
            params: Value::Null,
            settings: Value::Null,
        }
    }

    #[tokio::test]
    async fn test_scripted_backend_fails_then_succeeds() {
        let backend =
            ScriptedRenderBackend::new().fail_command(commands::GENERATE_GRID, 1, "Network timeout");

        let first = backend.invoke(commands::GENERATE_GRID, json!({"project_id": "p1"})).await;
        let second = backend.invoke(commands::GENERATE_GRID, json!({"project_id": "p1"})).await;

        assert!(!first.success);
        assert_eq!(first.error.as_deref(), Some("Network timeout"));
        assert!(second.success);
        assert_eq!(backend.call_count(commands::GENERATE_GRID), 2);
    }

    #[tokio::test]
    async fn test_scripted_backend_scores_every_unit() {
        let backend = ScriptedRenderBackend::new().with_quality_score(0.5);
        let resp = backend
            .invoke(
                commands::ANALYZE_QUALITY,
                json!({"units": [{"unit_id": "a"}, {"unit_id": "b"}]}),
            )
            .await;

        let data = resp.into_result(commands::ANALYZE_QUALITY).unwrap();
        assert_eq!(data["scores"]["a"], 0.5);
        assert_eq!(data["scores"]["b"], 0.5);
    }

    #[tokio::test]
    async fn test_fake_service_completes_after_polls() {
        let service = FakeRenderService::new().polls_until_complete(2);
        let submitted = service.submit(&job("u1")).await.into_result("submit").unwrap();

        let first = service.poll(&submitted.job_id).await.into_result("poll").unwrap();
        let second = service.poll(&submitted.job_id).await.into_result("poll").unwrap();

        assert!(!first.status.is_finished());
        assert_eq!(second.status, JobStatus::Completed);
        assert_eq!(second.outputs.len(), 1);
        assert_eq!(service.poll_count(), 2);
    }

    #[tokio::test]
    async fn test_fake_service_submit_failures() {
        let service = FakeRenderService::new().fail_submits(1, "Service unavailable");
        assert!(!service.submit(&job("u1")).await.success);
        assert!(service.submit(&job("u1")).await.success);
        assert_eq!(service.submit_count(), 2);
    }

    #[tokio::test]
    async fn test_counting_store_failures_still_count() {
        let store = CountingKeyValueStore::new();
        store.set("a", "1".to_string()).await.unwrap();
        store.fail_writes(true);
        assert!(store.set("a", "2".to_string()).await.is_err());

        assert_eq!(store.write_count(), 2);
        assert_eq!(store.get("a").await.unwrap().as_deref(), Some("1"));
    }
}
