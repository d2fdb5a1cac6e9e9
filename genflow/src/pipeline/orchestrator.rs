//! Drives the fixed stage sequence of a generation run.

use super::observer::GenerationObserver;
use super::progress::ProgressTracker;
use crate::backends::{commands, ExternalRenderService, JobStatus, RenderBackend, RenderJobSpec};
use crate::cancellation::CancellationToken;
use crate::config::GeneratorConfig;
use crate::core::{
    GeneratedUnit, GenerationError, GenerationResult, GenerationStage, GenerationStatus, Project,
    UnitSpec,
};
use crate::errors::{GenflowError, Severity};
use crate::events::{EventKind, EventSink, GenerationEvent, NoOpEventSink};
use crate::observability::{generation_span, stage_span, StageTimer};
use crate::retry::{ErrorClassifier, ErrorRecord, RetryContext, RetryExecutor, RetryPolicy};
use crate::storage::{CheckpointStore, StatusSource};
use crate::utils::{Clock, SystemClock};
use parking_lot::RwLock;
use serde_json::{json, Value};
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, info, warn, Instrument};
use uuid::Uuid;

/// Clears the generating flag when a run ends, however it ends.
struct GeneratingGuard<'a>(&'a AtomicBool);

impl<'a> GeneratingGuard<'a> {
    fn acquire(flag: &'a AtomicBool) -> Option<Self> {
        flag.compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .ok()
            .map(|_| Self(flag))
    }
}

impl Drop for GeneratingGuard<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

/// Mutable state of one run.
struct RunState<'a> {
    project: &'a Project,
    observer: &'a dyn GenerationObserver,
    run_id: Uuid,
    policy: RetryPolicy,
    token: Arc<CancellationToken>,
    tracker: ProgressTracker,
    completed: Vec<GenerationStage>,
    units: Vec<GeneratedUnit>,
    grid_url: Option<String>,
    primary_artifact_url: Option<String>,
}

/// Runs the generation pipeline for one project at a time.
///
/// Stages run strictly in [`GenerationStage::PIPELINE`] order; units inside
/// a per-unit stage run one after another. Every stage body runs through
/// the [`RetryExecutor`], a checkpoint is written after each successful
/// stage, and [`generate`](Self::generate) never fails: every failure path
/// resolves to `None` with details delivered through the observer and the
/// checkpoint.
pub struct PipelineOrchestrator {
    backend: Arc<dyn RenderBackend>,
    render_service: Arc<dyn ExternalRenderService>,
    checkpoints: Arc<CheckpointStore>,
    events: Arc<dyn EventSink>,
    classifier: Arc<ErrorClassifier>,
    clock: Arc<dyn Clock>,
    executor: RetryExecutor,
    config: GeneratorConfig,
    generating: AtomicBool,
    cancel_token: RwLock<Arc<CancellationToken>>,
    current_status: Arc<RwLock<Option<GenerationStatus>>>,
}

impl PipelineOrchestrator {
    /// Creates an orchestrator with default configuration, classifier,
    /// system clock and no event sink.
    #[must_use]
    pub fn new(
        backend: Arc<dyn RenderBackend>,
        render_service: Arc<dyn ExternalRenderService>,
        checkpoints: Arc<CheckpointStore>,
    ) -> Self {
        let classifier = Arc::new(ErrorClassifier::new());
        let clock: Arc<dyn Clock> = Arc::new(SystemClock);
        Self {
            backend,
            render_service,
            checkpoints,
            events: Arc::new(NoOpEventSink),
            executor: RetryExecutor::new(classifier.clone(), clock.clone()),
            classifier,
            clock,
            config: GeneratorConfig::default(),
            generating: AtomicBool::new(false),
            cancel_token: RwLock::new(Arc::new(CancellationToken::new())),
            current_status: Arc::new(RwLock::new(None)),
        }
    }

    /// Sets the event sink.
    #[must_use]
    pub fn with_event_sink(mut self, events: Arc<dyn EventSink>) -> Self {
        self.events = events;
        self
    }

    /// Sets the configuration.
    #[must_use]
    pub fn with_config(mut self, config: GeneratorConfig) -> Self {
        self.config = config;
        self
    }

    /// Sets the error classifier.
    #[must_use]
    pub fn with_classifier(mut self, classifier: ErrorClassifier) -> Self {
        self.classifier = Arc::new(classifier);
        self.executor = RetryExecutor::new(self.classifier.clone(), self.clock.clone());
        self
    }

    /// Sets the clock.
    #[must_use]
    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self.executor = RetryExecutor::new(self.classifier.clone(), self.clock.clone());
        self
    }

    /// The active configuration.
    #[must_use]
    pub fn config(&self) -> &GeneratorConfig {
        &self.config
    }

    /// The executor whose history describes the latest run.
    #[must_use]
    pub fn retry_executor(&self) -> &RetryExecutor {
        &self.executor
    }

    /// Failed attempts of the latest run, oldest first.
    #[must_use]
    pub fn error_history(&self) -> Vec<ErrorRecord> {
        self.executor.error_history()
    }

    /// Returns true from the start of a `generate()` call until it resolves.
    #[must_use]
    pub fn is_generating(&self) -> bool {
        self.generating.load(Ordering::Acquire)
    }

    /// Requests cancellation of the current run.
    ///
    /// The run stops at its next unit boundary, poll iteration or backoff
    /// sleep. A call already in flight is not interrupted.
    pub fn cancel(&self) {
        info!("Generation cancellation requested");
        self.cancel_token.read().cancel("cancelled by caller");
    }

    /// The most recent status of the latest run.
    #[must_use]
    pub fn current_status(&self) -> Option<GenerationStatus> {
        self.current_status.read().clone()
    }

    /// A status source for
    /// [`GenerationStateStore::start_periodic_updates`](crate::storage::GenerationStateStore::start_periodic_updates).
    ///
    /// Reports the latest run's status, or a zero-progress grid status
    /// before the first report.
    #[must_use]
    pub fn status_source(&self) -> StatusSource {
        let current = self.current_status.clone();
        let clock = self.clock.clone();
        Arc::new(move || {
            current
                .read()
                .clone()
                .unwrap_or_else(|| GenerationStatus::new(GenerationStage::Grid, 0.0, clock.now_ms()))
        })
    }

    /// Runs every stage for `project`.
    ///
    /// Returns the aggregate result on success and `None` on validation
    /// failure, stage failure or cancellation. `retry_policy` overrides the
    /// configured policy for this run.
    pub async fn generate(
        &self,
        project: &Project,
        observer: &dyn GenerationObserver,
        retry_policy: Option<RetryPolicy>,
    ) -> Option<GenerationResult> {
        let Some(_guard) = GeneratingGuard::acquire(&self.generating) else {
            let err = GenflowError::validation("a generation is already running")
                .with_subject(format!("project '{}' was not started", project.id));
            warn!(project_id = %project.id, "Rejected concurrent generation");
            observer.on_error(&self.rejection(&err));
            return None;
        };

        let run_id = Uuid::new_v4();
        let span = generation_span(&project.id, &run_id);
        self.run(project, observer, retry_policy, run_id)
            .instrument(span)
            .await
    }

    async fn run(
        &self,
        project: &Project,
        observer: &dyn GenerationObserver,
        retry_policy: Option<RetryPolicy>,
        run_id: Uuid,
    ) -> Option<GenerationResult> {
        if let Err(err) = project.validate() {
            warn!(error = %err, "Generation rejected");
            observer.on_error(&self.rejection(&err));
            self.emit(
                GenerationEvent::new(EventKind::Failed, &project.id, run_id, self.clock.now_ms())
                    .with_stage(GenerationStage::Error)
                    .with_data(json!({"error": err.to_string()})),
            );
            return None;
        }

        let token = Arc::new(CancellationToken::new());
        *self.cancel_token.write() = token.clone();
        self.executor.reset();

        let started = Instant::now();
        let start_ms = self.clock.now_ms();
        let mut run = RunState {
            project,
            observer,
            run_id,
            policy: retry_policy.unwrap_or_else(|| self.config.retry.clone()),
            token,
            tracker: ProgressTracker::new(start_ms),
            completed: Vec::with_capacity(GenerationStage::PIPELINE.len()),
            units: Vec::with_capacity(project.units.len()),
            grid_url: None,
            primary_artifact_url: None,
        };

        info!(units = project.units.len(), "Generation started");
        self.emit(
            GenerationEvent::new(EventKind::Started, &project.id, run_id, start_ms)
                .with_data(json!({"units": project.units.len()})),
        );

        for stage in GenerationStage::PIPELINE {
            if run.token.is_cancelled() {
                return self.finish_cancelled(&run, stage);
            }

            let timer = StageTimer::start(stage);
            self.emit(
                GenerationEvent::new(EventKind::StageStarted, &project.id, run_id, self.clock.now_ms())
                    .with_stage(stage),
            );
            let units = stage.is_per_unit().then_some((0, project.units.len()));
            self.report_progress(&mut run, stage, units);

            let outcome = self
                .run_stage(&mut run, stage)
                .instrument(stage_span(stage))
                .await;

            match outcome {
                Ok(result) => {
                    run.completed.push(stage);
                    self.save_checkpoint(&run, None).await;
                    let done = run.tracker.stage_done(stage, self.clock.now_ms());
                    self.publish(&run, done);
                    run.observer.on_stage_complete(stage, &result);

                    info!(stage = %stage, duration_ms = timer.elapsed_ms(), "Stage completed");
                    self.emit(
                        GenerationEvent::new(
                            EventKind::StageCompleted,
                            &project.id,
                            run_id,
                            self.clock.now_ms(),
                        )
                        .with_stage(stage)
                        .with_data(json!({"duration_ms": timer.elapsed_ms(), "result": result})),
                    );
                }
                Err(err) if err.is_cancelled() || run.token.is_cancelled() => {
                    return self.finish_cancelled(&run, stage);
                }
                Err(err) => {
                    return self.finish_failed(&run, stage, &err).await;
                }
            }
        }

        self.finish_complete(&run, started).await
    }

    async fn run_stage(
        &self,
        run: &mut RunState<'_>,
        stage: GenerationStage,
    ) -> Result<Value, GenflowError> {
        match stage {
            GenerationStage::Grid => self.grid_stage(run).await,
            GenerationStage::ExternalRender => self.render_stage(run).await,
            GenerationStage::Promotion => self.promotion_stage(run).await,
            GenerationStage::QualityAnalysis => self.quality_stage(run).await,
            GenerationStage::Export => self.export_stage(run).await,
            GenerationStage::Complete | GenerationStage::Error | GenerationStage::Cancelled => {
                Err(GenflowError::validation("not an executable stage").with_subject(stage.to_string()))
            }
        }
    }

    async fn grid_stage(&self, run: &mut RunState<'_>) -> Result<Value, GenflowError> {
        let project = run.project;
        let observer = run.observer;
        let args = json!({
            "project_id": project.id,
            "name": project.name,
            "settings": project.settings,
            "units": project
                .units
                .iter()
                .map(|u| json!({"unit_id": u.id, "prompt": u.prompt}))
                .collect::<Vec<_>>(),
        });

        let grid_url = self
            .executor
            .run(
                &run.policy,
                &RetryContext::stage(GenerationStage::Grid),
                &run.token,
                &|e: &GenerationError| observer.on_error(e),
                |_| self.invoke_for_string(commands::GENERATE_GRID, args.clone(), "grid_url"),
            )
            .await?;

        run.grid_url = Some(grid_url.clone());
        Ok(json!({ "grid_url": grid_url }))
    }

    async fn render_stage(&self, run: &mut RunState<'_>) -> Result<Value, GenflowError> {
        let project = run.project;
        let observer = run.observer;
        let grid_url = run.grid_url.clone().unwrap_or_default();
        let total = project.units.len();

        for (index, unit) in project.units.iter().enumerate() {
            check_cancelled(&run.token)?;

            let started = Instant::now();
            let artifact_url = self
                .executor
                .run(
                    &run.policy,
                    &RetryContext::unit(GenerationStage::ExternalRender, &unit.id),
                    &run.token,
                    &|e: &GenerationError| observer.on_error(e),
                    |_| self.render_unit(project, unit, &grid_url, &run.token),
                )
                .await?;

            run.units.push(GeneratedUnit {
                unit_id: unit.id.clone(),
                artifact_url,
                quality_score: 0.0,
                processing_time_ms: u64::try_from(started.elapsed().as_millis())
                    .unwrap_or(u64::MAX),
            });
            self.report_progress(run, GenerationStage::ExternalRender, Some((index + 1, total)));
        }

        Ok(json!({ "rendered": run.units.len() }))
    }

    /// Submits one unit and polls the job until it finishes.
    async fn render_unit(
        &self,
        project: &Project,
        unit: &UnitSpec,
        grid_url: &str,
        token: &CancellationToken,
    ) -> Result<String, GenflowError> {
        let spec = RenderJobSpec {
            project_id: project.id.clone(),
            unit_id: unit.id.clone(),
            prompt: unit.prompt.clone(),
            grid_url: grid_url.to_string(),
            params: unit.params.clone(),
            settings: project.settings.clone(),
        };
        let job = self.render_service.submit(&spec).await.into_result("submit")?;
        debug!(unit_id = %unit.id, job_id = %job.job_id, "Render job submitted");

        let max_polls = self.config.max_poll_attempts.max(1);
        for poll_attempt in 1..=max_polls {
            check_cancelled(token)?;

            let poll = self.render_service.poll(&job.job_id).await.into_result("poll")?;
            match poll.status {
                JobStatus::Completed => {
                    return poll.outputs.into_iter().next().ok_or_else(|| {
                        warn!(unit_id = %unit.id, job_id = %job.job_id, "Render job completed without outputs");
                        GenflowError::backend("render", "invalid response: job completed without outputs")
                    });
                }
                JobStatus::Failed => {
                    warn!(unit_id = %unit.id, job_id = %job.job_id, "Render job failed");
                    return Err(GenflowError::backend(
                        "render",
                        poll.error.unwrap_or_else(|| "render job failed".to_string()),
                    ));
                }
                JobStatus::Queued | JobStatus::Running => {
                    debug!(job_id = %job.job_id, status = %poll.status, poll_attempt, "Render job pending");
                }
            }

            if poll_attempt < max_polls && !token.sleep(self.config.poll_interval()).await {
                return Err(cancelled_error(token));
            }
        }

        Err(
            GenflowError::timeout(format!("render job unfinished after {max_polls} polls"))
                .with_subject(format!("job {}, unit '{}'", job.job_id, unit.id)),
        )
    }

    async fn promotion_stage(&self, run: &mut RunState<'_>) -> Result<Value, GenflowError> {
        let project = run.project;
        let observer = run.observer;
        let total = run.units.len();

        for index in 0..total {
            check_cancelled(&run.token)?;

            let unit_id = run.units[index].unit_id.clone();
            let args = json!({
                "project_id": project.id,
                "unit_id": unit_id,
                "artifact_url": run.units[index].artifact_url,
            });
            let promoted = self
                .executor
                .run(
                    &run.policy,
                    &RetryContext::unit(GenerationStage::Promotion, &unit_id),
                    &run.token,
                    &|e: &GenerationError| observer.on_error(e),
                    |_| self.invoke_for_string(commands::PROMOTE_UNIT, args.clone(), "artifact_url"),
                )
                .await?;

            run.units[index].artifact_url = promoted;
            self.report_progress(run, GenerationStage::Promotion, Some((index + 1, total)));
        }

        Ok(json!({ "promoted": total }))
    }

    async fn quality_stage(&self, run: &mut RunState<'_>) -> Result<Value, GenflowError> {
        let observer = run.observer;
        let args = json!({
            "project_id": run.project.id,
            "units": run
                .units
                .iter()
                .map(|u| json!({"unit_id": u.unit_id, "artifact_url": u.artifact_url}))
                .collect::<Vec<_>>(),
        });
        let unit_ids: Vec<String> = run.units.iter().map(|u| u.unit_id.clone()).collect();

        let scores = self
            .executor
            .run(
                &run.policy,
                &RetryContext::stage(GenerationStage::QualityAnalysis),
                &run.token,
                &|e: &GenerationError| observer.on_error(e),
                |_| self.analyze_quality(args.clone(), &unit_ids),
            )
            .await?;

        for unit in &mut run.units {
            if let Some(score) = scores.get(&unit.unit_id) {
                unit.quality_score = *score;
            }
        }
        Ok(json!({
            "scores": scores,
            "average_quality_score": average_score(&run.units),
        }))
    }

    async fn analyze_quality(
        &self,
        args: Value,
        unit_ids: &[String],
    ) -> Result<HashMap<String, f64>, GenflowError> {
        let data = self
            .backend
            .invoke(commands::ANALYZE_QUALITY, args)
            .await
            .into_result(commands::ANALYZE_QUALITY)?;

        unit_ids
            .iter()
            .map(|id| {
                data["scores"][id.as_str()]
                    .as_f64()
                    .map(|score| (id.clone(), score))
                    .ok_or_else(|| {
                        GenflowError::backend(
                            commands::ANALYZE_QUALITY,
                            format!("invalid response: missing score for unit '{id}'"),
                        )
                    })
            })
            .collect()
    }

    async fn export_stage(&self, run: &mut RunState<'_>) -> Result<Value, GenflowError> {
        let project = run.project;
        let observer = run.observer;
        let args = json!({
            "project_id": project.id,
            "name": project.name,
            "settings": project.settings,
            "grid_url": run.grid_url,
            "units": run.units,
        });

        let url = self
            .executor
            .run(
                &run.policy,
                &RetryContext::stage(GenerationStage::Export),
                &run.token,
                &|e: &GenerationError| observer.on_error(e),
                |_| {
                    self.invoke_for_string(commands::EXPORT_PROJECT, args.clone(), "primary_artifact_url")
                },
            )
            .await?;

        run.primary_artifact_url = Some(url.clone());
        Ok(json!({ "primary_artifact_url": url }))
    }

    /// Invokes `command` and extracts the string field `field` from its data.
    async fn invoke_for_string(
        &self,
        command: &'static str,
        args: Value,
        field: &'static str,
    ) -> Result<String, GenflowError> {
        let data = self.backend.invoke(command, args).await.into_result(command)?;
        data[field].as_str().map(str::to_string).ok_or_else(|| {
            GenflowError::backend(command, format!("invalid response: missing {field}"))
        })
    }

    fn report_progress(
        &self,
        run: &mut RunState<'_>,
        stage: GenerationStage,
        units: Option<(usize, usize)>,
    ) {
        let status = run.tracker.status(stage, units, self.clock.now_ms());
        self.publish(run, status);
    }

    fn publish(&self, run: &RunState<'_>, status: GenerationStatus) {
        *self.current_status.write() = Some(status.clone());
        run.observer.on_progress(&status);
    }

    async fn save_checkpoint(&self, run: &RunState<'_>, last_error: Option<&str>) {
        if let Err(e) = self
            .checkpoints
            .save(
                &run.project.id,
                &run.completed,
                &run.units,
                run.primary_artifact_url.as_deref(),
                last_error,
            )
            .await
        {
            warn!(error = %e, "Checkpoint save failed");
        }
    }

    async fn finish_failed(
        &self,
        run: &RunState<'_>,
        stage: GenerationStage,
        err: &GenflowError,
    ) -> Option<GenerationResult> {
        let raw = err.to_string();
        warn!(stage = %stage, error = %raw, "Generation failed");
        self.save_checkpoint(run, Some(&raw)).await;

        let status = run
            .tracker
            .terminal(GenerationStage::Error)
            .with_error(self.classifier.user_message_for(err));
        self.publish(run, status);
        self.emit(
            GenerationEvent::new(EventKind::Failed, &run.project.id, run.run_id, self.clock.now_ms())
                .with_stage(stage)
                .with_data(json!({
                    "error": raw,
                    "completed_stages": run.completed,
                })),
        );
        None
    }

    fn finish_cancelled(
        &self,
        run: &RunState<'_>,
        stage: GenerationStage,
    ) -> Option<GenerationResult> {
        let message = cancelled_error(&run.token).to_string();
        info!(stage = %stage, "Generation cancelled");

        if self.config.report_cancellation {
            run.observer.on_error(&GenerationError {
                stage,
                message: message.clone(),
                unit_id: None,
                retryable: false,
                severity: Severity::Low,
            });
        }
        self.publish(run, run.tracker.terminal(GenerationStage::Cancelled));
        self.emit(
            GenerationEvent::new(EventKind::Cancelled, &run.project.id, run.run_id, self.clock.now_ms())
                .with_stage(stage)
                .with_data(json!({"reason": message})),
        );
        None
    }

    async fn finish_complete(
        &self,
        run: &RunState<'_>,
        started: Instant,
    ) -> Option<GenerationResult> {
        if let Err(e) = self.checkpoints.clear(&run.project.id).await {
            warn!(error = %e, "Checkpoint clear failed");
        }

        let result = GenerationResult {
            run_id: run.run_id,
            project_id: run.project.id.clone(),
            units: run.units.clone(),
            grid_url: run.grid_url.clone().unwrap_or_default(),
            primary_artifact_url: run.primary_artifact_url.clone().unwrap_or_default(),
            average_quality_score: average_score(&run.units),
            total_time_ms: u64::try_from(started.elapsed().as_millis()).unwrap_or(u64::MAX),
            completed_at_ms: self.clock.now_ms(),
        };

        self.publish(run, run.tracker.terminal(GenerationStage::Complete));
        info!(
            units = result.units.len(),
            total_time_ms = result.total_time_ms,
            "Generation completed"
        );
        self.emit(
            GenerationEvent::new(EventKind::Completed, &run.project.id, run.run_id, result.completed_at_ms)
                .with_stage(GenerationStage::Complete)
                .with_data(json!({
                    "units": result.units.len(),
                    "primary_artifact_url": result.primary_artifact_url,
                    "total_time_ms": result.total_time_ms,
                })),
        );
        Some(result)
    }

    /// The `on_error` payload for a rejected run.
    fn rejection(&self, err: &GenflowError) -> GenerationError {
        GenerationError {
            stage: GenerationStage::Error,
            message: self.classifier.user_message_for(err),
            unit_id: None,
            retryable: false,
            severity: self.classifier.severity(&err.classification_text()),
        }
    }

    fn emit(&self, event: GenerationEvent) {
        self.events.emit(&event);
    }
}

impl std::fmt::Debug for PipelineOrchestrator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PipelineOrchestrator")
            .field("config", &self.config)
            .field("generating", &self.is_generating())
            .finish()
    }
}

fn check_cancelled(token: &CancellationToken) -> Result<(), GenflowError> {
    if token.is_cancelled() {
        Err(cancelled_error(token))
    } else {
        Ok(())
    }
}

fn cancelled_error(token: &CancellationToken) -> GenflowError {
    GenflowError::Cancelled(token.reason().unwrap_or_else(|| "cancelled".to_string()))
}

fn average_score(units: &[GeneratedUnit]) -> f64 {
    if units.is_empty() {
        return 0.0;
    }
    units.iter().map(|u| u.quality_score).sum::<f64>() / units.len() as f64
}
