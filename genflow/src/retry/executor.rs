//! Bounded retry around a single stage operation.

use super::{ErrorClassifier, RetryPolicy};
use crate::cancellation::CancellationToken;
use crate::core::{GenerationError, GenerationStage};
use crate::errors::GenflowError;
use crate::utils::Clock;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::future::Future;
use std::sync::Arc;
use tracing::{debug, warn};

/// One failed attempt, kept in memory only.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorRecord {
    /// Stage the attempt belonged to.
    pub stage: GenerationStage,
    /// Unit being processed, for per-unit stages.
    pub unit_id: Option<String>,
    /// When the attempt failed, unix milliseconds.
    pub timestamp_ms: i64,
    /// 1-based attempt number.
    pub attempt_number: u32,
    /// The raw error text.
    pub raw_message: String,
}

/// Identifies what an operation is working on.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RetryContext {
    /// The owning stage.
    pub stage: GenerationStage,
    /// The unit, for per-unit stages.
    pub unit_id: Option<String>,
}

impl RetryContext {
    /// Context for a whole-stage operation.
    #[must_use]
    pub fn stage(stage: GenerationStage) -> Self {
        Self { stage, unit_id: None }
    }

    /// Context for a single unit inside a stage.
    #[must_use]
    pub fn unit(stage: GenerationStage, unit_id: impl Into<String>) -> Self {
        Self {
            stage,
            unit_id: Some(unit_id.into()),
        }
    }
}

/// Runs operations with bounded retry and records every failure.
#[derive(Debug)]
pub struct RetryExecutor {
    classifier: Arc<ErrorClassifier>,
    clock: Arc<dyn Clock>,
    history: Mutex<Vec<ErrorRecord>>,
}

impl RetryExecutor {
    /// Creates an executor with an empty history.
    #[must_use]
    pub fn new(classifier: Arc<ErrorClassifier>, clock: Arc<dyn Clock>) -> Self {
        Self {
            classifier,
            clock,
            history: Mutex::new(Vec::new()),
        }
    }

    /// The classifier used for retry decisions.
    #[must_use]
    pub fn classifier(&self) -> &ErrorClassifier {
        &self.classifier
    }

    /// All recorded failures, oldest first.
    #[must_use]
    pub fn error_history(&self) -> Vec<ErrorRecord> {
        self.history.lock().clone()
    }

    /// Recorded failures for one stage.
    #[must_use]
    pub fn errors_for_stage(&self, stage: GenerationStage) -> Vec<ErrorRecord> {
        self.history
            .lock()
            .iter()
            .filter(|r| r.stage == stage)
            .cloned()
            .collect()
    }

    /// The most recent failure.
    #[must_use]
    pub fn last_error(&self) -> Option<ErrorRecord> {
        self.history.lock().last().cloned()
    }

    /// Clears the error history.
    pub fn reset(&self) {
        self.history.lock().clear();
    }

    /// Runs `operation` up to `policy.max_attempts` times.
    ///
    /// `operation` receives the 1-based attempt number. After every failure
    /// an [`ErrorRecord`] is appended and `on_error` is called: with
    /// `retryable = true` when another attempt follows, and with
    /// `retryable = false` when the error is permanent or attempts are
    /// exhausted, in which case the error is returned. Backoff sleeps end
    /// early on cancellation and yield [`GenflowError::Cancelled`].
    /// Cancellation errors from the operation itself are passed through
    /// without being recorded.
    pub async fn run<T, F, Fut>(
        &self,
        policy: &RetryPolicy,
        ctx: &RetryContext,
        cancel: &CancellationToken,
        on_error: &(dyn Fn(&GenerationError) + Send + Sync),
        mut operation: F,
    ) -> Result<T, GenflowError>
    where
        F: FnMut(u32) -> Fut,
        Fut: Future<Output = Result<T, GenflowError>>,
    {
        let max_attempts = policy.effective_max_attempts();
        let mut attempt = 0;

        loop {
            attempt += 1;
            if cancel.is_cancelled() {
                return Err(cancelled_error(cancel));
            }

            let err = match operation(attempt).await {
                Ok(value) => return Ok(value),
                Err(err) if err.is_cancelled() => return Err(err),
                Err(err) => err,
            };

            let raw_message = err.to_string();
            self.history.lock().push(ErrorRecord {
                stage: ctx.stage,
                unit_id: ctx.unit_id.clone(),
                timestamp_ms: self.clock.now_ms(),
                attempt_number: attempt,
                raw_message: raw_message.clone(),
            });

            let classification = self
                .classifier
                .classify_error(&err, &policy.retryable_keywords);
            let delay = if classification.retryable {
                policy.compute_delay(attempt)
            } else {
                None
            };

            let Some(delay) = delay else {
                warn!(
                    stage = %ctx.stage,
                    unit_id = ?ctx.unit_id,
                    attempt,
                    retryable = classification.retryable,
                    error = %raw_message,
                    "Giving up after error"
                );
                on_error(&GenerationError {
                    stage: ctx.stage,
                    message: classification.user_message,
                    unit_id: ctx.unit_id.clone(),
                    retryable: false,
                    severity: classification.severity,
                });
                return Err(err);
            };

            debug!(
                stage = %ctx.stage,
                unit_id = ?ctx.unit_id,
                attempt,
                max_attempts,
                delay_ms = delay.as_millis() as u64,
                error = %raw_message,
                "Retrying after error"
            );
            on_error(&GenerationError {
                stage: ctx.stage,
                message: classification.user_message,
                unit_id: ctx.unit_id.clone(),
                retryable: true,
                severity: classification.severity,
            });

            if !cancel.sleep(delay).await {
                return Err(cancelled_error(cancel));
            }
        }
    }
}

fn cancelled_error(cancel: &CancellationToken) -> GenflowError {
    GenflowError::Cancelled(cancel.reason().unwrap_or_else(|| "cancelled".to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::utils::ManualClock;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::time::{Duration, Instant};

    fn executor() -> RetryExecutor {
        RetryExecutor::new(Arc::new(ErrorClassifier::new()), Arc::new(ManualClock::new(7)))
    }

    fn fast_policy(max_attempts: u32) -> RetryPolicy {
        RetryPolicy::new()
            .with_max_attempts(max_attempts)
            .with_initial_delay_ms(1)
            .with_max_delay_ms(5)
    }

    #[tokio::test]
    async fn test_success_first_try() {
        let exec = executor();
        let token = CancellationToken::new();
        let ctx = RetryContext::stage(GenerationStage::Grid);

        let result = exec
            .run(&fast_policy(3), &ctx, &token, &|_| {}, |_| async { Ok(42) })
            .await;

        assert_eq!(result.unwrap(), 42);
        assert!(exec.error_history().is_empty());
    }

    #[tokio::test]
    async fn test_success_after_retryable_failures() {
        let exec = executor();
        let token = CancellationToken::new();
        let ctx = RetryContext::unit(GenerationStage::ExternalRender, "u1");
        let notifications = Mutex::new(Vec::new());

        let result = exec
            .run(
                &fast_policy(3),
                &ctx,
                &token,
                &|e| notifications.lock().push(e.clone()),
                |attempt| async move {
                    if attempt < 3 {
                        Err(GenflowError::backend("submit", "Network timeout"))
                    } else {
                        Ok("done")
                    }
                },
            )
            .await;

        assert_eq!(result.unwrap(), "done");
        let history = exec.errors_for_stage(GenerationStage::ExternalRender);
        assert_eq!(history.len(), 2);
        assert_eq!(history[0].attempt_number, 1);
        assert_eq!(history[1].attempt_number, 2);
        assert_eq!(history[0].unit_id.as_deref(), Some("u1"));
        assert_eq!(history[0].timestamp_ms, 7);

        let notifications = notifications.lock();
        assert_eq!(notifications.len(), 2);
        assert!(notifications.iter().all(|e| e.retryable));
    }

    #[tokio::test]
    async fn test_exhausted_attempts_report_final_error() {
        let exec = executor();
        let token = CancellationToken::new();
        let ctx = RetryContext::stage(GenerationStage::Export);
        let calls = AtomicU32::new(0);
        let notifications = Mutex::new(Vec::new());

        let result: Result<(), _> = exec
            .run(
                &fast_policy(3),
                &ctx,
                &token,
                &|e| notifications.lock().push(e.clone()),
                |_| {
                    calls.fetch_add(1, Ordering::SeqCst);
                    async { Err(GenflowError::timeout("export")) }
                },
            )
            .await;

        assert!(matches!(result, Err(GenflowError::Timeout { .. })));
        assert_eq!(calls.load(Ordering::SeqCst), 3);
        assert_eq!(exec.error_history().len(), 3);

        let notifications = notifications.lock();
        assert_eq!(notifications.len(), 3);
        assert!(!notifications.last().unwrap().retryable);
        assert!(notifications.last().unwrap().message.contains("took too long"));
    }

    #[tokio::test]
    async fn test_unit_id_keywords_do_not_make_timeout_permanent() {
        let exec = executor();
        let token = CancellationToken::new();
        let ctx = RetryContext::unit(GenerationStage::ExternalRender, "invalid-lighting-test");
        let calls = AtomicU32::new(0);

        let result: Result<(), _> = exec
            .run(&fast_policy(3), &ctx, &token, &|_| {}, |_| {
                calls.fetch_add(1, Ordering::SeqCst);
                async {
                    Err(GenflowError::timeout("render job unfinished after 2 polls")
                        .with_subject("job job-1, unit 'invalid-lighting-test'"))
                }
            })
            .await;

        assert!(result.is_err());
        assert_eq!(calls.load(Ordering::SeqCst), 3);
        let history = exec.error_history();
        assert_eq!(history.len(), 3);
        assert!(history[0].raw_message.contains("invalid-lighting-test"));
    }

    #[tokio::test]
    async fn test_permanent_error_not_retried() {
        let exec = executor();
        let token = CancellationToken::new();
        let ctx = RetryContext::stage(GenerationStage::Grid);
        let calls = AtomicU32::new(0);

        let result: Result<(), _> = exec
            .run(&fast_policy(5), &ctx, &token, &|_| {}, |_| {
                calls.fetch_add(1, Ordering::SeqCst);
                async { Err(GenflowError::backend("generate_grid", "Unauthorized")) }
            })
            .await;

        assert!(result.is_err());
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert_eq!(exec.last_error().unwrap().attempt_number, 1);
    }

    #[tokio::test]
    async fn test_backoff_sleep_observes_cancellation() {
        let exec = executor();
        let token = Arc::new(CancellationToken::new());
        let ctx = RetryContext::stage(GenerationStage::Promotion);
        let policy = RetryPolicy::new()
            .with_max_attempts(3)
            .with_initial_delay_ms(5_000);

        let canceller = token.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(30)).await;
            canceller.cancel("user");
        });

        let started = Instant::now();
        let result: Result<(), _> = exec
            .run(&policy, &ctx, &token, &|_| {}, |_| async {
                Err(GenflowError::backend("promote_unit", "connection reset"))
            })
            .await;

        assert!(matches!(result, Err(GenflowError::Cancelled(_))));
        assert!(started.elapsed() < Duration::from_secs(2));
        assert_eq!(exec.error_history().len(), 1);
    }

    #[tokio::test]
    async fn test_cancellation_error_from_operation_not_recorded() {
        let exec = executor();
        let token = CancellationToken::new();
        let ctx = RetryContext::stage(GenerationStage::ExternalRender);

        let result: Result<(), _> = exec
            .run(&fast_policy(3), &ctx, &token, &|_| {}, |_| async {
                Err(GenflowError::Cancelled("poll loop".to_string()))
            })
            .await;

        assert!(matches!(result, Err(GenflowError::Cancelled(_))));
        assert!(exec.error_history().is_empty());
    }

    #[tokio::test]
    async fn test_reset_clears_history() {
        let exec = executor();
        let token = CancellationToken::new();
        let ctx = RetryContext::stage(GenerationStage::Grid);

        let _: Result<(), _> = exec
            .run(&fast_policy(1), &ctx, &token, &|_| {}, |_| async {
                Err(GenflowError::backend("generate_grid", "boom"))
            })
            .await;
        assert_eq!(exec.error_history().len(), 1);

        exec.reset();
        assert!(exec.error_history().is_empty());
        assert!(exec.last_error().is_none());
    }
}
