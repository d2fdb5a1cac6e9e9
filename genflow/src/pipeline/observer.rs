//! Callback surface of a generation run.

use crate::core::{GenerationError, GenerationStage, GenerationStatus};
use serde_json::Value;

/// Receives progress, stage completions and errors from a run.
///
/// Every method defaults to doing nothing. Callbacks run inline on the
/// generating task and should return quickly.
pub trait GenerationObserver: Send + Sync {
    /// A new status is available.
    fn on_progress(&self, _status: &GenerationStatus) {}

    /// `stage` finished; `result` is the stage's output summary.
    fn on_stage_complete(&self, _stage: GenerationStage, _result: &Value) {}

    /// An attempt failed, or the run was rejected.
    fn on_error(&self, _error: &GenerationError) {}
}

/// An observer that ignores everything.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoOpObserver;

impl GenerationObserver for NoOpObserver {}

type ProgressFn = Box<dyn Fn(&GenerationStatus) + Send + Sync>;
type StageCompleteFn = Box<dyn Fn(GenerationStage, &Value) + Send + Sync>;
type ErrorFn = Box<dyn Fn(&GenerationError) + Send + Sync>;

/// An observer assembled from closures.
///
/// ```
/// use genflow::pipeline::CallbackObserver;
///
/// let observer = CallbackObserver::new()
///     .with_progress(|status| println!("{:.0}%", status.progress))
///     .with_error(|error| eprintln!("{}", error.message));
/// ```
#[derive(Default)]
pub struct CallbackObserver {
    on_progress: Option<ProgressFn>,
    on_stage_complete: Option<StageCompleteFn>,
    on_error: Option<ErrorFn>,
}

impl CallbackObserver {
    /// Creates an observer with no callbacks.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the progress callback.
    #[must_use]
    pub fn with_progress<F>(mut self, f: F) -> Self
    where
        F: Fn(&GenerationStatus) + Send + Sync + 'static,
    {
        self.on_progress = Some(Box::new(f));
        self
    }

    /// Sets the stage-complete callback.
    #[must_use]
    pub fn with_stage_complete<F>(mut self, f: F) -> Self
    where
        F: Fn(GenerationStage, &Value) + Send + Sync + 'static,
    {
        self.on_stage_complete = Some(Box::new(f));
        self
    }

    /// Sets the error callback.
    #[must_use]
    pub fn with_error<F>(mut self, f: F) -> Self
    where
        F: Fn(&GenerationError) + Send + Sync + 'static,
    {
        self.on_error = Some(Box::new(f));
        self
    }
}

impl GenerationObserver for CallbackObserver {
    fn on_progress(&self, status: &GenerationStatus) {
        if let Some(f) = &self.on_progress {
            f(status);
        }
    }

    fn on_stage_complete(&self, stage: GenerationStage, result: &Value) {
        if let Some(f) = &self.on_stage_complete {
            f(stage, result);
        }
    }

    fn on_error(&self, error: &GenerationError) {
        if let Some(f) = &self.on_error {
            f(error);
        }
    }
}

impl std::fmt::Debug for CallbackObserver {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CallbackObserver")
            .field("on_progress", &self.on_progress.is_some())
            .field("on_stage_complete", &self.on_stage_complete.is_some())
            .field("on_error", &self.on_error.is_some())
            .finish()
    }
}
