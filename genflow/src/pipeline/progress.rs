//! Weighted progress and completion estimates.

use crate::core::{GenerationStage, GenerationStatus};

/// Estimates the completion time of a run.
///
/// Extrapolates linearly from the time spent so far:
/// `now + elapsed / progress * 100 - elapsed`. Returns `None` when there is
/// no progress to extrapolate from.
#[must_use]
pub fn estimate_completion(start_ms: i64, now_ms: i64, progress_percent: f64) -> Option<i64> {
    if !progress_percent.is_finite() || progress_percent <= 0.0 {
        return None;
    }
    let elapsed = (now_ms - start_ms).max(0) as f64;
    let total = elapsed / progress_percent * 100.0;
    Some(now_ms + (total - elapsed).round() as i64)
}

/// Overall progress for `completed` of `total` units done inside `stage`.
///
/// The fraction is scaled into the stage's band. Terminal stages map to
/// 100.
#[must_use]
pub fn stage_progress(stage: GenerationStage, completed: usize, total: usize) -> f64 {
    let Some((start, end)) = stage.progress_band() else {
        return 100.0;
    };
    let fraction = if total == 0 {
        0.0
    } else {
        (completed.min(total) as f64) / (total as f64)
    };
    start + (end - start) * fraction
}

/// Tracks the progress of one run and keeps it from going backwards.
#[derive(Debug, Clone)]
pub struct ProgressTracker {
    start_ms: i64,
    progress: f64,
}

impl ProgressTracker {
    /// Starts tracking a run that began at `start_ms`.
    #[must_use]
    pub fn new(start_ms: i64) -> Self {
        Self {
            start_ms,
            progress: 0.0,
        }
    }

    /// Run start, unix milliseconds.
    #[must_use]
    pub fn start_ms(&self) -> i64 {
        self.start_ms
    }

    /// The highest progress reported so far.
    #[must_use]
    pub fn progress(&self) -> f64 {
        self.progress
    }

    /// Builds the status for `stage` with `units = (completed, total)`.
    ///
    /// Progress never drops below a previously reported value.
    pub fn status(
        &mut self,
        stage: GenerationStage,
        units: Option<(usize, usize)>,
        now_ms: i64,
    ) -> GenerationStatus {
        let (completed, total) = units.unwrap_or((0, 0));
        self.progress = self.progress.max(stage_progress(stage, completed, total));

        let status = GenerationStatus::new(stage, self.progress, self.start_ms)
            .with_estimate(estimate_completion(self.start_ms, now_ms, self.progress));
        match units {
            Some((completed, total)) => status.with_units(completed, total),
            None => status,
        }
    }

    /// Builds a stage-end status: the whole band of `stage` is done.
    pub fn stage_done(&mut self, stage: GenerationStage, now_ms: i64) -> GenerationStatus {
        self.status(stage, Some((1, 1)), now_ms)
    }

    /// Builds a terminal status at the current progress.
    #[must_use]
    pub fn terminal(&self, stage: GenerationStage) -> GenerationStatus {
        let progress = if stage == GenerationStage::Complete {
            100.0
        } else {
            self.progress
        };
        GenerationStatus::new(stage, progress, self.start_ms)
    }
}
