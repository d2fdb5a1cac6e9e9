//! Observability utilities.
//!
//! Installs the `tracing` subscriber and builds the spans that wrap a
//! generation run and its stages.

use crate::core::GenerationStage;
use crate::errors::GenflowError;
use std::time::{Duration, Instant};
use tracing::{info_span, Span};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// Installs a global subscriber.
///
/// The filter comes from `RUST_LOG`, falling back to `default_directive`
/// (e.g. `"genflow=info"`). With `json` set, events are written as JSON
/// lines. Fails if a global subscriber is already installed.
pub fn init_tracing(default_directive: &str, json: bool) -> Result<(), GenflowError> {
    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(default_directive))
        .map_err(|e| GenflowError::Config(format!("invalid log directive: {e}")))?;

    let registry = tracing_subscriber::registry().with(filter);
    let result = if json {
        registry.with(tracing_subscriber::fmt::layer().json()).try_init()
    } else {
        registry.with(tracing_subscriber::fmt::layer()).try_init()
    };
    result.map_err(|e| GenflowError::Config(format!("tracing already initialized: {e}")))
}

/// Span wrapping one `generate()` run.
#[must_use]
pub fn generation_span(project_id: &str, run_id: &uuid::Uuid) -> Span {
    info_span!("generation", project_id, run_id = %run_id)
}

/// Span wrapping one stage of a run.
#[must_use]
pub fn stage_span(stage: GenerationStage) -> Span {
    info_span!("stage", stage = stage.as_str())
}

/// Measures how long a stage took.
#[derive(Debug, Clone)]
pub struct StageTimer {
    start: Instant,
    stage: GenerationStage,
}

impl StageTimer {
    /// Starts timing `stage`.
    #[must_use]
    pub fn start(stage: GenerationStage) -> Self {
        Self {
            start: Instant::now(),
            stage,
        }
    }

    /// The timed stage.
    #[must_use]
    pub fn stage(&self) -> GenerationStage {
        self.stage
    }

    /// Time since the timer started.
    #[must_use]
    pub fn elapsed(&self) -> Duration {
        self.start.elapsed()
    }

    /// Elapsed whole milliseconds.
    #[must_use]
    pub fn elapsed_ms(&self) -> u64 {
        u64::try_from(self.start.elapsed().as_millis()).unwrap_or(u64::MAX)
    }
}
