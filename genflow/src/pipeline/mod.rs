//! Generation pipeline orchestration.
//!
//! This module provides:
//! - The [`PipelineOrchestrator`] driving the fixed stage sequence
//! - Weighted progress and completion estimates
//! - The observer callback surface

mod observer;
mod orchestrator;
mod progress;

pub use observer::{CallbackObserver, GenerationObserver, NoOpObserver};
pub use orchestrator::PipelineOrchestrator;
pub use progress::{estimate_completion, stage_progress, ProgressTracker};
