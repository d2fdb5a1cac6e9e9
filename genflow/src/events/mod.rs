//! Lifecycle events emitted by generation runs.
//!
//! Events complement `tracing` output with a structured stream that callers
//! can route anywhere by injecting an [`EventSink`].

mod sink;

pub use sink::{CollectingEventSink, EventSink, LoggingEventSink, NoOpEventSink};

use crate::core::GenerationStage;
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

/// The kind of a lifecycle event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventKind {
    /// A run passed validation and started.
    Started,
    /// A stage began.
    StageStarted,
    /// A stage finished successfully.
    StageCompleted,
    /// A run aborted on an error.
    Failed,
    /// A run was cancelled.
    Cancelled,
    /// A run finished successfully.
    Completed,
}

impl fmt::Display for EventKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Started => "generation.started",
            Self::StageStarted => "generation.stage_started",
            Self::StageCompleted => "generation.stage_completed",
            Self::Failed => "generation.failed",
            Self::Cancelled => "generation.cancelled",
            Self::Completed => "generation.completed",
        };
        f.write_str(name)
    }
}

/// One lifecycle event.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GenerationEvent {
    /// What happened.
    pub kind: EventKind,
    /// The project being generated.
    pub project_id: String,
    /// The run the event belongs to.
    pub run_id: Uuid,
    /// The stage involved, if any.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stage: Option<GenerationStage>,
    /// Event time, unix milliseconds.
    pub timestamp_ms: i64,
    /// Extra detail.
    #[serde(default)]
    pub data: serde_json::Value,
}

impl GenerationEvent {
    /// Creates an event without stage or data.
    #[must_use]
    pub fn new(kind: EventKind, project_id: impl Into<String>, run_id: Uuid, timestamp_ms: i64) -> Self {
        Self {
            kind,
            project_id: project_id.into(),
            run_id,
            stage: None,
            timestamp_ms,
            data: serde_json::Value::Null,
        }
    }

    /// Sets the stage.
    #[must_use]
    pub fn with_stage(mut self, stage: GenerationStage) -> Self {
        self.stage = Some(stage);
        self
    }

    /// Sets the detail payload.
    #[must_use]
    pub fn with_data(mut self, data: serde_json::Value) -> Self {
        self.data = data;
        self
    }
}
