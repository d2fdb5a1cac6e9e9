//! # Genflow
//!
//! Orchestration core for staged content generation.
//!
//! A generation run takes a [`Project`](core::Project) through a fixed
//! sequence of long-running stages (layout grid, external render, promotion,
//! quality analysis, export) with support for:
//!
//! - **Bounded retry**: capped exponential backoff driven by a keyword-based
//!   error classifier
//! - **Checkpoints**: crash-safe partial results for post-failure inspection
//! - **Liveness records**: "is a generation still running" queries with a
//!   staleness window and periodic refresh timers
//! - **Cooperative cancellation**: observed at unit boundaries, job polls and
//!   backoff sleeps
//! - **Progress reporting**: weighted stage bands with completion estimates
//!
//! ## Quick Start
//!
//! ```rust,ignore
//! use genflow::prelude::*;
//! use std::sync::Arc;
//!
//! let store: Arc<dyn KeyValueStore> = Arc::new(FileKeyValueStore::open("state").await?);
//! let checkpoints = Arc::new(CheckpointStore::new(store, Arc::new(SystemClock)));
//! let orchestrator = PipelineOrchestrator::new(backend, render_service, checkpoints)
//!     .with_config(GeneratorConfig::from_env()?)
//!     .with_event_sink(Arc::new(LoggingEventSink::default()));
//!
//! let observer = CallbackObserver::new()
//!     .with_progress(|status| println!("{:.0}%", status.progress));
//! if let Some(result) = orchestrator.generate(&project, &observer, None).await {
//!     println!("exported to {}", result.primary_artifact_url);
//! }
//! ```

#![forbid(unsafe_code)]
#![warn(
    clippy::all,
    clippy::pedantic,
    missing_docs,
    rust_2018_idioms
)]
#![allow(
    clippy::module_name_repetitions,
    clippy::must_use_candidate,
    clippy::missing_errors_doc,
    clippy::missing_panics_doc,
    clippy::cast_precision_loss,
    clippy::cast_possible_truncation
)]

pub mod backends;
pub mod cancellation;
pub mod config;
pub mod core;
pub mod errors;
pub mod events;
pub mod observability;
pub mod pipeline;
pub mod retry;
pub mod storage;
pub mod testing;
pub mod utils;

/// Prelude module for convenient imports
pub mod prelude {
    pub use crate::backends::{
        BackendResponse, ExternalRenderService, JobPoll, JobStatus, RenderBackend, RenderJobSpec,
        SubmittedJob,
    };
    pub use crate::cancellation::CancellationToken;
    pub use crate::config::GeneratorConfig;
    pub use crate::core::{
        GeneratedUnit, GenerationError, GenerationResult, GenerationStage, GenerationStatus,
        Project, UnitSpec,
    };
    pub use crate::errors::{GenflowError, Severity};
    pub use crate::events::{
        CollectingEventSink, EventKind, EventSink, GenerationEvent, LoggingEventSink,
        NoOpEventSink,
    };
    pub use crate::observability::init_tracing;
    pub use crate::pipeline::{
        CallbackObserver, GenerationObserver, NoOpObserver, PipelineOrchestrator,
    };
    pub use crate::retry::{ErrorClassifier, ErrorRecord, RetryExecutor, RetryPolicy};
    pub use crate::storage::{
        Checkpoint, CheckpointStore, FileKeyValueStore, GenerationStateStore,
        InMemoryKeyValueStore, KeyValueStore,
    };
    pub use crate::utils::{Clock, ManualClock, SystemClock};
}
