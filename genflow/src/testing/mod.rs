//! Testing utilities for generation runs.
//!
//! This module provides:
//! - Scripted render backend and render service
//! - A write-counting key-value store
//! - A recording observer
//! - Project and configuration fixtures

mod fixtures;
mod mocks;

pub use fixtures::{fast_config, fast_retry_policy, sample_project, sample_unit};
pub use mocks::{
    CountingKeyValueStore, FakeRenderService, RecordingObserver, ScriptedRenderBackend,
};
