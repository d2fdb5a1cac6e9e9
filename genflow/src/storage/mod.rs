//! Durable state for generation runs.
//!
//! This module provides:
//! - The async [`KeyValueStore`] protocol with in-memory and file backends
//! - [`InFlightWrites`], per-key de-duplication of concurrent writes
//! - [`CheckpointStore`] for crash-safe partial results
//! - [`GenerationStateStore`] for liveness records and refresh timers

mod checkpoint;
mod generation_state;
mod inflight;
mod kv;

pub use checkpoint::{Checkpoint, CheckpointStore};
pub use generation_state::{
    GenerationStateRecord, GenerationStateStore, StatusSource, DEFAULT_STALE_WINDOW,
};
pub use inflight::InFlightWrites;
pub use kv::{FileKeyValueStore, InMemoryKeyValueStore, KeyValueStore};
