//! Core domain model types for genflow.
//!
//! This module contains the fundamental types used throughout the crate:
//! - The pipeline stage enum and its progress bands
//! - The generation status reported to observers
//! - Projects, generated units, error payloads and run results

mod models;
mod stage;
mod status;

pub use models::{GeneratedUnit, GenerationError, GenerationResult, Project, UnitSpec};
pub use stage::GenerationStage;
pub use status::GenerationStatus;
