//! Retry handling for stage operations.
//!
//! This module provides:
//! - [`RetryPolicy`] with deterministic capped exponential backoff
//! - [`ErrorClassifier`], the swappable keyword tables deciding retryability,
//!   severity and user-facing text
//! - [`RetryExecutor`], which runs an operation with retries and keeps an
//!   in-memory error history

mod classifier;
mod executor;
mod policy;

pub use classifier::{
    Classification, ErrorClassifier, MessageRule, SeverityRule, DEFAULT_PERMANENT_KEYWORDS,
};
pub use executor::{ErrorRecord, RetryContext, RetryExecutor};
pub use policy::{RetryPolicy, DEFAULT_RETRYABLE_KEYWORDS};
