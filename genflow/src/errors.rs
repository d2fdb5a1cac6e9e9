//! Error types for the genflow pipeline.
//!
//! Every fallible operation in the crate returns [`GenflowError`]. Project,
//! unit and job ids live in a separate `subject` so that the keyword-based
//! [`ErrorClassifier`](crate::retry::ErrorClassifier) only ever sees
//! [`GenflowError::classification_text`].

use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

/// The main error type for genflow operations.
#[derive(Debug, Clone, Error)]
pub enum GenflowError {
    /// The generation request was rejected before any stage ran.
    #[error("Validation error: {reason}{}", subject_suffix(.subject.as_deref()))]
    Validation {
        /// What was wrong with the request.
        reason: String,
        /// The offending project or unit, shown but never classified.
        subject: Option<String>,
    },

    /// A backend command or render-service call reported failure.
    #[error("{command} failed: {message}")]
    Backend {
        /// The command or call that failed (e.g. `generate_grid`, `submit`).
        command: String,
        /// The raw message reported by the backend.
        message: String,
    },

    /// An operation did not finish in the allotted time.
    #[error("Timeout: {operation}{}", subject_suffix(.subject.as_deref()))]
    Timeout {
        /// The operation that ran out of time.
        operation: String,
        /// The job or unit involved, shown but never classified.
        subject: Option<String>,
    },

    /// The run was cancelled cooperatively.
    #[error("Generation cancelled: {0}")]
    Cancelled(String),

    /// The durable key-value store failed.
    #[error("Storage error: {0}")]
    Storage(String),

    /// Serialization/deserialization error.
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// Invalid configuration value.
    #[error("Configuration error: {0}")]
    Config(String),

    /// IO error.
    #[error("IO error: {0}")]
    Io(String),
}

impl GenflowError {
    /// Creates a backend error.
    #[must_use]
    pub fn backend(command: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Backend {
            command: command.into(),
            message: message.into(),
        }
    }

    /// Creates a validation error.
    #[must_use]
    pub fn validation(reason: impl Into<String>) -> Self {
        Self::Validation {
            reason: reason.into(),
            subject: None,
        }
    }

    /// Creates a timeout error.
    #[must_use]
    pub fn timeout(operation: impl Into<String>) -> Self {
        Self::Timeout {
            operation: operation.into(),
            subject: None,
        }
    }

    /// Attaches the ids an error is about. Only validation and timeout
    /// errors carry a subject; other variants are returned unchanged.
    #[must_use]
    pub fn with_subject(mut self, value: impl Into<String>) -> Self {
        if let Self::Validation { subject, .. } | Self::Timeout { subject, .. } = &mut self {
            *subject = Some(value.into());
        }
        self
    }

    /// The text keyword classification runs on: the fixed description of
    /// the failure plus any raw backend message, without subject ids.
    #[must_use]
    pub fn classification_text(&self) -> String {
        match self {
            Self::Validation { reason, .. } => format!("Validation error: {reason}"),
            Self::Timeout { operation, .. } => format!("Timeout: {operation}"),
            other => other.to_string(),
        }
    }

    /// Returns true if this error represents a cooperative cancellation.
    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        matches!(self, Self::Cancelled(_))
    }
}

fn subject_suffix(subject: Option<&str>) -> String {
    subject.map(|s| format!(" ({s})")).unwrap_or_default()
}

impl From<std::io::Error> for GenflowError {
    fn from(err: std::io::Error) -> Self {
        Self::Io(err.to_string())
    }
}

impl From<serde_json::Error> for GenflowError {
    fn from(err: serde_json::Error) -> Self {
        Self::Serialization(err.to_string())
    }
}

/// Presentation severity of an error.
///
/// Severity only drives UI emphasis; it never influences retry decisions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Severity {
    /// Informational.
    Low,
    /// The default for unrecognised errors.
    #[default]
    Medium,
    /// Caller input problems.
    High,
    /// Credential or permission problems.
    Critical,
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Low => write!(f, "low"),
            Self::Medium => write!(f, "medium"),
            Self::High => write!(f, "high"),
            Self::Critical => write!(f, "critical"),
        }
    }
}
