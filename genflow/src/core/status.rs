//! Generation status reported to progress observers.

use super::GenerationStage;
use serde::{Deserialize, Serialize};

/// A point-in-time view of a generation run.
///
/// Within one run `progress` never decreases, except that a run which
/// terminates in error may report a final status at any value.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GenerationStatus {
    /// The stage currently executing (or the terminal marker).
    pub stage: GenerationStage,
    /// Overall progress in percent, 0..=100.
    pub progress: f64,
    /// 1-based index of the last finished unit in a per-unit stage.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub current_unit: Option<usize>,
    /// Total units in a per-unit stage.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub total_units: Option<usize>,
    /// Run start, unix milliseconds.
    pub start_time_ms: i64,
    /// Estimated completion, unix milliseconds.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub estimated_completion_ms: Option<i64>,
    /// Error text for an `Error` status.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl GenerationStatus {
    /// Creates a status at the given stage and progress.
    #[must_use]
    pub fn new(stage: GenerationStage, progress: f64, start_time_ms: i64) -> Self {
        Self {
            stage,
            progress,
            current_unit: None,
            total_units: None,
            start_time_ms,
            estimated_completion_ms: None,
            error: None,
        }
    }

    /// Sets the unit counters.
    #[must_use]
    pub fn with_units(mut self, current: usize, total: usize) -> Self {
        self.current_unit = Some(current);
        self.total_units = Some(total);
        self
    }

    /// Sets the estimated completion time.
    #[must_use]
    pub fn with_estimate(mut self, estimated_completion_ms: Option<i64>) -> Self {
        self.estimated_completion_ms = estimated_completion_ms;
        self
    }

    /// Sets the error text.
    #[must_use]
    pub fn with_error(mut self, error: impl Into<String>) -> Self {
        self.error = Some(error.into());
        self
    }

    /// Returns true if the status is a terminal marker.
    #[must_use]
    pub fn is_terminal(&self) -> bool {
        self.stage.is_terminal()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_builder() {
        let status = GenerationStatus::new(GenerationStage::ExternalRender, 40.0, 1_000)
            .with_units(1, 2)
            .with_estimate(Some(5_000));

        assert_eq!(status.current_unit, Some(1));
        assert_eq!(status.total_units, Some(2));
        assert_eq!(status.estimated_completion_ms, Some(5_000));
        assert!(!status.is_terminal());
    }

    #[test]
    fn test_status_serialize_skips_empty_fields() {
        let status = GenerationStatus::new(GenerationStage::Grid, 0.0, 42);
        let json = serde_json::to_value(&status).unwrap();

        assert_eq!(json["stage"], "grid");
        assert!(json.get("current_unit").is_none());
        assert!(json.get("error").is_none());
    }

    #[test]
    fn test_error_status_is_terminal() {
        let status = GenerationStatus::new(GenerationStage::Error, 35.0, 0).with_error("boom");
        assert!(status.is_terminal());
        assert_eq!(status.error.as_deref(), Some("boom"));
    }
}
