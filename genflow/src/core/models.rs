//! Projects, generated units and run results.

use super::GenerationStage;
use crate::errors::{GenflowError, Severity};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;

/// One item of work inside a project (e.g. one shot).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UnitSpec {
    /// Unique id within the project.
    pub id: String,
    /// Prompt handed to the render service.
    pub prompt: String,
    /// Free-form render parameters.
    #[serde(default)]
    pub params: serde_json::Value,
}

impl UnitSpec {
    /// Creates a unit with empty parameters.
    #[must_use]
    pub fn new(id: impl Into<String>, prompt: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            prompt: prompt.into(),
            params: serde_json::Value::Null,
        }
    }

    /// Sets the render parameters.
    #[must_use]
    pub fn with_params(mut self, params: serde_json::Value) -> Self {
        self.params = params;
        self
    }
}

/// A project submitted for generation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Project {
    /// Project id; also the persistence key.
    pub id: String,
    /// Display name.
    #[serde(default)]
    pub name: String,
    /// Units to generate, in order.
    #[serde(default)]
    pub units: Vec<UnitSpec>,
    /// Project-wide settings forwarded to every backend command.
    #[serde(default)]
    pub settings: serde_json::Value,
}

impl Project {
    /// Creates an empty project.
    #[must_use]
    pub fn new(id: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            units: Vec::new(),
            settings: serde_json::Value::Null,
        }
    }

    /// Appends a unit.
    #[must_use]
    pub fn with_unit(mut self, unit: UnitSpec) -> Self {
        self.units.push(unit);
        self
    }

    /// Sets the project settings.
    #[must_use]
    pub fn with_settings(mut self, settings: serde_json::Value) -> Self {
        self.settings = settings;
        self
    }

    /// Checks the input contract of a generation run.
    pub fn validate(&self) -> Result<(), GenflowError> {
        if self.id.trim().is_empty() {
            return Err(GenflowError::validation("project id must not be empty"));
        }
        if self.units.is_empty() {
            return Err(GenflowError::validation("project has no units to generate")
                .with_subject(format!("project '{}'", self.id)));
        }

        let mut seen = HashSet::new();
        for unit in &self.units {
            if !seen.insert(unit.id.as_str()) {
                return Err(GenflowError::validation("project contains a duplicate unit id")
                    .with_subject(format!("project '{}', unit '{}'", self.id, unit.id)));
            }
        }
        Ok(())
    }
}

/// An artifact produced for one unit.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GeneratedUnit {
    /// The unit this artifact belongs to.
    pub unit_id: String,
    /// Location of the latest artifact (rendered, then promoted).
    pub artifact_url: String,
    /// Score assigned by quality analysis; 0 until that stage runs.
    #[serde(default)]
    pub quality_score: f64,
    /// Time spent rendering the unit.
    #[serde(default)]
    pub processing_time_ms: u64,
}

/// Payload delivered to `on_error` observers.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GenerationError {
    /// Stage the error happened in (`Error` for validation failures).
    pub stage: GenerationStage,
    /// User-facing message.
    pub message: String,
    /// Unit being processed, for per-unit stages.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub unit_id: Option<String>,
    /// True when the failed attempt will be retried.
    pub retryable: bool,
    /// Presentation severity.
    #[serde(default)]
    pub severity: Severity,
}

/// The aggregate result of a successful run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GenerationResult {
    /// Unique id of this run.
    pub run_id: uuid::Uuid,
    /// The generated project.
    pub project_id: String,
    /// One entry per unit, in project order.
    pub units: Vec<GeneratedUnit>,
    /// Layout grid produced by the first stage.
    pub grid_url: String,
    /// Exported deliverable.
    pub primary_artifact_url: String,
    /// Mean of the per-unit quality scores.
    pub average_quality_score: f64,
    /// Wall-clock duration of the run.
    pub total_time_ms: u64,
    /// Completion time, unix milliseconds.
    pub completed_at_ms: i64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_validate_accepts_units() {
        let project = Project::new("p1", "Demo").with_unit(UnitSpec::new("u1", "a cat"));
        assert!(project.validate().is_ok());
    }

    #[test]
    fn test_validate_rejects_empty_units() {
        let project = Project::new("p1", "Demo");
        let err = project.validate().unwrap_err();
        assert!(matches!(err, GenflowError::Validation { .. }));
        assert!(err.to_string().contains("no units"));
    }

    #[test]
    fn test_validate_rejects_blank_id() {
        let project = Project::new("  ", "Demo").with_unit(UnitSpec::new("u1", "a cat"));
        assert!(matches!(project.validate(), Err(GenflowError::Validation { .. })));
    }

    #[test]
    fn test_validate_rejects_duplicate_units() {
        let project = Project::new("p1", "Demo")
            .with_unit(UnitSpec::new("u1", "a cat"))
            .with_unit(UnitSpec::new("u1", "a dog"));
        let err = project.validate().unwrap_err();
        assert!(err.to_string().contains("duplicate unit id"));
        assert!(err.to_string().contains("unit 'u1'"));
    }

    #[test]
    fn test_project_deserialize_defaults() {
        let project: Project = serde_json::from_str(r#"{"id": "p9"}"#).unwrap();
        assert!(project.units.is_empty());
        assert!(project.settings.is_null());
    }
}
