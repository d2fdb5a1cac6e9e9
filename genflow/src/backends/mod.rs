//! Narrow interfaces to the collaborators that do the actual rendering.
//!
//! The orchestrator never talks to a concrete client. Stage commands go
//! through [`RenderBackend::invoke`] and render jobs through
//! [`ExternalRenderService`].

use crate::errors::GenflowError;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Command names understood by a [`RenderBackend`].
pub mod commands {
    /// Builds the layout grid for a project.
    pub const GENERATE_GRID: &str = "generate_grid";
    /// Promotes one rendered unit artifact.
    pub const PROMOTE_UNIT: &str = "promote_unit";
    /// Scores every unit artifact.
    pub const ANALYZE_QUALITY: &str = "analyze_quality";
    /// Exports the finished project.
    pub const EXPORT_PROJECT: &str = "export_project";
}

/// Envelope returned by backend calls.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BackendResponse<T = serde_json::Value> {
    /// Whether the call succeeded.
    pub success: bool,
    /// Payload on success.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<T>,
    /// Error text on failure.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl<T> BackendResponse<T> {
    /// A successful response.
    pub fn ok(data: T) -> Self {
        Self {
            success: true,
            data: Some(data),
            error: None,
        }
    }

    /// A failed response.
    pub fn fail(error: impl Into<String>) -> Self {
        Self {
            success: false,
            data: None,
            error: Some(error.into()),
        }
    }

    /// Converts the envelope into a result, naming `command` in errors.
    pub fn into_result(self, command: &str) -> Result<T, GenflowError> {
        if !self.success {
            return Err(GenflowError::backend(
                command,
                self.error.unwrap_or_else(|| "unknown error".to_string()),
            ));
        }
        self.data
            .ok_or_else(|| GenflowError::backend(command, "invalid response: missing data"))
    }
}

/// Dispatches stage-specific commands (grid, promote, quality, export).
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait RenderBackend: Send + Sync {
    /// Runs `command` with JSON `args`.
    async fn invoke(&self, command: &str, args: serde_json::Value) -> BackendResponse;
}

/// Lifecycle of an external render job.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    /// Waiting for a worker.
    Queued,
    /// Rendering.
    Running,
    /// Finished with outputs.
    Completed,
    /// Finished without outputs.
    Failed,
}

impl JobStatus {
    /// Returns true for `Completed` and `Failed`.
    #[must_use]
    pub fn is_finished(&self) -> bool {
        matches!(self, Self::Completed | Self::Failed)
    }
}

impl fmt::Display for JobStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Queued => write!(f, "queued"),
            Self::Running => write!(f, "running"),
            Self::Completed => write!(f, "completed"),
            Self::Failed => write!(f, "failed"),
        }
    }
}

/// Description of one unit's render job.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RenderJobSpec {
    /// Owning project.
    pub project_id: String,
    /// Unit being rendered.
    pub unit_id: String,
    /// Prompt for the unit.
    pub prompt: String,
    /// Layout grid produced by the grid stage.
    pub grid_url: String,
    /// Unit render parameters.
    #[serde(default)]
    pub params: serde_json::Value,
    /// Project-wide settings.
    #[serde(default)]
    pub settings: serde_json::Value,
}

/// Payload of a successful submit.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SubmittedJob {
    /// Service-assigned job id.
    pub job_id: String,
}

/// Payload of a successful poll.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobPoll {
    /// Current job status.
    pub status: JobStatus,
    /// Artifact locations, once completed.
    #[serde(default)]
    pub outputs: Vec<String>,
    /// Failure detail for `Failed` jobs.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// Asynchronous render service that accepts jobs and is polled for results.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait ExternalRenderService: Send + Sync {
    /// Submits a job.
    async fn submit(&self, job: &RenderJobSpec) -> BackendResponse<SubmittedJob>;

    /// Polls a previously submitted job.
    async fn poll(&self, job_id: &str) -> BackendResponse<JobPoll>;
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_into_result_ok() {
        let resp = BackendResponse::ok(json!({"grid_url": "g"}));
        assert_eq!(resp.into_result("generate_grid").unwrap()["grid_url"], "g");
    }

    #[test]
    fn test_into_result_failure_keeps_message() {
        let resp: BackendResponse = BackendResponse::fail("Network timeout");
        let err = resp.into_result("generate_grid").unwrap_err();
        assert_eq!(err.to_string(), "generate_grid failed: Network timeout");
    }

    #[test]
    fn test_into_result_missing_data() {
        let resp: BackendResponse = BackendResponse {
            success: true,
            data: None,
            error: None,
        };
        let err = resp.into_result("export_project").unwrap_err();
        assert!(err.to_string().contains("invalid response"));
    }

    #[test]
    fn test_job_poll_deserialize() {
        let poll: JobPoll =
            serde_json::from_str(r#"{"status": "completed", "outputs": ["a.png"]}"#).unwrap();
        assert_eq!(poll.status, JobStatus::Completed);
        assert!(poll.status.is_finished());
        assert_eq!(poll.outputs, vec!["a.png".to_string()]);
    }

    #[tokio::test]
    async fn test_mock_backend_invocation() {
        let mut backend = MockRenderBackend::new();
        backend
            .expect_invoke()
            .withf(|command, _| command == commands::GENERATE_GRID)
            .times(1)
            .returning(|_, _| BackendResponse::ok(json!({"grid_url": "https://g"})));

        let resp = backend.invoke(commands::GENERATE_GRID, json!({})).await;
        assert!(resp.success);
    }
}
