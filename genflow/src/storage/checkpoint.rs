//! Durable per-project checkpoints.
//!
//! A checkpoint records which stages of the latest run completed, the units
//! produced so far and the last error. It is overwritten wholesale on every
//! save and cleared once a run fully succeeds, so a surviving checkpoint
//! always describes an unfinished run.

use super::inflight::InFlightWrites;
use super::kv::KeyValueStore;
use crate::core::{GeneratedUnit, GenerationStage};
use crate::errors::GenflowError;
use crate::utils::Clock;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{debug, warn};

const KEY_PREFIX: &str = "checkpoint:";

/// Snapshot of an unfinished run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Checkpoint {
    /// Owning project.
    pub project_id: String,
    /// Save time, unix milliseconds.
    pub timestamp_ms: i64,
    /// Stages that finished, in execution order.
    pub completed_stages: Vec<GenerationStage>,
    /// Units produced so far.
    pub generated_units: Vec<GeneratedUnit>,
    /// Exported deliverable, once export ran.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub primary_artifact_url: Option<String>,
    /// Raw text of the error that aborted the run.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_error: Option<String>,
}

impl Checkpoint {
    /// Returns true if `stage` completed in the checkpointed run.
    #[must_use]
    pub fn is_stage_completed(&self, stage: GenerationStage) -> bool {
        self.completed_stages.contains(&stage)
    }

    /// The first pipeline stage that did not complete.
    ///
    /// Callers use this to decide on a manual resume; nothing resumes
    /// automatically.
    #[must_use]
    pub fn next_stage(&self) -> Option<GenerationStage> {
        GenerationStage::PIPELINE
            .into_iter()
            .find(|stage| !self.is_stage_completed(*stage))
    }
}

/// Stores one checkpoint per project.
pub struct CheckpointStore {
    store: Arc<dyn KeyValueStore>,
    clock: Arc<dyn Clock>,
    in_flight: InFlightWrites,
}

impl CheckpointStore {
    /// Creates a checkpoint store over `store`.
    #[must_use]
    pub fn new(store: Arc<dyn KeyValueStore>, clock: Arc<dyn Clock>) -> Self {
        Self {
            store,
            clock,
            in_flight: InFlightWrites::new(),
        }
    }

    fn key(project_id: &str) -> String {
        format!("{KEY_PREFIX}{project_id}")
    }

    /// Replaces the project's checkpoint.
    ///
    /// Concurrent saves for the same project collapse into one write.
    pub async fn save(
        &self,
        project_id: &str,
        completed_stages: &[GenerationStage],
        units: &[GeneratedUnit],
        primary_artifact_url: Option<&str>,
        last_error: Option<&str>,
    ) -> Result<(), GenflowError> {
        let checkpoint = Checkpoint {
            project_id: project_id.to_string(),
            timestamp_ms: self.clock.now_ms(),
            completed_stages: completed_stages.to_vec(),
            generated_units: units.to_vec(),
            primary_artifact_url: primary_artifact_url.map(str::to_string),
            last_error: last_error.map(str::to_string),
        };
        let payload = serde_json::to_string(&checkpoint)?;
        let key = Self::key(project_id);
        let store = self.store.clone();

        self.in_flight
            .run(project_id, move || async move { store.set(&key, payload).await })
            .await?;

        debug!(
            project_id,
            completed = completed_stages.len(),
            units = units.len(),
            "Checkpoint saved"
        );
        Ok(())
    }

    /// Loads the project's checkpoint.
    ///
    /// Missing, unreadable and corrupt records all yield `None`.
    pub async fn load(&self, project_id: &str) -> Option<Checkpoint> {
        let raw = match self.store.get(&Self::key(project_id)).await {
            Ok(raw) => raw?,
            Err(e) => {
                warn!(project_id, error = %e, "Checkpoint read failed");
                return None;
            }
        };

        match serde_json::from_str(&raw) {
            Ok(checkpoint) => Some(checkpoint),
            Err(e) => {
                warn!(project_id, error = %e, "Discarding corrupt checkpoint");
                None
            }
        }
    }

    /// Removes the project's checkpoint.
    pub async fn clear(&self, project_id: &str) -> Result<(), GenflowError> {
        self.store.delete(&Self::key(project_id)).await?;
        debug!(project_id, "Checkpoint cleared");
        Ok(())
    }
}

impl std::fmt::Debug for CheckpointStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CheckpointStore")
            .field("in_flight", &self.in_flight)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::InMemoryKeyValueStore;
    use crate::testing::CountingKeyValueStore;
    use crate::utils::ManualClock;
    use pretty_assertions::assert_eq;
    use std::time::Duration;

    fn unit(id: &str) -> GeneratedUnit {
        GeneratedUnit {
            unit_id: id.to_string(),
            artifact_url: format!("https://render.local/{id}.png"),
            quality_score: 0.75,
            processing_time_ms: 1200,
        }
    }

    fn store_with(kv: Arc<dyn KeyValueStore>) -> CheckpointStore {
        CheckpointStore::new(kv, Arc::new(ManualClock::new(1_000)))
    }

    #[tokio::test]
    async fn test_save_load_round_trip() {
        let store = store_with(Arc::new(InMemoryKeyValueStore::new()));
        let stages = [GenerationStage::Grid, GenerationStage::ExternalRender];
        let units = [unit("u1"), unit("u2")];

        store
            .save("p1", &stages, &units, None, Some("Network timeout"))
            .await
            .unwrap();

        let loaded = store.load("p1").await.unwrap();
        assert_eq!(
            loaded,
            Checkpoint {
                project_id: "p1".to_string(),
                timestamp_ms: 1_000,
                completed_stages: stages.to_vec(),
                generated_units: units.to_vec(),
                primary_artifact_url: None,
                last_error: Some("Network timeout".to_string()),
            }
        );
    }

    #[tokio::test]
    async fn test_load_missing_is_none() {
        let store = store_with(Arc::new(InMemoryKeyValueStore::new()));
        assert!(store.load("never").await.is_none());
    }

    #[tokio::test]
    async fn test_load_corrupt_is_none() {
        let kv = Arc::new(InMemoryKeyValueStore::new());
        kv.set("checkpoint:p1", "{not json".to_string()).await.unwrap();

        let store = store_with(kv);
        assert!(store.load("p1").await.is_none());
    }

    #[tokio::test]
    async fn test_clear_then_load_is_none() {
        let store = store_with(Arc::new(InMemoryKeyValueStore::new()));
        store
            .save("p1", &[GenerationStage::Grid], &[], None, None)
            .await
            .unwrap();

        store.clear("p1").await.unwrap();
        assert!(store.load("p1").await.is_none());
    }

    #[tokio::test]
    async fn test_save_overwrites_wholesale() {
        let store = store_with(Arc::new(InMemoryKeyValueStore::new()));
        store
            .save("p1", &[GenerationStage::Grid], &[unit("u1")], None, Some("old"))
            .await
            .unwrap();
        store
            .save("p1", &[GenerationStage::Grid], &[], Some("https://x/out.mp4"), None)
            .await
            .unwrap();

        let loaded = store.load("p1").await.unwrap();
        assert!(loaded.generated_units.is_empty());
        assert!(loaded.last_error.is_none());
        assert_eq!(loaded.primary_artifact_url.as_deref(), Some("https://x/out.mp4"));
    }

    #[tokio::test]
    async fn test_concurrent_saves_write_once() {
        let kv = Arc::new(CountingKeyValueStore::new().with_write_delay(Duration::from_millis(20)));
        let store = store_with(kv.clone());

        let units = [unit("u1")];
        let (a, b) = tokio::join!(
            store.save("p1", &[GenerationStage::Grid], &[], None, None),
            store.save("p1", &[GenerationStage::Grid], &units, None, None),
        );

        assert!(a.is_ok());
        assert!(b.is_ok());
        assert_eq!(kv.write_count(), 1);
    }

    #[tokio::test]
    async fn test_concurrent_saves_for_different_projects_both_write() {
        let kv = Arc::new(CountingKeyValueStore::new().with_write_delay(Duration::from_millis(10)));
        let store = store_with(kv.clone());

        let (a, b) = tokio::join!(
            store.save("p1", &[], &[], None, None),
            store.save("p2", &[], &[], None, None),
        );

        assert!(a.is_ok() && b.is_ok());
        assert_eq!(kv.write_count(), 2);
    }

    #[test]
    fn test_next_stage() {
        let checkpoint = Checkpoint {
            project_id: "p1".to_string(),
            timestamp_ms: 0,
            completed_stages: vec![GenerationStage::Grid, GenerationStage::ExternalRender],
            generated_units: Vec::new(),
            primary_artifact_url: None,
            last_error: None,
        };
        assert!(checkpoint.is_stage_completed(GenerationStage::Grid));
        assert_eq!(checkpoint.next_stage(), Some(GenerationStage::Promotion));
    }
}
