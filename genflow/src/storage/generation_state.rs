//! Durable liveness records for generation runs.
//!
//! A record answers "is a generation still running for this project"
//! independently of checkpoint content. Records carry a timestamp and are
//! only considered active inside the staleness window; anything older is
//! treated as abandoned and purged when read.

use super::inflight::InFlightWrites;
use super::kv::KeyValueStore;
use crate::cancellation::CancellationToken;
use crate::core::GenerationStatus;
use crate::errors::GenflowError;
use crate::utils::{format_ms, Clock};
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, info, warn};

const KEY_PREFIX: &str = "generation_state:";

/// Default staleness window: five minutes.
pub const DEFAULT_STALE_WINDOW: Duration = Duration::from_secs(5 * 60);

/// Source of the status written by a periodic update.
pub type StatusSource = Arc<dyn Fn() -> GenerationStatus + Send + Sync>;

/// Persisted liveness record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GenerationStateRecord {
    /// Owning project.
    pub project_id: String,
    /// Last reported status.
    pub status: GenerationStatus,
    /// Save time, unix milliseconds.
    pub timestamp_ms: i64,
    /// Whether the writer considered the run live.
    pub is_active: bool,
}

struct PeriodicUpdate {
    token: Arc<CancellationToken>,
    handle: JoinHandle<()>,
}

impl PeriodicUpdate {
    fn stop(self, reason: &str) {
        self.token.cancel(reason);
        self.handle.abort();
    }
}

/// Stores liveness records and drives periodic refresh timers.
///
/// Cloning is cheap; clones share storage and timers.
#[derive(Clone)]
pub struct GenerationStateStore {
    store: Arc<dyn KeyValueStore>,
    clock: Arc<dyn Clock>,
    stale_window: Duration,
    in_flight: Arc<InFlightWrites>,
    timers: Arc<DashMap<String, PeriodicUpdate>>,
}

impl GenerationStateStore {
    /// Creates a store with the default staleness window.
    #[must_use]
    pub fn new(store: Arc<dyn KeyValueStore>, clock: Arc<dyn Clock>) -> Self {
        Self {
            store,
            clock,
            stale_window: DEFAULT_STALE_WINDOW,
            in_flight: Arc::new(InFlightWrites::new()),
            timers: Arc::new(DashMap::new()),
        }
    }

    /// Sets the staleness window.
    #[must_use]
    pub fn with_stale_window(mut self, window: Duration) -> Self {
        self.stale_window = window;
        self
    }

    /// The staleness window.
    #[must_use]
    pub fn stale_window(&self) -> Duration {
        self.stale_window
    }

    fn key(project_id: &str) -> String {
        format!("{KEY_PREFIX}{project_id}")
    }

    fn is_live(&self, record: &GenerationStateRecord) -> bool {
        let window_ms = i64::try_from(self.stale_window.as_millis()).unwrap_or(i64::MAX);
        record.is_active && self.clock.now_ms() - record.timestamp_ms < window_ms
    }

    /// Writes the project's record stamped with the current time.
    pub async fn save(
        &self,
        project_id: &str,
        status: &GenerationStatus,
        is_active: bool,
    ) -> Result<(), GenflowError> {
        let record = GenerationStateRecord {
            project_id: project_id.to_string(),
            status: status.clone(),
            timestamp_ms: self.clock.now_ms(),
            is_active,
        };
        let payload = serde_json::to_string(&record)?;
        let key = Self::key(project_id);
        let store = self.store.clone();

        self.in_flight
            .run(project_id, move || async move { store.set(&key, payload).await })
            .await
    }

    async fn read(&self, key: &str) -> Option<GenerationStateRecord> {
        let raw = match self.store.get(key).await {
            Ok(raw) => raw?,
            Err(e) => {
                warn!(key, error = %e, "Generation state read failed");
                return None;
            }
        };
        match serde_json::from_str(&raw) {
            Ok(record) => Some(record),
            Err(e) => {
                warn!(key, error = %e, "Discarding corrupt generation state");
                self.purge(key).await;
                None
            }
        }
    }

    async fn purge(&self, key: &str) {
        if let Err(e) = self.store.delete(key).await {
            warn!(key, error = %e, "Failed to purge generation state");
        }
    }

    /// Returns the project's record if it is active, purging it otherwise.
    pub async fn get(&self, project_id: &str) -> Option<GenerationStateRecord> {
        let key = Self::key(project_id);
        let record = self.read(&key).await?;
        if self.is_live(&record) {
            Some(record)
        } else {
            debug!(
                project_id,
                saved_at = %format_ms(record.timestamp_ms),
                "Purging inactive generation state"
            );
            self.purge(&key).await;
            None
        }
    }

    /// Returns true if the project has an active, fresh record.
    ///
    /// Inactive or stale records are deleted as a side effect.
    pub async fn is_active(&self, project_id: &str) -> bool {
        self.get(project_id).await.is_some()
    }

    /// Returns every active record, purging stale ones encountered.
    pub async fn list_active(&self) -> Result<Vec<GenerationStateRecord>, GenflowError> {
        let keys = self.store.list_keys().await?;
        let mut active = Vec::new();

        for key in keys.iter().filter(|k| k.starts_with(KEY_PREFIX)) {
            let Some(record) = self.read(key).await else {
                continue;
            };
            if self.is_live(&record) {
                active.push(record);
            } else {
                self.purge(key).await;
            }
        }
        Ok(active)
    }

    /// Starts refreshing the project's record every `interval`.
    ///
    /// Each tick calls `status_source` and saves the result. An existing
    /// timer for the same project is stopped first; timers of other projects
    /// are untouched. The timer stops itself after saving a terminal status.
    pub fn start_periodic_updates(
        &self,
        project_id: &str,
        status_source: StatusSource,
        interval: Duration,
    ) {
        if let Some((_, previous)) = self.timers.remove(project_id) {
            debug!(project_id, "Replacing periodic generation-state update");
            previous.stop("replaced");
        }

        let token = Arc::new(CancellationToken::new());
        let this = self.clone();
        let id = project_id.to_string();
        let task_token = token.clone();
        let (registered_tx, registered_rx) = oneshot::channel::<()>();

        // The task only ticks once its entry is in `timers`, so its own
        // cleanup always finds the entry.
        let handle = tokio::spawn(async move {
            if registered_rx.await.is_ok() {
                this.run_periodic(id, status_source, interval, task_token).await;
            }
        });

        self.timers
            .insert(project_id.to_string(), PeriodicUpdate { token, handle });
        // Cannot fail: the task holds the receiver until this send.
        let _ = registered_tx.send(());
    }

    async fn run_periodic(
        &self,
        project_id: String,
        status_source: StatusSource,
        interval: Duration,
        token: Arc<CancellationToken>,
    ) {
        let mut ticker = tokio::time::interval(interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                () = token.cancelled() => break,
                _ = ticker.tick() => {}
            }

            let status = status_source();
            let terminal = status.is_terminal();
            if let Err(e) = self.save(&project_id, &status, !terminal).await {
                warn!(project_id = %project_id, error = %e, "Periodic generation-state save failed");
            }
            if terminal {
                info!(project_id = %project_id, stage = %status.stage, "Generation reached terminal stage");
                break;
            }
        }

        self.timers
            .remove_if(&project_id, |_, timer| Arc::ptr_eq(&timer.token, &token));
    }

    /// Stops the project's timer, if any.
    pub fn stop_periodic_updates(&self, project_id: &str) -> bool {
        match self.timers.remove(project_id) {
            Some((_, timer)) => {
                timer.stop("stopped");
                true
            }
            None => false,
        }
    }

    /// Number of running timers.
    #[must_use]
    pub fn active_timer_count(&self) -> usize {
        self.timers.len()
    }

    /// Returns true if a timer is running for the project.
    #[must_use]
    pub fn has_timer(&self, project_id: &str) -> bool {
        self.timers.contains_key(project_id)
    }

    /// Marks the project's generation finished: stops its timer and deletes
    /// its record.
    pub async fn complete_generation(&self, project_id: &str) -> Result<(), GenflowError> {
        self.stop_periodic_updates(project_id);
        self.store.delete(&Self::key(project_id)).await?;
        debug!(project_id, "Generation state completed");
        Ok(())
    }

    /// Stops every timer.
    pub fn cleanup(&self) {
        let ids: Vec<String> = self.timers.iter().map(|e| e.key().clone()).collect();
        for id in ids {
            if let Some((_, timer)) = self.timers.remove(&id) {
                timer.stop("cleanup");
            }
        }
    }
}

impl std::fmt::Debug for GenerationStateStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GenerationStateStore")
            .field("stale_window", &self.stale_window)
            .field("active_timers", &self.active_timer_count())
            .finish()
    }
}
