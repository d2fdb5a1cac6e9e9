//! Per-key de-duplication of concurrent writes.
//!
//! While a write for a key is pending, further write requests for the same
//! key join the pending future instead of issuing their own. All joined
//! callers observe the owner's outcome and only one physical write happens;
//! the joiners' payloads are discarded. Unrelated keys never wait on each
//! other.

use crate::errors::GenflowError;
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use futures::future::{BoxFuture, FutureExt, Shared};
use std::future::Future;

type SharedWrite = Shared<BoxFuture<'static, Result<(), GenflowError>>>;

/// Registry of pending writes keyed by id.
#[derive(Default)]
pub struct InFlightWrites {
    pending: DashMap<String, SharedWrite>,
}

impl InFlightWrites {
    /// Creates an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of writes currently pending.
    #[must_use]
    pub fn pending_count(&self) -> usize {
        self.pending.len()
    }

    /// Runs the write produced by `make`, unless a write for `key` is
    /// already pending, in which case that write is awaited instead and
    /// `make` is never called.
    pub async fn run<F, Fut>(&self, key: &str, make: F) -> Result<(), GenflowError>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<(), GenflowError>> + Send + 'static,
    {
        let write = match self.pending.entry(key.to_string()) {
            Entry::Occupied(existing) => existing.get().clone(),
            Entry::Vacant(slot) => {
                let write = make().boxed().shared();
                slot.insert(write.clone());
                write
            }
        };

        let result = write.clone().await;

        // Retired by whichever caller finishes first, including joiners of a dropped owner.
        self.pending.remove_if(key, |_, pending| pending.ptr_eq(&write));
        result
    }
}

impl std::fmt::Debug for InFlightWrites {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("InFlightWrites")
            .field("pending_count", &self.pending_count())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;
    use std::time::Duration;

    fn slow_write(counter: Arc<AtomicUsize>) -> impl Future<Output = Result<(), GenflowError>> {
        async move {
            tokio::time::sleep(Duration::from_millis(20)).await;
            counter.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
    }

    #[tokio::test]
    async fn test_concurrent_same_key_collapses() {
        let inflight = InFlightWrites::new();
        let writes = Arc::new(AtomicUsize::new(0));

        let (a, b) = tokio::join!(
            inflight.run("p1", || slow_write(writes.clone())),
            inflight.run("p1", || slow_write(writes.clone())),
        );

        assert!(a.is_ok());
        assert!(b.is_ok());
        assert_eq!(writes.load(Ordering::SeqCst), 1);
        assert_eq!(inflight.pending_count(), 0);
    }

    #[tokio::test]
    async fn test_different_keys_both_write() {
        let inflight = InFlightWrites::new();
        let writes = Arc::new(AtomicUsize::new(0));

        let (a, b) = tokio::join!(
            inflight.run("p1", || slow_write(writes.clone())),
            inflight.run("p2", || slow_write(writes.clone())),
        );

        assert!(a.is_ok() && b.is_ok());
        assert_eq!(writes.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_sequential_writes_are_not_collapsed() {
        let inflight = InFlightWrites::new();
        let writes = Arc::new(AtomicUsize::new(0));

        inflight.run("p1", || slow_write(writes.clone())).await.unwrap();
        inflight.run("p1", || slow_write(writes.clone())).await.unwrap();

        assert_eq!(writes.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_joined_caller_sees_owner_error() {
        let inflight = InFlightWrites::new();

        let (a, b) = tokio::join!(
            inflight.run("p1", || async {
                tokio::time::sleep(Duration::from_millis(10)).await;
                Err(GenflowError::Storage("disk full".to_string()))
            }),
            inflight.run("p1", || async { Ok(()) }),
        );

        assert!(matches!(a, Err(GenflowError::Storage(_))));
        assert!(matches!(b, Err(GenflowError::Storage(_))));
        assert_eq!(inflight.pending_count(), 0);
    }
}
