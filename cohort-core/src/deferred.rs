//! Write-once asynchronous result cell
//!
//! A [`Deferred`] starts pending and is resolved exactly once, either with a
//! value or with an [`EngineError`]. Later resolutions are ignored. Any number
//! of clones may wait on it or peek at it without consuming the outcome.

use futures::future::join_all;
use std::fmt;
use std::sync::Arc;
use tokio::sync::watch;
use tracing::debug;

use crate::error::{CompositeError, EngineError, Result};
use crate::types::EngineId;

type Slot<T> = Option<Result<T>>;

pub struct Deferred<T> {
    slot: Arc<watch::Sender<Slot<T>>>,
}

impl<T> Clone for Deferred<T> {
    fn clone(&self) -> Self {
        Self {
            slot: Arc::clone(&self.slot),
        }
    }
}

impl<T> fmt::Debug for Deferred<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = match &*self.slot.borrow() {
            None => "pending",
            Some(Ok(_)) => "fulfilled",
            Some(Err(_)) => "failed",
        };
        f.debug_struct("Deferred").field("state", &state).finish()
    }
}

impl<T> Default for Deferred<T>
where
    T: Clone + Send + Sync + 'static,
{
    fn default() -> Self {
        Self::new()
    }
}

impl<T> Deferred<T>
where
    T: Clone + Send + Sync + 'static,
{
    /// Create a pending cell
    pub fn new() -> Self {
        let (tx, _rx) = watch::channel(None);
        Self { slot: Arc::new(tx) }
    }

    /// Create a cell that is already resolved
    pub fn resolved(result: Result<T>) -> Self {
        let (tx, _rx) = watch::channel(Some(result));
        Self { slot: Arc::new(tx) }
    }

    /// Resolve the cell. Returns false if it was already resolved.
    pub fn resolve(&self, result: Result<T>) -> bool {
        let mut result = Some(result);
        self.slot.send_if_modified(|slot| {
            if slot.is_some() {
                return false;
            }
            *slot = result.take();
            true
        })
    }

    pub fn is_resolved(&self) -> bool {
        self.slot.borrow().is_some()
    }

    /// The outcome if resolved, without waiting
    pub fn peek(&self) -> Option<Result<T>> {
        self.slot.borrow().clone()
    }

    /// Wait for the outcome
    pub async fn wait(&self) -> Result<T> {
        let mut rx = self.slot.subscribe();
        let outcome = match rx.wait_for(Option::is_some).await {
            Ok(slot) => slot.clone(),
            Err(_) => None,
        };
        outcome.unwrap_or_else(|| {
            Err(EngineError::ConnectionLost {
                reason: "result cell dropped before it resolved".to_string(),
            })
        })
    }

    /// Derive a new cell from this one's outcome
    pub fn map<U, F>(&self, f: F) -> Deferred<U>
    where
        U: Clone + Send + Sync + 'static,
        F: FnOnce(T) -> Result<U> + Send + 'static,
    {
        if let Some(outcome) = self.peek() {
            return Deferred::resolved(outcome.and_then(f));
        }

        debug!("Mapping a pending result cell");
        let mapped = Deferred::new();
        let out = mapped.clone();
        let source = self.clone();
        tokio::spawn(async move {
            mapped.resolve(source.wait().await.and_then(f));
        });
        out
    }

    /// Join per-engine cells into one cell holding every value in order.
    ///
    /// If any engine fails, the joined cell fails with a [`CompositeError`]
    /// listing all failures.
    pub fn join(
        entries: Vec<(Option<EngineId>, Deferred<T>)>,
        message: impl Into<String>,
    ) -> Deferred<Vec<T>> {
        let message = message.into();
        let ready: Option<Vec<_>> = entries
            .iter()
            .map(|(id, deferred)| deferred.peek().map(|outcome| (*id, outcome)))
            .collect();
        if let Some(results) = ready {
            return Deferred::resolved(
                CompositeError::collect(message, results).map_err(EngineError::Composite),
            );
        }

        debug!(cells = entries.len(), "Joining pending result cells");
        let joined = Deferred::new();
        let out = joined.clone();
        tokio::spawn(async move {
            let results = join_all(
                entries
                    .iter()
                    .map(|(id, deferred)| async move { (*id, deferred.wait().await) }),
            )
            .await;
            let outcome = CompositeError::collect(message, results).map_err(EngineError::Composite);
            if let Err(EngineError::Composite(composite)) = &outcome {
                debug!(failures = composite.len(), "Joined cell failed");
            }
            joined.resolve(outcome);
        });
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[tokio::test]
    async fn test_resolve_is_write_once() {
        let deferred: Deferred<i32> = Deferred::new();
        assert!(!deferred.is_resolved());
        assert!(deferred.peek().is_none());

        assert!(deferred.resolve(Ok(1)));
        assert!(!deferred.resolve(Ok(2)));
        assert!(!deferred.resolve(Err(EngineError::NoEnginesRegistered)));

        assert_eq!(deferred.wait().await, Ok(1));
        assert_eq!(deferred.peek(), Some(Ok(1)));
    }

    #[tokio::test]
    async fn test_wait_observes_later_resolution() {
        let deferred: Deferred<String> = Deferred::new();
        let producer = deferred.clone();

        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(10)).await;
            producer.resolve(Ok("done".to_string()));
        });

        assert_eq!(deferred.wait().await, Ok("done".to_string()));
    }

    #[tokio::test]
    async fn test_map_pending_and_resolved() {
        let ready = Deferred::resolved(Ok(20));
        assert_eq!(ready.map(|v| Ok(v + 1)).wait().await, Ok(21));

        let pending: Deferred<i32> = Deferred::new();
        let mapped = pending.map(|v| Ok(v * 2));
        pending.resolve(Ok(4));
        assert_eq!(mapped.wait().await, Ok(8));
    }

    #[tokio::test]
    async fn test_join_preserves_target_order() {
        let a: Deferred<i32> = Deferred::new();
        let b: Deferred<i32> = Deferred::new();
        let joined = Deferred::join(vec![(Some(0), a.clone()), (Some(1), b.clone())], "join");

        b.resolve(Ok(2));
        a.resolve(Ok(1));

        assert_eq!(joined.wait().await, Ok(vec![1, 2]));
    }

    #[tokio::test]
    async fn test_join_fails_with_composite() {
        let a = Deferred::resolved(Ok(1));
        let b = Deferred::resolved(Err(EngineError::name_error("x")));
        let c = Deferred::resolved(Err(EngineError::execution("AssertionError", "")));

        let joined = Deferred::join(vec![(Some(0), a), (Some(1), b), (Some(2), c)], "execute");
        match joined.wait().await {
            Err(EngineError::Composite(composite)) => {
                assert_eq!(composite.len(), 2);
                assert_eq!(composite[0].engine_id, Some(1));
                assert_eq!(composite[1].engine_id, Some(2));
            }
            other => panic!("expected composite error, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_join_of_pending_cells_fails_once_all_settle() {
        let a: Deferred<i32> = Deferred::new();
        let b: Deferred<i32> = Deferred::new();
        let joined = Deferred::join(vec![(Some(3), a.clone()), (Some(4), b.clone())], "pull");

        a.resolve(Err(EngineError::name_error("y")));
        tokio::task::yield_now().await;
        assert!(!joined.is_resolved());

        b.resolve(Ok(7));
        match joined.wait().await {
            Err(EngineError::Composite(composite)) => {
                assert_eq!(composite.len(), 1);
                assert_eq!(composite[0].engine_id, Some(3));
            }
            other => panic!("expected composite error, got {other:?}"),
        }
    }
}
