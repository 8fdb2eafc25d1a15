//! Registry of results handed out by id
//!
//! Non-blocking entry points save their result cell here and return an id
//! straight away. The id is later redeemed with [`PendingResults::get`]. Each
//! entry is consumed exactly once; deleting an entry that has not resolved
//! fails anyone waiting on it.

use cohort_core::{Deferred, EngineError, Result};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::debug;
use uuid::Uuid;

struct Entry<T> {
    deferred: Deferred<T>,
    /// A blocking consumer has claimed this entry
    claimed: bool,
}

pub struct PendingResults<T> {
    entries: Arc<Mutex<HashMap<String, Entry<T>>>>,
}

impl<T> Clone for PendingResults<T> {
    fn clone(&self) -> Self {
        Self {
            entries: Arc::clone(&self.entries),
        }
    }
}

impl<T> Default for PendingResults<T>
where
    T: Clone + Send + Sync + 'static,
{
    fn default() -> Self {
        Self::new()
    }
}

fn invalid(id: &str) -> EngineError {
    EngineError::InvalidDeferredId { id: id.to_string() }
}

impl<T> PendingResults<T>
where
    T: Clone + Send + Sync + 'static,
{
    pub fn new() -> Self {
        Self {
            entries: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    /// Store a result cell and return its id. Does not wait.
    pub fn save(&self, deferred: Deferred<T>) -> String {
        let id = Uuid::new_v4().to_string();
        self.entries.lock().insert(
            id.clone(),
            Entry {
                deferred,
                claimed: false,
            },
        );
        debug!(pending_id = %id, "Saved pending result");
        id
    }

    /// Poll without waiting.
    ///
    /// Fails with `ResultNotCompleted` until the result is in; the first poll
    /// after that consumes the entry.
    pub fn try_get(&self, id: &str) -> Result<T> {
        let mut entries = self.entries.lock();
        let entry = entries.get(id).ok_or_else(|| invalid(id))?;
        if entry.claimed {
            return Err(invalid(id));
        }
        match entry.deferred.peek() {
            None => Err(EngineError::ResultNotCompleted { id: id.to_string() }),
            Some(outcome) => {
                entries.remove(id);
                outcome
            }
        }
    }

    /// Claim the entry and wait for it.
    ///
    /// Only one consumer may claim an entry; a second claim fails at once.
    /// The entry is removed after the result arrives.
    pub fn wait(&self, id: &str) -> Result<Deferred<T>> {
        let deferred = {
            let mut entries = self.entries.lock();
            let entry = entries.get_mut(id).ok_or_else(|| invalid(id))?;
            if entry.claimed {
                return Err(invalid(id));
            }
            if let Some(outcome) = entry.deferred.peek() {
                entries.remove(id);
                return Ok(Deferred::resolved(outcome));
            }
            entry.claimed = true;
            entry.deferred.clone()
        };

        let consumed = Deferred::new();
        let out = consumed.clone();
        let entries = Arc::clone(&self.entries);
        let id = id.to_string();
        tokio::spawn(async move {
            let outcome = deferred.wait().await;
            entries.lock().remove(&id);
            consumed.resolve(outcome);
        });
        Ok(out)
    }

    /// `wait` when `block` is set, otherwise `try_get` wrapped in a resolved cell
    pub fn get(&self, id: &str, block: bool) -> Result<Deferred<T>> {
        if block {
            self.wait(id)
        } else {
            let outcome = match self.try_get(id) {
                Err(err @ EngineError::ResultNotCompleted { .. })
                | Err(err @ EngineError::InvalidDeferredId { .. }) => return Err(err),
                other => other,
            };
            Ok(Deferred::resolved(outcome))
        }
    }

    /// Drop an entry, failing its waiters if it has not resolved
    pub fn delete(&self, id: &str) -> Result<()> {
        let entry = self.entries.lock().remove(id).ok_or_else(|| invalid(id))?;
        Self::abort(id, entry);
        Ok(())
    }

    /// Drop every entry. Returns how many were removed.
    pub fn clear(&self) -> usize {
        let drained: Vec<_> = self.entries.lock().drain().collect();
        let count = drained.len();
        for (id, entry) in drained {
            Self::abort(&id, entry);
        }
        count
    }

    fn abort(id: &str, entry: Entry<T>) {
        let aborted = entry
            .deferred
            .resolve(Err(EngineError::AbortedPendingDeferred { id: id.to_string() }));
        if aborted {
            debug!(pending_id = %id, "Aborted unresolved pending result");
        }
    }

    pub fn contains(&self, id: &str) -> bool {
        self.entries.lock().contains_key(id)
    }

    /// Ids currently held, in no particular order
    pub fn ids(&self) -> Vec<String> {
        self.entries.lock().keys().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.entries.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.lock().is_empty()
    }
}
