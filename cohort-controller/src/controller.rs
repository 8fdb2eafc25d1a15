//! Registry of connected engines
//!
//! The controller hands out engine ids from a pool it owns, wraps every
//! registered engine in a [`QueuedEngine`] and tells observers when engines
//! come and go.

use chrono::{DateTime, Utc};
use cohort_config::ControllerConfig;
use cohort_core::{Deferred, EngineError, EngineId, Result};
use cohort_engine::EngineCore;
use cohort_ipc::RemoteEngine;
use parking_lot::Mutex;
use std::collections::{BTreeMap, BTreeSet};
use std::sync::{Arc, Weak};
use tracing::{debug, info, warn};

use crate::queued::QueuedEngine;

/// Callback fired with the id of an engine that joined or left
pub type Observer = Box<dyn FnMut(EngineId) -> anyhow::Result<()> + Send>;

type Threshold = Box<dyn FnOnce(usize) + Send>;

/// Optional details supplied when an engine registers
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Registration {
    /// Id to use if it is free
    pub requested_id: Option<EngineId>,
    /// Peer address, for diagnostics
    pub addr: Option<String>,
    pub pid: Option<u32>,
}

impl Registration {
    pub fn with_id(id: EngineId) -> Self {
        Self {
            requested_id: Some(id),
            ..Self::default()
        }
    }
}

#[derive(Clone)]
pub struct EngineRecord {
    pub id: EngineId,
    pub engine: Arc<QueuedEngine>,
    pub addr: Option<String>,
    pub pid: Option<u32>,
    pub registered_at: DateTime<Utc>,
}

impl std::fmt::Debug for EngineRecord {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EngineRecord")
            .field("id", &self.id)
            .field("addr", &self.addr)
            .field("pid", &self.pid)
            .field("registered_at", &self.registered_at)
            .finish()
    }
}

/// Ids available for new engines
#[derive(Debug)]
struct IdPool {
    free: BTreeSet<EngineId>,
    capacity: usize,
    preserve: bool,
}

impl IdPool {
    fn new(capacity: usize, preserve: bool) -> Self {
        Self {
            free: (0..capacity).collect(),
            capacity,
            preserve,
        }
    }

    /// The requested id if it is free, else the smallest free id
    fn take(&mut self, requested: Option<EngineId>) -> Result<EngineId> {
        if let Some(id) = requested {
            if self.free.remove(&id) {
                return Ok(id);
            }
        }
        self.free.pop_first().ok_or(EngineError::EnginePoolExhausted {
            max_engines: self.capacity,
        })
    }

    fn release(&mut self, id: EngineId) {
        if !self.preserve && id < self.capacity {
            self.free.insert(id);
        }
    }
}

struct Registry {
    engines: BTreeMap<EngineId, EngineRecord>,
    pool: IdPool,
}

#[derive(Default)]
struct Observers {
    on_register: Vec<Observer>,
    on_unregister: Vec<Observer>,
    thresholds: Vec<(usize, Threshold)>,
}

type ObserverList = fn(&mut Observers) -> &mut Vec<Observer>;

/// Run every observer, dropping the ones that fail
fn notify(observers: &mut Vec<Observer>, id: EngineId, event: &str) {
    observers.retain_mut(|observer| match observer(id) {
        Ok(()) => true,
        Err(err) => {
            warn!(engine_id = id, event, error = %err, "Removing failing observer");
            false
        }
    });
}

pub struct Controller {
    registry: Mutex<Registry>,
    observers: Mutex<Observers>,
    config: ControllerConfig,
}

impl Default for Controller {
    fn default() -> Self {
        Self::new(ControllerConfig::default())
    }
}

impl Controller {
    pub fn new(config: ControllerConfig) -> Self {
        Self {
            registry: Mutex::new(Registry {
                engines: BTreeMap::new(),
                pool: IdPool::new(config.max_engines, config.preserve_ids),
            }),
            observers: Mutex::new(Observers::default()),
            config,
        }
    }

    pub fn config(&self) -> &ControllerConfig {
        &self.config
    }

    /// Register an engine and return the id it was given.
    ///
    /// The engine is told its new id before it becomes visible to callers.
    pub async fn register_engine(
        &self,
        engine: Arc<dyn EngineCore>,
        registration: Registration,
    ) -> Result<EngineId> {
        let id = self.registry.lock().pool.take(registration.requested_id)?;

        if let Err(err) = engine.set_id(id).await {
            warn!(engine_id = id, error = %err, "Engine rejected its id");
            self.registry.lock().pool.release(id);
            return Err(err);
        }

        let record = EngineRecord {
            id,
            engine: Arc::new(QueuedEngine::new(engine)),
            addr: registration.addr,
            pid: registration.pid,
            registered_at: Utc::now(),
        };
        let count = {
            let mut registry = self.registry.lock();
            registry.engines.insert(id, record);
            registry.engines.len()
        };
        info!(
            engine_id = id,
            requested = ?registration.requested_id,
            count,
            "Engine registered"
        );

        self.notify_observers(|observers| &mut observers.on_register, id, "register");
        let ready = {
            let mut observers = self.observers.lock();
            let (ready, waiting) = std::mem::take(&mut observers.thresholds)
                .into_iter()
                .partition::<Vec<_>, _>(|(n, _)| *n <= count);
            observers.thresholds = waiting;
            ready
        };
        for (_, callback) in ready {
            callback(count);
        }
        Ok(id)
    }

    /// Register a remote engine and unregister it when its connection drops
    pub async fn register_remote(
        self: &Arc<Self>,
        engine: Arc<RemoteEngine>,
        mut registration: Registration,
    ) -> Result<EngineId> {
        registration.pid.get_or_insert(engine.pid());
        let closed = engine.closed();
        let id = self.register_engine(engine, registration).await?;
        self.unregister_when(id, closed);
        Ok(id)
    }

    /// Remove an engine. Unknown ids are logged and ignored.
    pub fn unregister_engine(&self, id: EngineId) -> Option<EngineRecord> {
        let removed = {
            let mut registry = self.registry.lock();
            let removed = registry.engines.remove(&id);
            if removed.is_some() {
                registry.pool.release(id);
            }
            removed
        };

        match removed {
            Some(record) => {
                info!(engine_id = id, "Engine unregistered");
                self.notify_observers(|observers| &mut observers.on_unregister, id, "unregister");
                Some(record)
            }
            None => {
                warn!(engine_id = id, "Unregister of unknown engine ignored");
                None
            }
        }
    }

    /// Run one observer list with the lock released, so observers may call
    /// back into the controller. Observers added meanwhile run from the next event.
    fn notify_observers(&self, list: ObserverList, id: EngineId, event: &str) {
        let mut running = std::mem::take(list(&mut *self.observers.lock()));
        notify(&mut running, id, event);

        let mut observers = self.observers.lock();
        let current = list(&mut *observers);
        let added = std::mem::replace(current, running);
        current.extend(added);
    }

    /// Unregister `id` once `signal` resolves, unless that engine is already gone
    pub fn unregister_when(self: &Arc<Self>, id: EngineId, signal: Deferred<String>) {
        let Some(engine) = self.engine(id) else {
            return;
        };
        let controller: Weak<Self> = Arc::downgrade(self);
        let expected = Arc::downgrade(&engine);
        tokio::spawn(async move {
            let reason = signal.wait().await;
            let Some(controller) = controller.upgrade() else {
                return;
            };
            // The id may have been handed to a different engine since
            let same = controller
                .engine(id)
                .is_some_and(|current| Weak::ptr_eq(&Arc::downgrade(&current), &expected));
            if same {
                debug!(engine_id = id, reason = ?reason, "Engine connection closed");
                controller.unregister_engine(id);
            }
        });
    }

    /// Observe registrations. An observer that returns an error is removed.
    pub fn on_engine_registered<F>(&self, observer: F)
    where
        F: FnMut(EngineId) -> anyhow::Result<()> + Send + 'static,
    {
        self.observers.lock().on_register.push(Box::new(observer));
    }

    /// Observe unregistrations. An observer that returns an error is removed.
    pub fn on_engine_unregistered<F>(&self, observer: F)
    where
        F: FnMut(EngineId) -> anyhow::Result<()> + Send + 'static,
    {
        self.observers.lock().on_unregister.push(Box::new(observer));
    }

    /// Call `callback` once, the first time `n` engines are registered
    pub fn on_n_engines_registered<F>(&self, n: usize, callback: F)
    where
        F: FnOnce(usize) + Send + 'static,
    {
        let count = self.len();
        if count >= n {
            callback(count);
        } else {
            self.observers
                .lock()
                .thresholds
                .push((n, Box::new(callback)));
        }
    }

    pub fn engine(&self, id: EngineId) -> Option<Arc<QueuedEngine>> {
        self.registry
            .lock()
            .engines
            .get(&id)
            .map(|record| Arc::clone(&record.engine))
    }

    /// Registered ids in ascending order
    pub fn engine_ids(&self) -> Vec<EngineId> {
        self.registry.lock().engines.keys().copied().collect()
    }

    pub fn records(&self) -> Vec<EngineRecord> {
        self.registry.lock().engines.values().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.registry.lock().engines.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Unregister every engine and start over with a full id pool
    pub fn shutdown(&self) {
        for id in self.engine_ids() {
            self.unregister_engine(id);
        }
        self.registry.lock().pool = IdPool::new(self.config.max_engines, self.config.preserve_ids);
        info!("Controller shut down");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use cohort_engine::LocalEngine;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn local() -> Arc<dyn EngineCore> {
        Arc::new(LocalEngine::new(0))
    }

    #[test]
    fn test_id_pool_prefers_requested_then_smallest() {
        let mut pool = IdPool::new(4, false);
        assert_eq!(pool.take(Some(2)).unwrap(), 2);
        assert_eq!(pool.take(Some(2)).unwrap(), 0);
        assert_eq!(pool.take(None).unwrap(), 1);
        assert_eq!(pool.take(Some(99)).unwrap(), 3);
        assert!(matches!(
            pool.take(None),
            Err(EngineError::EnginePoolExhausted { max_engines: 4 })
        ));

        pool.release(2);
        assert_eq!(pool.take(None).unwrap(), 2);
    }

    #[test]
    fn test_preserved_ids_are_never_reused() {
        let mut pool = IdPool::new(2, true);
        let id = pool.take(None).unwrap();
        pool.release(id);
        assert_eq!(pool.take(Some(id)).unwrap(), 1);
    }

    #[tokio::test]
    async fn test_register_assigns_ids_and_rebinds_engine() {
        let controller = Controller::default();
        let first = controller.register_engine(local(), Registration::with_id(3)).await.unwrap();
        let second = controller.register_engine(local(), Registration::with_id(3)).await.unwrap();
        assert_eq!(first, 3);
        assert_ne!(second, 3);
        assert_eq!(controller.engine_ids(), vec![second, 3]);
        assert_eq!(controller.engine(3).unwrap().id(), 3);

        assert!(controller.unregister_engine(3).is_some());
        assert!(controller.unregister_engine(3).is_none());
        assert_eq!(
            controller.register_engine(local(), Registration::with_id(3)).await.unwrap(),
            3
        );
    }

    #[tokio::test]
    async fn test_failing_observer_is_removed() {
        let controller = Controller::default();
        let calls = Arc::new(AtomicUsize::new(0));
        let counted = Arc::clone(&calls);
        controller.on_engine_registered(|_| anyhow::bail!("broken observer"));
        controller.on_engine_registered(move |_| {
            counted.fetch_add(1, Ordering::SeqCst);
            Ok(())
        });

        controller.register_engine(local(), Registration::default()).await.unwrap();
        controller.register_engine(local(), Registration::default()).await.unwrap();
        assert_eq!(calls.load(Ordering::SeqCst), 2);
        assert_eq!(controller.observers.lock().on_register.len(), 1);
    }

    #[tokio::test]
    async fn test_observer_may_call_back_into_controller() {
        let controller = Arc::new(Controller::default());
        let fired = Arc::new(AtomicUsize::new(0));

        let weak = Arc::downgrade(&controller);
        let counter = Arc::clone(&fired);
        controller.on_engine_registered(move |_| {
            let Some(controller) = weak.upgrade() else {
                anyhow::bail!("controller dropped");
            };
            let seen = Arc::clone(&counter);
            controller.on_engine_unregistered(move |_| {
                seen.fetch_add(1, Ordering::SeqCst);
                Ok(())
            });
            let seen = Arc::clone(&counter);
            controller.on_n_engines_registered(1, move |_| {
                seen.fetch_add(10, Ordering::SeqCst);
            });
            Ok(())
        });

        let id = tokio::time::timeout(
            std::time::Duration::from_secs(2),
            controller.register_engine(local(), Registration::default()),
        )
        .await
        .expect("registration must not block on its own observer")
        .unwrap();
        assert_eq!(fired.load(Ordering::SeqCst), 10);
        assert_eq!(controller.observers.lock().on_register.len(), 1);

        controller.unregister_engine(id);
        assert_eq!(fired.load(Ordering::SeqCst), 11);
    }

    #[tokio::test]
    async fn test_on_n_engines_registered_fires_once() {
        let controller = Controller::default();
        let fired = Arc::new(AtomicUsize::new(0));

        let counter = Arc::clone(&fired);
        controller.on_n_engines_registered(2, move |_| {
            counter.fetch_add(1, Ordering::SeqCst);
        });
        controller.register_engine(local(), Registration::default()).await.unwrap();
        assert_eq!(fired.load(Ordering::SeqCst), 0);
        controller.register_engine(local(), Registration::default()).await.unwrap();
        controller.register_engine(local(), Registration::default()).await.unwrap();
        assert_eq!(fired.load(Ordering::SeqCst), 1);

        // Already reached: fires immediately
        let counter = Arc::clone(&fired);
        controller.on_n_engines_registered(1, move |count| {
            assert_eq!(count, 3);
            counter.fetch_add(1, Ordering::SeqCst);
        });
        assert_eq!(fired.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_unregister_when_signal_resolves() {
        let controller = Arc::new(Controller::default());
        let id = controller.register_engine(local(), Registration::default()).await.unwrap();
        let signal = Deferred::new();
        controller.unregister_when(id, signal.clone());

        signal.resolve(Ok("gone".to_string()));
        for _ in 0..10 {
            if controller.is_empty() {
                break;
            }
            tokio::task::yield_now().await;
        }
        assert!(controller.is_empty());
    }

    #[tokio::test]
    async fn test_shutdown_rebuilds_pool() {
        let controller = Controller::new(ControllerConfig {
            max_engines: 2,
            preserve_ids: true,
        });
        controller.register_engine(local(), Registration::default()).await.unwrap();
        controller.register_engine(local(), Registration::default()).await.unwrap();
        assert!(controller.register_engine(local(), Registration::default()).await.is_err());

        controller.shutdown();
        assert!(controller.is_empty());
        assert_eq!(
            controller.register_engine(local(), Registration::default()).await.unwrap(),
            0
        );
    }
}
