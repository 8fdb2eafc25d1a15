//! FIFO command queue in front of one engine
//!
//! At most one command per engine is in flight. Commands run in submission
//! order; when one fails, everything queued behind it is failed with
//! `QueueCleared` and the queue starts fresh with the next submission.

use cohort_core::{Deferred, EngineError, EngineId};
use cohort_engine::EngineCore;
use futures::FutureExt;
use parking_lot::Mutex;
use serde::Serialize;
use std::any::Any;
use std::collections::VecDeque;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use tracing::{debug, warn};

use crate::command::{CommandOutput, EngineCommand};

struct QueuedCommand {
    command: EngineCommand,
    description: String,
    result: Deferred<CommandOutput>,
}

#[derive(Default)]
struct QueueState {
    pending: VecDeque<QueuedCommand>,
    /// Description of the command in flight
    current: Option<String>,
}

/// Snapshot of one engine's queue
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct QueueStatus {
    pub engine_id: EngineId,
    pub queue: Vec<String>,
    pub pending: Option<String>,
}

pub struct QueuedEngine {
    engine: Arc<dyn EngineCore>,
    state: Arc<Mutex<QueueState>>,
}

impl QueuedEngine {
    pub fn new(engine: Arc<dyn EngineCore>) -> Self {
        Self {
            engine,
            state: Arc::new(Mutex::new(QueueState::default())),
        }
    }

    pub fn id(&self) -> EngineId {
        self.engine.id()
    }

    /// The wrapped engine, bypassing the queue
    pub fn engine(&self) -> &Arc<dyn EngineCore> {
        &self.engine
    }

    /// Queue a command. The returned cell resolves with its outcome.
    pub fn submit(&self, command: EngineCommand) -> Deferred<CommandOutput> {
        let result = Deferred::new();
        let queued = QueuedCommand {
            description: command.describe(),
            command,
            result: result.clone(),
        };

        let start = {
            let mut state = self.state.lock();
            if state.current.is_some() {
                debug!(engine_id = self.id(), command = %queued.description, "Queueing command");
                state.pending.push_back(queued);
                None
            } else {
                state.current = Some(queued.description.clone());
                Some(queued)
            }
        };

        if let Some(first) = start {
            tokio::spawn(drain(
                Arc::clone(&self.engine),
                Arc::clone(&self.state),
                first,
            ));
        }
        result
    }

    pub fn queue_status(&self) -> QueueStatus {
        let state = self.state.lock();
        QueueStatus {
            engine_id: self.id(),
            queue: state.pending.iter().map(|q| q.description.clone()).collect(),
            pending: state.current.clone(),
        }
    }

    /// True when nothing is running or queued
    pub fn is_idle(&self) -> bool {
        self.state.lock().current.is_none()
    }
}

/// Run commands until the queue is empty or one of them fails
async fn drain(
    engine: Arc<dyn EngineCore>,
    state: Arc<Mutex<QueueState>>,
    first: QueuedCommand,
) {
    let mut next = Some(first);
    while let Some(item) = next.take() {
        let engine_id = engine.id();
        let outcome = AssertUnwindSafe(item.command.apply(engine.as_ref()))
            .catch_unwind()
            .await
            .unwrap_or_else(|payload| Err(panic_failure(engine_id, &item.description, payload)));

        // Settle the queue before waking anyone, so a caller reacting to this
        // outcome sees the queue in its final state.
        let cleared = {
            let mut state = state.lock();
            if outcome.is_ok() {
                next = state.pending.pop_front();
                state.current = next.as_ref().map(|q| q.description.clone());
                Vec::new()
            } else {
                state.current = None;
                state.pending.drain(..).collect::<Vec<_>>()
            }
        };

        if let Err(err) = &outcome {
            if !cleared.is_empty() {
                warn!(
                    engine_id,
                    command = %item.description,
                    dropped = cleared.len(),
                    "Command failed, clearing queue"
                );
            }
            let reason = format!("{} failed: {}", item.description, err);
            for queued in cleared {
                queued.result.resolve(Err(EngineError::QueueCleared {
                    engine_id: Some(engine_id),
                    reason: reason.clone(),
                }));
            }
        }
        item.result.resolve(outcome);
    }
}

/// A command that panicked fails like any other, so the queue keeps moving
fn panic_failure(
    engine_id: EngineId,
    description: &str,
    payload: Box<dyn Any + Send>,
) -> EngineError {
    let message = payload
        .downcast_ref::<&str>()
        .map(|s| s.to_string())
        .or_else(|| payload.downcast_ref::<String>().cloned())
        .unwrap_or_else(|| "engine panicked".to_string());
    warn!(engine_id, command = %description, panic = %message, "Command panicked");
    EngineError::execution("SystemError", message)
}

#[cfg(test)]
mod tests {
    use super::*;
    use cohort_core::{Callable, Code};
    use cohort_engine::LocalEngine;
    use serde_json::{json, Value as JsonValue};
    use std::time::Duration;

    fn queued() -> QueuedEngine {
        QueuedEngine::new(Arc::new(LocalEngine::new(0)))
    }

    #[tokio::test]
    async fn test_commands_run_in_submission_order() {
        let engine = queued();
        let results: Vec<_> = (0..10)
            .map(|i| engine.submit(EngineCommand::Execute(Code::from(format!("print({i})")))))
            .collect();

        for (i, result) in results.into_iter().enumerate() {
            let executed = result.wait().await.unwrap().into_executed().unwrap();
            assert_eq!(executed.stdout, format!("{i}\n"));
            assert_eq!(executed.execution_count, i as u64);
        }
        assert!(engine.is_idle());
    }

    #[tokio::test]
    async fn test_failure_clears_queue() {
        let engine = queued();
        let first = engine.submit(EngineCommand::Execute(Code::from("a = 1")));
        let failing = engine.submit(EngineCommand::Execute(Code::from("undefined_name")));
        let dropped: Vec<_> = (0..3)
            .map(|_| engine.submit(EngineCommand::Execute(Code::from("a = a + 1"))))
            .collect();

        assert!(first.wait().await.is_ok());
        assert_eq!(failing.wait().await.unwrap_err().ename(), "ReferenceError");
        for result in dropped {
            assert!(matches!(
                result.wait().await,
                Err(EngineError::QueueCleared { engine_id: Some(0), .. })
            ));
        }

        // The queue takes new work straight away, and the cleared commands never ran
        let pulled = engine
            .submit(EngineCommand::Pull(vec!["a".into()]))
            .wait()
            .await
            .unwrap();
        assert_eq!(pulled.into_values().unwrap(), vec![json!(1)]);
    }

    #[tokio::test]
    async fn test_oversized_allocation_fails_without_jamming_queue() {
        let engine = queued();
        let failing = engine.submit(EngineCommand::Execute(Code::from(
            "x = new Array(2 ** 40).fill(1)",
        )));
        let behind = engine.submit(EngineCommand::Keys);

        let err = tokio::time::timeout(Duration::from_secs(5), failing.wait())
            .await
            .expect("failing command must resolve")
            .unwrap_err();
        assert_eq!(err.ename(), "RangeError");
        assert!(matches!(
            behind.wait().await,
            Err(EngineError::QueueCleared { .. })
        ));
        assert!(engine.is_idle());
        assert!(engine.submit(EngineCommand::Keys).wait().await.is_ok());
    }

    #[tokio::test]
    async fn test_panicking_command_fails_and_queue_recovers() {
        let engine = queued();
        let explode = Callable::new("explode", |_, _| -> cohort_core::Result<JsonValue> {
            panic!("native code blew up")
        });
        let failing = engine.submit(EngineCommand::Execute(Code::call(explode, vec![])));
        let dropped = engine.submit(EngineCommand::Keys);

        let err = failing.wait().await.unwrap_err();
        assert_eq!(err.ename(), "SystemError");
        assert!(err.to_string().contains("native code blew up"));
        assert!(matches!(
            dropped.wait().await,
            Err(EngineError::QueueCleared { engine_id: Some(0), .. })
        ));
        assert!(engine.is_idle());

        // The engine itself is still usable
        let keys = engine.submit(EngineCommand::Keys).wait().await.unwrap();
        assert!(keys.into_keys().is_ok());
    }

    #[tokio::test]
    async fn test_queue_status() {
        let engine = queued();
        assert_eq!(engine.queue_status().pending, None);

        let results: Vec<_> = (0..3)
            .map(|_| engine.submit(EngineCommand::Keys))
            .collect();
        let status = engine.queue_status();
        assert_eq!(status.pending.as_deref(), Some("keys()"));
        assert_eq!(status.queue, vec!["keys()".to_string(); 2]);

        for result in results {
            result.wait().await.unwrap();
        }
        assert_eq!(engine.queue_status().queue.len(), 0);
    }
}
