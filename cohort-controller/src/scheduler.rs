//! Task scheduler with retry and recovery
//!
//! Tasks wait in a FIFO queue until an idle engine is available. A failed
//! attempt is retried while the task has retries left; after that its
//! recovery task, if any, runs in its place under the same task id.
//! Otherwise the failure becomes the task's result.

use chrono::{DateTime, Utc};
use cohort_config::SchedulerConfig;
use cohort_core::{Code, Deferred, EngineError, EngineId, Result};
use parking_lot::Mutex;
use serde_json::Value as JsonValue;
use std::collections::{BTreeSet, HashMap, VecDeque};
use std::sync::{Arc, Weak};
use tracing::{debug, info, warn};

use crate::controller::Controller;
use crate::queued::QueuedEngine;
use crate::task::{Task, TaskId, TaskResult, TaskState};

struct QueuedTask {
    id: TaskId,
    task: Task,
    attempts: u32,
    recovered: bool,
    submitted_at: DateTime<Utc>,
}

#[derive(Default)]
struct SchedulerState {
    next_id: TaskId,
    queue: VecDeque<QueuedTask>,
    idle: BTreeSet<EngineId>,
    running: HashMap<TaskId, EngineId>,
    states: HashMap<TaskId, TaskState>,
    results: HashMap<TaskId, Deferred<TaskResult>>,
}

struct Shared {
    controller: Arc<Controller>,
    config: SchedulerConfig,
    state: Mutex<SchedulerState>,
}

pub struct TaskScheduler {
    shared: Arc<Shared>,
}

impl TaskScheduler {
    /// Schedule onto the controller's engines, including ones that join later
    pub fn new(controller: Arc<Controller>, config: SchedulerConfig) -> Self {
        let state = SchedulerState {
            idle: controller.engine_ids().into_iter().collect(),
            ..SchedulerState::default()
        };
        let shared = Arc::new(Shared {
            controller: Arc::clone(&controller),
            config,
            state: Mutex::new(state),
        });

        let joined: Weak<Shared> = Arc::downgrade(&shared);
        controller.on_engine_registered(move |id| {
            let shared = joined
                .upgrade()
                .ok_or_else(|| anyhow::anyhow!("scheduler dropped"))?;
            shared.state.lock().idle.insert(id);
            pump(&shared);
            Ok(())
        });
        let left: Weak<Shared> = Arc::downgrade(&shared);
        controller.on_engine_unregistered(move |id| {
            let shared = left
                .upgrade()
                .ok_or_else(|| anyhow::anyhow!("scheduler dropped"))?;
            shared.state.lock().idle.remove(&id);
            Ok(())
        });

        Self { shared }
    }

    /// A task seeded with the configured default retry budget
    pub fn task(&self, code: impl Into<Code>) -> Task {
        Task::new(code).retries(self.shared.config.default_retries)
    }

    /// Queue a task and return its id. Does not wait for it to run.
    pub fn run(&self, mut task: Task) -> TaskId {
        if self.shared.config.clear_between_tasks {
            task.clear_before = true;
        }

        let id = {
            let mut state = self.shared.state.lock();
            let id = state.next_id;
            state.next_id += 1;
            state.queue.push_back(QueuedTask {
                id,
                task,
                attempts: 0,
                recovered: false,
                submitted_at: Utc::now(),
            });
            state.states.insert(id, TaskState::Queued);
            state.results.insert(id, Deferred::new());
            id
        };
        debug!(task_id = id, "Task submitted");

        pump(&self.shared);
        id
    }

    /// Queue a task and wait for its result
    pub async fn run_and_wait(&self, task: Task) -> Result<TaskResult> {
        let id = self.run(task);
        self.get_task_result(id, true).await
    }

    /// Read a task's result without consuming it.
    ///
    /// Without `block`, an unfinished task reports `ResultNotCompleted`.
    pub async fn get_task_result(&self, task_id: TaskId, block: bool) -> Result<TaskResult> {
        let deferred = self
            .shared
            .state
            .lock()
            .results
            .get(&task_id)
            .cloned()
            .ok_or_else(|| EngineError::index_error(format!("no task with id {task_id}")))?;

        if block {
            deferred.wait().await
        } else {
            deferred.peek().unwrap_or(Err(EngineError::ResultNotCompleted {
                id: task_id.to_string(),
            }))
        }
    }

    /// Stop a task that has not started yet
    pub fn abort(&self, task_id: TaskId) -> Result<()> {
        let mut state = self.shared.state.lock();
        if let Some(position) = state.queue.iter().position(|queued| queued.id == task_id) {
            state.queue.remove(position);
            state.states.insert(task_id, TaskState::Aborted);
            if let Some(result) = state.results.get(&task_id) {
                result.resolve(Err(EngineError::TaskAborted { task_id }));
            }
            info!(task_id, "Task aborted");
            return Ok(());
        }

        let reason = match state.states.get(&task_id) {
            Some(TaskState::Running) => "is running and cannot be aborted",
            Some(_) => "has already finished",
            None => "does not exist",
        };
        Err(EngineError::index_error(format!("task {task_id} {reason}")))
    }

    /// [`TaskScheduler::abort`] for ids that arrive as untyped values
    pub fn abort_value(&self, task_id: &JsonValue) -> Result<()> {
        let id = task_id.as_u64().ok_or_else(|| {
            EngineError::type_error(format!(
                "task id must be a non-negative integer, got {task_id}"
            ))
        })?;
        self.abort(id)
    }

    /// Forget every finished task. Returns how many were dropped.
    pub fn clear(&self) -> usize {
        let mut state = self.shared.state.lock();
        let finished: Vec<TaskId> = state
            .states
            .iter()
            .filter(|(_, task_state)| task_state.is_finished())
            .map(|(id, _)| *id)
            .collect();
        for id in &finished {
            state.states.remove(id);
            state.results.remove(id);
        }
        debug!(cleared = finished.len(), "Cleared task results");
        finished.len()
    }

    pub fn task_state(&self, task_id: TaskId) -> Option<TaskState> {
        self.shared.state.lock().states.get(&task_id).copied()
    }

    /// Tasks waiting for an engine
    pub fn queue_len(&self) -> usize {
        self.shared.state.lock().queue.len()
    }

    pub fn idle_engines(&self) -> Vec<EngineId> {
        self.shared.state.lock().idle.iter().copied().collect()
    }
}

/// Hand queued tasks to idle engines until one of the two runs out
fn pump(shared: &Arc<Shared>) {
    loop {
        let (item, engine) = {
            let mut state = shared.state.lock();
            if state.queue.is_empty() {
                return;
            }
            let Some(engine_id) = state.idle.pop_first() else {
                return;
            };
            let Some(engine) = shared.controller.engine(engine_id) else {
                continue;
            };
            let Some(item) = state.queue.pop_front() else {
                return;
            };
            state.running.insert(item.id, engine_id);
            state.states.insert(item.id, TaskState::Running);
            (item, engine)
        };

        debug!(task_id = item.id, engine_id = engine.id(), "Dispatching task");
        tokio::spawn(run_attempt(Arc::clone(shared), item, engine));
    }
}

async fn run_attempt(shared: Arc<Shared>, mut item: QueuedTask, engine: Arc<QueuedEngine>) {
    let engine_id = engine.id();
    item.attempts += 1;
    let outcome = item.task.run_on(&engine).await;

    let finished = {
        let mut state = shared.state.lock();
        state.running.remove(&item.id);
        let still_registered = shared
            .controller
            .engine(engine_id)
            .is_some_and(|current| Arc::ptr_eq(&current, &engine));
        if still_registered {
            state.idle.insert(engine_id);
        }

        let settled = match outcome {
            Ok(ns) => {
                let task_state = if item.recovered {
                    TaskState::Recovered
                } else {
                    TaskState::Succeeded
                };
                state.states.insert(item.id, task_state);
                Some((item, Ok(ns)))
            }
            Err(err) if item.task.retries > 0 => {
                item.task.retries -= 1;
                debug!(
                    task_id = item.id,
                    engine_id,
                    retries_left = item.task.retries,
                    error = %err,
                    "Task failed, retrying"
                );
                state.states.insert(item.id, TaskState::Queued);
                state.queue.push_front(item);
                None
            }
            Err(err) => match item.task.recovery_task.take() {
                Some(recovery) => {
                    info!(
                        task_id = item.id,
                        engine_id,
                        error = %err,
                        "Task failed, running recovery task"
                    );
                    item.task = *recovery;
                    item.recovered = true;
                    state.states.insert(item.id, TaskState::Queued);
                    state.queue.push_front(item);
                    None
                }
                None => {
                    warn!(task_id = item.id, engine_id, error = %err, "Task failed");
                    state.states.insert(item.id, TaskState::Failed);
                    Some((item, Err(err)))
                }
            },
        };
        settled.map(|(item, outcome)| {
            let result = state.results.get(&item.id).cloned();
            (item, outcome, result)
        })
    };

    if let Some((item, outcome, Some(result))) = finished {
        let (ns, failure) = match outcome {
            Ok(ns) => (ns, None),
            Err(err) => (Default::default(), Some(err)),
        };
        result.resolve(Ok(TaskResult {
            task_id: item.id,
            ns,
            failure,
            engine_id: Some(engine_id),
            attempts: item.attempts,
            recovered: item.recovered,
            submitted_at: item.submitted_at,
            completed_at: Utc::now(),
        }));
    }

    pump(&shared);
}
